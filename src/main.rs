use std::{error::Error, sync::Arc};

use axum::{
    http::{
        header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_LANGUAGE, CONTENT_TYPE},
        Method,
    },
    routing::{get, post},
    serve, Router,
};
use bonus::handle_distribute_bonus;
use clap::{ArgAction, Parser};
use dashboard::handle_get_dashboard;
use log::{info, Level};
use mysql_store::MysqlLedger;
use purchases::{handle_activate_package, handle_buy_package};
use roi_engine::handle_trigger_roi_update;
use scheduler::DailyTick;
use signup::handle_signup;
use stderrlog::Timestamp;
use store::LedgerStore;
use tokio::{net::TcpListener, task::JoinSet};
use tower_http::cors::{Any, CorsLayer};
use withdrawal::{handle_accept_withdrawal, handle_remove_withdrawal, handle_withdraw};

mod bonus;
mod dashboard;
mod documents;
mod errors;
#[cfg(test)]
mod mem_store;
mod mysql_store;
mod purchases;
mod roi_engine;
mod scheduler;
mod signup;
mod sponsors;
mod store;
mod withdrawal;

#[derive(Parser, Debug)]
pub struct Args {
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    #[arg(long)]
    pub mysql_user: String,

    #[arg(long)]
    pub mysql_password: String,

    #[arg(long)]
    pub mysql_host: String,

    #[arg(long, default_value_t = 3306)]
    pub mysql_port: u16,

    #[arg(long)]
    pub mysql_database: String,

    #[arg(long, default_value = "24h")]
    pub tick_period: String,

    // Added for suspending accrual during data migrations.
    #[arg(long, default_value="false", default_missing_value="true", num_args(0..=1), action=ArgAction::Set)]
    pub dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let tick_period = parse_duration::parse(&args.tick_period)?;

    stderrlog::new()
        .verbosity(Level::Info)
        .timestamp(Timestamp::Millisecond)
        .init()
        .unwrap();

    let mysql_url = format!(
        "mysql://{}:{}@{}:{}/{}",
        args.mysql_user, args.mysql_password, args.mysql_host, args.mysql_port, args.mysql_database
    );
    let mysql_display_url = format!(
        "mysql://{}:{}@{}:{}/{}",
        args.mysql_user, "********", args.mysql_host, args.mysql_port, args.mysql_database
    );
    info!(
        "Connecting to the database with URL {} ...",
        mysql_display_url
    );
    let store: Arc<dyn LedgerStore> = Arc::new(MysqlLedger::connect(mysql_url.as_str())?);
    info!("Successfully created the document store.");

    let mut exec_set: JoinSet<()> = JoinSet::new();

    let mut daily_tick = DailyTick::new(tick_period, Arc::clone(&store), args.dry_run);
    exec_set.spawn(async move {
        daily_tick.ticker().await;
    });

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers([ACCEPT, ACCEPT_LANGUAGE, CONTENT_LANGUAGE, CONTENT_TYPE]);

    let app = Router::new()
        .route("/", get(|| async { "AsTrader Backend" }))
        .route(
            "/signup",
            post({
                let store = Arc::clone(&store);
                move |input| handle_signup(input, store)
            }),
        )
        .route(
            "/dashboard",
            get({
                let store = Arc::clone(&store);
                move |params| handle_get_dashboard(params, store)
            }),
        )
        .route(
            "/buy_package",
            post({
                let store = Arc::clone(&store);
                move |input| handle_buy_package(input, store)
            }),
        )
        .route(
            "/activate_package",
            post({
                let store = Arc::clone(&store);
                move |input| handle_activate_package(input, store)
            }),
        )
        .route(
            "/trigger_roi_update",
            post({
                let store = Arc::clone(&store);
                move || handle_trigger_roi_update(store)
            }),
        )
        .route(
            "/distribute_bonus",
            post({
                let store = Arc::clone(&store);
                move |input| handle_distribute_bonus(input, store)
            }),
        )
        .route(
            "/withdraw",
            post({
                let store = Arc::clone(&store);
                move |input| handle_withdraw(input, store)
            }),
        )
        .route(
            "/accept_withdrawal",
            post({
                let store = Arc::clone(&store);
                move |input| handle_accept_withdrawal(input, store)
            }),
        )
        .route(
            "/remove_withdrawal",
            post({
                let store = Arc::clone(&store);
                move |input| handle_remove_withdrawal(input, store)
            }),
        )
        .layer(cors);

    let tcp_listener = TcpListener::bind(format!("0.0.0.0:{}", args.port))
        .await
        .unwrap();

    info!("Starting server at port {}", args.port);
    serve(tcp_listener, app).await.unwrap();
    Ok(())
}
