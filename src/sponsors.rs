use std::collections::HashSet;

use serde::Serialize;

use crate::documents::User;
use crate::errors::LedgerError;
use crate::store::{decode, LedgerStore, USERS};

/// Referral bonuses reach at most this many ancestor levels.
pub const MAX_SPONSOR_DEPTH: usize = 3;

/// Looks a user up by referral code. The code is a denormalized reference,
/// so zero matches is a normal outcome; more than one is corrupted referral
/// data.
pub fn find_by_trader_id(
    store: &dyn LedgerStore,
    as_trader_id: &str,
) -> Result<Option<User>, LedgerError> {
    let mut matches = store.query_equals(USERS, "asTraderId", as_trader_id)?;
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(decode(matches.remove(0))?)),
        n => Err(LedgerError::Consistency(format!(
            "referral code {} resolves to {} users",
            as_trader_id, n
        ))),
    }
}

/// Walks `referredBy` one hop per step, up to `depth` levels. The chain ends
/// without error on a missing or dangling link; a hop back onto an already
/// visited code is a cycle and fails the resolution.
pub fn resolve_sponsor_chain(
    store: &dyn LedgerStore,
    user: &User,
    depth: usize,
) -> Result<Vec<User>, LedgerError> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    visited.insert(user.as_trader_id.clone());
    let mut next_code = user.referred_by.clone();
    while chain.len() < depth {
        let code = match next_code {
            Some(code) if !code.is_empty() => code,
            _ => break,
        };
        if !visited.insert(code.clone()) {
            return Err(LedgerError::Consistency(format!(
                "sponsor chain of {} cycles at {}",
                user.user_id, code
            )));
        }
        let sponsor = match find_by_trader_id(store, &code)? {
            Some(sponsor) => sponsor,
            None => break,
        };
        next_code = sponsor.referred_by.clone();
        chain.push(sponsor);
    }
    Ok(chain)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownlineCounts {
    pub direct_members: u64,
    pub total_downline: u64,
}

/// Counts the downline of a referral code, level by level, with an explicit
/// accumulator. The visited set keeps cyclic referral data from looping.
pub fn downline_counts(
    store: &dyn LedgerStore,
    as_trader_id: &str,
) -> Result<DownlineCounts, LedgerError> {
    let mut counts = DownlineCounts::default();
    let mut visited = HashSet::new();
    visited.insert(as_trader_id.to_string());
    let mut frontier = vec![as_trader_id.to_string()];
    let mut level = 0;
    while !frontier.is_empty() {
        level += 1;
        let mut next_frontier = Vec::new();
        for code in &frontier {
            for doc in store.query_equals(USERS, "referredBy", code)? {
                let member: User = decode(doc)?;
                if !visited.insert(member.as_trader_id.clone()) {
                    continue;
                }
                if level == 1 {
                    counts.direct_members += 1;
                }
                counts.total_downline += 1;
                next_frontier.push(member.as_trader_id);
            }
        }
        frontier = next_frontier;
    }
    Ok(counts)
}
