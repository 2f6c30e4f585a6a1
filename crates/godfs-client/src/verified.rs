//! Pure selection logic.

use std::collections::HashMap;

use godfs_types::ServerAddr;

/// Pick the candidate with the lowest cumulative usage.
///
/// Servers in `excluded` are skipped. Ties go to the earliest candidate in
/// iteration order. Servers missing from `usage` count as unused.
pub fn least_used<'a>(
    candidates: &'a [ServerAddr],
    usage: &HashMap<ServerAddr, u64>,
    excluded: &[ServerAddr],
) -> Option<&'a ServerAddr> {
    candidates
        .iter()
        .filter(|server| !excluded.contains(server))
        .min_by_key(|server| usage.get(*server).copied().unwrap_or(0))
}
