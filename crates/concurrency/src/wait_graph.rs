//! Wait-for graph cycle detection
//!
//! The graph is never materialized. Callers supply a function returning the
//! sessions a given session is blocked on, and the walk follows it
//! depth-first from the requester.

use hyperstore_core::SessionId;
use rustc_hash::FxHashSet;

/// Find a wait-for cycle that passes through `start`
///
/// Returns the cycle as the sequence of sessions from `start` back to the
/// last session before `start`, or `None` if `start` is not on a cycle.
pub fn find_cycle<F>(start: SessionId, blockers: F) -> Option<Vec<SessionId>>
where
    F: Fn(SessionId) -> Vec<SessionId>,
{
    let mut visited = FxHashSet::default();
    let mut path = vec![start];
    // Stack of (session, remaining blockers to explore)
    let mut stack = vec![blockers(start)];
    visited.insert(start);

    while let Some(pending) = stack.last_mut() {
        match pending.pop() {
            Some(next) if next == start => return Some(path),
            Some(next) => {
                if visited.insert(next) {
                    path.push(next);
                    stack.push(blockers(next));
                }
            }
            None => {
                stack.pop();
                path.pop();
            }
        }
    }
    None
}
