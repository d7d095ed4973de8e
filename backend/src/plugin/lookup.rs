//! Three-outcome typed lookup
//!
//! Lookups by type either find exactly one match, find none, or find several.
//! The last two are distinct errors so callers can tell a missing
//! contribution from an ambiguous one.

use crate::error::{ContractError, ErrorKind, NucleusResult};

/// Return the single item of `matches`
///
/// Fails with `unknown` when there is none and `ambiguous` when there are
/// several. `what` names the requested type in the error details.
pub fn find_unique<T>(
    matches: impl IntoIterator<Item = T>,
    unknown: ErrorKind,
    ambiguous: ErrorKind,
    what: &str,
) -> NucleusResult<T> {
    let mut iter = matches.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| ContractError::with_details(unknown, what.to_string()))?;
    if iter.next().is_some() {
        return Err(ContractError::with_details(ambiguous, what.to_string()));
    }
    Ok(first)
}
