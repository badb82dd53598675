//! Single-use, time-bounded code evaluation shared by the MFA challenge and
//! password recovery flows.

use chrono::{DateTime, Utc};

/// Outstanding code for a user. At most one exists per user and flow;
/// issuing a new code overwrites it.
#[derive(Clone, Debug)]
pub(crate) struct OneTimeCode {
    pub(crate) code_hash: Vec<u8>,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) consumed: bool,
}

/// Outcome of evaluating a supplied code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum CodeOutcome {
    Verified,
    CodeInvalid,
    CodeExpired,
}

/// Pure decision over a loaded code row. Checked in order: a row exists,
/// it matches and is unconsumed, it is unexpired. A mismatch is always
/// invalid; an expired-but-otherwise-correct code is reported as expired.
pub(crate) fn evaluate(
    row: Option<&OneTimeCode>,
    supplied_hash: &[u8],
    now: DateTime<Utc>,
) -> CodeOutcome {
    let Some(row) = row else {
        return CodeOutcome::CodeInvalid;
    };
    if row.consumed || row.code_hash != supplied_hash {
        return CodeOutcome::CodeInvalid;
    }
    if row.expires_at <= now {
        return CodeOutcome::CodeExpired;
    }
    CodeOutcome::Verified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::utils::hash_code;
    use chrono::Duration;

    fn row(code: &str, expires_in_seconds: i64, consumed: bool) -> OneTimeCode {
        OneTimeCode {
            code_hash: hash_code(code),
            expires_at: Utc::now() + Duration::seconds(expires_in_seconds),
            consumed,
        }
    }

    #[test]
    fn missing_row_is_invalid() {
        let outcome = evaluate(None, &hash_code("123456"), Utc::now());
        assert_eq!(outcome, CodeOutcome::CodeInvalid);
    }

    #[test]
    fn matching_fresh_code_verifies() {
        let row = row("123456", 600, false);
        let outcome = evaluate(Some(&row), &hash_code("123456"), Utc::now());
        assert_eq!(outcome, CodeOutcome::Verified);
    }

    #[test]
    fn mismatch_is_invalid_even_when_expired() {
        let row = row("123456", -10, false);
        let outcome = evaluate(Some(&row), &hash_code("654321"), Utc::now());
        assert_eq!(outcome, CodeOutcome::CodeInvalid);
    }

    #[test]
    fn expired_matching_code_is_expired() {
        let row = row("123456", -10, false);
        let outcome = evaluate(Some(&row), &hash_code("123456"), Utc::now());
        assert_eq!(outcome, CodeOutcome::CodeExpired);
    }

    #[test]
    fn consumed_code_replays_as_invalid() {
        let row = row("123456", 600, true);
        let outcome = evaluate(Some(&row), &hash_code("123456"), Utc::now());
        assert_eq!(outcome, CodeOutcome::CodeInvalid);
    }

    #[test]
    fn superseded_code_no_longer_matches() {
        // Issuing a new code replaces the stored hash, so the old code now
        // evaluates as a mismatch.
        let stored = row("222222", 600, false);
        let outcome = evaluate(Some(&stored), &hash_code("111111"), Utc::now());
        assert_eq!(outcome, CodeOutcome::CodeInvalid);
    }
}
