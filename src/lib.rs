//! # Ostello (Identity & Session Service)
//!
//! `ostello` is the credential and session authority of the Ostello hostel
//! platform. It handles password-based login with JWT issuance, per-device
//! session tracking and revocation, email-code multi-factor authentication,
//! and out-of-band password recovery.
//!
//! ## Sessions
//!
//! Every issued token is paired with exactly one server-side session row.
//! The database stores only a SHA-256 hash of the token; a token whose
//! session has been revoked or has passed its fixed deadline is rejected
//! even when its signature still validates. Session lifetime is bounded:
//! activity advances `last_activity` but never extends `expires_at`.
//!
//! ## One-time codes
//!
//! MFA challenge codes (6 digits, 10 minutes) and password reset codes
//! (8 characters, 30 minutes) are single-use and keyed per user: issuing a
//! new code supersedes the previous one atomically. Delivery goes through a
//! transactional email outbox so a slow or failing mailer never stalls
//! issuance or verification.
//!
//! ## External identity
//!
//! A Google authorization code can be exchanged for a verified email; first
//! contact creates a password-less `customer` account. Users with MFA
//! enabled are challenged on this path too unless explicitly configured
//! otherwise.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
