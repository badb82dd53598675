//! Auth configuration and shared state.

use anyhow::{Context, Result};
use secrecy::SecretString;

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_MFA_CODE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_MFA_CODE_LENGTH: usize = 6;
const DEFAULT_RESET_CODE_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_RESET_CODE_LENGTH: usize = 8;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 5 * 60;
const ENV_OAUTH_MFA_GATED: &str = "OSTELLO_OAUTH_MFA_GATED";

const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Google OAuth client settings for the external identity exchange.
/// Endpoints are overridable so tests never leave the process.
#[derive(Clone, Debug)]
pub struct GoogleConfig {
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
    auth_endpoint: String,
    token_endpoint: String,
    userinfo_endpoint: String,
}

impl GoogleConfig {
    #[must_use]
    pub fn new(client_id: String, client_secret: SecretString, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            auth_endpoint: GOOGLE_AUTH_ENDPOINT.to_string(),
            token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
            userinfo_endpoint: GOOGLE_USERINFO_ENDPOINT.to_string(),
        }
    }

    #[must_use]
    pub fn with_token_endpoint(mut self, endpoint: String) -> Self {
        self.token_endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn with_userinfo_endpoint(mut self, endpoint: String) -> Self {
        self.userinfo_endpoint = endpoint;
        self
    }

    pub(super) fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(super) fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    pub(super) fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub(super) fn auth_endpoint(&self) -> &str {
        &self.auth_endpoint
    }

    pub(super) fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    pub(super) fn userinfo_endpoint(&self) -> &str {
        &self.userinfo_endpoint
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    jwt_secret: SecretString,
    token_ttl_seconds: i64,
    mfa_code_ttl_seconds: i64,
    mfa_code_length: usize,
    reset_code_ttl_seconds: i64,
    reset_code_length: usize,
    sweep_interval_seconds: u64,
    oauth_mfa_gated: bool,
    google: Option<GoogleConfig>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, jwt_secret: SecretString) -> Self {
        Self {
            frontend_base_url,
            jwt_secret,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            mfa_code_ttl_seconds: DEFAULT_MFA_CODE_TTL_SECONDS,
            mfa_code_length: DEFAULT_MFA_CODE_LENGTH,
            reset_code_ttl_seconds: DEFAULT_RESET_CODE_TTL_SECONDS,
            reset_code_length: DEFAULT_RESET_CODE_LENGTH,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            oauth_mfa_gated: true,
            google: None,
        }
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_mfa_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.mfa_code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval_seconds = seconds;
        self
    }

    /// Whether a user with MFA enabled is challenged on the external
    /// identity exchange path as well. Defaults to gated.
    #[must_use]
    pub fn with_oauth_mfa_gated(mut self, gated: bool) -> Self {
        self.oauth_mfa_gated = gated;
        self
    }

    #[must_use]
    pub fn with_oauth_mfa_gated_from_env(self) -> Self {
        let gated = parse_bool_env(ENV_OAUTH_MFA_GATED).unwrap_or(true);
        self.with_oauth_mfa_gated(gated)
    }

    #[must_use]
    pub fn with_google(mut self, google: GoogleConfig) -> Self {
        self.google = Some(google);
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    pub(crate) fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    pub(super) fn mfa_code_ttl_seconds(&self) -> i64 {
        self.mfa_code_ttl_seconds
    }

    pub(super) fn mfa_code_length(&self) -> usize {
        self.mfa_code_length
    }

    pub(super) fn reset_code_ttl_seconds(&self) -> i64 {
        self.reset_code_ttl_seconds
    }

    pub(super) fn reset_code_length(&self) -> usize {
        self.reset_code_length
    }

    pub(crate) fn sweep_interval_seconds(&self) -> u64 {
        self.sweep_interval_seconds
    }

    pub(super) fn oauth_mfa_gated(&self) -> bool {
        self.oauth_mfa_gated
    }

    pub(super) fn google(&self) -> Option<&GoogleConfig> {
        self.google.as_ref()
    }
}

fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|value| match value.trim() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
}

/// Shared auth state: configuration plus the HTTP client used for the
/// external identity exchange.
pub struct AuthState {
    config: AuthConfig,
    http: reqwest::Client,
}

impl AuthState {
    /// Build the auth state.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()
            .context("failed to build identity exchange HTTP client")?;
        Ok(Self { config, http })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://ostello.dev".to_string(),
            SecretString::from("secret".to_string()),
        )
    }

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = config();

        assert_eq!(config.frontend_base_url(), "https://ostello.dev");
        assert_eq!(config.token_ttl_seconds(), DEFAULT_TOKEN_TTL_SECONDS);
        assert_eq!(config.mfa_code_ttl_seconds(), DEFAULT_MFA_CODE_TTL_SECONDS);
        assert_eq!(config.mfa_code_length(), DEFAULT_MFA_CODE_LENGTH);
        assert_eq!(
            config.reset_code_ttl_seconds(),
            DEFAULT_RESET_CODE_TTL_SECONDS
        );
        assert_eq!(config.reset_code_length(), DEFAULT_RESET_CODE_LENGTH);
        assert!(config.oauth_mfa_gated());
        assert!(config.google().is_none());

        let config = config
            .with_token_ttl_seconds(120)
            .with_mfa_code_ttl_seconds(30)
            .with_reset_code_ttl_seconds(60)
            .with_sweep_interval_seconds(10)
            .with_oauth_mfa_gated(false);

        assert_eq!(config.token_ttl_seconds(), 120);
        assert_eq!(config.mfa_code_ttl_seconds(), 30);
        assert_eq!(config.reset_code_ttl_seconds(), 60);
        assert_eq!(config.sweep_interval_seconds(), 10);
        assert!(!config.oauth_mfa_gated());
    }

    #[test]
    fn oauth_mfa_gate_reads_env() {
        temp_env::with_var(ENV_OAUTH_MFA_GATED, Some("no"), || {
            let config = config().with_oauth_mfa_gated_from_env();
            assert!(!config.oauth_mfa_gated());
        });
        temp_env::with_var(ENV_OAUTH_MFA_GATED, None::<String>, || {
            let config = config().with_oauth_mfa_gated_from_env();
            assert!(config.oauth_mfa_gated());
        });
        temp_env::with_var(ENV_OAUTH_MFA_GATED, Some("junk"), || {
            let config = config().with_oauth_mfa_gated_from_env();
            assert!(config.oauth_mfa_gated());
        });
    }

    #[test]
    fn google_config_defaults_point_at_google() {
        let google = GoogleConfig::new(
            "client-id".to_string(),
            SecretString::from("client-secret".to_string()),
            "https://ostello.dev/oauth/callback".to_string(),
        );
        assert_eq!(google.token_endpoint(), GOOGLE_TOKEN_ENDPOINT);
        assert_eq!(google.userinfo_endpoint(), GOOGLE_USERINFO_ENDPOINT);
        assert_eq!(google.auth_endpoint(), GOOGLE_AUTH_ENDPOINT);

        let google = google
            .with_token_endpoint("http://localhost:9/token".to_string())
            .with_userinfo_endpoint("http://localhost:9/userinfo".to_string());
        assert_eq!(google.token_endpoint(), "http://localhost:9/token");
        assert_eq!(google.userinfo_endpoint(), "http://localhost:9/userinfo");
    }

    #[test]
    fn auth_state_constructs() -> Result<()> {
        let state = AuthState::new(config())?;
        assert_eq!(state.config().frontend_base_url(), "https://ostello.dev");
        Ok(())
    }
}
