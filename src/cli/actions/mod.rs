pub mod server;

use secrecy::SecretString;

/// Actions the CLI can dispatch to.
#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        jwt_secret: SecretString,
        frontend_url: String,
        token_ttl_seconds: i64,
        google_client_id: Option<String>,
        google_client_secret: Option<SecretString>,
        google_redirect_uri: Option<String>,
    },
}
