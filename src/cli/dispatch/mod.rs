use crate::cli::{actions::Action, commands};
use anyhow::Result;
use secrecy::SecretString;

/// Map parsed arguments onto an [`Action`].
///
/// # Errors
/// Returns an error if a required argument is missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches
            .get_one::<u16>(commands::ARG_PORT)
            .copied()
            .unwrap_or(8080),
        dsn: matches
            .get_one(commands::ARG_DSN)
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --dsn"))?,
        jwt_secret: matches
            .get_one(commands::ARG_JWT_SECRET)
            .map(|s: &String| SecretString::from(s.clone()))
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --jwt-secret"))?,
        frontend_url: matches
            .get_one(commands::ARG_FRONTEND_URL)
            .map(|s: &String| s.to_string())
            .unwrap_or_else(|| "http://localhost:5173".to_string()),
        token_ttl_seconds: matches
            .get_one::<i64>(commands::ARG_TOKEN_TTL)
            .copied()
            .unwrap_or(3600),
        google_client_id: matches
            .get_one(commands::ARG_GOOGLE_CLIENT_ID)
            .map(|s: &String| s.to_string()),
        google_client_secret: matches
            .get_one(commands::ARG_GOOGLE_CLIENT_SECRET)
            .map(|s: &String| SecretString::from(s.clone())),
        google_redirect_uri: matches
            .get_one(commands::ARG_GOOGLE_REDIRECT_URI)
            .map(|s: &String| s.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    #[test]
    fn test_handler_server_action() {
        temp_env::with_vars(
            [
                ("OSTELLO_PORT", None::<String>),
                ("OSTELLO_DSN", None),
                ("OSTELLO_JWT_SECRET", None),
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "ostello",
                    "--port",
                    "8443",
                    "--dsn",
                    "postgres://localhost:5432/ostello",
                    "--jwt-secret",
                    "hush",
                    "--token-ttl",
                    "900",
                ]);

                let action = handler(&matches).expect("expected server action");
                let Action::Server {
                    port,
                    dsn,
                    jwt_secret,
                    token_ttl_seconds,
                    google_client_id,
                    ..
                } = action;
                assert_eq!(port, 8443);
                assert_eq!(dsn, "postgres://localhost:5432/ostello");
                assert_eq!(jwt_secret.expose_secret(), "hush");
                assert_eq!(token_ttl_seconds, 900);
                assert!(google_client_id.is_none());
            },
        );
    }
}
