use crate::{
    api,
    api::{
        email::EmailWorkerConfig,
        handlers::auth::{AuthConfig, GoogleConfig},
    },
    cli::actions::Action,
};
use anyhow::Result;

/// Execute the server action.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            jwt_secret,
            frontend_url,
            token_ttl_seconds,
            google_client_id,
            google_client_secret,
            google_redirect_uri,
        } => {
            let mut auth_config = AuthConfig::new(frontend_url, jwt_secret)
                .with_token_ttl_seconds(token_ttl_seconds)
                .with_oauth_mfa_gated_from_env();

            if let (Some(client_id), Some(client_secret), Some(redirect_uri)) =
                (google_client_id, google_client_secret, google_redirect_uri)
            {
                auth_config = auth_config
                    .with_google(GoogleConfig::new(client_id, client_secret, redirect_uri));
            }

            let email_config = EmailWorkerConfig::new().normalize();

            api::new(port, dsn, auth_config, email_config).await?;
        }
    }

    Ok(())
}
