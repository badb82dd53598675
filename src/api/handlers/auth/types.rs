//! Request/response types for auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Platform role carried in the access token and on every validated session.
/// Authorization decisions belong to the protected-route guards downstream;
/// this service only supplies the role.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    FrontDesk,
    Manager,
    Cleaner,
}

impl Role {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::FrontDesk => "front_desk",
            Self::Manager => "manager",
            Self::Cleaner => "cleaner",
        }
    }

    /// Unknown values degrade to the lowest-privilege role rather than
    /// failing the request.
    pub(crate) fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "customer" => Some(Self::Customer),
            "front_desk" => Some(Self::FrontDesk),
            "manager" => Some(Self::Manager),
            "cleaner" => Some(Self::Cleaner),
            _ => None,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_code: Option<String>,
}

/// Login/signup/exchange response. `mfa_required = true` means no token was
/// issued yet and the caller must complete the challenge; it is not an error.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub mfa_required: bool,
}

impl TokenResponse {
    pub(crate) fn issued(token: String, role: Role) -> Self {
        Self {
            access_token: Some(token),
            token_type: "bearer".to_string(),
            role: Some(role),
            mfa_required: false,
        }
    }

    pub(crate) fn challenge() -> Self {
        Self {
            access_token: None,
            token_type: "bearer".to_string(),
            role: None,
            mfa_required: true,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupRequest {
    pub email: String,
    pub full_name: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordChangeRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaEnableRequest {
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaEnableResponse {
    pub secret: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaVerifyRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaDisableRequest {
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub is_current: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub mfa_enabled: bool,
    pub active_sessions: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OauthExchangeRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OauthUrlResponse {
    pub auth_url: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Ack {
    pub message: String,
}

impl Ack {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::Customer, Role::FrontDesk, Role::Manager, Role::Cleaner] {
            assert_eq!(Role::from_str(role.as_str()), Some(role));
        }
        assert_eq!(Role::from_str("receptionist"), None);
    }

    #[test]
    fn role_serializes_snake_case() -> Result<()> {
        let value = serde_json::to_value(Role::FrontDesk)?;
        assert_eq!(value, serde_json::json!("front_desk"));
        Ok(())
    }

    #[test]
    fn login_request_accepts_missing_mfa_code() -> Result<()> {
        let decoded: LoginRequest = serde_json::from_value(serde_json::json!({
            "email": "alice@example.com",
            "password": "p1",
        }))?;
        assert!(decoded.mfa_code.is_none());
        Ok(())
    }

    #[test]
    fn issued_token_response_shape() -> Result<()> {
        let response = TokenResponse::issued("jwt".to_string(), Role::Customer);
        let value = serde_json::to_value(&response)?;
        let token = value
            .get("access_token")
            .and_then(serde_json::Value::as_str)
            .context("missing access_token")?;
        assert_eq!(token, "jwt");
        assert_eq!(value.get("mfa_required"), Some(&serde_json::json!(false)));
        Ok(())
    }

    #[test]
    fn challenge_response_has_no_token() -> Result<()> {
        let value = serde_json::to_value(TokenResponse::challenge())?;
        assert!(value.get("access_token").is_none());
        assert_eq!(value.get("mfa_required"), Some(&serde_json::json!(true)));
        Ok(())
    }
}
