//! Authentication Models
//! Mission: Define user, claim and token-exchange data structures

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // bcrypt hash - never serialize; None for external logins
    pub external_id: Option<String>,
    pub created_at: String,
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String, // subject (user_id)
    pub email: String,
    pub iat: u64, // issued-at, seconds since epoch
    pub exp: u64, // expiration timestamp
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

/// Access + refresh token pair handed to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64, // seconds until access token expiration
}

/// Register request body
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// External identity login request body (POST /auth/meta)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaLoginRequest {
    pub access_token: String,
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// Auth response: token pair plus sanitized user
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserResponse,
}

/// User response (sanitized)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            name: user.name.clone(),
            created_at: user.created_at.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "a@b.com".to_string(),
            name: Some("Ada".to_string()),
            password_hash: Some("$2b$04$hash".to_string()),
            external_id: None,
            created_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let json = serde_json::to_value(create_test_user()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["email"], "a@b.com");
    }

    #[test]
    fn test_auth_response_is_camel_case_and_flat() {
        let user = create_test_user();
        let response = AuthResponse {
            tokens: TokenPair {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
                expires_in: 3600,
            },
            user: UserResponse::from_user(&user),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["expiresIn"], 3600);
        assert_eq!(json["user"]["email"], "a@b.com");
        assert!(json["user"].get("password").is_none());
        assert!(json["user"].get("passwordHash").is_none());
    }

    #[test]
    fn test_logout_request_token_optional() {
        let req: LogoutRequest = serde_json::from_str("{}").unwrap();
        assert!(req.refresh_token.is_none());

        let req: LogoutRequest = serde_json::from_str(r#"{"refreshToken":"abc"}"#).unwrap();
        assert_eq!(req.refresh_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_claims_user_id() {
        let id = Uuid::new_v4();
        let claims = Claims {
            sub: id.to_string(),
            email: "a@b.com".to_string(),
            iat: 0,
            exp: 3600,
        };
        assert_eq!(claims.user_id(), Some(id));
    }
}
