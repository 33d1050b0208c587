use axum::http::StatusCode;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User roles for role-based access control
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn from_str(role: &str) -> Result<Self, String> {
        match role.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Invalid role: {}", role)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub role: Role,  // User role
    pub exp: usize,  // Expiration time
    pub iat: usize,  // Issued at
}

/// Generate a JWT token for a user
///
/// Token issuance is handled by the identity service in production; this
/// exists for tooling and tests.
pub fn generate_token(user_id: &Uuid, role: Role) -> Result<String, JwtError> {
    let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| JwtError::MissingSecret)?;

    let now = Utc::now();
    let expiry = now + Duration::hours(24); // 24 hour expiration

    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: expiry.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|_| JwtError::TokenCreation)
}

/// Validate a JWT token and extract claims
pub fn validate_token(token: &str) -> Result<Claims, JwtError> {
    let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| JwtError::MissingSecret)?;

    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|_e| JwtError::InvalidToken)?;

    Ok(token_data.claims)
}

/// Validate the bearer credential presented at WebSocket connect time and
/// return the connection's user identity.
pub fn verify_connection_identity(token: &str) -> Result<Uuid, JwtError> {
    let claims = validate_token(token)?;
    Uuid::parse_str(&claims.sub).map_err(|_| JwtError::InvalidToken)
}

#[derive(Debug)]
pub enum JwtError {
    MissingSecret,
    TokenCreation,
    InvalidToken,
}

impl fmt::Display for JwtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JwtError::MissingSecret => write!(f, "JWT secret is missing or not set"),
            JwtError::TokenCreation => write!(f, "Failed to create JWT token"),
            JwtError::InvalidToken => write!(f, "Invalid or expired JWT token"),
        }
    }
}

impl From<JwtError> for StatusCode {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::MissingSecret => StatusCode::INTERNAL_SERVER_ERROR,
            JwtError::TokenCreation => StatusCode::INTERNAL_SERVER_ERROR,
            JwtError::InvalidToken => StatusCode::UNAUTHORIZED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_role_from_str() {
        assert_eq!(Role::from_str("user").unwrap(), Role::User);
        assert_eq!(Role::from_str("moderator").unwrap(), Role::Moderator);
        assert_eq!(Role::from_str("admin").unwrap(), Role::Admin);
        assert!(Role::from_str("invalid").is_err());
    }

    #[test]
    fn test_role_case_insensitivity() {
        assert_eq!(Role::from_str("USER").unwrap(), Role::User);
        assert_eq!(Role::from_str("User").unwrap(), Role::User);
        assert_eq!(Role::from_str("ADMIN").unwrap(), Role::Admin);
        assert_eq!(Role::from_str("Moderator").unwrap(), Role::Moderator);
    }

    #[test]
    fn test_role_as_str() {
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Moderator.as_str(), "moderator");
        assert_eq!(Role::Admin.as_str(), "admin");
    }

    #[test]
    fn test_jwt_token_generation_and_validation() {
        env::set_var("JWT_SECRET", "test_secret");

        let user_id = Uuid::new_v4();
        let role = Role::User;

        let token = generate_token(&user_id, role.clone()).expect("Token generation failed");
        assert!(!token.is_empty());

        let claims = validate_token(&token).expect("Token validation failed");
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, role);
    }

    #[test]
    fn test_verify_connection_identity() {
        env::set_var("JWT_SECRET", "test_secret");

        let user_id = Uuid::new_v4();
        let token = generate_token(&user_id, Role::User).unwrap();

        let identity = verify_connection_identity(&token).expect("Identity verification failed");
        assert_eq!(identity, user_id);

        assert!(verify_connection_identity("not.a.token").is_err());
    }

    #[test]
    fn test_jwt_error_conversion() {
        assert_eq!(
            StatusCode::from(JwtError::MissingSecret),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            StatusCode::from(JwtError::TokenCreation),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            StatusCode::from(JwtError::InvalidToken),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_malformed_tokens() {
        env::set_var("JWT_SECRET", "test_secret");

        let malformed_tokens = [
            "",
            "not.a.jwt.token",
            "missing.segments",
            "invalid base64.parts.here",
            "eyJhbGciOiJIUzI1NiJ9",
        ];

        for token in &malformed_tokens {
            let result = validate_token(token);
            assert!(result.is_err(), "Token '{}' should be rejected", token);
            match result {
                Err(JwtError::InvalidToken) => {}
                _ => panic!("Expected InvalidToken error for '{}'", token),
            }
        }
    }

    #[test]
    fn test_token_tampering() {
        env::set_var("JWT_SECRET", "test_secret");
        let user_id = Uuid::new_v4();

        let token = generate_token(&user_id, Role::User).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3, "JWT should have 3 parts");

        let tampered_token = format!("{}.{}tampered.{}", parts[0], parts[1], parts[2]);

        let result = validate_token(&tampered_token);
        assert!(result.is_err());
        match result {
            Err(JwtError::InvalidToken) => {}
            _ => panic!("Expected InvalidToken error"),
        }
    }

    #[test]
    fn test_token_with_all_roles() {
        env::set_var("JWT_SECRET", "test_secret");
        let user_id = Uuid::new_v4();
        let roles = [Role::User, Role::Moderator, Role::Admin];

        for role in &roles {
            let token = generate_token(&user_id, role.clone()).unwrap();
            let claims = validate_token(&token).unwrap();

            assert_eq!(claims.sub, user_id.to_string());
            assert_eq!(claims.role, *role);
        }
    }
}
