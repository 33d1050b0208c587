use axum::{
    async_trait,
    extract::FromRequestParts,
    headers::{authorization::Bearer, Authorization},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
    RequestPartsExt, TypedHeader,
};
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use super::jwt::{validate_token, Role};

/// Authenticated user information
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    error: String,
}

/// Authentication middleware to protect routes
pub async fn auth_middleware<B>(req: Request<B>, next: Next<B>) -> Result<Response, Response> {
    let (mut parts, body) = req.into_parts();

    // Extract the token from the Authorization header
    let bearer_result = parts.extract::<TypedHeader<Authorization<Bearer>>>().await;

    let TypedHeader(Authorization(bearer)) = match bearer_result {
        Ok(bearer) => bearer,
        Err(e) => {
            error!("Authorization header extraction failed: {:?}", e);
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(AuthErrorResponse {
                    error: "Missing or invalid Authorization header. Please provide a Bearer token"
                        .to_string(),
                }),
            )
                .into_response());
        }
    };

    // Validate the token
    let claims = match validate_token(bearer.token()) {
        Ok(claims) => claims,
        Err(e) => {
            error!("Token validation failed: {:?}", e);
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(AuthErrorResponse {
                    error: "Invalid token. Please login again".to_string(),
                }),
            )
                .into_response());
        }
    };

    // Parse the user ID
    let user_id = match Uuid::parse_str(&claims.sub) {
        Ok(user_id) => user_id,
        Err(e) => {
            error!("User ID parsing failed: {:?}", e);
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(AuthErrorResponse {
                    error: "Invalid user identifier in token".to_string(),
                }),
            )
                .into_response());
        }
    };

    debug!(
        "User authenticated: {} with role {:?}",
        user_id, claims.role
    );

    // Create AuthUser and insert into request extensions
    let auth_user = AuthUser {
        user_id,
        role: claims.role,
    };

    parts.extensions.insert(auth_user);

    // Continue with the request
    let req = Request::from_parts(parts, body);
    Ok(next.run(req).await)
}

/// Extractor for authenticated user
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().cloned().ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(AuthErrorResponse {
                    error: "Authentication required".to_string(),
                }),
            )
                .into_response()
        })
    }
}
