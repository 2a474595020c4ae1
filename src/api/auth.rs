//! Authentication API endpoints
//!
//! Handles HTTP requests for the session lifecycle:
//! - POST /api/v1/auth/login - Credential login
//! - POST /api/v1/auth/refresh - Refresh token rotation
//! - POST /api/v1/auth/logout - Session revocation
//! - POST /api/v1/auth/forgot-password - Start password reset
//! - POST /api/v1/auth/reset-password - Complete password reset
//! - GET /api/v1/auth/me - Current user
//!
//! The refresh token travels in an HttpOnly cookie by default; clients
//! that cannot use cookies may send it in the request body instead. The
//! access token is returned in the JSON body and presented as a bearer
//! token.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::User;
use crate::services::IdCipher;

/// Cookie carrying the refresh token
const REFRESH_COOKIE: &str = "refresh_token";

/// Request body for user login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for token refresh and logout
///
/// The token is optional because it usually arrives in the cookie.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Request body for starting a password reset
#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Request body for completing a password reset
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub access_token: String,
}

/// Response for a token refresh
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Response for user info
///
/// The id is an opaque encrypted string rather than the database row id.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub role: String,
    pub status: String,
    pub created_at: String,
}

impl UserResponse {
    fn from_user(user: User, cipher: &IdCipher) -> Result<Self, ApiError> {
        let id = cipher
            .encode(user.id)
            .map_err(|e| ApiError::internal_error(format!("Failed to encode id: {}", e)))?;
        Ok(Self {
            id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            role: user.role.to_string(),
            status: user.status.to_string(),
            created_at: user.created_at.to_rfc3339(),
        })
    }
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new().route("/me", get(get_current_user))
}

/// POST /api/v1/auth/login - Credential login
async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.session_service.login(&body.email, &body.password).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        refresh_cookie(&outcome.tokens.refresh_token, state.refresh_ttl_hours),
    );

    let user = UserResponse::from_user(outcome.user, &state.id_cipher)?;
    Ok((
        headers,
        Json(AuthResponse {
            user,
            access_token: outcome.tokens.access_token,
        }),
    ))
}

/// POST /api/v1/auth/refresh - Rotate the refresh token
async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let token = refresh_token_from(&headers, body.as_deref())
        .ok_or_else(|| ApiError::new("INVALID_TOKEN", "Missing refresh token"))?;

    let tokens = state.session_service.refresh(&token).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::SET_COOKIE,
        refresh_cookie(&tokens.refresh_token, state.refresh_ttl_hours),
    );

    Ok((
        response_headers,
        Json(RefreshResponse {
            access_token: tokens.access_token,
        }),
    ))
}

/// POST /api/v1/auth/logout - Revoke the session
///
/// Always succeeds: logging out with a missing, malformed, or already
/// revoked token still clears the cookie and returns 204.
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    if let Some(token) = refresh_token_from(&headers, body.as_deref()) {
        state.session_service.logout(&token).await;
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::SET_COOKIE, clear_refresh_cookie());

    (StatusCode::NO_CONTENT, response_headers)
}

/// POST /api/v1/auth/forgot-password - Start a password reset
///
/// Responds 204 whether or not the email has an account.
async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<StatusCode, ApiError> {
    let client_ip = extract_ip_address(&headers).unwrap_or_else(|| "unknown".to_string());

    state
        .account_service
        .forgot_password(&body.email, &client_ip)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/auth/reset-password - Complete a password reset
async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .account_service
        .reset_password(&body.token, &body.password)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/auth/me - Get current user
///
/// Requires authentication.
async fn get_current_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(UserResponse::from_user(user.0, &state.id_cipher)?))
}

/// Build the Set-Cookie header for a refresh token
fn refresh_cookie(token: &str, ttl_hours: i64) -> HeaderValue {
    let cookie = format!(
        "{}={}; Path=/api/v1/auth; HttpOnly; SameSite=Lax; Max-Age={}",
        REFRESH_COOKIE,
        token,
        ttl_hours * 3600
    );
    // Tokens are base 10 digits, a dot, and hex, always header-safe
    HeaderValue::from_str(&cookie).expect("refresh cookie must be a valid header value")
}

/// Build the Set-Cookie header that clears the refresh token
fn clear_refresh_cookie() -> HeaderValue {
    HeaderValue::from_static("refresh_token=; Path=/api/v1/auth; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Pull the refresh token from the body, then the cookie, then the
/// Authorization header
fn refresh_token_from(headers: &HeaderMap, body: Option<&RefreshRequest>) -> Option<String> {
    if let Some(token) = body.and_then(|b| b.refresh_token.clone()) {
        if !token.is_empty() {
            return Some(token);
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for cookie in cookie_header.split(';') {
            let cookie = cookie.trim();
            if let Some(token) = cookie.strip_prefix("refresh_token=") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    // Cookie-less clients may present the refresh token as a bearer token
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = auth.strip_prefix("Bearer ")?;
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Extract the client IP from proxy headers
fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    // X-Forwarded-For holds a list; the first entry is the client
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() {
                    return Some(ip.to_string());
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_refresh_token_prefers_body() {
        let headers = headers_with_cookie("refresh_token=cookie-token");
        let body = RefreshRequest {
            refresh_token: Some("body-token".to_string()),
        };

        assert_eq!(
            refresh_token_from(&headers, Some(&body)),
            Some("body-token".to_string())
        );
    }

    #[test]
    fn test_refresh_token_falls_back_to_cookie() {
        let headers = headers_with_cookie("other=1; refresh_token=cookie-token");

        assert_eq!(
            refresh_token_from(&headers, None),
            Some("cookie-token".to_string())
        );
        assert_eq!(
            refresh_token_from(&headers, Some(&RefreshRequest::default())),
            Some("cookie-token".to_string())
        );
    }

    #[test]
    fn test_refresh_token_ignores_empty_values() {
        let headers = headers_with_cookie("refresh_token=");
        let body = RefreshRequest {
            refresh_token: Some(String::new()),
        };

        assert_eq!(refresh_token_from(&headers, Some(&body)), None);
    }

    #[test]
    fn test_refresh_token_missing() {
        assert_eq!(refresh_token_from(&HeaderMap::new(), None), None);
    }

    #[test]
    fn test_refresh_token_bearer_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer 7.deadbeef"),
        );
        assert_eq!(
            refresh_token_from(&headers, None),
            Some("7.deadbeef".to_string())
        );

        // Cookie still wins over the Authorization header
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("refresh_token=9.cafe"),
        );
        assert_eq!(refresh_token_from(&headers, None), Some("9.cafe".to_string()));
    }

    #[test]
    fn test_refresh_cookie_attributes() {
        let cookie = refresh_cookie("42.abcdef", 24);
        let value = cookie.to_str().unwrap();

        assert!(value.starts_with("refresh_token=42.abcdef;"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Max-Age=86400"));
        assert!(value.contains("Path=/api/v1/auth"));
    }

    #[test]
    fn test_clear_refresh_cookie_expires_immediately() {
        let value = clear_refresh_cookie();
        assert!(value.to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn test_extract_ip_forwarded_for_takes_first() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(extract_ip_address(&headers), Some("203.0.113.9".to_string()));
    }

    #[test]
    fn test_extract_ip_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(extract_ip_address(&headers), Some("198.51.100.7".to_string()));
    }

    #[test]
    fn test_extract_ip_none() {
        assert_eq!(extract_ip_address(&HeaderMap::new()), None);
    }
}
