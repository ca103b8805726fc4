//! Registration, login, and the per-request authentication gate.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use std::sync::Arc;

use crate::db::{LoginRequest, LoginResponse, MessageResponse, RegisterRequest, User};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::token;
use super::validation::{validate_password, validate_username};

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Register a new account
///
/// POST /register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_username(&request.username) {
        errors.add("username", e);
    }
    if let Err(e) = validate_password(&request.password) {
        errors.add("password", e);
    }
    errors.finish()?;

    // Check-then-insert: concurrent registrations of the same username can
    // both pass this check; the primary key then rejects the second write.
    let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = ?")
        .bind(&request.username)
        .fetch_optional(&state.db)
        .await?;

    if existing.is_some() {
        // Answered with 400 rather than 409, matching the existing wire
        // contract for duplicate usernames.
        return Err(
            ApiError::conflict("Username already exists").with_status(StatusCode::BAD_REQUEST)
        );
    }

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query("INSERT INTO users (username, password_hash, created_at) VALUES (?, ?, ?)")
        .bind(&request.username)
        .bind(&password_hash)
        .bind(&now)
        .execute(&state.db)
        .await?;

    tracing::info!(username = %request.username, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("User registered successfully")),
    ))
}

/// Exchange credentials for a bearer token
///
/// POST /login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = ?")
        .bind(&request.username)
        .fetch_optional(&state.db)
        .await?;

    // Unknown username and wrong password answer identically so the
    // response does not leak which part failed.
    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;
    if !verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let ttl = chrono::Duration::minutes(state.config.auth.token_ttl_minutes);
    let access_token = token::issue(&user.username, &state.config.auth.secret_key, ttl)
        .map_err(|e| ApiError::internal(format!("Failed to issue token: {}", e)))?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

/// The authenticated caller, inserted into request extensions by
/// `auth_middleware` and consumed by handlers via the extractor below.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Not authenticated"))
    }
}

/// Authentication gate applied to every book route.
///
/// Re-validates signature, expiry, and account existence on each request;
/// there is no session cache and no revocation list.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let header_token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authorization token"))?
        .to_string();

    let username = token::verify(&header_token, &state.config.auth.secret_key)?;

    // The token may outlive the account
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = ?")
        .bind(&username)
        .fetch_optional(&state.db)
        .await?;
    let user = user.ok_or_else(|| ApiError::unauthorized("User not found"))?;

    request.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;
    use axum::{body::to_bytes, middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        let mut config = Config::default();
        config.auth.secret_key = "test-secret".to_string();
        let pool = db::test_pool().await;
        Arc::new(AppState::new(config, pool))
    }

    fn creds(username: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// A one-route router with the authentication gate applied, as the
    /// real book routes have.
    fn gated_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/books", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state, auth_middleware))
    }

    async fn send(router: &Router, authorization: Option<String>) -> Response {
        let mut builder = Request::builder().uri("/books");
        if let Some(value) = authorization {
            builder = builder.header("Authorization", value);
        }
        router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert_ne!(hash, "correct horse");
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn hashes_are_salted_per_record() {
        let a = hash_password("same password").unwrap();
        let b = hash_password("same password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn verify_tolerates_garbage_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let state = test_state().await;

        let (status, _) = register(State(state.clone()), Json(creds("alice", "password123")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let err = register(State(state), Json(creds("alice", "password456")))
            .await
            .unwrap_err();
        let response = axum::response::IntoResponse::into_response(err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn register_rejects_weak_input() {
        let state = test_state().await;

        assert!(register(State(state.clone()), Json(creds("ab", "password123")))
            .await
            .is_err());
        assert!(register(State(state), Json(creds("alice", "short")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn login_failures_are_uniform() {
        let state = test_state().await;
        register(State(state.clone()), Json(creds("alice", "password123")))
            .await
            .unwrap();

        let wrong_password = login(
            State(state.clone()),
            Json(LoginRequest {
                username: "alice".to_string(),
                password: "wrong".to_string(),
            }),
        )
        .await
        .unwrap_err();

        let no_such_user = login(
            State(state),
            Json(LoginRequest {
                username: "nobody".to_string(),
                password: "password123".to_string(),
            }),
        )
        .await
        .unwrap_err();

        assert_eq!(wrong_password.to_string(), no_such_user.to_string());
    }

    #[tokio::test]
    async fn gate_rejects_missing_and_malformed_tokens() {
        let state = test_state().await;
        let router = gated_router(state);

        let missing = send(&router, None).await;
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong_scheme = send(&router, Some("Token abc".to_string())).await;
        assert_eq!(wrong_scheme.status(), StatusCode::UNAUTHORIZED);

        let garbage = send(&router, Some("Bearer not.a.token".to_string())).await;
        assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn gate_rejects_expired_tokens() {
        let state = test_state().await;
        register(State(state.clone()), Json(creds("alice", "password123")))
            .await
            .unwrap();

        let expired = token::issue(
            "alice",
            &state.config.auth.secret_key,
            chrono::Duration::minutes(-1),
        )
        .unwrap();

        let router = gated_router(state);
        let response = send(&router, Some(format!("Bearer {}", expired))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn gate_rejects_tokens_whose_account_is_gone() {
        let state = test_state().await;

        // Signed and unexpired, but the subject was never registered —
        // the same shape as a token outliving a deleted account
        let orphaned = token::issue(
            "ghost",
            &state.config.auth.secret_key,
            chrono::Duration::minutes(30),
        )
        .unwrap();

        let router = gated_router(state);
        let response = send(&router, Some(format!("Bearer {}", orphaned))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("User not found"));
    }

    #[tokio::test]
    async fn gate_admits_a_valid_token() {
        let state = test_state().await;
        register(State(state.clone()), Json(creds("alice", "password123")))
            .await
            .unwrap();

        let token = token::issue(
            "alice",
            &state.config.auth.secret_key,
            chrono::Duration::minutes(30),
        )
        .unwrap();

        let router = gated_router(state);
        let response = send(&router, Some(format!("Bearer {}", token))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn login_issues_a_verifiable_bearer_token() {
        let state = test_state().await;
        register(State(state.clone()), Json(creds("alice", "password123")))
            .await
            .unwrap();

        let Json(response) = login(
            State(state.clone()),
            Json(LoginRequest {
                username: "alice".to_string(),
                password: "password123".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.token_type, "bearer");
        let subject =
            token::verify(&response.access_token, &state.config.auth.secret_key).unwrap();
        assert_eq!(subject, "alice");
    }
}
