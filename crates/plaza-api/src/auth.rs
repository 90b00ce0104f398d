use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};

use plaza_db::Database;
use plaza_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::guard::ChallengeVerifier;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub site: SiteConfig,
    pub challenge: Arc<dyn ChallengeVerifier>,
}

/// Site-wide knobs the memo engine reads. Loaded from the environment once
/// at startup and handed through the app state; the engine never looks
/// configuration up ambiently.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Rows per page in memo lists.
    pub page_rows: u32,
    /// Points debited from the sender per delivered memo.
    pub memo_send_point: i64,
    /// Points granted to a fresh member.
    pub signup_point: i64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            page_rows: 15,
            memo_send_point: 5,
            signup_point: 0,
        }
    }
}

fn valid_handle(id: &str) -> bool {
    (3..=20).contains(&id.len())
        && id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Validate input
    if !valid_handle(&req.id) {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.nick.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Check if the handle is taken
    if state
        .db
        .get_member(&req.id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_some()
    {
        return Err(StatusCode::CONFLICT);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .to_string();

    state
        .db
        .create_member(&req.id, req.nick.trim(), &password_hash)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if state.site.signup_point > 0 {
        state
            .db
            .grant_points(&req.id, state.site.signup_point, "Signup reward")
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    }

    let token = create_token(&state.jwt_secret, &req.id, req.nick.trim())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { id: req.id, token }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let member = state
        .db
        .get_member(&req.id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&member.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let token = create_token(&state.jwt_secret, &member.id, &member.nick)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        id: member.id,
        nick: member.nick,
        token,
    }))
}

fn create_token(secret: &str, member_id: &str, nick: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: member_id.to_string(),
        nick: nick.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_lowercase_alnum() {
        assert!(valid_handle("alice"));
        assert!(valid_handle("bob_99"));
        assert!(!valid_handle("ab"));
        assert!(!valid_handle("Alice"));
        assert!(!valid_handle("a b"));
        assert!(!valid_handle("way_too_long_for_a_handle"));
    }
}
