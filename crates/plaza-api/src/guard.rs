use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use plaza_types::api::{ActionTokenResponse, Claims};

use crate::auth::AppState;

const ACTION_TOKEN_TTL_MINUTES: i64 = 10;

/// Claims of the short-lived anti-forgery tokens that gate mutating memo
/// requests. Scoped to one member; the expiry keeps a leaked token useless.
#[derive(Debug, Serialize, Deserialize)]
struct ActionClaims {
    sub: String,
    exp: usize,
}

pub fn issue_action_token(secret: &str, member_id: &str) -> anyhow::Result<String> {
    let claims = ActionClaims {
        sub: member_id.to_string(),
        exp: (Utc::now() + chrono::Duration::minutes(ACTION_TOKEN_TTL_MINUTES)).timestamp()
            as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// A token is only good for the member it was issued to.
pub fn verify_action_token(secret: &str, member_id: &str, token: &str) -> bool {
    decode::<ActionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims.sub == member_id)
    .unwrap_or(false)
}

pub async fn action_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let token = issue_action_token(&state.jwt_secret, &claims.sub)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(ActionTokenResponse { token }))
}

/// Human-verification collaborator. The actual provider (CAPTCHA service)
/// lives outside this service; the default verifier accepts everything.
pub trait ChallengeVerifier: Send + Sync {
    fn verify(&self, response: Option<&str>) -> bool;
}

pub struct NoChallenge;

impl ChallengeVerifier for NoChallenge {
    fn verify(&self, _response: Option<&str>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_token_round_trip() {
        let token = issue_action_token("secret", "alice").unwrap();
        assert!(verify_action_token("secret", "alice", &token));
    }

    #[test]
    fn action_token_is_member_scoped() {
        let token = issue_action_token("secret", "alice").unwrap();
        assert!(!verify_action_token("secret", "bob", &token));
    }

    #[test]
    fn garbage_and_cross_secret_tokens_fail() {
        assert!(!verify_action_token("secret", "alice", "not-a-token"));
        let token = issue_action_token("other-secret", "alice").unwrap();
        assert!(!verify_action_token("secret", "alice", &token));
    }
}
