use std::future::{ready, Ready};
use std::ops::Deref;

use actix_web::{dev::Payload, http::header::AUTHORIZATION, web, FromRequest, HttpRequest};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

/// The authenticated identity behind one request. Resolved once from the
/// bearer token and immutable for the request's lifetime.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Strict session resolver: any missing, malformed, or expired credential
/// fails the request with 401. Raw transport or decode errors never escape.
pub struct AuthenticatedUser(pub Principal);

impl Deref for AuthenticatedUser {
    type Target = Principal;

    fn deref(&self) -> &Principal {
        &self.0
    }
}

/// Optional flavor used only where "no session" is itself a valid outcome
/// (the landing-redirect probe). Never fails the request.
pub struct MaybeAuthenticated(pub Option<Principal>);

fn resolve(req: &HttpRequest) -> Result<Principal, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::unauthorized("Failed to verify session"))?;

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .filter(|value| value.starts_with("Bearer "))
        .map(|value| &value["Bearer ".len()..])
        .ok_or_else(|| AppError::unauthorized("Not authenticated"))?;

    let decoding_key = DecodingKey::from_secret(state.config.jwt_secret.as_ref());
    let token_data =
        decode::<Claims>(token, &decoding_key, &Validation::default()).map_err(|e| {
            warn!("rejected bearer token: {e}");
            AppError::unauthorized("Not authenticated")
        })?;

    let claims = token_data.claims;
    Ok(Principal {
        user_id: claims.sub,
        email: claims.email,
        name: claims.name,
    })
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(resolve(req).map(AuthenticatedUser))
    }
}

impl FromRequest for MaybeAuthenticated {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Ok(MaybeAuthenticated(resolve(req).ok())))
    }
}

/// Sign a session token for a principal. The OAuth callback flow would call
/// this after the provider exchange; the test suite uses it directly.
pub fn sign_token(
    user_id: &str,
    email: Option<&str>,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.map(str::to_string),
        name: None,
        exp: now + 3600 * 24 * 7,
        iat: now,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}
