//! Bearer-token authentication with HS256 JWTs signed by a process-wide secret.

use crate::errors::{PipelineError, PipelineResult};
use axum::http::{HeaderMap, header};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ISSUER: &str = "video-ingest-access";

/// Access token claims.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User ID
    sub: String,
    iss: String,
    iat: i64,
    exp: i64,
}

pub struct Authenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl Authenticator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: Uuid, ttl: Duration) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Verify a raw token and return the user it was issued to.
    pub fn validate(&self, token: &str) -> PipelineResult<Uuid> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| PipelineError::Unauthenticated(format!("couldn't validate JWT: {err}")))?;
        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| PipelineError::Unauthenticated("token subject is not a user id".into()))
    }

    /// Extract the bearer token from `Authorization` and validate it.
    pub fn authenticate(&self, headers: &HeaderMap) -> PipelineResult<Uuid> {
        let token = bearer_token(headers)?;
        self.validate(token)
    }
}

fn bearer_token(headers: &HeaderMap) -> PipelineResult<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| PipelineError::Unauthenticated("couldn't find JWT".into()))?
        .to_str()
        .map_err(|_| PipelineError::Unauthenticated("authorization header is not ASCII".into()))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PipelineError::Unauthenticated("expected a bearer token".into()))
}
