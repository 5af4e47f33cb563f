use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
const MAX_KEY_LEN: usize = 128;

/// Optional `Idempotency-Key` header. Absent header -> `None`; a present but
/// malformed one is rejected with 400 rather than silently ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(pub Option<String>);

impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IDEMPOTENCY_KEY_HEADER) else {
            return Ok(IdempotencyKey(None));
        };
        let raw = value
            .to_str()
            .map_err(|_| invalid("Idempotency-Key must be visible ASCII"))?;
        parse_key(raw).map(|key| IdempotencyKey(Some(key)))
    }
}

fn parse_key(raw: &str) -> Result<String, ApiError> {
    if raw.is_empty() || raw.len() > MAX_KEY_LEN {
        return Err(invalid("Idempotency-Key should be 1 to 128 characters"));
    }
    // Visible ASCII only: no spaces or control characters
    if !raw.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(invalid("Idempotency-Key must be visible ASCII"));
    }
    Ok(raw.to_string())
}

fn invalid(reason: &str) -> ApiError {
    ApiError::bad_request("Idempotency-Key", reason)
}
