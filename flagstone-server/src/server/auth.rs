use axum::http::HeaderMap;

use super::config::AuthConfig;
use super::error::ApiError;

/// The two token audiences. Management tokens implicitly grant evaluation
/// access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAudience {
    Evaluation,
    Management,
}

/// Check the bearer token in `headers` against the configured audience.
/// With no tokens configured at all, the server runs open.
pub fn authorize(
    auth: &AuthConfig,
    headers: &HeaderMap,
    required: TokenAudience,
) -> Result<(), ApiError> {
    if auth.eval_tokens.is_empty() && auth.admin_tokens.is_empty() {
        return Ok(());
    }

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token);
    let Some(token) = token else {
        return Err(ApiError::Unauthorized);
    };

    let allowed = match required {
        TokenAudience::Management => auth.admin_tokens.iter().any(|t| t == token),
        TokenAudience::Evaluation => {
            auth.eval_tokens.iter().any(|t| t == token)
                || auth.admin_tokens.iter().any(|t| t == token)
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Extract the bearer token from an Authorization header value.
pub fn extract_bearer_token(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ")
}
