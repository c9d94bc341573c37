use axum::http::HeaderMap;

use flagstone::TenantKey;

/// Header naming the application a request targets.
pub const APP_HEADER: &str = "x-app-id";
/// Header naming the environment a request targets.
pub const ENV_HEADER: &str = "x-env-id";

/// Resolve the tenant from request headers. Missing, empty or non-UTF-8
/// values fall back to the defaults; tenant selection never errors.
pub fn tenant_from_headers(headers: &HeaderMap) -> TenantKey {
    let app = headers
        .get(APP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let env = headers
        .get(ENV_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    TenantKey::new(app, env)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn defaults_when_headers_absent() {
        let tenant = tenant_from_headers(&HeaderMap::new());
        assert_eq!(tenant.app, "default");
        assert_eq!(tenant.env, "production");
    }

    #[test]
    fn headers_override_defaults() {
        let mut headers = HeaderMap::new();
        headers.insert(APP_HEADER, HeaderValue::from_static("storefront"));
        headers.insert(ENV_HEADER, HeaderValue::from_static("staging"));
        let tenant = tenant_from_headers(&headers);
        assert_eq!(tenant.app, "storefront");
        assert_eq!(tenant.env, "staging");
    }

    #[test]
    fn empty_values_fall_back() {
        let mut headers = HeaderMap::new();
        headers.insert(APP_HEADER, HeaderValue::from_static(""));
        headers.insert(ENV_HEADER, HeaderValue::from_static("  "));
        let tenant = tenant_from_headers(&headers);
        assert_eq!(tenant.app, "default");
        assert_eq!(tenant.env, "production");
    }
}
