//! Identity resolution.
//!
//! Turns the `Authorization: Bearer <token>` header into a [`TenantIdentity`]
//! for the rest of the pipeline. Two credential forms are recognised:
//!
//! - the literal development token, mapped to the reserved dev tenant —
//!   accepted only when `auth.allow_dev_token` is on;
//! - an HS256-signed JWT verified against the configured shared secret,
//!   whose `sub` (or legacy `tenant`) claim carries the tenant id.
//!
//! Everything else is `Unauthenticated`. Trust level is derived by looking
//! the tenant id up in the configured trusted-tenants set.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use llmgate_core::{AuthConfig, GatewayError, Result, TenantIdentity, TrustLevel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::pipeline::{error_response, AppState};

/// The literal development token.
pub const DEV_TOKEN: &str = "dev-token";

/// JWT claims the gateway understands.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Tenant id (standard subject claim).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    /// Legacy tenant claim, honoured when `sub` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tenant: Option<String>,
    /// Expiry (seconds since epoch). Required; expired tokens are rejected.
    exp: usize,
}

/// Resolve a bearer token into a [`TenantIdentity`].
///
/// # Errors
///
/// Returns [`GatewayError::Unauthenticated`] for every failure mode: unknown
/// token form, bad signature, expiry, a payload without a tenant id, or a
/// signed token arriving while no secret is configured. A missing secret is
/// deliberately not distinguished from a bad signature — configuration state
/// is not leaked to callers.
pub fn resolve_identity(token: &str, config: &AuthConfig) -> Result<TenantIdentity> {
    if token == DEV_TOKEN {
        if config.allow_dev_token {
            return Ok(TenantIdentity::dev());
        }
        return Err(GatewayError::Unauthenticated(
            "development token is not accepted".to_string(),
        ));
    }

    let Some(secret) = config.jwt_secret.as_deref() else {
        return Err(GatewayError::Unauthenticated(
            "invalid token".to_string(),
        ));
    };

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| GatewayError::Unauthenticated("invalid or expired token".to_string()))?;

    let tenant_id = data
        .claims
        .sub
        .or(data.claims.tenant)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| {
            GatewayError::Unauthenticated("token carries no tenant identifier".to_string())
        })?;

    let trust_level = if config.trusted_tenants.iter().any(|t| t == &tenant_id) {
        TrustLevel::Trusted
    } else {
        TrustLevel::Standard
    };

    Ok(TenantIdentity {
        tenant_id,
        trust_level,
    })
}

/// Mint an HS256 token for a tenant. Development tooling and test seam —
/// the gateway itself never issues credentials.
///
/// # Errors
///
/// Returns an error if signing fails.
pub fn mint_token(tenant_id: &str, secret: &str, ttl_secs: i64) -> Result<String> {
    let exp = (chrono::Utc::now().timestamp() + ttl_secs).max(0) as usize;
    let claims = Claims {
        sub: Some(tenant_id.to_string()),
        tenant: None,
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| GatewayError::Config(format!("failed to sign token: {e}")))
}

/// Extract the bearer token from the Authorization header. The scheme is
/// matched case-insensitively (RFC 7235); the token is kept verbatim.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim_start();
    (!token.is_empty()).then_some(token)
}

/// Axum middleware that authenticates the request and injects
/// [`TenantIdentity`] into request extensions.
///
/// Rejects with 401 before any other pipeline stage runs; a request that
/// reaches a handler always carries an identity.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(req.headers()) else {
        return error_response(&GatewayError::Unauthenticated(
            "missing Authorization header".to_string(),
        ));
    };

    match resolve_identity(token, &state.config.auth) {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: Option<&str>, trusted: &[&str], allow_dev: bool) -> AuthConfig {
        AuthConfig {
            jwt_secret: secret.map(str::to_string),
            allow_dev_token: allow_dev,
            trusted_tenants: trusted.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_dev_token_maps_to_dev_tenant() {
        let identity = resolve_identity(DEV_TOKEN, &config(None, &[], true)).unwrap();
        assert_eq!(identity.tenant_id, TenantIdentity::DEV_TENANT);
        assert_eq!(identity.trust_level, TrustLevel::Dev);
    }

    #[test]
    fn test_dev_token_rejected_when_disabled() {
        let result = resolve_identity(DEV_TOKEN, &config(Some("s3cret"), &[], false));
        assert!(matches!(result, Err(GatewayError::Unauthenticated(_))));
    }

    #[test]
    fn test_signed_token_standard_tenant() {
        let cfg = config(Some("s3cret"), &[], true);
        let token = mint_token("acme", "s3cret", 300).unwrap();
        let identity = resolve_identity(&token, &cfg).unwrap();
        assert_eq!(identity.tenant_id, "acme");
        assert_eq!(identity.trust_level, TrustLevel::Standard);
    }

    #[test]
    fn test_signed_token_trusted_tenant() {
        let cfg = config(Some("s3cret"), &["trusted_tenant"], true);
        let token = mint_token("trusted_tenant", "s3cret", 300).unwrap();
        let identity = resolve_identity(&token, &cfg).unwrap();
        assert_eq!(identity.trust_level, TrustLevel::Trusted);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let cfg = config(Some("right"), &[], true);
        let token = mint_token("acme", "wrong", 300).unwrap();
        let result = resolve_identity(&token, &cfg);
        assert!(matches!(result, Err(GatewayError::Unauthenticated(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let cfg = config(Some("s3cret"), &[], true);
        let token = mint_token("acme", "s3cret", -3600).unwrap();
        let result = resolve_identity(&token, &cfg);
        assert!(matches!(result, Err(GatewayError::Unauthenticated(_))));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let cfg = config(Some("s3cret"), &[], true);
        let result = resolve_identity("not-a-jwt", &cfg);
        assert!(matches!(result, Err(GatewayError::Unauthenticated(_))));
    }

    #[test]
    fn test_signed_token_without_secret_rejected_not_500() {
        // No secret configured: signed tokens fail authentication rather
        // than surfacing a server misconfiguration to the caller.
        let cfg = config(None, &[], true);
        let token = mint_token("acme", "s3cret", 300).unwrap();
        let result = resolve_identity(&token, &cfg);
        assert!(matches!(result, Err(GatewayError::Unauthenticated(_))));
    }

    #[test]
    fn test_tenant_claim_fallback() {
        let cfg = config(Some("s3cret"), &[], true);
        let claims = Claims {
            sub: None,
            tenant: Some("legacy-corp".to_string()),
            exp: (chrono::Utc::now().timestamp() + 300) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        let identity = resolve_identity(&token, &cfg).unwrap();
        assert_eq!(identity.tenant_id, "legacy-corp");
    }

    #[test]
    fn test_empty_subject_rejected() {
        let cfg = config(Some("s3cret"), &[], true);
        let claims = Claims {
            sub: Some("  ".to_string()),
            tenant: None,
            exp: (chrono::Utc::now().timestamp() + 300) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        let result = resolve_identity(&token, &cfg);
        assert!(matches!(result, Err(GatewayError::Unauthenticated(_))));
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), Some("abc"));
    }

    #[test]
    fn test_extract_bearer_token_scheme_is_case_insensitive() {
        for scheme in ["bearer", "BEARER", "BeArEr"] {
            let mut headers = HeaderMap::new();
            headers.insert(
                "authorization",
                format!("{scheme} dev-token").parse().unwrap(),
            );
            assert_eq!(extract_bearer_token(&headers), Some("dev-token"));
        }
    }

    #[test]
    fn test_extract_bearer_token_empty_token_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn test_extract_bearer_token_missing_or_wrong_scheme() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
