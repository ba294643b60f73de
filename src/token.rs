// ABOUTME: Short-lived auth token issuance for the pub/sub backend
// ABOUTME: Pure function of (app credentials, principal, expiry); no caching

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::PubSubConfig;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "001";

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

/// Sign a token binding `principal` to an expiry timestamp.
/// Deterministic for a given (credentials, principal, expiry) triple.
pub fn build_token(
    app_id: &str,
    app_certificate: &str,
    principal: &str,
    expires_at: i64,
) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(app_certificate.as_bytes())
        .context("Invalid signing key")?;
    mac.update(app_id.as_bytes());
    mac.update(b"\n");
    mac.update(principal.as_bytes());
    mac.update(b"\n");
    mac.update(expires_at.to_string().as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    let payload = format!("{}:{}:{}:{}", app_id, principal, expires_at, signature);
    Ok(format!("{}{}", TOKEN_VERSION, URL_SAFE_NO_PAD.encode(payload)))
}

/// Issue a token for `principal` against the configured pub/sub project,
/// expiring `token_ttl_secs` from now.
pub fn issue_token(config: &PubSubConfig, principal: &str) -> Result<IssuedToken> {
    let app_id = config
        .app_id
        .as_deref()
        .context("pubsub.app_id not configured")?;
    let app_certificate = config
        .app_certificate
        .as_deref()
        .context("pubsub.app_certificate not configured")?;

    let expires_at = chrono::Utc::now().timestamp() + config.token_ttl_secs as i64;
    let token = build_token(app_id, app_certificate, principal, expires_at)?;
    Ok(IssuedToken { token, expires_at })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_deterministic() {
        let a = build_token("app", "cert", "server", 1_700_000_000).unwrap();
        let b = build_token("app", "cert", "server", 1_700_000_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_token_varies_with_inputs() {
        let base = build_token("app", "cert", "server", 1_700_000_000).unwrap();
        assert_ne!(base, build_token("app", "cert", "other", 1_700_000_000).unwrap());
        assert_ne!(base, build_token("app", "cert", "server", 1_700_000_001).unwrap());
        assert_ne!(base, build_token("app", "other", "server", 1_700_000_000).unwrap());
    }

    #[test]
    fn test_token_has_version_prefix() {
        let token = build_token("app", "cert", "server", 1_700_000_000).unwrap();
        assert!(token.starts_with(TOKEN_VERSION));
    }

    #[test]
    fn test_issue_token_requires_credentials() {
        let config = PubSubConfig::default();
        assert!(issue_token(&config, "server").is_err());
    }

    #[test]
    fn test_issue_token_with_credentials() {
        let config = PubSubConfig {
            app_id: Some("app".to_string()),
            app_certificate: Some("cert".to_string()),
            ..PubSubConfig::default()
        };
        let issued = issue_token(&config, "server").unwrap();
        assert!(issued.token.starts_with(TOKEN_VERSION));
        assert!(issued.expires_at > chrono::Utc::now().timestamp());
    }
}
