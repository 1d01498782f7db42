use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

/// Claims minted by the external authentication service. The gateway
/// never issues or stores credentials; it only verifies them and reads
/// the identity, role and tenant memberships they carry.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier
    pub sub: String,
    /// Role name (e.g. "server", "kitchen", "platform_operator")
    pub role: String,
    /// Tenant memberships, as tenant id strings
    #[serde(default)]
    pub tenants: Vec<String>,
    /// Token identifier
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

/// JWT verification.
///
/// Two modes, following what keys are configured:
/// - RS256 verify-only: JWT_PUBLIC_KEY set, the common production shape
///   (only the auth service holds the private key)
/// - HS256 full: JWT_SECRET set; can also mint tokens, used by tests and
///   local development
pub struct AuthManager {
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    token_ttl_hours: i64,
    issuer: String,
}

impl AuthManager {
    pub fn new(config: &Config) -> Result<Self> {
        let (algorithm, encoding_key, decoding_key) = if let Some(public_key) =
            config.jwt_public_key.as_ref()
        {
            tracing::info!("Initializing JWT with RS256 (verify-only mode)");
            let decoding_key = DecodingKey::from_rsa_pem(public_key.as_bytes())
                .context("Failed to parse JWT_PUBLIC_KEY as RSA PEM")?;
            (Algorithm::RS256, None, decoding_key)
        } else if let Some(secret) = config.jwt_secret.as_ref() {
            tracing::info!("Initializing JWT with HS256");
            (
                Algorithm::HS256,
                Some(EncodingKey::from_secret(secret.as_bytes())),
                DecodingKey::from_secret(secret.as_bytes()),
            )
        } else {
            anyhow::bail!(
                "No JWT configuration provided. Set JWT_PUBLIC_KEY (RS256 verify-only) \
                or JWT_SECRET (HS256)"
            );
        };

        Ok(Self {
            encoding_key,
            decoding_key,
            algorithm,
            token_ttl_hours: 12,
            issuer: config.jwt_issuer.clone(),
        })
    }

    /// Mint a token. Only available in HS256 mode; production gateways
    /// run verify-only and this returns an error there.
    pub fn create_token(&self, user_id: &str, role: &str, tenants: &[String]) -> Result<String> {
        let encoding_key = self.encoding_key.as_ref().ok_or_else(|| {
            anyhow::anyhow!("Cannot create tokens: AuthManager is in verify-only mode")
        })?;

        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            tenants: tenants.to_vec(),
            jti: Uuid::new_v4().to_string(),
            exp: (now + Duration::hours(self.token_ttl_hours)).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
        };

        let mut header = Header::default();
        header.alg = self.algorithm;

        encode(&header, &claims, encoding_key).context("Failed to encode JWT token")
    }

    /// Verify a presented credential and extract its claims. Signature,
    /// expiry and issuer are all enforced.
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[self.issuer.clone()]);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)
            .context("Token verification failed")?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimitsConfig, LoggingConfig};

    fn test_config(secret: &str) -> Config {
        Config {
            port: 0,
            http_port: 0,
            redis_url: String::new(),
            jwt_secret: Some(secret.to_string()),
            jwt_public_key: None,
            jwt_issuer: "brigade-auth".to_string(),
            platform_roles: vec!["platform_operator".to_string()],
            hello_deadline_secs: 10,
            heartbeat_interval_secs: 20,
            heartbeat_max_missed: 3,
            audit_queue_capacity: 64,
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_token_round_trip() {
        let auth = AuthManager::new(&test_config("test-secret-0123456789")).unwrap();
        let token = auth
            .create_token("user-1", "server", &["t-1".to_string()])
            .unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role, "server");
        assert_eq!(claims.tenants, vec!["t-1".to_string()]);
    }

    #[test]
    fn test_token_from_wrong_secret_is_rejected() {
        let auth_a = AuthManager::new(&test_config("secret-aaaaaaaaaaaa")).unwrap();
        let auth_b = AuthManager::new(&test_config("secret-bbbbbbbbbbbb")).unwrap();
        let token = auth_a.create_token("user-1", "server", &[]).unwrap();
        assert!(auth_b.verify_token(&token).is_err());
    }

    #[test]
    fn test_wrong_issuer_is_rejected() {
        let mut config = test_config("test-secret-0123456789");
        let auth = AuthManager::new(&config).unwrap();
        config.jwt_issuer = "someone-else".to_string();
        let other = AuthManager::new(&config).unwrap();
        let token = other.create_token("user-1", "server", &[]).unwrap();
        assert!(auth.verify_token(&token).is_err());
    }
}
