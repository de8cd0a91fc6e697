//! Google ID token verification. Tokens are checked offline against
//! Google's published RSA keys; the key set is fetched lazily and cached
//! for an hour, matching Google's own rotation guidance.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

const CERTS_TTL: Duration = Duration::from_secs(60 * 60);

/// Identity attested by the provider. Only `subject` is trusted downstream;
/// the email is informational.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> anyhow::Result<VerifiedIdentity>;
}

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

struct KeyCache {
    fetched_at: Option<Instant>,
    keys: HashMap<String, Jwk>,
}

pub struct GoogleVerifier {
    http: reqwest::Client,
    certs_url: String,
    validation: Validation,
    cache: RwLock<KeyCache>,
}

impl GoogleVerifier {
    pub fn new(client_id: &str, certs_url: &str) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[client_id]);
        validation.set_issuer(&["accounts.google.com", "https://accounts.google.com"]);
        Self {
            http: reqwest::Client::new(),
            certs_url: certs_url.to_string(),
            validation,
            cache: RwLock::new(KeyCache {
                fetched_at: None,
                keys: HashMap::new(),
            }),
        }
    }

    async fn signing_key(&self, kid: &str) -> anyhow::Result<Jwk> {
        {
            let cache = self.cache.read().await;
            if let (Some(fetched_at), Some(key)) = (cache.fetched_at, cache.keys.get(kid)) {
                if fetched_at.elapsed() < CERTS_TTL {
                    return Ok(key.clone());
                }
            }
        }

        let set: JwkSet = self
            .http
            .get(&self.certs_url)
            .send()
            .await
            .context("fetch Google signing keys")?
            .error_for_status()
            .context("Google signing key endpoint")?
            .json()
            .await
            .context("parse Google signing keys")?;
        debug!(keys = set.keys.len(), "refreshed Google signing keys");

        let mut cache = self.cache.write().await;
        cache.fetched_at = Some(Instant::now());
        cache.keys = set.keys.into_iter().map(|k| (k.kid.clone(), k)).collect();
        cache
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| anyhow!("no Google signing key with kid {kid}"))
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(&self, token: &str) -> anyhow::Result<VerifiedIdentity> {
        let header = decode_header(token).context("malformed ID token")?;
        let kid = match header.kid {
            Some(kid) => kid,
            None => bail!("ID token has no key id"),
        };

        let jwk = self.signing_key(&kid).await?;
        let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .context("bad RSA components in Google key set")?;
        let data = decode::<GoogleClaims>(token, &key, &self.validation)
            .context("ID token rejected")?;

        Ok(VerifiedIdentity {
            subject: data.claims.sub,
            email: data.claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_a_malformed_token_without_fetching_keys() {
        let verifier = GoogleVerifier::new("client-id", "https://example.invalid/certs");
        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[tokio::test]
    async fn rejects_a_token_without_a_key_id() {
        // Unsigned token with alg=none and no kid; must fail before any
        // network access.
        let token = "eyJhbGciOiJub25lIn0.eyJzdWIiOiIxMjMifQ.";
        let verifier = GoogleVerifier::new("client-id", "https://example.invalid/certs");
        assert!(verifier.verify(token).await.is_err());
    }
}
