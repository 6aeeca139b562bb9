use std::collections::HashMap;
use std::path::Path;

use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum KeyLoadError {
    #[error("no verification keys configured: set AUTH_HS256_SECRET, AUTH_JWKS_URL, AUTH_JWKS_PATH or AUTH_ISSUER")]
    NotConfigured,

    #[error("failed to fetch JWKS from {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("failed to read JWKS file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JWKS document: {0}")]
    Parse(String),

    #[error("JWKS document contains no usable signing keys")]
    Empty,
}

/// Material used to check token signatures.
pub enum VerificationKeys {
    /// A single HMAC secret shared with the issuer.
    Shared(DecodingKey),
    /// Public keys published by the issuer, by key id.
    Published(HashMap<String, (DecodingKey, Algorithm)>),
}

impl VerificationKeys {
    pub fn shared_secret(secret: &str) -> Self {
        VerificationKeys::Shared(DecodingKey::from_secret(secret.as_bytes()))
    }

    /// Keeps the signing keys of a JWKS document that have a `kid` and a
    /// supported algorithm; everything else is skipped.
    pub fn from_jwks(set: &JwkSet) -> Result<Self, KeyLoadError> {
        let mut keys = HashMap::new();
        for jwk in &set.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                warn!("Skipping JWK without a key id");
                continue;
            };
            let Some(algorithm) = algorithm_for(&jwk.algorithm) else {
                warn!(kid = %kid, "Skipping JWK with unsupported key type");
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    debug!(kid = %kid, ?algorithm, "Loaded verification key");
                    keys.insert(kid, (key, algorithm));
                }
                Err(e) => warn!(kid = %kid, "Skipping unusable JWK: {}", e),
            }
        }

        if keys.is_empty() {
            return Err(KeyLoadError::Empty);
        }
        Ok(VerificationKeys::Published(keys))
    }

    pub fn from_jwks_json(raw: &str) -> Result<Self, KeyLoadError> {
        let set: JwkSet =
            serde_json::from_str(raw).map_err(|e| KeyLoadError::Parse(e.to_string()))?;
        Self::from_jwks(&set)
    }

    pub fn from_jwks_file(path: impl AsRef<Path>) -> Result<Self, KeyLoadError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| KeyLoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loaded JWKS from {}", path.display());
        Self::from_jwks_json(&raw)
    }

    /// Fetches the issuer's JWKS once; keys are not refreshed afterwards.
    pub async fn fetch_jwks(url: &str) -> Result<Self, KeyLoadError> {
        let fetch_error = |message: String| KeyLoadError::Fetch {
            url: url.to_string(),
            message,
        };

        let response = reqwest::get(url)
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP {}", response.status())));
        }
        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| KeyLoadError::Parse(e.to_string()))?;

        info!("Loaded {} JWKS key(s) from {}", set.keys.len(), url);
        Self::from_jwks(&set)
    }

    /// Key and algorithm for a token header. A shared secret only ever
    /// verifies HS256, whatever the header claims.
    pub fn select(&self, kid: Option<&str>) -> Option<(&DecodingKey, Algorithm)> {
        match self {
            VerificationKeys::Shared(key) => Some((key, Algorithm::HS256)),
            VerificationKeys::Published(keys) => {
                let (key, algorithm) = keys.get(kid?)?;
                Some((key, *algorithm))
            }
        }
    }
}

fn algorithm_for(params: &AlgorithmParameters) -> Option<Algorithm> {
    match params {
        AlgorithmParameters::RSA(_) => Some(Algorithm::RS256),
        AlgorithmParameters::EllipticCurve(ec) => match ec.curve {
            EllipticCurve::P256 => Some(Algorithm::ES256),
            EllipticCurve::P384 => Some(Algorithm::ES384),
            _ => None,
        },
        _ => None,
    }
}
