pub mod keys;

use jsonwebtoken::{decode, decode_header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::AuthConfig;
pub use keys::{KeyLoadError, VerificationKeys};

/// Claims read from a verified identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(rename = "cognito:username", default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Authenticated caller, placed in request extensions by the auth middleware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    /// Stable subject identifier; the ownership key for tasks.
    pub subject: String,
    pub username: Option<String>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            username: claims.username.or(claims.email),
        }
    }
}

/// Every verification failure looks the same from outside.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<AuthUser, AuthError>;
}

/// Verifies signed JWTs against configured keys, issuer, audience and expiry.
pub struct JwtVerifier {
    keys: VerificationKeys,
    issuer: Option<String>,
    audience: Option<String>,
    leeway: u64,
}

impl JwtVerifier {
    pub fn new(keys: VerificationKeys) -> Self {
        Self {
            keys,
            issuer: None,
            audience: None,
            leeway: 0,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway = seconds;
        self
    }

    /// Builds a verifier from config, loading keys from (in order) an HS256
    /// secret, a JWKS file, a JWKS URL, or the issuer's well-known JWKS.
    pub async fn from_config(config: &AuthConfig) -> Result<Self, KeyLoadError> {
        let keys = if let Some(secret) = config.hs256_secret.as_deref() {
            info!("Verifying tokens with a shared HS256 secret");
            VerificationKeys::shared_secret(secret)
        } else if let Some(path) = config.jwks_path.as_deref() {
            VerificationKeys::from_jwks_file(path)?
        } else if let Some(url) = config.jwks_url.as_deref() {
            VerificationKeys::fetch_jwks(url).await?
        } else if let Some(issuer) = config.issuer.as_deref() {
            let url = format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'));
            VerificationKeys::fetch_jwks(&url).await?
        } else {
            return Err(KeyLoadError::NotConfigured);
        };

        let mut verifier = Self::new(keys).with_leeway(config.leeway_secs);
        verifier.issuer = config.issuer.clone();
        verifier.audience = config.audience.clone();
        Ok(verifier)
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, String> {
        let header = decode_header(token).map_err(|e| format!("malformed header: {}", e))?;
        let (key, algorithm) = self
            .keys
            .select(header.kid.as_deref())
            .ok_or_else(|| format!("no key for kid {:?}", header.kid))?;
        if header.alg != algorithm {
            return Err(format!("unexpected algorithm {:?}", header.alg));
        }

        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        decode::<Claims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| e.to_string())
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        match self.decode_claims(token) {
            Ok(claims) if !claims.sub.is_empty() => Ok(AuthUser::from(claims)),
            Ok(_) => {
                debug!("Rejected token without a subject");
                Err(AuthError::Unauthenticated)
            }
            Err(reason) => {
                debug!("Rejected token: {}", reason);
                Err(AuthError::Unauthenticated)
            }
        }
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
