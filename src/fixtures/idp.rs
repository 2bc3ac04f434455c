//! A stand-in OpenID provider for the AWS web-identity auth tests.
//!
//! STS is pointed at the discovery document and key set produced here, and
//! the driver logs in with an ID token this provider signs. Nothing is
//! served: each document is printed and uploaded by the calling script.

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, instrument};

pub const ISSUER_VAR: &str = "IDP_ISSUER";
pub const JWKS_URI_VAR: &str = "IDP_JWKS_URI";
pub const RSA_KEY_VAR: &str = "IDP_RSA_KEY";
pub const CLIENT_ID_VAR: &str = "IDP_CLIENT_ID";

pub const DEFAULT_CLIENT_ID: &str = "0oadp0hpl7q3UIehP297";
pub const TEST_USER: &str = "test_user";

const KEY_ID: &str = "1549e0aef574d1c7bdd136c202b8d290580b165c";
const SUBJECT_SALT: &str = "salt";
const SECTOR_IDENTIFIER: &str = "example.com";
/// Never contacted; STS only needs these to be well-formed.
const PLACEHOLDER_ENDPOINT: &str = "https://example.com";
const TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum IdpError {
    #[error("Missing identity provider setting: {0} is not set")]
    MissingVar(&'static str),

    #[error("IDP_RSA_KEY is not valid base64: {0}")]
    KeyEncoding(#[from] base64::DecodeError),

    #[error("IDP_RSA_KEY does not decode to PEM text: {0}")]
    KeyText(#[from] std::string::FromUtf8Error),

    #[error("IDP_RSA_KEY is not a PKCS#1 or PKCS#8 RSA private key: {0}")]
    Key(#[from] rsa::pkcs8::Error),

    #[error("Failed to sign ID token: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Failed to serialize provider document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write token to {path}: {source}")]
    WriteToken {
        path: String,
        source: std::io::Error,
    },

    #[error("System clock is before the Unix epoch")]
    Clock,
}

#[derive(Clone)]
pub struct IdpSettings {
    pub issuer: String,
    pub jwks_uri: String,
    pub client_id: String,
    private_key_pem: String,
}

impl fmt::Debug for IdpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdpSettings")
            .field("issuer", &self.issuer)
            .field("jwks_uri", &self.jwks_uri)
            .field("client_id", &self.client_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

impl IdpSettings {
    pub fn from_env() -> Result<Self, IdpError> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, IdpError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .collect();
        let mut take = |name: &'static str| vars.remove(name).ok_or(IdpError::MissingVar(name));

        let issuer = take(ISSUER_VAR)?;
        let jwks_uri = take(JWKS_URI_VAR)?;
        let private_key_pem = decode_key_var(&take(RSA_KEY_VAR)?)?;
        let client_id = take(CLIENT_ID_VAR).unwrap_or_else(|_| DEFAULT_CLIENT_ID.to_string());

        Ok(Self {
            issuer,
            jwks_uri,
            client_id,
            private_key_pem,
        })
    }
}

/// `IDP_RSA_KEY` holds PEM text, or base64 of it when it ends in padding.
fn decode_key_var(raw: &str) -> Result<String, IdpError> {
    if !raw.ends_with('=') {
        return Ok(raw.to_string());
    }
    let bytes = URL_SAFE.decode(raw).or_else(|_| STANDARD.decode(raw))?;
    Ok(String::from_utf8(bytes)?)
}

/// Claims of the ID token handed to STS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
    pub auth_time: u64,
    /// Authorization claim the test server maps to roles.
    pub foo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

/// OpenID discovery document.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderConfiguration {
    pub issuer: String,
    pub authorization_endpoint: &'static str,
    pub jwks_uri: String,
    pub token_endpoint: &'static str,
    pub userinfo_endpoint: &'static str,
    pub registration_endpoint: &'static str,
    pub end_session_endpoint: &'static str,
    pub scopes_supported: &'static [&'static str],
    pub response_types_supported: &'static [&'static str],
    pub response_modes_supported: &'static [&'static str],
    pub grant_types_supported: &'static [&'static str],
    pub subject_types_supported: &'static [&'static str],
    pub id_token_signing_alg_values_supported: &'static [&'static str],
    pub token_endpoint_auth_methods_supported: &'static [&'static str],
    pub claims_parameter_supported: bool,
}

pub struct MockIdentityProvider {
    settings: IdpSettings,
    key: RsaPrivateKey,
    encoding_key: EncodingKey,
}

impl MockIdentityProvider {
    pub fn new(settings: IdpSettings) -> Result<Self, IdpError> {
        let pem = format!("{}\n", settings.private_key_pem.trim());
        let key = RsaPrivateKey::from_pkcs1_pem(&pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())?;
        debug!(issuer = %settings.issuer, "loaded identity provider key");
        Ok(Self {
            settings,
            key,
            encoding_key,
        })
    }

    /// Pairwise subject of the test user, as STS will see it in `sub`.
    pub fn user_id(&self) -> String {
        pairwise_subject(TEST_USER, SECTOR_IDENTIFIER)
    }

    pub fn id_token(&self) -> Result<String, IdpError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| IdpError::Clock)?
            .as_secs();
        self.id_token_at(now)
    }

    pub fn id_token_at(&self, now: u64) -> Result<String, IdpError> {
        let claims = IdTokenClaims {
            iss: self.settings.issuer.clone(),
            sub: self.user_id(),
            aud: self.settings.client_id.clone(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
            auth_time: now,
            foo: "bar".to_string(),
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(KEY_ID.to_string());
        Ok(encode(&header, &claims, &self.encoding_key)?)
    }

    /// Sign a fresh token and store it where the AWS SDK reads web identity
    /// tokens from.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn write_token(&self, path: &Path) -> Result<String, IdpError> {
        let token = self.id_token()?;
        fs::write(path, &token).map_err(|source| IdpError::WriteToken {
            path: path.display().to_string(),
            source,
        })?;
        info!("wrote web identity token");
        Ok(token)
    }

    pub fn jwks(&self) -> JsonWebKeySet {
        JsonWebKeySet {
            keys: vec![JsonWebKey {
                kty: "RSA".to_string(),
                alg: "RS256".to_string(),
                key_use: "sig".to_string(),
                kid: KEY_ID.to_string(),
                n: URL_SAFE_NO_PAD.encode(self.key.n().to_bytes_be()),
                e: URL_SAFE_NO_PAD.encode(self.key.e().to_bytes_be()),
            }],
        }
    }

    pub fn configuration(&self) -> ProviderConfiguration {
        ProviderConfiguration {
            issuer: self.settings.issuer.clone(),
            authorization_endpoint: PLACEHOLDER_ENDPOINT,
            jwks_uri: self.settings.jwks_uri.clone(),
            token_endpoint: PLACEHOLDER_ENDPOINT,
            userinfo_endpoint: PLACEHOLDER_ENDPOINT,
            registration_endpoint: PLACEHOLDER_ENDPOINT,
            end_session_endpoint: PLACEHOLDER_ENDPOINT,
            scopes_supported: &["openid", "profile"],
            response_types_supported: &[
                "code",
                "code id_token",
                "code token",
                "code id_token token",
            ],
            response_modes_supported: &["query", "fragment"],
            grant_types_supported: &["authorization_code", "implicit"],
            subject_types_supported: &["pairwise"],
            id_token_signing_alg_values_supported: &["RS256"],
            token_endpoint_auth_methods_supported: &["client_secret_basic"],
            claims_parameter_supported: true,
        }
    }
}

/// Salted SHA-512 of sector and user, hex encoded.
fn pairwise_subject(user: &str, sector: &str) -> String {
    let digest = Sha512::digest(format!("{sector}{user}{SUBJECT_SALT}").as_bytes());
    hex::encode(digest)
}
