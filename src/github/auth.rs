//! GitHub App authentication: sign a short-lived JWT as the app, then trade
//! it for an installation access token.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use super::{check_status, GitHubError};
use crate::config::{AppCredentials, GitHubSettings};

/// JWT claims for GitHub App authentication.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppClaims {
    /// Issued at, backdated a minute for clock skew.
    pub iat: u64,
    /// Expiry; GitHub rejects anything further than ten minutes out.
    pub exp: u64,
    /// The app id.
    pub iss: String,
}

/// Bearer token scoped to one installation. Never printed.
#[derive(Clone)]
pub struct InstallationToken(String);

impl InstallationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InstallationToken(<redacted>)")
    }
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    token: String,
}

pub fn generate_jwt(credentials: &AppCredentials) -> Result<String, GitHubError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| GitHubError::Clock)?
        .as_secs();

    let claims = AppClaims {
        iat: now.saturating_sub(60),
        exp: now + 600,
        iss: credentials.app_id.clone(),
    };

    let key = EncodingKey::from_rsa_pem(credentials.private_key.pem())?;
    Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
}

/// Exchange the app JWT for an installation token.
#[instrument(skip(http, settings, credentials))]
pub async fn installation_token(
    http: &reqwest::Client,
    settings: &GitHubSettings,
    credentials: &AppCredentials,
    installation_id: u64,
) -> Result<InstallationToken, GitHubError> {
    let jwt = generate_jwt(credentials)?;
    let url = format!(
        "{}/app/installations/{}/access_tokens",
        settings.api_url, installation_id
    );

    debug!("requesting installation token");
    let response = http.post(&url).bearer_auth(jwt).send().await?;
    let response = check_status(response, "POST").await?;
    let body = response.json::<AccessTokenResponse>().await?;
    debug!("received installation token");

    Ok(InstallationToken(body.token))
}
