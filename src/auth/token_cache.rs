use std::{fmt, path::Path};

use chrono::{DateTime, Duration, Utc};
use fs_err as fs;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{AuthError, ClientSecrets, Session, DEFAULT_TOKEN_URI};

/// Tokens this close to expiry are treated as already expired.
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// The on-disk token cache, in the "authorized user" layout Google's client
/// libraries read and write.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenCache {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_owned()
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("TokenCache")
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

/// What the token endpoint returns for both the code exchange and refresh
/// grants.
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

impl TokenCache {
    pub fn new(secrets: &ClientSecrets, scopes: &[&str]) -> Self {
        Self {
            token: None,
            refresh_token: None,
            token_uri: secrets.token_uri.clone(),
            client_id: secrets.client_id.clone(),
            client_secret: secrets.client_secret.expose_secret().clone(),
            scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
            expiry: None,
        }
    }

    pub fn read(path: &Path) -> Result<Self, AuthError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// A token without an expiry is trusted until the API rejects it.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.token.is_none() {
            return false;
        }

        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_SKEW_SECONDS) > now,
            None => true,
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.token
            .clone()
            .map(|token| Session::from_access_token(SecretString::new(token)))
    }

    pub fn session_if_valid(&self, now: DateTime<Utc>) -> Option<Session> {
        if self.is_valid(now) {
            self.session()
        } else {
            None
        }
    }

    /// Trades the refresh token for a new access token.
    pub async fn refresh(mut self, client: &Client) -> Result<Self, AuthError> {
        let Some(refresh_token) = self.refresh_token.clone() else {
            return Err(AuthError::MissingAccessToken);
        };

        let response = request_token(
            client,
            &self.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ],
        )
        .await?;

        self.apply(response, Utc::now());
        Ok(self)
    }

    pub(super) fn apply(&mut self, response: TokenResponse, now: DateTime<Utc>) {
        self.token = Some(response.access_token);
        self.expiry = response
            .expires_in
            .map(|seconds| now + Duration::seconds(seconds));

        // Refresh responses usually leave the refresh token out.
        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }

        if let Some(scope) = response.scope {
            self.scopes = scope.split_whitespace().map(str::to_owned).collect();
        }
    }
}

/// POSTs a form to the token endpoint and decodes its answer.
pub(super) async fn request_token(
    client: &Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, AuthError> {
    let response = client.post(token_uri).form(form).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(AuthError::TokenEndpoint { status, body });
    }

    match serde_json::from_str(&body) {
        Ok(response) => Ok(response),
        Err(source) => Err(AuthError::BadTokenJson { body, source }),
    }
}
