//! Obtaining an access token for Google Drive, either from the on-disk token
//! cache, by refreshing it, or through the interactive installed-app flow.

mod client_secrets;
mod local_flow;
mod token_cache;

use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::Utc;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use secrecy::SecretString;
use thiserror::Error;

pub use self::client_secrets::ClientSecrets;
pub use self::token_cache::TokenCache;

/// Full Drive access; the read-only scope can't delete the originals.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// An authorized session with the remote store. Every remote call takes one
/// of these.
pub struct Session {
    access_token: SecretString,
}

impl Session {
    pub fn from_access_token(access_token: SecretString) -> Self {
        Self { access_token }
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "Session")
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(
        "Credentials file '{}' not found. Please download it from Google Cloud Console.",
        .path.display()
    )]
    MissingClientSecrets { path: PathBuf },

    #[error("Credentials file '{}' is not a valid OAuth client secrets file", .path.display())]
    MalformedClientSecrets {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Credentials file '{}' has neither an 'installed' nor a 'web' client", .path.display())]
    MissingClientConfig { path: PathBuf },

    #[error("Client secrets contain an invalid authorization URI: {uri}")]
    InvalidAuthUri { uri: String },

    #[error("Token endpoint returned HTTP {status} with body: {body}")]
    TokenEndpoint { status: StatusCode, body: String },

    #[error("Token endpoint returned success, but had malformed JSON response: {body}")]
    BadTokenJson {
        body: String,
        source: serde_json::Error,
    },

    #[error("Authorization was denied: {reason}")]
    Denied { reason: String },

    #[error("Authorization response state did not match the request")]
    StateMismatch,

    #[error("Authorization redirect did not contain a code")]
    RedirectMalformed,

    #[error("Token endpoint did not return an access token")]
    MissingAccessToken,

    #[error("Could not serialize the token cache")]
    TokenCacheJson(#[from] serde_json::Error),

    #[error("OAuth HTTP error")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Produces a session, preferring a still-valid cached token, then a refresh,
/// then a fresh interactive authorization. The token cache is rewritten
/// whenever a new token was obtained.
pub async fn authenticate(
    client: &Client,
    credentials_file: &Path,
    token_file: &Path,
) -> Result<Session, AuthError> {
    let cached = if token_file.exists() {
        match TokenCache::read(token_file) {
            Ok(cache) => Some(cache),
            Err(err) => {
                warn!(
                    "Ignoring unreadable token cache {}: {}",
                    token_file.display(),
                    err
                );
                None
            }
        }
    } else {
        None
    };

    if let Some(cache) = &cached {
        if let Some(session) = cache.session_if_valid(Utc::now()) {
            debug!("using cached access token from {}", token_file.display());
            info!("Successfully authenticated with Google Drive");
            return Ok(session);
        }
    }

    let cache = match cached {
        Some(cache) if cache.refresh_token.is_some() => {
            info!("Access token expired, refreshing");
            cache.refresh(client).await?
        }
        _ => {
            let secrets = ClientSecrets::read(credentials_file)?;
            local_flow::run(client, &secrets, &[DRIVE_SCOPE]).await?
        }
    };

    cache.write(token_file)?;
    debug!("wrote token cache to {}", token_file.display());

    let Some(session) = cache.session() else {
        return Err(AuthError::MissingAccessToken);
    };

    info!("Successfully authenticated with Google Drive");
    Ok(session)
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::Duration;
    use fs_err as fs;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn valid_cached_token_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("token.json");
        let expiry = Utc::now() + Duration::hours(1);

        fs::write(
            &token_file,
            json!({
                "token": "cached-token",
                "refresh_token": "refresh",
                "token_uri": "http://127.0.0.1:9/token",
                "client_id": "id",
                "client_secret": "secret",
                "scopes": [DRIVE_SCOPE],
                "expiry": expiry.to_rfc3339(),
            })
            .to_string(),
        )
        .unwrap();

        let session = authenticate(
            &Client::new(),
            &dir.path().join("missing-credentials.json"),
            &token_file,
        )
        .await
        .unwrap();

        assert_eq!(session.access_token().expose_secret(), "cached-token");
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_cached() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh-token",
                "expires_in": 3599,
                "token_type": "Bearer",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("token.json");

        fs::write(
            &token_file,
            json!({
                "token": "stale-token",
                "refresh_token": "refresh",
                "token_uri": format!("{}/token", server.uri()),
                "client_id": "id",
                "client_secret": "secret",
                "scopes": [DRIVE_SCOPE],
                "expiry": (Utc::now() - Duration::hours(1)).to_rfc3339(),
            })
            .to_string(),
        )
        .unwrap();

        let session = authenticate(
            &Client::new(),
            &dir.path().join("missing-credentials.json"),
            &token_file,
        )
        .await
        .unwrap();

        assert_eq!(session.access_token().expose_secret(), "fresh-token");

        let rewritten = TokenCache::read(&token_file).unwrap();
        assert_eq!(rewritten.token.as_deref(), Some("fresh-token"));
        assert_eq!(rewritten.refresh_token.as_deref(), Some("refresh"));
    }

    #[tokio::test]
    async fn missing_credentials_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = authenticate(
            &Client::new(),
            &dir.path().join("credentials.json"),
            &dir.path().join("token.json"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AuthError::MissingClientSecrets { .. }));
        assert!(err.to_string().contains("Credentials file"));
    }

    #[test]
    fn session_debug_hides_token() {
        let session = Session::from_access_token(SecretString::new("hunter2".to_owned()));
        assert!(!format!("{:?}", session).contains("hunter2"));
    }
}
