use std::path::Path;

use fs_err as fs;
use secrecy::SecretString;
use serde::Deserialize;

use super::{AuthError, DEFAULT_AUTH_URI, DEFAULT_TOKEN_URI};

#[derive(Debug, Deserialize)]
struct RawClientSecrets {
    installed: Option<RawClientConfig>,
    web: Option<RawClientConfig>,
}

#[derive(Debug, Deserialize)]
struct RawClientConfig {
    client_id: String,
    client_secret: String,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

/// An OAuth client registration, as downloaded from the Google Cloud console.
#[derive(Debug)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: SecretString,
    pub auth_uri: String,
    pub token_uri: String,
}

impl ClientSecrets {
    pub fn read(path: &Path) -> Result<Self, AuthError> {
        if !path.exists() {
            return Err(AuthError::MissingClientSecrets {
                path: path.to_owned(),
            });
        }

        let contents = fs::read_to_string(path)?;
        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, AuthError> {
        let raw: RawClientSecrets =
            serde_json::from_str(contents).map_err(|source| AuthError::MalformedClientSecrets {
                path: path.to_owned(),
                source,
            })?;

        let Some(config) = raw.installed.or(raw.web) else {
            return Err(AuthError::MissingClientConfig {
                path: path.to_owned(),
            });
        };

        Ok(Self {
            client_id: config.client_id,
            client_secret: SecretString::new(config.client_secret),
            auth_uri: config
                .auth_uri
                .unwrap_or_else(|| DEFAULT_AUTH_URI.to_owned()),
            token_uri: config
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_owned()),
        })
    }
}
