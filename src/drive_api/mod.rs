mod google_drive;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::Session;

pub use self::google_drive::DriveClient;

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// A file living in the remote store, as reported by a listing query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRef {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Selects which remote files a listing should return: anything with the
/// given MIME type, or whose name contains one of the given suffixes. Folders
/// and trashed files never match.
#[derive(Debug, Clone)]
pub struct FileFilter {
    pub mime_type: String,
    pub name_suffixes: Vec<String>,
}

impl FileFilter {
    pub fn heic() -> Self {
        Self {
            mime_type: "image/heic".to_owned(),
            name_suffixes: vec![".heic".to_owned(), ".HEIC".to_owned()],
        }
    }

    /// Builds the server-side query expression, optionally restricted to the
    /// direct children of one folder.
    pub fn to_query(&self, folder_id: Option<&str>) -> String {
        let mut clauses = vec![format!("mimeType='{}'", escape_query(&self.mime_type))];
        for suffix in &self.name_suffixes {
            clauses.push(format!("name contains '{}'", escape_query(suffix)));
        }

        let query = format!(
            "({}) and mimeType != '{}' and trashed = false",
            clauses.join(" or "),
            FOLDER_MIME_TYPE
        );

        match folder_id {
            Some(folder_id) => format!("'{}' in parents and {}", escape_query(folder_id), query),
            None => query,
        }
    }
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
pub trait RemoteStore {
    /// Lists the files matching `filter`. Only the first page of results is
    /// returned unless `all_pages` is set.
    async fn list_matching(
        &self,
        session: &Session,
        filter: &FileFilter,
        folder_id: Option<&str>,
        all_pages: bool,
    ) -> Result<Vec<RemoteFileRef>, DriveApiError>;

    async fn fetch(&self, session: &Session, file: &RemoteFileRef) -> Result<Vec<u8>, DriveApiError>;

    async fn delete(&self, session: &Session, file: &RemoteFileRef) -> Result<(), DriveApiError>;
}

#[derive(Debug, Error)]
pub enum DriveApiError {
    #[error("Drive API HTTP error")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("Drive API rejected the session credentials: {body}")]
    Unauthenticated { body: String },

    #[error("Drive API returned HTTP {status} with body: {body}")]
    ResponseError { status: StatusCode, body: String },

    #[error("Drive API returned success, but had malformed JSON response: {body}")]
    BadResponseJson {
        body: String,
        source: serde_json::Error,
    },

    #[error("Drive API response is missing the '{field}' field")]
    MissingField { field: &'static str },

    #[error("Drive API response has a malformed '{field}' field: {value}")]
    MalformedField { field: &'static str, value: String },
}
