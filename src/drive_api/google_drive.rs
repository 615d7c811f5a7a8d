use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::{
    header::{HeaderMap, CONTENT_RANGE, RANGE},
    Client, RequestBuilder, Response, StatusCode,
};
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::auth::Session;

use super::{DriveApiError, FileFilter, RemoteFileRef, RemoteStore};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com";

const LIST_PAGE_SIZE: &str = "1000";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, size, createdTime)";
const DOWNLOAD_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Internal representation of one page of the files.list endpoint, before
/// we've checked that the fields we need are present.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFileList {
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFile {
    id: Option<String>,
    name: Option<String>,
    size: Option<String>,
    created_time: Option<String>,
}

impl TryFrom<RawFile> for RemoteFileRef {
    type Error = DriveApiError;

    fn try_from(raw: RawFile) -> Result<Self, Self::Error> {
        let Some(id) = raw.id else {
            return Err(DriveApiError::MissingField { field: "id" });
        };
        let Some(name) = raw.name else {
            return Err(DriveApiError::MissingField { field: "name" });
        };
        let Some(size) = raw.size else {
            return Err(DriveApiError::MissingField { field: "size" });
        };
        let Some(created_time) = raw.created_time else {
            return Err(DriveApiError::MissingField {
                field: "createdTime",
            });
        };

        let size_bytes = size.parse::<u64>().map_err(|_| DriveApiError::MalformedField {
            field: "size",
            value: size.clone(),
        })?;

        let created_at = DateTime::parse_from_rfc3339(&created_time)
            .map_err(|_| DriveApiError::MalformedField {
                field: "createdTime",
                value: created_time.clone(),
            })?
            .with_timezone(&Utc);

        Ok(RemoteFileRef {
            id,
            name,
            size_bytes,
            created_at,
        })
    }
}

/// Google Drive v3 client. Every call is authorized with the bearer token of
/// the session it is given.
pub struct DriveClient {
    client: Client,
    base_url: String,
    chunk_size: u64,
}

impl DriveClient {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, DRIVE_API_BASE)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            chunk_size: DOWNLOAD_CHUNK_SIZE,
        }
    }

    #[cfg(test)]
    fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.base_url)
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/{}", self.files_url(), id)
    }

    fn authorized(&self, builder: RequestBuilder, session: &Session) -> RequestBuilder {
        builder.bearer_auth(session.access_token().expose_secret())
    }
}

impl std::fmt::Debug for DriveClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "DriveClient({})", self.base_url)
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn list_matching(
        &self,
        session: &Session,
        filter: &FileFilter,
        folder_id: Option<&str>,
        all_pages: bool,
    ) -> Result<Vec<RemoteFileRef>, DriveApiError> {
        let query = filter.to_query(folder_id);
        debug!("listing files with query {query:?}");

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.authorized(self.client.get(self.files_url()), session).query(&[
                ("q", query.as_str()),
                ("pageSize", LIST_PAGE_SIZE),
                ("fields", LIST_FIELDS),
            ]);

            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = error_for_status(request.send().await?).await?;
            let body = response.text().await?;

            let page: RawFileList = match serde_json::from_str(&body) {
                Ok(page) => page,
                Err(source) => return Err(DriveApiError::BadResponseJson { body, source }),
            };

            for raw in page.files {
                files.push(RemoteFileRef::try_from(raw)?);
            }

            match page.next_page_token {
                Some(token) if all_pages => page_token = Some(token),
                Some(_) => {
                    warn!(
                        "Listing was truncated after {} files; pass --all-pages to fetch the rest",
                        files.len()
                    );
                    break;
                }
                None => break,
            }
        }

        debug!("listing matched {} files", files.len());
        Ok(files)
    }

    async fn fetch(&self, session: &Session, file: &RemoteFileRef) -> Result<Vec<u8>, DriveApiError> {
        let url = self.file_url(&file.id);

        let mut buffer: Vec<u8> = Vec::new();
        let mut total: Option<u64> = None;

        loop {
            let start = buffer.len() as u64;
            let end = start + self.chunk_size - 1;

            let response = self
                .authorized(self.client.get(&url), session)
                .query(&[("alt", "media")])
                .header(RANGE, format!("bytes={}-{}", start, end))
                .send()
                .await?;

            let status = response.status();

            // 416 means we asked for bytes past the end: either the file is
            // empty, or its size was an exact multiple of the chunk size and no
            // Content-Range told us so.
            let past_end = total.map_or(true, |total| start >= total);
            if status == StatusCode::RANGE_NOT_SATISFIABLE && past_end {
                info!("Downloading {}: 100%", file.name);
                return Ok(buffer);
            }

            let response = error_for_status(response).await?;

            if status == StatusCode::OK {
                // The server ignored the range and sent the whole object.
                let body = response.bytes().await?;
                info!("Downloading {}: 100%", file.name);
                return Ok(body.to_vec());
            }

            if total.is_none() {
                total = content_range_total(response.headers());
            }

            let chunk = response.bytes().await?;
            let chunk_len = chunk.len() as u64;
            buffer.extend_from_slice(&chunk);

            let done = match total {
                Some(total) => buffer.len() as u64 >= total,
                None => chunk_len < self.chunk_size,
            };

            if let Some(total) = total.filter(|total| *total > 0) {
                let percent = (buffer.len() as u64 * 100 / total).min(100);
                info!("Downloading {}: {}%", file.name, percent);
            }

            if done || chunk_len == 0 {
                break;
            }
        }

        Ok(buffer)
    }

    async fn delete(&self, session: &Session, file: &RemoteFileRef) -> Result<(), DriveApiError> {
        let response = self
            .authorized(self.client.delete(self.file_url(&file.id)), session)
            .send()
            .await?;

        error_for_status(response).await?;
        debug!("deleted remote file {} ({})", file.name, file.id);

        Ok(())
    }
}

/// Turns non-success responses into errors, keeping the body around for the
/// error message.
async fn error_for_status(response: Response) -> Result<Response, DriveApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::UNAUTHORIZED {
        Err(DriveApiError::Unauthenticated { body })
    } else {
        Err(DriveApiError::ResponseError { status, body })
    }
}

/// Reads the complete length out of a `Content-Range: bytes a-b/total` header.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.split_once('/')?;
    total.trim().parse().ok()
}
