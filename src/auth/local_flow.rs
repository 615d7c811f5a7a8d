//! The installed-app authorization flow: the user visits a Google consent page
//! and is redirected back to a one-shot HTTP listener on localhost.

use chrono::Utc;
use log::{debug, info};
use reqwest::{Client, Url};
use secrecy::ExposeSecret;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
};
use uuid::Uuid;

use super::{
    token_cache::{request_token, TokenCache},
    AuthError, ClientSecrets,
};

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>heic2jpg</title></head>\
<body><p>The authentication flow has completed. You may close this window.</p></body></html>";
const NOT_FOUND_PAGE: &str = "<!DOCTYPE html><html><body><p>Not found.</p></body></html>";

/// The interesting query parameters of the redirect back to us.
#[derive(Debug, Default, PartialEq, Eq)]
struct Redirect {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl Redirect {
    /// Parses the request line of an HTTP request, returning `None` for any
    /// request that isn't an authorization redirect.
    fn from_request_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let _method = parts.next()?;
        let target = parts.next()?;

        let url = Url::parse(&format!("http://localhost{}", target)).ok()?;
        let mut redirect = Redirect::default();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => redirect.code = Some(value.into_owned()),
                "state" => redirect.state = Some(value.into_owned()),
                "error" => redirect.error = Some(value.into_owned()),
                _ => {}
            }
        }

        if redirect.code.is_none() && redirect.error.is_none() {
            return None;
        }

        Some(redirect)
    }

    fn into_code(self, expected_state: &str) -> Result<String, AuthError> {
        if let Some(reason) = self.error {
            return Err(AuthError::Denied { reason });
        }

        if self.state.as_deref() != Some(expected_state) {
            return Err(AuthError::StateMismatch);
        }

        self.code.ok_or(AuthError::RedirectMalformed)
    }
}

fn authorization_url(
    secrets: &ClientSecrets,
    redirect_uri: &str,
    scopes: &[&str],
    state: &str,
) -> Result<Url, AuthError> {
    let scope = scopes.join(" ");

    Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("response_type", "code"),
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
            ("state", state),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|_| AuthError::InvalidAuthUri {
        uri: secrets.auth_uri.clone(),
    })
}

/// Serves requests on `listener` until one of them is the authorization
/// redirect.
async fn accept_redirect(listener: &TcpListener) -> Result<Redirect, AuthError> {
    loop {
        let (mut stream, peer) = listener.accept().await?;

        let mut request_line = String::new();
        BufReader::new(&mut stream)
            .read_line(&mut request_line)
            .await?;
        debug!("redirect listener got {:?} from {}", request_line.trim(), peer);

        let redirect = Redirect::from_request_line(&request_line);
        let (status, body) = match &redirect {
            Some(_) => ("200 OK", SUCCESS_PAGE),
            None => ("404 Not Found", NOT_FOUND_PAGE),
        };

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await?;

        if let Some(redirect) = redirect {
            return Ok(redirect);
        }
    }
}

pub async fn run(
    client: &Client,
    secrets: &ClientSecrets,
    scopes: &[&str],
) -> Result<TokenCache, AuthError> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let redirect_uri = format!("http://localhost:{}/", listener.local_addr()?.port());
    let state = Uuid::new_v4().simple().to_string();

    let url = authorization_url(secrets, &redirect_uri, scopes, &state)?;
    info!("Please visit this URL to authorize this application:\n{}", url);

    let code = accept_redirect(&listener).await?.into_code(&state)?;

    let response = request_token(
        client,
        &secrets.token_uri,
        &[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.expose_secret().as_str()),
        ],
    )
    .await?;

    let mut cache = TokenCache::new(secrets, scopes);
    cache.apply(response, Utc::now());

    Ok(cache)
}

#[cfg(test)]
mod test {
    use super::*;

    use secrecy::SecretString;
    use tokio::{io::AsyncReadExt, net::TcpStream};

    use crate::auth::{DEFAULT_AUTH_URI, DEFAULT_TOKEN_URI, DRIVE_SCOPE};

    fn secrets() -> ClientSecrets {
        ClientSecrets {
            client_id: "id".to_owned(),
            client_secret: SecretString::new("secret".to_owned()),
            auth_uri: DEFAULT_AUTH_URI.to_owned(),
            token_uri: DEFAULT_TOKEN_URI.to_owned(),
        }
    }

    #[test]
    fn parses_redirect_request_lines() {
        let redirect =
            Redirect::from_request_line("GET /?state=abc&code=4%2F0xyz&scope=drive HTTP/1.1\r\n")
                .unwrap();

        assert_eq!(redirect.code.as_deref(), Some("4/0xyz"));
        assert_eq!(redirect.into_code("abc").unwrap(), "4/0xyz");
    }

    #[test]
    fn ignores_unrelated_requests() {
        assert_eq!(Redirect::from_request_line("GET /favicon.ico HTTP/1.1"), None);
        assert_eq!(Redirect::from_request_line(""), None);
    }

    #[test]
    fn rejects_denied_and_forged_redirects() {
        let denied = Redirect::from_request_line("GET /?error=access_denied&state=abc HTTP/1.1")
            .unwrap()
            .into_code("abc");
        assert!(matches!(denied, Err(AuthError::Denied { .. })));

        let forged = Redirect::from_request_line("GET /?code=x&state=other HTTP/1.1")
            .unwrap()
            .into_code("abc");
        assert!(matches!(forged, Err(AuthError::StateMismatch)));
    }

    #[test]
    fn authorization_url_carries_client_and_scope() {
        let url = authorization_url(&secrets(), "http://localhost:8080/", &[DRIVE_SCOPE], "xyz")
            .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert!(pairs.contains(&("client_id".to_owned(), "id".to_owned())));
        assert!(pairs.contains(&("scope".to_owned(), DRIVE_SCOPE.to_owned())));
        assert!(pairs.contains(&("state".to_owned(), "xyz".to_owned())));
        assert!(pairs.contains(&(
            "redirect_uri".to_owned(),
            "http://localhost:8080/".to_owned()
        )));
    }

    #[tokio::test]
    async fn listener_skips_unrelated_requests() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let browser = tokio::spawn(async move {
            let mut responses = Vec::new();
            let requests = [
                "GET /favicon.ico HTTP/1.1\r\n\r\n",
                "GET /?code=c&state=s HTTP/1.1\r\n\r\n",
            ];

            for request in requests {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                stream.write_all(request.as_bytes()).await.unwrap();
                let mut response = String::new();
                stream.read_to_string(&mut response).await.unwrap();
                responses.push(response);
            }
            responses
        });

        let redirect = accept_redirect(&listener).await.unwrap();
        let responses = browser.await.unwrap();

        assert_eq!(redirect.into_code("s").unwrap(), "c");
        assert!(responses[0].starts_with("HTTP/1.1 404"));
        assert!(responses[1].contains("Content-Type: text/html"));
        assert!(responses[1].contains(SUCCESS_PAGE));
    }
}
