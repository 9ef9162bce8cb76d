use std::{fmt, sync::Arc};

use reqwest::{Response, Url};

/// Verbs the control surface uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        })
    }
}

/// A request against a server's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub base: Arc<str>,
    /// Resource path without a leading slash, e.g. `uc/outputs/main`.
    pub path: String,
    pub query: Vec<(&'static str, String)>,
    pub body: Option<String>,
}

impl Request {
    pub fn new(method: Method, base: &Arc<str>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            base: base.clone(),
            path: path.trim_start_matches('/').to_string(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(base: &Arc<str>, path: impl Into<String>) -> Self {
        Self::new(Method::Get, base, path)
    }

    pub fn post(base: &Arc<str>, path: impl Into<String>) -> Self {
        Self::new(Method::Post, base, path)
    }

    pub fn put(base: &Arc<str>, path: impl Into<String>) -> Self {
        Self::new(Method::Put, base, path)
    }

    pub fn query(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    pub fn body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Path and query as written, without percent-encoding.
    pub fn target(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }

        let query = self
            .query
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.path)
    }

    pub fn url(&self) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), self.path)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} /{}", self.method, self.target())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid url {url}: {message}")]
    Url { url: String, message: String },
    #[error("http request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
}

/// The transport the worker issues requests through. Implementations answer
/// with the response body of a successful request.
pub trait HttpClient: Send + Sync + 'static {
    fn send(&self, request: Request) -> impl Future<Output = Result<String, TransportError>> + Send;
}

/// [`HttpClient`] backed by reqwest. No request timeout is set: event polls
/// are held open by the server until something changes.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|source| TransportError::Request {
                url: String::new(),
                source,
            })?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    async fn send(&self, request: Request) -> Result<String, TransportError> {
        let url = request.url();
        let parsed = Url::parse_with_params(&url, &request.query).map_err(|err| {
            TransportError::Url {
                url: url.clone(),
                message: err.to_string(),
            }
        })?;

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };

        let mut builder = self.client.request(method, parsed);
        if let Some(body) = request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/xml")
                .body(body);
        }

        let response = builder
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|source| match source.status() {
                Some(status) => TransportError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                },
                None => TransportError::Request {
                    url: url.clone(),
                    source,
                },
            })?;

        tracing::debug!(
            "http request to {}: status={}",
            response.url(),
            response.status()
        );

        response
            .text()
            .await
            .map_err(|source| TransportError::Request { url, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Arc<str> {
        Arc::from("http://192.168.0.8:48875/")
    }

    #[test]
    fn test_request_target_and_url() {
        let request = Request::get(&base(), "/uc/search/sources/iplayer")
            .query("offset", 10)
            .query("results", 20);

        assert_eq!(request.path, "uc/search/sources/iplayer");
        assert_eq!(
            request.target(),
            "uc/search/sources/iplayer?offset=10&results=20"
        );
        assert_eq!(
            request.url(),
            "http://192.168.0.8:48875/uc/search/sources/iplayer"
        );
        assert_eq!(
            request.to_string(),
            "GET /uc/search/sources/iplayer?offset=10&results=20"
        );
    }

    #[test]
    fn test_request_body() {
        let request = Request::put(&base(), "uc/outputs/0/settings").body("<x/>".into());
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.body.as_deref(), Some("<x/>"));
        assert_eq!(request.target(), "uc/outputs/0/settings");
    }

    #[tokio::test]
    async fn test_reqwest_client_reports_unreachable_server() {
        let client = ReqwestClient::new().unwrap();
        // port 9 on localhost: nothing listens there in the test environment
        let base: Arc<str> = Arc::from("http://127.0.0.1:9");
        let result = client.send(Request::get(&base, "uc")).await;
        assert!(matches!(result, Err(TransportError::Request { .. })));
    }

    #[tokio::test]
    async fn test_reqwest_client_rejects_invalid_url() {
        let client = ReqwestClient::new().unwrap();
        let base: Arc<str> = Arc::from("not a url");
        let result = client.send(Request::get(&base, "uc")).await;
        assert!(matches!(result, Err(TransportError::Url { .. })));
    }
}
