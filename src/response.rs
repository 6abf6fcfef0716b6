//! Fetched responses and the transport seam of the fetch stage.
//!
//! The downloader talks to the network through the [`HttpClient`] trait so
//! that tests (and alternative transports) can stand in for the shipped
//! [`ReqwestClient`].

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::FetchError;
use crate::request::Request;

/// A completed transfer, handed to the parse stage together with the request
/// that produced it.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL after redirects.
    pub url: url::Url,
    /// HTTP status code.
    pub status: u16,
    /// Decoded response body.
    pub body: String,
    /// The request this response answers.
    pub request: Request,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Response {} {}>", self.status, self.url)
    }
}

/// Transport used by the fetch stage to perform one transfer.
///
/// `open` is awaited once when the engine starts (the connection pool is
/// initialized lazily, not at construction); `close` once during teardown.
/// Both default to no-ops for transports without pooled state.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn open(&self) -> Result<(), FetchError> {
        Ok(())
    }

    async fn get(&self, request: &Request, user_agent: &str) -> Result<Response, FetchError>;

    async fn close(&self) {}
}

/// Default transport backed by a shared `reqwest` client.
#[derive(Default)]
pub struct ReqwestClient {
    client: OnceCell<reqwest::Client>,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn session(&self) -> Result<&reqwest::Client, FetchError> {
        self.client
            .get_or_try_init(|| async {
                debug!("initializing http session");
                reqwest::Client::builder()
                    .build()
                    .map_err(|e| FetchError::Session(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn open(&self) -> Result<(), FetchError> {
        self.session().await?;
        Ok(())
    }

    async fn get(&self, request: &Request, user_agent: &str) -> Result<Response, FetchError> {
        let client = self.session().await?;
        let transport_err = |e: reqwest::Error| FetchError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        };

        let resp = client
            .get(request.url.clone())
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(transport_err)?;

        let status = resp.status().as_u16();
        let url = resp.url().clone();
        let body = resp.text().await.map_err(transport_err)?;

        Ok(Response {
            url,
            status,
            body,
            request: request.clone(),
        })
    }
}
