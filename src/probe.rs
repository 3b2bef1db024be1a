use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("responded with status {0}")]
    Status(StatusCode),
}

/// Confirms that a long URL answers before a short code is handed out for it.
#[async_trait]
pub trait UrlProbe: Send + Sync {
    async fn check(&self, url: &Url) -> Result<(), ProbeError>;
}

/// Probes with HEAD first and falls back to GET when the server does not
/// allow HEAD. Redirects are followed; the final response must be 2xx.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UrlProbe for HttpProbe {
    async fn check(&self, url: &Url) -> Result<(), ProbeError> {
        let mut status = self.client.head(url.clone()).send().await?.status();

        if status == StatusCode::METHOD_NOT_ALLOWED {
            tracing::debug!("HEAD not allowed by {}, retrying with GET", url);
            status = self.client.get(url.clone()).send().await?.status();
        }

        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status))
        }
    }
}
