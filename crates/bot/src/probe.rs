use core::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use mime::Mime;

use twitbot_commands::UrlProbe;

/// Content-type probe over HEAD requests. A per-request timeout keeps a
/// hanging host from stalling command recognition for its line.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("twitbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building probe client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl UrlProbe for HttpProbe {
    async fn content_type(&self, url: &str) -> Result<Mime> {
        let resp = self
            .http
            .head(url)
            .send()
            .await
            .context("probe request")?
            .error_for_status()
            .context("probe status")?;
        let raw = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .context("no content-type header")?;
        Ok(raw.parse()?)
    }
}
