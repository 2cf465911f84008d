//! Control-plane HTTP API client
//!
//! Requests and releases tunnel allocations. The backend answers with a
//! `{success, message, error?, data}` envelope around the connection
//! record; failures surface the envelope's message.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// A tunnel allocation returned by the control plane
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub address: String,
    pub external_port: u16,
    pub internal_port: u16,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    success: bool,
    message: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            match self.error {
                Some(detail) => Err(anyhow!("{} ({detail})", self.message)),
                None => Err(anyhow!("{}", self.message)),
            }
        }
    }
}

pub struct ApiClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http,
        })
    }

    /// Allocate a tunnel: the server picks the address and port pair.
    pub async fn create_connection(&self) -> Result<Connection> {
        let envelope: Envelope<Connection> = self
            .http
            .post(format!("{}/api/connection", self.base_url))
            .header("x-api-key", &self.token)
            .send()
            .await
            .context("create connection request failed")?
            .json()
            .await
            .context("failed to decode create response")?;

        envelope
            .into_result()?
            .ok_or_else(|| anyhow!("create response carried no connection"))
    }

    /// Release a tunnel allocation.
    pub async fn delete_connection(&self, id: &str) -> Result<()> {
        let envelope: Envelope<serde_json::Value> = self
            .http
            .delete(format!("{}/api/connection/{id}", self.base_url))
            .header("x-api-key", &self.token)
            .send()
            .await
            .context("delete connection request failed")?
            .json()
            .await
            .context("failed to decode delete response")?;

        envelope.into_result()?;
        Ok(())
    }
}
