//! Hierarchical JSON tree reached through a REST interface.
//!
//! Every node is addressable as `{base_url}/{path}.json`; GET returns the
//! subtree (or `null`), PUT replaces it and DELETE removes it.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use unigate_common::{Error, Result, SecretString, StorePath};

use super::{build_client, join_url, send_error, status_error, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::session::TreeStoreSession;

/// Characters left untouched in a node path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Configuration for [`RestTreeStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestTreeConfig {
    pub base_url: String,
    /// Credential sent as the `auth` query parameter.
    #[serde(default)]
    pub access_token: Option<SecretString>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// REST-backed tree store.
pub struct RestTreeStore {
    http: Client,
    config: RestTreeConfig,
}

impl RestTreeStore {
    pub fn new(config: RestTreeConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(Error::InvalidInput(
                "Tree store base_url cannot be empty".to_string(),
            ));
        }
        let http = build_client(config.timeout_secs, DEFAULT_USER_AGENT)?;
        Ok(Self { http, config })
    }

    fn node_url(&self, path: &StorePath) -> String {
        let encoded: Vec<String> = path
            .components()
            .iter()
            .map(|c| utf8_percent_encode(c, SEGMENT).to_string())
            .collect();
        join_url(&self.config.base_url, &format!("{}.json", encoded.join("/")))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.access_token {
            Some(token) => builder.query(&[("auth", token.expose())]),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> Result<reqwest::Response> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| send_error(context, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }
}

#[async_trait]
impl TreeStoreSession for RestTreeStore {
    fn name(&self) -> &str {
        "rest"
    }

    async fn initialize(&self) -> Result<()> {
        debug!("REST tree store targeting {}", self.config.base_url);
        Ok(())
    }

    async fn snapshot(&self, path: &StorePath) -> Result<Option<Value>> {
        let url = self.node_url(path);
        let response = self
            .send(self.http.get(&url), "Failed to read tree node")
            .await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| send_error("Failed to read tree node", e))?;
        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(match value {
            Value::Null => None,
            other => Some(other),
        })
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
        let url = self.node_url(path);
        let body = serde_json::to_vec(&value)?;
        let builder = self
            .http
            .put(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        self.send(builder, "Failed to write tree node").await?;
        Ok(())
    }

    async fn remove(&self, path: &StorePath) -> Result<()> {
        let url = self.node_url(path);
        self.send(self.http.delete(&url), "Failed to remove tree node")
            .await?;
        Ok(())
    }
}
