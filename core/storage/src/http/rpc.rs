//! RPC session over plain HTTP endpoints.

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::{Deserialize, Serialize};
use tracing::debug;

use unigate_common::{Result, SecretString};

use super::{build_client, join_url, send_error, status_error, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::session::{HttpMethod, RpcReply, RpcRequest, RpcSession};

/// Configuration for [`HttpRpcSession`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRpcConfig {
    /// Base URL that relative callable names are resolved against.
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpRpcConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// RPC session sending each call as one HTTP request.
pub struct HttpRpcSession {
    http: Client,
    config: HttpRpcConfig,
}

impl HttpRpcSession {
    /// Create a new session.
    pub fn new(config: HttpRpcConfig) -> Result<Self> {
        let http = build_client(config.timeout_secs, &config.user_agent)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &HttpRpcConfig {
        &self.config
    }

    /// Absolute targets are used as-is, anything else is relative to the base URL.
    fn url_for(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            join_url(&self.config.base_url, target)
        }
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    fn auth_header(token: &SecretString) -> String {
        format!("Bearer {}", token.expose())
    }
}

#[async_trait]
impl RpcSession for HttpRpcSession {
    fn name(&self) -> &str {
        "http"
    }

    async fn initialize(&self) -> Result<()> {
        debug!("HTTP RPC session targeting {}", self.config.base_url);
        Ok(())
    }

    async fn dispatch(&self, request: RpcRequest) -> Result<RpcReply> {
        let url = self.url_for(&request.target);
        debug!("{} {}", request.method, url);

        let mut builder = self.http.request(Self::method(request.method), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.header(header::AUTHORIZATION, Self::auth_header(token));
        }
        if let Some(body) = request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| send_error("Failed to call endpoint", e))?;

        let status = response.status();
        if status.is_success() {
            let body = response
                .bytes()
                .await
                .map_err(|e| send_error("Failed to read response body", e))?;
            Ok(RpcReply {
                status: status.as_u16(),
                body,
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unigate_common::Error;
    use wiremock::matchers::{body_json, header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session(server: &MockServer) -> HttpRpcSession {
        HttpRpcSession::new(HttpRpcConfig {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap()
    }

    fn request(method: HttpMethod, target: &str) -> RpcRequest {
        RpcRequest {
            method,
            target: target.to_string(),
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    #[tokio::test]
    async fn test_post_with_bearer_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/greet"))
            .and(header_eq("authorization", "Bearer tok-1"))
            .and(body_json(serde_json::json!({"name": "Ann"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"msg": "hi Ann"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut req = request(HttpMethod::Post, "greet");
        req.body = Some(br#"{"name":"Ann"}"#.to_vec());
        req.bearer = Some(SecretString::new("tok-1"));

        let reply = session(&server).dispatch(req).await.unwrap();
        assert_eq!(reply.status, 200);
        let value: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(value["msg"], "hi Ann");
    }

    #[tokio::test]
    async fn test_get_sends_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "rust lang"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let mut req = request(HttpMethod::Get, "/search");
        req.query = vec![("q".to_string(), "rust lang".to_string())];

        let reply = session(&server).dispatch(req).await.unwrap();
        assert_eq!(&reply.body[..], b"[]");
    }

    #[tokio::test]
    async fn test_absolute_target_bypasses_base() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/items/7"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let other = HttpRpcSession::new(HttpRpcConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        })
        .unwrap();
        let target = format!("{}/items/7", server.uri());

        let reply = other.dispatch(request(HttpMethod::Delete, &target)).await.unwrap();
        assert_eq!(reply.status, 204);
    }

    #[tokio::test]
    async fn test_status_codes_map_to_errors() {
        let server = MockServer::start().await;
        Mock::given(path("/private"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("server error"))
            .mount(&server)
            .await;

        let rpc = session(&server);
        let private = rpc.dispatch(request(HttpMethod::Get, "private")).await;
        let forbidden = rpc.dispatch(request(HttpMethod::Get, "forbidden")).await;
        let missing = rpc.dispatch(request(HttpMethod::Get, "missing")).await;
        let broken = rpc.dispatch(request(HttpMethod::Get, "broken")).await;

        assert!(matches!(private, Err(Error::Unauthorized(_))));
        assert!(matches!(forbidden, Err(Error::Unauthorized(_))));
        assert!(matches!(missing, Err(Error::NotFound(_))));
        assert!(matches!(broken, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_failure() {
        let rpc = HttpRpcSession::new(HttpRpcConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();

        let result = rpc.dispatch(request(HttpMethod::Get, "anything")).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
