//! The gateway facade: one object owning the backend context, the
//! resolution table, the auth session and the shutdown token.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::info;

use unigate_common::{Error, Response, Result};
use unigate_storage::BackendContext;

use crate::auth::SessionProvider;
use crate::batch::BatchCoordinator;
use crate::blob::BlobClient;
use crate::cancel::{respond, CancelScope};
use crate::config::GatewayConfig;
use crate::document::DocumentClient;
use crate::paths::{DirectoryPathResolver, LocalPathResolver};
use crate::resolver::AddressResolver;
use crate::rpc::RpcClient;
use crate::tree::TreeClient;

/// Entry point handing out clients bound to one set of backends.
///
/// Every client shares the gateway's root cancellation token, so
/// [`shutdown`](Self::shutdown) ends all in-flight reads and refuses new calls.
pub struct Gateway {
    context: BackendContext,
    resolver: Arc<AddressResolver>,
    paths: Arc<dyn LocalPathResolver>,
    auth: Arc<SessionProvider>,
    root: CancellationToken,
    initialized: OnceCell<()>,
}

impl Gateway {
    pub fn new(context: BackendContext, resolver: AddressResolver) -> Self {
        let root = CancellationToken::new();
        let auth = Arc::new(SessionProvider::new(
            context.auth.clone(),
            CancelScope::from_token(root.clone()),
        ));
        Self {
            context,
            resolver: Arc::new(resolver),
            paths: Arc::new(DirectoryPathResolver::default()),
            auth,
            root,
            initialized: OnceCell::new(),
        }
    }

    /// Build backends and resolution table from configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let gateway = Self::new(config.build_context()?, config.resolver()?)
            .with_path_resolver(Arc::new(config.path_resolver()));
        Ok(gateway)
    }

    pub fn with_path_resolver(mut self, paths: Arc<dyn LocalPathResolver>) -> Self {
        self.paths = paths;
        self
    }

    /// Initialize every backend session. Later calls are no-ops once one
    /// has succeeded.
    pub async fn initialize(&self) -> Response<()> {
        let result: Result<()> = async {
            self.scope().check("initialize")?;
            self.initialized
                .get_or_try_init(|| async {
                    self.context.initialize().await?;
                    info!("Gateway initialized ({})", self.context.describe());
                    Ok::<(), Error>(())
                })
                .await?;
            Ok(())
        }
        .await;
        respond("initialize", result)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Cancel the root token. In-flight reads end with `Cancelled` and
    /// every later call is refused.
    pub fn shutdown(&self) {
        if !self.root.is_cancelled() {
            info!("Gateway shutting down");
            self.root.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    pub fn context(&self) -> &BackendContext {
        &self.context
    }

    pub fn documents(&self) -> DocumentClient {
        DocumentClient::new(
            self.context.documents.clone(),
            self.resolver.clone(),
            self.scope(),
        )
    }

    pub fn batches(&self) -> BatchCoordinator {
        BatchCoordinator::new(
            self.context.documents.clone(),
            self.resolver.clone(),
            self.scope(),
        )
    }

    pub fn tree(&self) -> TreeClient {
        TreeClient::new(self.context.tree.clone(), self.resolver.clone(), self.scope())
    }

    pub fn blobs(&self) -> BlobClient {
        BlobClient::new(
            self.context.blobs.clone(),
            self.resolver.clone(),
            self.paths.clone(),
            self.scope(),
        )
    }

    pub fn rpc(&self) -> RpcClient {
        RpcClient::new(
            self.context.rpc.clone(),
            self.resolver.clone(),
            self.auth.clone(),
            self.scope(),
        )
    }

    pub fn auth(&self) -> &SessionProvider {
        &self.auth
    }

    fn scope(&self) -> CancelScope {
        CancelScope::from_token(self.root.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use unigate_common::{
        BackendKind, Entity, EntityDescriptor, EntityId, ErrorKind, Status, StorePath,
    };
    use unigate_storage::{
        HttpMethod, HttpRpcConfig, HttpRpcSession, MemoryDocumentStore, MemoryRpcSession,
        MemoryTreeStore, RpcReply, RpcRequest, TreeStoreSession,
    };
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::batch::{Batch, BatchOperation};
    use crate::resolver::ResolutionRule;
    use crate::rpc::CallRequest;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        #[serde(skip)]
        id: String,
        name: String,
    }

    impl Entity for Profile {
        const KIND: &'static str = "profile";

        fn entity_id(&self) -> Option<EntityId> {
            Some(EntityId::from(self.id.as_str()))
        }
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Greeting {
        message: String,
    }

    fn resolver() -> AddressResolver {
        AddressResolver::from_rules(vec![
            ResolutionRule::collection("profile", BackendKind::Document, "profiles").unwrap(),
            ResolutionRule::collection("score", BackendKind::Tree, "scores").unwrap(),
            ResolutionRule::collection("avatar", BackendKind::Blob, "avatars").unwrap(),
            ResolutionRule::callable("greet", "greetUser").unwrap(),
        ])
        .unwrap()
    }

    fn profile(id: &str, name: &str) -> Profile {
        Profile {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    fn descriptor(value: &str) -> EntityDescriptor {
        EntityDescriptor::parse(value).unwrap()
    }

    fn greeting_rpc() -> Arc<MemoryRpcSession> {
        let session = MemoryRpcSession::new();
        session
            .register("greetUser", |_: &RpcRequest| {
                Ok(RpcReply {
                    status: 200,
                    body: Bytes::from_static(br#"{"message": "hi"}"#),
                })
            })
            .unwrap();
        Arc::new(session)
    }

    /// Tree store that never answers.
    struct HangingTree;

    #[async_trait]
    impl TreeStoreSession for HangingTree {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn snapshot(&self, _: &StorePath) -> Result<Option<Value>> {
            std::future::pending().await
        }

        async fn set(&self, _: &StorePath, _: Value) -> Result<()> {
            std::future::pending().await
        }

        async fn remove(&self, _: &StorePath) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_profile_scenario() {
        let gateway = Gateway::new(BackendContext::in_memory(), resolver());
        assert!(gateway.initialize().await.is_success());
        let documents = gateway.documents();

        let created = documents.create(&profile("u1", "Ann"), true).await;
        assert_eq!(created.status(), Status::Success);

        let fetched: Value = documents
            .get(&descriptor("profile/u1"))
            .await
            .into_data()
            .unwrap();
        assert_eq!(fetched, json!({"name": "Ann"}));

        assert!(documents.delete(&descriptor("profile/u1")).await.is_success());

        let gone = documents.get::<Profile>(&descriptor("profile/u1")).await;
        assert_eq!(gone.error_kind(), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_round_trip_through_typed_get() {
        let gateway = Gateway::new(BackendContext::in_memory(), resolver());
        let documents = gateway.documents();

        let id = documents
            .create_with_id(&profile("", "Bo"), false)
            .await
            .into_data()
            .unwrap();
        let fetched: Profile = documents.get_entity(id).await.into_data().unwrap();
        assert_eq!(fetched.name, "Bo");
    }

    #[tokio::test]
    async fn test_batch_atomicity_through_gateway() {
        let gateway = Gateway::new(BackendContext::in_memory(), resolver());
        let documents = gateway.documents();
        documents.create(&profile("u1", "Ann"), true).await;

        let response = gateway
            .batches()
            .commit(vec![
                BatchOperation::Set {
                    target: descriptor("profile/u1"),
                    payload: json!({"name": "Changed"}),
                },
                BatchOperation::Update {
                    target: descriptor("profile/ghost"),
                    field: "name".to_string(),
                    value: json!("x"),
                },
            ])
            .await;
        assert!(response.is_error());

        let current: Profile = documents
            .get(&descriptor("profile/u1"))
            .await
            .into_data()
            .unwrap();
        assert_eq!(current.name, "Ann");
    }

    #[tokio::test]
    async fn test_precancelled_calls_have_no_side_effects() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.png");
        std::fs::write(&source, b"x").unwrap();

        let documents = Arc::new(MemoryDocumentStore::new());
        let tree = Arc::new(MemoryTreeStore::new());
        let rpc = greeting_rpc();
        let context = BackendContext::in_memory()
            .with_documents(documents.clone())
            .with_tree(tree.clone())
            .with_rpc(rpc.clone());
        let gateway = Gateway::new(context, resolver());

        let token = CancellationToken::new();
        token.cancel();

        let create = gateway
            .documents()
            .with_cancellation(&token)
            .create(&profile("u1", "Ann"), true)
            .await;
        assert_eq!(create.error_kind(), Some(ErrorKind::Cancelled));
        assert!(documents.is_empty());

        let set = gateway
            .tree()
            .with_cancellation(&token)
            .set(&descriptor("score/u1"), &json!({"best": 1}))
            .await;
        assert_eq!(set.error_kind(), Some(ErrorKind::Cancelled));
        assert!(tree
            .snapshot(&StorePath::parse("scores").unwrap())
            .await
            .unwrap()
            .is_none());

        let upload = gateway.blobs().upload(&descriptor("avatar/u1"), &source, &token).await;
        assert_eq!(upload.error_kind(), Some(ErrorKind::Cancelled));
        let exists = gateway.blobs().exists(&descriptor("avatar/u1")).await;
        assert_eq!(exists.into_data(), Some(false));

        let call = gateway
            .rpc()
            .invoke_unit(&CallRequest::new(descriptor("greet"), HttpMethod::Post), &token)
            .await;
        assert_eq!(call.error_kind(), Some(ErrorKind::Cancelled));
        assert!(rpc.requests().is_empty());
    }

    #[tokio::test]
    async fn test_auth_header_conditional() {
        let rpc = greeting_rpc();
        let gateway = Gateway::new(BackendContext::in_memory().with_rpc(rpc.clone()), resolver());
        let request = CallRequest::new(descriptor("greet"), HttpMethod::Post);
        let token = CancellationToken::new();

        let anonymous: Greeting = gateway.rpc().invoke(&request, &token).await.into_data().unwrap();
        assert_eq!(anonymous.message, "hi");

        gateway.auth().sign_in_anonymously().await.into_data().unwrap();
        let signed_in = gateway.rpc().invoke_unit(&request, &token).await;
        assert!(signed_in.is_success());

        let sent = rpc.requests();
        assert!(sent[0].bearer.is_none());
        assert!(sent[1].bearer.is_some());
    }

    #[tokio::test]
    async fn test_malformed_http_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/greetUser"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let session = HttpRpcSession::new(HttpRpcConfig {
            base_url: server.uri(),
            ..HttpRpcConfig::default()
        })
        .unwrap();
        let gateway = Gateway::new(
            BackendContext::in_memory().with_rpc(Arc::new(session)),
            resolver(),
        );

        let request = CallRequest::with_payload(descriptor("greet"), HttpMethod::Post, json!({"x": 1}));
        let response: Response<Greeting> = gateway
            .rpc()
            .invoke_with(&request, &CancellationToken::new())
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::MalformedPayload));
    }

    #[tokio::test]
    async fn test_shutdown_ends_in_flight_and_refuses_new_calls() {
        let gateway = Arc::new(Gateway::new(
            BackendContext::in_memory().with_tree(Arc::new(HangingTree)),
            resolver(),
        ));

        let pending = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.tree().get_all::<Value>(&descriptor("score")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gateway.shutdown();
        assert!(gateway.is_shut_down());

        let response = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.error_kind(), Some(ErrorKind::Cancelled));

        let refused = gateway.documents().get::<Profile>(&descriptor("profile/u1")).await;
        assert_eq!(refused.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(gateway.initialize().await.error_kind(), Some(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_initialize_runs_once() {
        struct CountingTree {
            inits: AtomicUsize,
            inner: MemoryTreeStore,
        }

        #[async_trait]
        impl TreeStoreSession for CountingTree {
            fn name(&self) -> &str {
                "counting"
            }

            async fn initialize(&self) -> Result<()> {
                self.inits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            async fn snapshot(&self, path: &StorePath) -> Result<Option<Value>> {
                self.inner.snapshot(path).await
            }

            async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
                self.inner.set(path, value).await
            }

            async fn remove(&self, path: &StorePath) -> Result<()> {
                self.inner.remove(path).await
            }
        }

        let tree = Arc::new(CountingTree {
            inits: AtomicUsize::new(0),
            inner: MemoryTreeStore::new(),
        });
        let gateway = Gateway::new(BackendContext::in_memory().with_tree(tree.clone()), resolver());

        assert!(!gateway.is_initialized());
        assert!(gateway.initialize().await.is_success());
        assert!(gateway.initialize().await.is_success());
        assert!(gateway.is_initialized());
        assert_eq!(tree.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_kind_surfaces_as_unsupported() {
        let gateway = Gateway::new(BackendContext::in_memory(), resolver());
        let response = gateway.documents().get::<Value>(&descriptor("invoice/1")).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::UnsupportedOperation));
    }

    #[tokio::test]
    async fn test_from_config() {
        let temp = TempDir::new().unwrap();
        let config = GatewayConfig::from_json(&format!(
            r#"{{
                "entities": [
                    {{"kind": "profile", "backend": "document", "path": "profiles"}},
                    {{"kind": "avatar", "backend": "blob", "path": "avatars"}}
                ],
                "document": {{"provider": "local", "options": {{"root": {root}}}}},
                "downloads_dir": {downloads}
            }}"#,
            root = json!(temp.path().join("docs")),
            downloads = json!(temp.path().join("downloads")),
        ))
        .unwrap();

        let gateway = Gateway::from_config(&config).unwrap();
        assert!(gateway.initialize().await.is_success());
        assert!(gateway
            .documents()
            .create(&profile("u1", "Ann"), true)
            .await
            .is_success());
        assert!(temp.path().join("docs/profiles/u1.json").exists());

        let source = temp.path().join("a.png");
        std::fs::write(&source, b"png").unwrap();
        let token = CancellationToken::new();
        assert!(gateway
            .blobs()
            .upload(&descriptor("avatar/u1"), &source, &token)
            .await
            .is_success());
        let local = gateway
            .blobs()
            .download(&descriptor("avatar/u1"), &token)
            .await
            .into_data()
            .unwrap();
        assert_eq!(local, temp.path().join("downloads/avatar/u1"));
    }

    #[tokio::test]
    async fn test_concurrent_calls_on_shared_addresses_are_independent() {
        let temp = TempDir::new().unwrap();
        let config = GatewayConfig::from_json(&format!(
            r#"{{
                "entities": [
                    {{"kind": "profile", "backend": "document", "path": "profiles"}},
                    {{"kind": "avatar", "backend": "blob", "path": "avatars"}}
                ],
                "document": {{"provider": "local", "options": {{"root": {docs}}}}},
                "blob": {{"provider": "local", "options": {{"root": {blobs}}}}},
                "downloads_dir": {downloads}
            }}"#,
            docs = json!(temp.path().join("docs")),
            blobs = json!(temp.path().join("blobs")),
            downloads = json!(temp.path().join("downloads")),
        ))
        .unwrap();
        let gateway = Gateway::from_config(&config).unwrap();
        assert!(gateway.initialize().await.is_success());

        let fixed = futures::future::join_all((0..8).map(|i| {
            let documents = gateway.documents();
            async move {
                let id = format!("user{}@example.com", i);
                documents.create(&profile(&id, &format!("User {}", i)), true).await
            }
        }))
        .await;
        assert!(fixed.iter().all(Response::is_success));

        let allocated = futures::future::join_all((0..8).map(|_| {
            let documents = gateway.documents();
            async move { documents.create_with_id(&profile("", "Anon"), false).await }
        }))
        .await;
        let ids: std::collections::HashSet<EntityId> = allocated
            .into_iter()
            .map(|response| response.into_data().unwrap())
            .collect();
        assert_eq!(ids.len(), 8);

        for i in 0..8 {
            let fetched: Profile = gateway
                .documents()
                .get_entity(format!("user{}@example.com", i))
                .await
                .into_data()
                .unwrap();
            assert_eq!(fetched.name, format!("User {}", i));
        }

        let source = temp.path().join("avatar.bin");
        let content = vec![42u8; 2 * 1024 * 1024];
        std::fs::write(&source, &content).unwrap();
        let token = CancellationToken::new();
        assert!(gateway
            .blobs()
            .upload(&descriptor("avatar/u1"), &source, &token)
            .await
            .is_success());

        let downloads = futures::future::join_all((0..4).map(|_| {
            let blobs = gateway.blobs();
            let token = token.clone();
            async move { blobs.download(&descriptor("avatar/u1"), &token).await }
        }))
        .await;
        for download in downloads {
            let local = download.into_data().unwrap();
            assert_eq!(std::fs::read(local).unwrap(), content);
        }
    }

    #[tokio::test]
    async fn test_batch_builder_through_gateway() {
        let gateway = Gateway::new(BackendContext::in_memory(), resolver());
        let batch = Batch::new()
            .set(descriptor("profile/u1"), &json!({"name": "Ann"}))
            .set(descriptor("profile/u2"), &json!({"name": "Bo"}));
        assert!(gateway.batches().commit_batch(batch).await.is_success());

        let exists = gateway.documents().exists(&descriptor("profile/u2")).await;
        assert_eq!(exists.into_data(), Some(true));
    }
}
