//! Document client.
//!
//! Every write is committed through the session's atomic `commit` as a batch
//! of one. Writes check for cancellation before they start and then run to
//! completion; reads are abandoned as soon as cancellation is observed.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use unigate_common::{Entity, EntityDescriptor, EntityId, Error, Response, Result, StorePath};
use unigate_storage::{DocumentStoreSession, DocumentWrite};

use crate::cancel::{respond, CancelScope};
use crate::resolver::AddressResolver;

/// CRUD and existence checks against the document store.
#[derive(Clone)]
pub struct DocumentClient {
    session: Arc<dyn DocumentStoreSession>,
    resolver: Arc<AddressResolver>,
    scope: CancelScope,
}

impl DocumentClient {
    pub fn new(
        session: Arc<dyn DocumentStoreSession>,
        resolver: Arc<AddressResolver>,
        scope: CancelScope,
    ) -> Self {
        Self {
            session,
            resolver,
            scope,
        }
    }

    /// A client whose calls also end when `token` is cancelled.
    pub fn with_cancellation(&self, token: &CancellationToken) -> Self {
        Self {
            session: self.session.clone(),
            resolver: self.resolver.clone(),
            scope: self.scope.with(token),
        }
    }

    /// Fetch and deserialize one document.
    ///
    /// A missing document is an error of kind `NotFound`.
    pub async fn get<T: DeserializeOwned>(&self, descriptor: &EntityDescriptor) -> Response<T> {
        let result = self
            .scope
            .run("document get", async {
                let path = self.resolver.resolve_document(descriptor)?;
                match self.session.get(&path).await? {
                    Some(value) => serde_json::from_value(value).map_err(|e| {
                        Error::MalformedPayload(format!("Document {} has wrong shape: {}", path, e))
                    }),
                    None => {
                        info!("Document {} not found", path);
                        Err(Error::NotFound(format!("Document {} does not exist", path)))
                    }
                }
            })
            .await;
        respond("document get", result)
    }

    /// Fetch the entity of type `T` with identifier `id`.
    pub async fn get_entity<T: Entity>(&self, id: impl Into<EntityId>) -> Response<T> {
        match EntityDescriptor::for_type::<T>() {
            Ok(descriptor) => self.get(&descriptor.with_entity_id(id)).await,
            Err(err) => respond("document get", Err(err)),
        }
    }

    /// Store a new entity.
    ///
    /// With `use_fixed_id` the payload's own identifier names the document and
    /// an existing document is overwritten. Otherwise the store allocates a
    /// fresh identifier inside the entity's collection.
    pub async fn create<T: Entity>(&self, payload: &T, use_fixed_id: bool) -> Response<()> {
        self.create_with_id(payload, use_fixed_id).await.map(|_| ())
    }

    /// As [`create`](Self::create), reporting the identifier the document was stored under.
    pub async fn create_with_id<T: Entity>(
        &self,
        payload: &T,
        use_fixed_id: bool,
    ) -> Response<EntityId> {
        match EntityDescriptor::for_value(payload) {
            Ok(descriptor) => self.create_at(&descriptor, payload, use_fixed_id).await,
            Err(err) => respond("document create", Err(err)),
        }
    }

    /// Store `payload` under `descriptor`, using the descriptor's identifier
    /// when `use_fixed_id` is set.
    pub async fn create_at<P: Serialize + ?Sized>(
        &self,
        descriptor: &EntityDescriptor,
        payload: &P,
        use_fixed_id: bool,
    ) -> Response<EntityId> {
        let result: Result<EntityId> = async {
            self.scope.check("document create")?;
            let value = serde_json::to_value(payload)?;

            let (path, id) = if use_fixed_id {
                let id = descriptor.id.clone().ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "Fixed-id create of '{}' requires an identifier",
                        descriptor.kind
                    ))
                })?;
                (self.resolver.resolve_document(descriptor)?, id)
            } else {
                let collection = self.resolver.resolve_collection(descriptor)?;
                let id = self.session.allocate_id(&collection).await?;
                (collection.join(&id)?, EntityId::Text(id))
            };

            self.commit_one(DocumentWrite::Set { path, value }).await?;
            Ok(id)
        }
        .await;
        respond("document create", result)
    }

    /// Merge the payload's top-level fields into its existing document.
    pub async fn update<T: Entity>(&self, payload: &T) -> Response<()> {
        let result = EntityDescriptor::for_value(payload).and_then(|descriptor| {
            match serde_json::to_value(payload)? {
                Value::Object(fields) => Ok((descriptor, fields)),
                _ => Err(Error::MalformedPayload(format!(
                    "Entity '{}' does not serialize to an object",
                    descriptor
                ))),
            }
        });
        match result {
            Ok((descriptor, fields)) => self.update_at(&descriptor, fields).await,
            Err(err) => respond("document update", Err(err)),
        }
    }

    /// Merge `fields` (keys may be dotted paths) into an existing document.
    pub async fn update_at(
        &self,
        descriptor: &EntityDescriptor,
        fields: Map<String, Value>,
    ) -> Response<()> {
        let result: Result<()> = async {
            self.scope.check("document update")?;
            let path = self.resolver.resolve_document(descriptor)?;
            self.commit_one(DocumentWrite::Update { path, fields }).await
        }
        .await;
        respond("document update", result)
    }

    /// Remove a document; removing a missing document succeeds.
    pub async fn delete(&self, descriptor: &EntityDescriptor) -> Response<()> {
        let result: Result<()> = async {
            self.scope.check("document delete")?;
            let path = self.resolver.resolve_document(descriptor)?;
            self.commit_one(DocumentWrite::Delete { path }).await
        }
        .await;
        respond("document delete", result)
    }

    pub async fn exists(&self, descriptor: &EntityDescriptor) -> Response<bool> {
        let result = self
            .scope
            .run("document exists", async {
                let path = self.resolver.resolve_document(descriptor)?;
                Ok(self.session.get(&path).await?.is_some())
            })
            .await;
        respond("document exists", result)
    }

    /// Resolved document path, for diagnostics.
    pub fn path_of(&self, descriptor: &EntityDescriptor) -> Result<StorePath> {
        self.resolver.resolve_document(descriptor)
    }

    async fn commit_one(&self, write: DocumentWrite) -> Result<()> {
        debug!("Committing single write to {}", write.path());
        self.session.commit(vec![write]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use unigate_common::{BackendKind, ErrorKind};
    use unigate_storage::MemoryDocumentStore;

    use crate::resolver::ResolutionRule;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: String,
        name: String,
        #[serde(default)]
        level: u32,
    }

    impl Entity for Profile {
        const KIND: &'static str = "profile";

        fn entity_id(&self) -> Option<EntityId> {
            Some(EntityId::from(self.id.as_str()))
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    impl Entity for Note {
        const KIND: &'static str = "note";
    }

    fn client() -> (Arc<MemoryDocumentStore>, DocumentClient) {
        let store = Arc::new(MemoryDocumentStore::new());
        let resolver = AddressResolver::from_rules(vec![
            ResolutionRule::collection("profile", BackendKind::Document, "profiles").unwrap(),
            ResolutionRule::collection("note", BackendKind::Document, "notes").unwrap(),
        ])
        .unwrap();
        let client = DocumentClient::new(store.clone(), Arc::new(resolver), CancelScope::new());
        (store, client)
    }

    fn profile(id: &str, name: &str) -> Profile {
        Profile {
            id: id.to_string(),
            name: name.to_string(),
            level: 1,
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let (_, client) = client();
        let ann = profile("u1", "Ann");

        assert!(client.create(&ann, true).await.is_success());
        let fetched: Profile = client.get_entity::<Profile>("u1").await.into_data().unwrap();
        assert_eq!(fetched, ann);

        let descriptor = EntityDescriptor::for_value(&ann).unwrap();
        assert!(client.delete(&descriptor).await.is_success());
        let gone = client.get::<Profile>(&descriptor).await;
        assert_eq!(gone.error_kind(), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_fixed_id_create_overwrites() {
        let (store, client) = client();
        client.create(&profile("u1", "Ann"), true).await;
        client.create(&profile("u1", "Bo"), true).await;

        assert_eq!(store.len(), 1);
        let fetched: Profile = client.get_entity::<Profile>("u1").await.into_data().unwrap();
        assert_eq!(fetched.name, "Bo");
    }

    #[tokio::test]
    async fn test_allocated_ids_create_new_records() {
        let (store, client) = client();
        let note = Note {
            text: "hello".to_string(),
        };

        let first = client.create_with_id(&note, false).await.into_data().unwrap();
        let second = client.create_with_id(&note, false).await.into_data().unwrap();
        assert_ne!(first, second);
        assert_eq!(store.len(), 2);

        let fetched: Note = client.get_entity::<Note>(first).await.into_data().unwrap();
        assert_eq!(fetched.text, "hello");
    }

    #[tokio::test]
    async fn test_fixed_id_without_identifier_fails() {
        let (store, client) = client();
        let note = Note {
            text: "hello".to_string(),
        };
        let response = client.create(&note, true).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::MalformedPayload));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_update_requires_existing_document() {
        let (_, client) = client();
        let response = client.update(&profile("u9", "Nobody")).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::NotFound));

        client.create(&profile("u1", "Ann"), true).await;
        let mut renamed = profile("u1", "Annie");
        renamed.level = 5;
        assert!(client.update(&renamed).await.is_success());
        assert!(client.update(&renamed).await.is_success());

        let fetched: Profile = client.get_entity::<Profile>("u1").await.into_data().unwrap();
        assert_eq!(fetched, renamed);
    }

    #[tokio::test]
    async fn test_exists_and_idempotent_delete() {
        let (_, client) = client();
        let descriptor = EntityDescriptor::parse("profile/u1").unwrap();

        assert_eq!(client.exists(&descriptor).await.into_data(), Some(false));
        client.create(&profile("u1", "Ann"), true).await;
        assert_eq!(client.exists(&descriptor).await.into_data(), Some(true));

        assert!(client.delete(&descriptor).await.is_success());
        assert!(client.delete(&descriptor).await.is_success());
        assert_eq!(client.exists(&descriptor).await.into_data(), Some(false));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_malformed() {
        let (store, client) = client();
        store
            .commit(vec![DocumentWrite::Set {
                path: StorePath::parse("profiles/u1").unwrap(),
                value: json!({"name": 42}),
            }])
            .await
            .unwrap();

        let response = client.get_entity::<Profile>("u1").await;
        assert_eq!(response.error_kind(), Some(ErrorKind::MalformedPayload));
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_unsupported() {
        let (_, client) = client();
        let descriptor = EntityDescriptor::parse("invoice/1").unwrap();
        let response = client.get::<Value>(&descriptor).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::UnsupportedOperation));
    }

    #[tokio::test]
    async fn test_cancelled_client_has_no_side_effects() {
        let (store, client) = client();
        let token = CancellationToken::new();
        token.cancel();
        let cancelled = client.with_cancellation(&token);

        let create = cancelled.create(&profile("u1", "Ann"), true).await;
        assert_eq!(create.error_kind(), Some(ErrorKind::Cancelled));
        assert!(store.is_empty());

        let descriptor = EntityDescriptor::parse("profile/u1").unwrap();
        for response in [
            cancelled.delete(&descriptor).await,
            cancelled.update_at(&descriptor, Map::new()).await,
        ] {
            assert_eq!(response.error_kind(), Some(ErrorKind::Cancelled));
        }
        assert_eq!(
            cancelled.get::<Profile>(&descriptor).await.error_kind(),
            Some(ErrorKind::Cancelled)
        );

        // The original client is unaffected.
        assert!(client.create(&profile("u1", "Ann"), true).await.is_success());
    }
}
