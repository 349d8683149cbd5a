//! Capability traits for the backends the gateway fronts.
//!
//! Each backend is reached through one narrow trait exposing the already
//! authenticated session plus an `initialize` hook. The gateway only ever
//! depends on these traits, never on how a session was constructed.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;

use unigate_common::{Error, Result, SecretString, StorePath};

/// Byte stream type for blob transfers.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// One write inside an atomic document commit.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentWrite {
    /// Replace the whole document.
    Set { path: StorePath, value: Value },
    /// Merge fields into an existing document. Keys may be dotted paths.
    Update {
        path: StorePath,
        fields: Map<String, Value>,
    },
    /// Remove the document; removing a missing document is not an error.
    Delete { path: StorePath },
}

impl DocumentWrite {
    /// Document this write targets.
    pub fn path(&self) -> &StorePath {
        match self {
            DocumentWrite::Set { path, .. }
            | DocumentWrite::Update { path, .. }
            | DocumentWrite::Delete { path } => path,
        }
    }

    /// Apply this write to the current state of its document.
    ///
    /// Returns the new state, `None` meaning the document no longer exists.
    ///
    /// # Errors
    /// - `Set` with a non-object value
    /// - `Update` against a missing document
    pub fn apply(&self, current: Option<Value>) -> Result<Option<Value>> {
        match self {
            DocumentWrite::Set { path, value } => {
                if !value.is_object() {
                    return Err(Error::MalformedPayload(format!(
                        "Document {} must be a JSON object",
                        path
                    )));
                }
                Ok(Some(value.clone()))
            }
            DocumentWrite::Update { path, fields } => {
                let mut document = match current {
                    Some(Value::Object(map)) => map,
                    Some(_) => {
                        return Err(Error::MalformedPayload(format!(
                            "Document {} is not a JSON object",
                            path
                        )))
                    }
                    None => {
                        return Err(Error::NotFound(format!(
                            "Cannot update missing document {}",
                            path
                        )))
                    }
                };
                for (field, value) in fields {
                    set_field(&mut document, field, value.clone())?;
                }
                Ok(Some(Value::Object(document)))
            }
            DocumentWrite::Delete { .. } => Ok(None),
        }
    }
}

/// Set a dotted field path inside a document, creating intermediate maps.
fn set_field(document: &mut Map<String, Value>, field: &str, value: Value) -> Result<()> {
    let mut segments = field.split('.').peekable();
    let mut current = document;

    while let Some(segment) = segments.next() {
        if segment.is_empty() {
            return Err(Error::InvalidInput(format!("Invalid field path '{}'", field)));
        }
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return Ok(());
        }
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = slot
            .as_object_mut()
            .ok_or_else(|| Error::InvalidInput(format!("Invalid field path '{}'", field)))?;
    }

    Err(Error::InvalidInput("Field path cannot be empty".to_string()))
}

/// Document store session.
///
/// Every mutation goes through `commit`, which applies all writes or none.
#[async_trait]
pub trait DocumentStoreSession: Send + Sync {
    /// Get the session name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Prepare the session for use. Called once by the gateway.
    async fn initialize(&self) -> Result<()>;

    /// Fetch a whole document, `None` when it does not exist.
    async fn get(&self, path: &StorePath) -> Result<Option<Value>>;

    /// Allocate a fresh, unused document identifier inside `collection`.
    async fn allocate_id(&self, collection: &StorePath) -> Result<String>;

    /// Apply `writes` in order as one atomic unit.
    ///
    /// # Postconditions
    /// - On error, no write has taken effect
    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<()>;
}

/// Hierarchical key/value store session returning raw JSON snapshots.
#[async_trait]
pub trait TreeStoreSession: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<()>;

    /// Raw snapshot at `path`, `None` when nothing is stored there.
    async fn snapshot(&self, path: &StorePath) -> Result<Option<Value>>;

    /// Replace the value at `path`.
    async fn set(&self, path: &StorePath, value: Value) -> Result<()>;

    /// Remove the value at `path` and everything below it.
    async fn remove(&self, path: &StorePath) -> Result<()>;
}

/// Metadata for a stored blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Location inside the blob store.
    pub path: StorePath,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub updated: DateTime<Utc>,
    /// ETag or generation for change detection.
    pub etag: Option<String>,
}

/// Object store session supporting streamed transfers.
#[async_trait]
pub trait BlobStoreSession: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<()>;

    /// Upload a stream, replacing any existing object.
    ///
    /// # Postconditions
    /// - The object only becomes visible once the stream is fully consumed
    async fn upload(&self, path: &StorePath, stream: ByteStream) -> Result<BlobMetadata>;

    /// Download an object as a stream.
    async fn download(&self, path: &StorePath) -> Result<ByteStream>;

    /// Get metadata for an object.
    ///
    /// # Errors
    /// - Object not found
    async fn metadata(&self, path: &StorePath) -> Result<BlobMetadata>;

    /// Delete an object.
    async fn delete(&self, path: &StorePath) -> Result<()>;
}

/// HTTP method of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Read-style calls carry their payload as query parameters.
    pub fn is_read_style(&self) -> bool {
        matches!(self, HttpMethod::Get)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(Error::InvalidInput(format!("Unknown HTTP method '{}'", other))),
        }
    }
}

/// A fully built remote call, ready to dispatch.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub method: HttpMethod,
    /// Callable name, endpoint path, or absolute URL.
    pub target: String,
    pub query: Vec<(String, String)>,
    /// Serialized JSON body for write-style calls.
    pub body: Option<Vec<u8>>,
    /// Bearer credential, absent for unauthenticated calls.
    pub bearer: Option<SecretString>,
}

/// Successful reply from the RPC gateway.
#[derive(Debug, Clone)]
pub struct RpcReply {
    pub status: u16,
    pub body: Bytes,
}

/// Remote procedure / HTTP endpoint session.
#[async_trait]
pub trait RpcSession: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<()>;

    /// Send the request and wait for the reply.
    ///
    /// # Errors
    /// - `Unauthorized` for 401/403, `NotFound` for 404
    /// - `Transport` for any other failure
    async fn dispatch(&self, request: RpcRequest) -> Result<RpcReply>;
}

/// Identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub is_anonymous: bool,
}

/// Bearer tokens with expiration tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    /// Token attached to authenticated calls.
    pub id_token: SecretString,
    /// Token used to obtain a new `id_token`.
    pub refresh_token: SecretString,
    /// When the id token expires.
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Check if the id token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.expires_at < Utc::now() + Duration::minutes(5)
    }
}

/// Result of a successful sign-in, sign-up or credential link.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub user: UserIdentity,
    pub tokens: Tokens,
}

/// Authentication backend.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<()>;

    async fn sign_in_with_password(&self, email: &str, password: &SecretString)
        -> Result<AuthGrant>;

    async fn sign_in_anonymously(&self) -> Result<AuthGrant>;

    async fn sign_up(&self, email: &str, password: &SecretString) -> Result<AuthGrant>;

    /// Change the display name of the user owning `id_token`.
    async fn update_profile(&self, id_token: &SecretString, display_name: &str)
        -> Result<UserIdentity>;

    /// Attach an email/password credential to an anonymous account.
    async fn link_with_password(
        &self,
        id_token: &SecretString,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthGrant>;

    /// Exchange a refresh token for fresh tokens.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<Tokens>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> StorePath {
        StorePath::parse(p).unwrap()
    }

    #[test]
    fn test_set_requires_object() {
        let write = DocumentWrite::Set {
            path: path("profiles/u1"),
            value: json!([1, 2]),
        };
        assert!(matches!(write.apply(None), Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn test_update_missing_document_fails() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Ann"));
        let write = DocumentWrite::Update {
            path: path("profiles/u1"),
            fields,
        };
        assert!(matches!(write.apply(None), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_update_dotted_fields() {
        let mut fields = Map::new();
        fields.insert("stats.level".into(), json!(3));
        fields.insert("name".into(), json!("Bo"));
        let write = DocumentWrite::Update {
            path: path("profiles/u1"),
            fields,
        };

        let updated = write
            .apply(Some(json!({"name": "Ann", "stats": {"xp": 10}})))
            .unwrap()
            .unwrap();
        assert_eq!(updated, json!({"name": "Bo", "stats": {"xp": 10, "level": 3}}));
    }

    #[test]
    fn test_delete_yields_none() {
        let write = DocumentWrite::Delete {
            path: path("profiles/u1"),
        };
        assert_eq!(write.apply(Some(json!({}))).unwrap(), None);
        assert_eq!(write.apply(None).unwrap(), None);
    }

    #[test]
    fn test_http_method_parse() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert!(HttpMethod::Get.is_read_style());
        assert!(!HttpMethod::Post.is_read_style());
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_tokens_expiration() {
        let tokens = Tokens {
            id_token: "test".into(),
            refresh_token: "refresh".into(),
            expires_at: Utc::now() + Duration::minutes(4),
        };
        assert!(tokens.is_expired());

        let valid = Tokens {
            expires_at: Utc::now() + Duration::hours(1),
            ..tokens
        };
        assert!(!valid.is_expired());
    }
}
