//! RPC client: typed calls to remote callables and HTTP endpoints.
//!
//! Every call runs the same strictly sequential pipeline: resolve the
//! callable, encode the payload, fetch the bearer token, dispatch. The
//! token is always attached before the request leaves.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use unigate_common::{EntityDescriptor, Error, Response, Result};
use unigate_storage::{HttpMethod, RpcReply, RpcRequest, RpcSession};

use crate::auth::SessionProvider;
use crate::cancel::{respond, CancelScope};
use crate::resolver::AddressResolver;

/// A remote call, addressed by the descriptor of a callable entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest<P = ()> {
    pub target: EntityDescriptor,
    pub method: HttpMethod,
    #[serde(default)]
    pub payload: Option<P>,
}

impl CallRequest<()> {
    /// A call without payload.
    pub fn new(target: EntityDescriptor, method: HttpMethod) -> Self {
        Self {
            target,
            method,
            payload: None,
        }
    }
}

impl<P> CallRequest<P> {
    pub fn with_payload(target: EntityDescriptor, method: HttpMethod, payload: P) -> Self {
        Self {
            target,
            method,
            payload: Some(payload),
        }
    }
}

/// Lifecycle of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Building,
    AuthAttached,
    Dispatched,
    Completed,
    Cancelled,
    TransportFailed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Cancelled | CallState::TransportFailed
        )
    }

    /// Whether `next` is a legal successor of this state.
    ///
    /// Any non-terminal state may end in `Cancelled` or `TransportFailed`.
    pub fn can_advance_to(&self, next: CallState) -> bool {
        match (self, next) {
            (CallState::Building, CallState::AuthAttached)
            | (CallState::AuthAttached, CallState::Dispatched)
            | (CallState::Dispatched, CallState::Completed) => true,
            (state, CallState::Cancelled | CallState::TransportFailed) => !state.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Building => "building",
            CallState::AuthAttached => "auth_attached",
            CallState::Dispatched => "dispatched",
            CallState::Completed => "completed",
            CallState::Cancelled => "cancelled",
            CallState::TransportFailed => "transport_failed",
        };
        f.write_str(name)
    }
}

struct CallTracker<'a> {
    target: &'a EntityDescriptor,
    state: CallState,
}

impl<'a> CallTracker<'a> {
    fn new(target: &'a EntityDescriptor) -> Self {
        Self {
            target,
            state: CallState::Building,
        }
    }

    fn advance(&mut self, next: CallState) {
        if self.state.can_advance_to(next) {
            debug!("Call {}: {} -> {}", self.target, self.state, next);
            self.state = next;
        } else {
            warn!("Call {}: ignoring transition {} -> {}", self.target, self.state, next);
        }
    }

    fn fail(&mut self, err: &Error) {
        match err {
            Error::Cancelled(_) => self.advance(CallState::Cancelled),
            _ => self.advance(CallState::TransportFailed),
        }
    }
}

/// Encode a read-style payload as query parameters.
///
/// Strings are passed verbatim, numbers and booleans as their JSON text,
/// arrays and objects as compact JSON. Null fields are skipped.
///
/// # Errors
/// - `MalformedPayload` when `payload` is neither an object nor null
pub fn encode_query(payload: &Value) -> Result<Vec<(String, String)>> {
    let fields = match payload {
        Value::Null => return Ok(Vec::new()),
        Value::Object(fields) => fields,
        other => {
            return Err(Error::MalformedPayload(format!(
                "Query payload must be a JSON object, got {}",
                other
            )))
        }
    };

    let mut query = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        let encoded = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Bool(_) | Value::Number(_) => value.to_string(),
            Value::Array(_) | Value::Object(_) => serde_json::to_string(value)?,
        };
        query.push((key.clone(), encoded));
    }
    Ok(query)
}

fn decode_reply<R: DeserializeOwned>(target: &EntityDescriptor, reply: &RpcReply) -> Result<R> {
    let parsed = if reply.body.is_empty() {
        serde_json::from_value(Value::Null)
    } else {
        serde_json::from_slice(&reply.body)
    };
    parsed.map_err(|e| {
        Error::MalformedPayload(format!("malformed response from {}: {}", target, e))
    })
}

/// Invokes remote callables on behalf of the current session.
#[derive(Clone)]
pub struct RpcClient {
    session: Arc<dyn RpcSession>,
    resolver: Arc<AddressResolver>,
    auth: Arc<SessionProvider>,
    scope: CancelScope,
}

impl RpcClient {
    pub fn new(
        session: Arc<dyn RpcSession>,
        resolver: Arc<AddressResolver>,
        auth: Arc<SessionProvider>,
        scope: CancelScope,
    ) -> Self {
        Self {
            session,
            resolver,
            auth,
            scope,
        }
    }

    /// Call without a payload and decode the reply.
    pub async fn invoke<R: DeserializeOwned>(
        &self,
        request: &CallRequest,
        cancellation: &CancellationToken,
    ) -> Response<R> {
        self.invoke_with(request, cancellation).await
    }

    /// Call with a payload and decode the reply.
    pub async fn invoke_with<P: Serialize, R: DeserializeOwned>(
        &self,
        request: &CallRequest<P>,
        cancellation: &CancellationToken,
    ) -> Response<R> {
        let result = self
            .dispatch(request, cancellation)
            .await
            .and_then(|reply| decode_reply(&request.target, &reply));
        respond("rpc call", result)
    }

    /// Call without a payload, discarding the reply body.
    pub async fn invoke_unit(
        &self,
        request: &CallRequest,
        cancellation: &CancellationToken,
    ) -> Response<()> {
        self.invoke_with_unit(request, cancellation).await
    }

    /// Call with a payload, discarding the reply body.
    pub async fn invoke_with_unit<P: Serialize>(
        &self,
        request: &CallRequest<P>,
        cancellation: &CancellationToken,
    ) -> Response<()> {
        let result = self.dispatch(request, cancellation).await.map(|_| ());
        respond("rpc call", result)
    }

    #[instrument(skip_all, fields(target = %request.target, method = %request.method))]
    async fn dispatch<P: Serialize>(
        &self,
        request: &CallRequest<P>,
        cancellation: &CancellationToken,
    ) -> Result<RpcReply> {
        let scope = self.scope.with(cancellation);
        let mut call = CallTracker::new(&request.target);

        let result = scope
            .run("request", async {
                let target = self.resolver.resolve_callable(&request.target)?;
                let payload = request
                    .payload
                    .as_ref()
                    .map(serde_json::to_value)
                    .transpose()?;

                let (query, body) = match payload {
                    Some(payload) if request.method.is_read_style() => {
                        (encode_query(&payload)?, None)
                    }
                    Some(payload) => (Vec::new(), Some(serde_json::to_vec(&payload)?)),
                    None => (Vec::new(), None),
                };

                let bearer = self.auth.token(false).await?;
                if bearer.is_none() {
                    warn!("No auth session; calling {} unauthenticated", target);
                }
                call.advance(CallState::AuthAttached);

                let outgoing = RpcRequest {
                    method: request.method,
                    target,
                    query,
                    body,
                    bearer,
                };
                call.advance(CallState::Dispatched);
                self.session.dispatch(outgoing).await
            })
            .await;

        match &result {
            Ok(reply) => {
                call.advance(CallState::Completed);
                debug!("Call {} completed with status {}", request.target, reply.status);
            }
            Err(err) => call.fail(err),
        }
        result
    }
}
