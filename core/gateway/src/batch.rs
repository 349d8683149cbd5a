//! Atomic multi-document writes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use unigate_common::{EntityDescriptor, Error, Response, Result};
use unigate_storage::{DocumentStoreSession, DocumentWrite};

use crate::cancel::{respond, CancelScope};
use crate::resolver::AddressResolver;

/// One operation inside a batch, bound to the document it targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOperation {
    /// Replace the whole document.
    Set {
        target: EntityDescriptor,
        payload: Value,
    },
    /// Set one (possibly dotted) field of an existing document.
    Update {
        target: EntityDescriptor,
        field: String,
        value: Value,
    },
    Delete { target: EntityDescriptor },
}

impl BatchOperation {
    pub fn target(&self) -> &EntityDescriptor {
        match self {
            BatchOperation::Set { target, .. }
            | BatchOperation::Update { target, .. }
            | BatchOperation::Delete { target } => target,
        }
    }

    fn into_write(self, resolver: &AddressResolver) -> Result<DocumentWrite> {
        let path = resolver.resolve_document(self.target())?;
        Ok(match self {
            BatchOperation::Set { payload, .. } => DocumentWrite::Set {
                path,
                value: payload,
            },
            BatchOperation::Update { field, value, .. } => {
                let mut fields = Map::new();
                fields.insert(field, value);
                DocumentWrite::Update { path, fields }
            }
            BatchOperation::Delete { .. } => DocumentWrite::Delete { path },
        })
    }
}

/// Builder accumulating batch operations.
///
/// Payload serialization errors are kept and reported when the batch is
/// committed, so the builder chains without `?`.
#[derive(Debug, Default)]
pub struct Batch {
    operations: Vec<BatchOperation>,
    error: Option<Error>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<P: Serialize + ?Sized>(mut self, target: EntityDescriptor, payload: &P) -> Self {
        match serde_json::to_value(payload) {
            Ok(payload) => self.operations.push(BatchOperation::Set { target, payload }),
            Err(err) => self.fail(err.into()),
        }
        self
    }

    pub fn update<V: Serialize>(
        mut self,
        target: EntityDescriptor,
        field: impl Into<String>,
        value: V,
    ) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => self.operations.push(BatchOperation::Update {
                target,
                field: field.into(),
                value,
            }),
            Err(err) => self.fail(err.into()),
        }
        self
    }

    pub fn delete(mut self, target: EntityDescriptor) -> Self {
        self.operations.push(BatchOperation::Delete { target });
        self
    }

    pub fn push(mut self, operation: BatchOperation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The accumulated operations, or the first serialization error.
    pub fn into_operations(self) -> Result<Vec<BatchOperation>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.operations),
        }
    }

    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Commits sequences of operations as one atomic unit.
#[derive(Clone)]
pub struct BatchCoordinator {
    session: Arc<dyn DocumentStoreSession>,
    resolver: Arc<AddressResolver>,
    scope: CancelScope,
}

impl BatchCoordinator {
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

    /// Apply `operations` in order and commit them all or none.
    ///
    /// Cancellation is only observed before the commit starts.
    pub async fn commit(&self, operations: Vec<BatchOperation>) -> Response<()> {
        let result: Result<()> = async {
            self.scope.check("batch commit")?;

            let writes = operations
                .into_iter()
                .map(|operation| operation.into_write(&self.resolver))
                .collect::<Result<Vec<_>>>()?;
            if writes.is_empty() {
                return Ok(());
            }

            let count = writes.len();
            self.session.commit(writes).await?;
            debug!("Committed batch of {} operations", count);
            Ok(())
        }
        .await;
        respond("batch commit", result)
    }

    pub async fn commit_batch(&self, batch: Batch) -> Response<()> {
        match batch.into_operations() {
            Ok(operations) => self.commit(operations).await,
            Err(err) => respond("batch commit", Err(err)),
        }
    }
}
