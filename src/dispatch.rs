/// Dispatch pipeline - feeds query results to a caller-supplied sink in order
use crate::{
    error::{VaultError, VaultResult},
    query::{QueryEngine, QuerySpec, ResultItem},
};
use async_trait::async_trait;
use std::sync::Arc;

/// A consumer of query results
#[async_trait]
pub trait Dispatcher: Send {
    /// Handle one item; returning an error stops delivery immediately
    async fn dispatch(&mut self, item: &ResultItem) -> VaultResult<()>;
}

/// Drives a query and delivers each result to a sink, strictly in the order
/// the query returned them
pub struct DispatchPipeline {
    engine: Arc<QueryEngine>,
}

impl DispatchPipeline {
    pub fn new(engine: Arc<QueryEngine>) -> Self {
        Self { engine }
    }

    /// Run the query, then deliver items one at a time
    ///
    /// Delivery is sequential: item N+1 is not delivered until the sink has
    /// finished with item N. A sink failure on item N surfaces as
    /// `DispatchFailed` with that 0-based index; later items are never
    /// delivered. A failed query never invokes the sink.
    ///
    /// Returns the number of items delivered.
    pub async fn run_and_dispatch<D: Dispatcher>(
        &self,
        spec: &QuerySpec,
        sink: &mut D,
    ) -> VaultResult<usize> {
        let items = self.engine.fetch(spec).await?;

        for (index, item) in items.iter().enumerate() {
            sink.dispatch(item)
                .await
                .map_err(|e| VaultError::DispatchFailed {
                    index,
                    source: Box::new(e),
                })?;
        }

        Ok(items.len())
    }
}
