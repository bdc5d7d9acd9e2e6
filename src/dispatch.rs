use std::collections::BTreeSet;

use serde::Serialize;

use crate::{
    classify::{FulltextInfo, FulltextOracle},
    document::DocumentId,
    error::Result,
    session::{TransactionControl, in_transaction},
};

/// One asynchronous fulltext extraction request covering a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexingRequest {
    pub ids: BTreeSet<DocumentId>,
    pub fulltext_info: FulltextInfo,
    pub repository: String,
}

/// Out-of-band executor of indexing requests.
pub trait AsyncDispatcher {
    fn fire_indexing_request(&self, request: IndexingRequest) -> Result<()>;

    /// Block until every request fired so far has finished.
    ///
    /// Returns [`Error::Cancelled`] if the wait was interrupted.
    ///
    /// [`Error::Cancelled`]: crate::error::Error::Cancelled
    fn wait_for_completion(&self) -> Result<()>;
}

/// Fire one request for the batch's indexable ids in its own transaction.
///
/// An empty set fires nothing. Returns whether a request was fired. A
/// failure here does not undo markers committed by the touch phase.
pub fn run_dispatch_phase(
    dispatcher: &dyn AsyncDispatcher,
    txn: &dyn TransactionControl,
    oracle: &dyn FulltextOracle,
    indexable: &BTreeSet<DocumentId>,
    repository: &str,
) -> Result<bool> {
    in_transaction(txn, "dispatch", || {
        if indexable.is_empty() {
            return Ok(false);
        }
        let request = IndexingRequest {
            ids: indexable.clone(),
            fulltext_info: oracle.fulltext_info()?,
            repository: repository.to_string(),
        };
        dispatcher.fire_indexing_request(request)?;
        Ok(true)
    })
}

/// Completion barrier between batches.
///
/// Caps in-flight asynchronous work to one batch and makes the batch
/// outcome reflect finished work rather than queued work.
pub fn await_completion(dispatcher: &dyn AsyncDispatcher) -> Result<()> {
    dispatcher.wait_for_completion()
}
