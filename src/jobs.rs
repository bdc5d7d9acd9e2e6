use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

use tantivy::IndexWriter;

use crate::{
    dispatch::{AsyncDispatcher, IndexingRequest},
    document::{AttributeValue, DocumentId, StoredDocument},
    error::{Error, Result},
    extraction::index_documents,
    fulltext_index::{FulltextIndex, WRITER_MEMORY},
    reindex::{CancelFlag, ReindexConfig},
    store::DocumentStore,
};

/// How often a blocked wait re-checks the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(50);

struct Shared {
    store: Arc<DocumentStore>,
    index: Arc<FulltextIndex>,
    writer: Mutex<IndexWriter>,
    change_trigger: String,
    job_marker: String,
    pending: Mutex<usize>,
    idle: Condvar,
    failures: Mutex<Vec<String>>,
}

impl Shared {
    fn process(&self, request: &IndexingRequest) -> Result<usize> {
        let docs: Vec<_> = self
            .store
            .get_documents(&request.ids)?
            .into_iter()
            .filter(|(id, doc)| {
                self.is_pending(id, doc)
                    && request.fulltext_info.is_fulltext_indexable(&doc.doc_type)
            })
            .collect();

        let indexed = {
            let mut writer =
                self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            index_documents(&self.index, &mut writer, &docs, &self.change_trigger)?
        };

        // Blocks until the dispatching transaction has committed.
        let cleared = self.store.clear_job_markers(&request.ids, &self.job_marker)?;
        tracing::debug!(
            repository = %request.repository,
            requested = request.ids.len(),
            indexed,
            cleared,
            "fulltext job finished"
        );
        Ok(indexed)
    }

    /// Only documents whose marker still holds their own id are extracted.
    fn is_pending(&self, id: &DocumentId, doc: &StoredDocument) -> bool {
        doc.attributes.get(&self.job_marker)
            == Some(&AttributeValue::text(id.as_str()))
    }

    fn finish(&self, result: Result<usize>) {
        if let Err(err) = result {
            tracing::warn!(error = %err, "fulltext job failed");
            self.failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(err.to_string());
        }
        let mut pending =
            self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending -= 1;
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// Background fulltext extraction on a dedicated rayon pool.
///
/// Each request extracts the text of its documents into the fulltext index
/// and then clears their job markers. Failures are collected and reported
/// by the next [`AsyncDispatcher::wait_for_completion`].
pub struct FulltextJobs {
    pool: rayon::ThreadPool,
    shared: Arc<Shared>,
    cancel: Option<CancelFlag>,
}

impl FulltextJobs {
    pub fn new(
        store: Arc<DocumentStore>,
        index: Arc<FulltextIndex>,
        config: &ReindexConfig,
        workers: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("fulltext-{i}"))
            .build()?;
        let writer = index.writer(WRITER_MEMORY)?;

        Ok(Self {
            pool,
            shared: Arc::new(Shared {
                store,
                index,
                writer: Mutex::new(writer),
                change_trigger: config.change_trigger.clone(),
                job_marker: config.job_marker.clone(),
                pending: Mutex::new(0),
                idle: Condvar::new(),
                failures: Mutex::new(Vec::new()),
            }),
            cancel: None,
        })
    }

    /// Make waits return [`Error::Cancelled`] once the flag is raised.
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Number of requests fired but not yet finished.
    pub fn pending(&self) -> usize {
        *self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }
}

impl std::fmt::Debug for FulltextJobs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulltextJobs")
            .field("workers", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl AsyncDispatcher for FulltextJobs {
    fn fire_indexing_request(&self, request: IndexingRequest) -> Result<()> {
        *self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;

        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || {
            let result = shared.process(&request);
            shared.finish(result);
        });
        Ok(())
    }

    fn wait_for_completion(&self) -> Result<()> {
        let mut pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *pending > 0 {
            if self.is_cancelled() {
                return Err(Error::Cancelled);
            }
            pending = self
                .shared
                .idle
                .wait_timeout(pending, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        drop(pending);

        let failures = std::mem::take(
            &mut *self
                .shared
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Dispatch(failures.join("; ")))
        }
    }
}
