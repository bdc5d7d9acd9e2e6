//! reindexer - rebuild the fulltext index of a whole document repository.
//!
//! A reindex run enumerates every live document, splits the ids into
//! batches and, batch by batch, stamps a pending-job marker on the
//! indexable documents, forces change detection with a no-op edit of a
//! text attribute, fires one asynchronous extraction request and waits for
//! it to finish before moving on.
//!
//! The run loop only talks to the collaborator traits in [`principal`],
//! [`enumerate`], [`session`], [`classify`] and [`dispatch`]. [`store`]
//! implements them over [redb](https://github.com/cberner/redb) and
//! [`jobs`] extracts text into a
//! [Tantivy](https://github.com/quickwit-oss/tantivy) index.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use reindexer::{
//!     Collaborators,
//!     DataDir,
//!     DocumentStore,
//!     FulltextIndex,
//!     FulltextJobs,
//!     Reindexer,
//!     StorePrincipals,
//! };
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = Arc::new(DocumentStore::open(&data_dir.repository_db()).unwrap());
//! let index =
//!     Arc::new(FulltextIndex::open(&data_dir.fulltext_dir().unwrap()).unwrap());
//! let config = store.reindex_config().unwrap();
//!
//! let principals = StorePrincipals::new(&store, Some("admin".into()));
//! let session = store.session();
//! let jobs =
//!     FulltextJobs::new(Arc::clone(&store), index, &config, 2).unwrap();
//!
//! let deps = Collaborators {
//!     principals: &principals,
//!     query: &*store,
//!     session: &session,
//!     transactions: &session,
//!     oracle: &*store,
//!     dispatcher: &jobs,
//! };
//! let status = Reindexer::new(deps, config).reindex(100, 0).unwrap();
//! println!("{status}");
//! ```

pub mod classify;
pub mod data_dir;
pub mod dispatch;
pub mod document;
pub mod enumerate;
pub mod error;
pub mod extraction;
pub mod fulltext_index;
pub mod import;
pub mod jobs;
pub mod plan;
pub mod principal;
pub mod reindex;
pub mod session;
pub mod store;
pub mod touch;

#[cfg(test)]
mod testing;

pub use data_dir::DataDir;
pub use document::{DocumentId, StoredDocument};
pub use error::{Error, Result};
pub use fulltext_index::FulltextIndex;
pub use jobs::FulltextJobs;
pub use reindex::{
    CancelFlag,
    Collaborators,
    ReindexConfig,
    ReindexOutcome,
    Reindexer,
    RunSummary,
};
pub use store::{DocumentStore, StorePrincipals, StoreSession};
