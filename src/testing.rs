//! In-memory collaborators for exercising the engine without a store.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet},
};

use crate::{
    dispatch::{AsyncDispatcher, IndexingRequest},
    document::{
        AttributeValue,
        DELETED_STATE,
        DocumentId,
        DocumentRef,
        StoredDocument,
    },
    enumerate::{DocumentFilter, DocumentQuery},
    error::{Error, Result},
    principal::{Principal, PrincipalResolver},
    session::{PrivilegedSession, TransactionControl},
};

pub const TITLE: &str = "dc:title";
pub const MARKER: &str = "ecm:fulltextJobId";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Query,
    Prefetch(usize),
    Set {
        id: String,
        name: String,
        value: AttributeValue,
    },
    Save,
    Start,
    Commit,
    Rollback,
}

#[derive(Default)]
struct TxnState {
    active: bool,
    rollback_only: bool,
    snapshot: Option<BTreeMap<DocumentId, StoredDocument>>,
}

/// A repository whose transactions snapshot and restore a document map.
#[derive(Default)]
pub struct MemoryRepository {
    docs: RefCell<BTreeMap<DocumentId, StoredDocument>>,
    txn: RefCell<TxnState>,
    ops: RefCell<Vec<Op>>,
    fail_query: Cell<bool>,
    fail_set_on: RefCell<BTreeSet<DocumentId>>,
}

impl MemoryRepository {
    pub fn insert(&self, id: &str, doc: StoredDocument) {
        self.docs.borrow_mut().insert(id.into(), doc);
    }

    /// `n` live documents `doc-00000..`, types cycling File/Note/Folder.
    pub fn with_documents(n: usize) -> Self {
        let repo = Self::default();
        for i in 0..n {
            let doc_type = ["File", "Note", "Folder"][i % 3];
            repo.insert(
                &format!("doc-{i:05}"),
                StoredDocument::new(doc_type)
                    .with_attribute(TITLE, AttributeValue::text(format!("T{i}"))),
            );
        }
        repo
    }

    pub fn attribute(&self, id: &str, name: &str) -> Option<AttributeValue> {
        self.docs
            .borrow()
            .get(&DocumentId::from(id))
            .and_then(|doc| doc.attributes.get(name).cloned())
    }

    pub fn fail_query(&self) {
        self.fail_query.set(true);
    }

    pub fn fail_set_on(&self, id: &str) {
        self.fail_set_on.borrow_mut().insert(id.into());
    }

    pub fn activate_ambient_transaction(&self) {
        self.txn.borrow_mut().active = true;
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.borrow().clone()
    }

    fn count(&self, wanted: &Op) -> usize {
        self.ops.borrow().iter().filter(|op| *op == wanted).count()
    }

    pub fn commits(&self) -> usize {
        self.count(&Op::Commit)
    }

    pub fn rollbacks(&self) -> usize {
        self.count(&Op::Rollback)
    }

    /// Ids whose change trigger was written with the touched value.
    pub fn touched_ids(&self) -> BTreeSet<String> {
        self.ops
            .borrow()
            .iter()
            .filter_map(|op| match op {
                Op::Set { id, name, value }
                    if name == TITLE
                        && value
                            .as_text()
                            .is_some_and(|text| text.ends_with(' ')) =>
                {
                    Some(id.clone())
                }
                _ => None,
            })
            .collect()
    }
}

impl DocumentQuery for MemoryRepository {
    fn query_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<DocumentRef>> {
        self.ops.borrow_mut().push(Op::Query);
        if self.fail_query.get() {
            return Err(Error::Query("store unreachable".into()));
        }
        Ok(self
            .docs
            .borrow()
            .iter()
            .filter(|(_, doc)| {
                (filter.include_proxies || !doc.is_proxy)
                    && (filter.include_deleted
                        || doc.lifecycle_state != DELETED_STATE)
            })
            .map(|(id, doc)| DocumentRef {
                id: id.clone(),
                doc_type: doc.doc_type.clone(),
            })
            .collect())
    }
}

impl PrivilegedSession for MemoryRepository {
    fn prefetch(&self, ids: &[DocumentId]) -> Result<()> {
        self.ops.borrow_mut().push(Op::Prefetch(ids.len()));
        Ok(())
    }

    fn get_attribute(
        &self,
        id: &DocumentId,
        name: &str,
    ) -> Result<AttributeValue> {
        let docs = self.docs.borrow();
        let doc = docs.get(id).ok_or_else(|| Error::NotFound {
            kind: "document",
            name: id.to_string(),
        })?;
        doc.attributes.get(name).cloned().ok_or_else(|| {
            Error::AttributeNotPresent {
                id: id.to_string(),
                name: name.to_string(),
            }
        })
    }

    fn set_attribute(
        &self,
        id: &DocumentId,
        name: &str,
        value: AttributeValue,
    ) -> Result<()> {
        if self.fail_set_on.borrow().contains(id) {
            return Err(Error::Session(format!("cannot write {id}")));
        }
        self.ops.borrow_mut().push(Op::Set {
            id: id.to_string(),
            name: name.to_string(),
            value: value.clone(),
        });
        let mut docs = self.docs.borrow_mut();
        let doc = docs.get_mut(id).ok_or_else(|| Error::NotFound {
            kind: "document",
            name: id.to_string(),
        })?;
        doc.attributes.insert(name.to_string(), value);
        Ok(())
    }

    fn save(&self) -> Result<()> {
        self.ops.borrow_mut().push(Op::Save);
        Ok(())
    }
}

impl TransactionControl for MemoryRepository {
    fn is_active(&self) -> bool {
        self.txn.borrow().active
    }

    fn start(&self) -> Result<bool> {
        let mut txn = self.txn.borrow_mut();
        if txn.active {
            return Ok(false);
        }
        txn.active = true;
        txn.rollback_only = false;
        txn.snapshot = Some(self.docs.borrow().clone());
        self.ops.borrow_mut().push(Op::Start);
        Ok(true)
    }

    fn set_rollback_only(&self) {
        self.txn.borrow_mut().rollback_only = true;
    }

    fn commit_or_rollback(&self) -> Result<()> {
        let mut txn = self.txn.borrow_mut();
        let snapshot = txn.snapshot.take();
        if txn.rollback_only {
            if let Some(snapshot) = snapshot {
                *self.docs.borrow_mut() = snapshot;
            }
            self.ops.borrow_mut().push(Op::Rollback);
        } else {
            self.ops.borrow_mut().push(Op::Commit);
        }
        txn.active = false;
        txn.rollback_only = false;
        Ok(())
    }
}

/// A principal resolver with a fixed answer.
pub struct FixedPrincipal {
    pub principal: Principal,
    pub administrator: bool,
}

impl FixedPrincipal {
    pub fn admin() -> Self {
        Self {
            principal: Principal::User {
                name: "Administrator".into(),
            },
            administrator: true,
        }
    }

    pub fn member() -> Self {
        Self {
            principal: Principal::User {
                name: "jdoe".into(),
            },
            administrator: false,
        }
    }
}

impl PrincipalResolver for FixedPrincipal {
    fn current_principal(&self) -> Principal {
        self.principal.clone()
    }

    fn is_administrator(&self, _principal: &Principal) -> bool {
        self.administrator
    }
}

/// Records fired requests; fires and waits can be made to fail.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub requests: RefCell<Vec<IndexingRequest>>,
    pub waits: Cell<usize>,
    /// 1-based fire numbers that fail.
    fail_fires: RefCell<BTreeSet<usize>>,
    fires: Cell<usize>,
    cancel_on_wait: Cell<Option<usize>>,
}

impl RecordingDispatcher {
    pub fn fail_fire(&self, nth: usize) {
        self.fail_fires.borrow_mut().insert(nth);
    }

    /// Report cancellation from the `nth` wait (1-based).
    pub fn cancel_on_wait(&self, nth: usize) {
        self.cancel_on_wait.set(Some(nth));
    }
}

impl AsyncDispatcher for RecordingDispatcher {
    fn fire_indexing_request(&self, request: IndexingRequest) -> Result<()> {
        let nth = self.fires.get() + 1;
        self.fires.set(nth);
        if self.fail_fires.borrow().contains(&nth) {
            return Err(Error::Dispatch(format!("event bus rejected #{nth}")));
        }
        self.requests.borrow_mut().push(request);
        Ok(())
    }

    fn wait_for_completion(&self) -> Result<()> {
        let nth = self.waits.get() + 1;
        self.waits.set(nth);
        if self.cancel_on_wait.get() == Some(nth) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
