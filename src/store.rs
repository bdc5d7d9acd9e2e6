use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    TableDefinition,
    WriteTransaction,
};
use serde::Deserialize;

use crate::{
    classify::{FulltextInfo, FulltextOracle},
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
    reindex::{
        DEFAULT_CHANGE_TRIGGER,
        DEFAULT_JOB_MARKER,
        DEFAULT_REPOSITORY,
        ReindexConfig,
    },
    session::{PrivilegedSession, TransactionControl},
};

const DOCUMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("documents");
const USERS: TableDefinition<&str, &str> = TableDefinition::new("users");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

pub mod settings {
    pub const REPOSITORY_NAME: &str = "repository_name";
    pub const CHANGE_TRIGGER: &str = "change_trigger";
    pub const JOB_MARKER: &str = "job_marker";
    pub const FULLTEXT_INFO: &str = "fulltext_info";

    /// Keys that may be set from the command line.
    pub const EDITABLE: &[&str] = &[REPOSITORY_NAME, CHANGE_TRIGGER, JOB_MARKER];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Administrator,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "administrator" => Some(Self::Administrator),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// Document counts reported by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub documents: usize,
    pub live: usize,
    pub pending_jobs: usize,
}

fn decode(bytes: &[u8]) -> Result<StoredDocument> {
    Ok(serde_json::from_slice(bytes)?)
}

/// The fields enumeration reads. Attributes are skipped, not decoded.
#[derive(Deserialize)]
struct QueryView {
    #[serde(rename = "type")]
    doc_type: String,
    #[serde(default)]
    is_proxy: bool,
    #[serde(default)]
    lifecycle_state: Option<String>,
}

impl QueryView {
    fn is_deleted(&self) -> bool {
        self.lifecycle_state.as_deref() == Some(DELETED_STATE)
    }
}

fn read_documents<T>(
    table: &T,
    ids: &[DocumentId],
) -> Result<Vec<(DocumentId, StoredDocument)>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut result = Vec::with_capacity(ids.len());
    for id in ids {
        let doc = match table.get(id.as_str())? {
            Some(bytes) => decode(bytes.value())?,
            None => {
                return Err(Error::NotFound {
                    kind: "document",
                    name: id.to_string(),
                });
            }
        };
        result.push((id.clone(), doc));
    }
    Ok(result)
}

fn write_documents(
    txn: &WriteTransaction,
    entries: &[(DocumentId, Vec<u8>)],
) -> Result<()> {
    let mut table = txn.open_table(DOCUMENTS)?;
    for (id, bytes) in entries {
        table.insert(id.as_str(), bytes.as_slice())?;
    }
    Ok(())
}

/// redb-backed repository of documents, users and settings.
pub struct DocumentStore {
    db: Database,
}

impl DocumentStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(USERS)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Open a privileged session over this store.
    pub fn session(&self) -> StoreSession<'_> {
        StoreSession {
            store: self,
            state: RefCell::new(SessionState::default()),
        }
    }

    // -- Documents --

    pub fn put_document(
        &self,
        id: &DocumentId,
        doc: &StoredDocument,
    ) -> Result<()> {
        self.batch_put_documents(&[(id.clone(), doc.clone())])
    }

    /// Insert or replace multiple documents in a single transaction.
    pub fn batch_put_documents(
        &self,
        docs: &[(DocumentId, StoredDocument)],
    ) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let mut entries = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            entries.push((id.clone(), serde_json::to_vec(doc)?));
        }
        let txn = self.db.begin_write()?;
        write_documents(&txn, &entries)?;
        txn.commit()?;
        Ok(())
    }

    pub fn get_document(
        &self,
        id: &DocumentId,
    ) -> Result<Option<StoredDocument>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        match table.get(id.as_str())? {
            Some(bytes) => Ok(Some(decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Fetch the given documents in one read transaction, skipping ids
    /// that no longer exist.
    pub fn get_documents<'i>(
        &self,
        ids: impl IntoIterator<Item = &'i DocumentId>,
    ) -> Result<Vec<(DocumentId, StoredDocument)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result = Vec::new();
        for id in ids {
            if let Some(bytes) = table.get(id.as_str())? {
                result.push((id.clone(), decode(bytes.value())?));
            }
        }
        Ok(result)
    }

    /// All documents, ordered by id.
    pub fn list_documents(&self) -> Result<Vec<(DocumentId, StoredDocument)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((DocumentId::new(k.value()), decode(v.value())?));
        }
        Ok(result)
    }

    /// Set an attribute through the normal document API.
    ///
    /// Versions are immutable here; only a [`StoreSession`] may touch them.
    pub fn update_attribute(
        &self,
        id: &DocumentId,
        name: &str,
        value: AttributeValue,
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            let mut doc = match table.get(id.as_str())? {
                Some(bytes) => decode(bytes.value())?,
                None => {
                    return Err(Error::NotFound {
                        kind: "document",
                        name: id.to_string(),
                    });
                }
            };
            if doc.is_version {
                return Err(Error::Immutable(id.to_string()));
            }
            doc.attributes.insert(name.to_string(), value);
            let bytes = serde_json::to_vec(&doc)?;
            table.insert(id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove the pending-job marker from documents whose marker still
    /// holds their own id. Returns how many markers were cleared.
    pub fn clear_job_markers(
        &self,
        ids: &BTreeSet<DocumentId>,
        marker: &str,
    ) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let mut cleared = 0;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            for id in ids {
                let mut doc = match table.get(id.as_str())? {
                    Some(bytes) => decode(bytes.value())?,
                    None => continue,
                };
                let expected = AttributeValue::text(id.as_str());
                if doc.attributes.get(marker) != Some(&expected) {
                    continue;
                }
                doc.attributes.remove(marker);
                let bytes = serde_json::to_vec(&doc)?;
                table.insert(id.as_str(), bytes.as_slice())?;
                cleared += 1;
            }
        }
        txn.commit()?;
        Ok(cleared)
    }

    pub fn stats(&self, marker: &str) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for (_, doc) in self.list_documents()? {
            stats.documents += 1;
            if doc.is_live() {
                stats.live += 1;
            }
            if doc.attributes.contains_key(marker) {
                stats.pending_jobs += 1;
            }
        }
        Ok(stats)
    }

    // -- Users --

    pub fn set_user(&self, name: &str, role: Role) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USERS)?;
            table.insert(name, role.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn user_role(&self, name: &str) -> Result<Option<Role>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(USERS)?;
        Ok(table.get(name)?.and_then(|v| Role::parse(v.value())))
    }

    pub fn remove_user(&self, name: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(USERS)?;
            table.remove(name)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_users(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(USERS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn fulltext_info(&self) -> Result<FulltextInfo> {
        match self.get_setting(settings::FULLTEXT_INFO)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(FulltextInfo::default()),
        }
    }

    pub fn set_fulltext_info(&self, info: &FulltextInfo) -> Result<()> {
        self.set_setting(settings::FULLTEXT_INFO, &serde_json::to_string(info)?)
    }

    /// Reindex settings persisted in the store, with defaults.
    pub fn reindex_config(&self) -> Result<ReindexConfig> {
        Ok(ReindexConfig {
            repository: self
                .get_setting_or(settings::REPOSITORY_NAME, DEFAULT_REPOSITORY)?,
            change_trigger: self
                .get_setting_or(settings::CHANGE_TRIGGER, DEFAULT_CHANGE_TRIGGER)?,
            job_marker: self
                .get_setting_or(settings::JOB_MARKER, DEFAULT_JOB_MARKER)?,
        })
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore").finish_non_exhaustive()
    }
}

impl DocumentQuery for DocumentStore {
    fn query_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<DocumentRef>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let view: QueryView = serde_json::from_slice(v.value())?;
            if (!filter.include_proxies && view.is_proxy)
                || (!filter.include_deleted && view.is_deleted())
            {
                continue;
            }
            result.push(DocumentRef::new(k.value(), view.doc_type));
        }
        Ok(result)
    }
}

impl FulltextOracle for DocumentStore {
    fn is_indexable(&self, doc_type: &str) -> Result<bool> {
        Ok(self.fulltext_info()?.is_fulltext_indexable(doc_type))
    }

    fn fulltext_info(&self) -> Result<FulltextInfo> {
        DocumentStore::fulltext_info(self)
    }
}

/// Resolves a user name against the store's users table.
#[derive(Debug)]
pub struct StorePrincipals<'a> {
    store: &'a DocumentStore,
    user: Option<String>,
}

impl<'a> StorePrincipals<'a> {
    pub fn new(store: &'a DocumentStore, user: Option<String>) -> Self {
        Self { store, user }
    }
}

impl PrincipalResolver for StorePrincipals<'_> {
    fn current_principal(&self) -> Principal {
        let Some(name) = &self.user else {
            return Principal::Anonymous;
        };
        match self.store.user_role(name) {
            Ok(Some(_)) => Principal::User { name: name.clone() },
            Ok(None) => Principal::Unrecognized(name.clone()),
            Err(err) => {
                tracing::warn!(user = %name, error = %err, "user lookup failed");
                Principal::Anonymous
            }
        }
    }

    fn is_administrator(&self, principal: &Principal) -> bool {
        let Principal::User { name } = principal else {
            return false;
        };
        matches!(self.store.user_role(name), Ok(Some(Role::Administrator)))
    }
}

#[derive(Default)]
struct SessionState {
    txn: Option<WriteTransaction>,
    rollback_only: bool,
    /// Documents loaded into the session, with unsaved modifications.
    working: BTreeMap<DocumentId, StoredDocument>,
    dirty: BTreeSet<DocumentId>,
}

impl SessionState {
    fn take_dirty(&mut self) -> Result<Vec<(DocumentId, Vec<u8>)>> {
        let dirty = std::mem::take(&mut self.dirty);
        let mut entries = Vec::with_capacity(dirty.len());
        for id in dirty {
            if let Some(doc) = self.working.get(&id) {
                entries.push((id, serde_json::to_vec(doc)?));
            }
        }
        Ok(entries)
    }

    fn reset(&mut self) {
        self.rollback_only = false;
        self.working.clear();
        self.dirty.clear();
    }
}

/// Low-level session over a [`DocumentStore`].
///
/// Writes bypass the version immutability check of
/// [`DocumentStore::update_attribute`]. `save` flushes into the open
/// write transaction, or into an auto-committed one when none is open.
/// Ending a transaction discards the working set.
pub struct StoreSession<'a> {
    store: &'a DocumentStore,
    state: RefCell<SessionState>,
}

impl StoreSession<'_> {
    fn ensure_loaded(&self, ids: &[DocumentId]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let missing: Vec<DocumentId> = ids
            .iter()
            .filter(|id| !state.working.contains_key(*id))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let fetched = match &state.txn {
            Some(txn) => {
                let table = txn.open_table(DOCUMENTS)?;
                read_documents(&table, &missing)?
            }
            None => {
                let txn = self.store.db.begin_read()?;
                let table = txn.open_table(DOCUMENTS)?;
                read_documents(&table, &missing)?
            }
        };
        state.working.extend(fetched);
        Ok(())
    }
}

impl PrivilegedSession for StoreSession<'_> {
    fn prefetch(&self, ids: &[DocumentId]) -> Result<()> {
        self.ensure_loaded(ids)
    }

    fn get_attribute(
        &self,
        id: &DocumentId,
        name: &str,
    ) -> Result<AttributeValue> {
        self.ensure_loaded(std::slice::from_ref(id))?;
        let state = self.state.borrow();
        state
            .working
            .get(id)
            .and_then(|doc| doc.attributes.get(name))
            .cloned()
            .ok_or_else(|| Error::AttributeNotPresent {
                id: id.to_string(),
                name: name.to_string(),
            })
    }

    fn set_attribute(
        &self,
        id: &DocumentId,
        name: &str,
        value: AttributeValue,
    ) -> Result<()> {
        self.ensure_loaded(std::slice::from_ref(id))?;
        let mut state = self.state.borrow_mut();
        let doc = state.working.get_mut(id).ok_or_else(|| Error::NotFound {
            kind: "document",
            name: id.to_string(),
        })?;
        doc.attributes.insert(name.to_string(), value);
        state.dirty.insert(id.clone());
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entries = state.take_dirty()?;
        if entries.is_empty() {
            return Ok(());
        }
        match &state.txn {
            Some(txn) => write_documents(txn, &entries),
            None => {
                let txn = self.store.db.begin_write()?;
                write_documents(&txn, &entries)?;
                txn.commit()?;
                Ok(())
            }
        }
    }
}

impl TransactionControl for StoreSession<'_> {
    fn is_active(&self) -> bool {
        self.state.borrow().txn.is_some()
    }

    fn start(&self) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        if state.txn.is_some() {
            return Ok(false);
        }
        let txn = self.store.db.begin_write()?;
        state.reset();
        state.txn = Some(txn);
        Ok(true)
    }

    fn set_rollback_only(&self) {
        self.state.borrow_mut().rollback_only = true;
    }

    fn commit_or_rollback(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let Some(txn) = state.txn.take() else {
            return Ok(());
        };

        let result = if state.rollback_only {
            txn.abort().map_err(Error::from)
        } else {
            match state.take_dirty() {
                Ok(entries) => write_documents(&txn, &entries)
                    .and_then(|()| txn.commit().map_err(Error::from)),
                Err(err) => {
                    txn.abort()?;
                    Err(err)
                }
            }
        };
        state.reset();
        result
    }
}
