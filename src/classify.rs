use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    document::{DocumentId, DocumentRef},
    error::{Error, Result},
};

/// Which document types carry fulltext-indexable content.
///
/// When `included_types` is non-empty only those types are indexable;
/// otherwise every type not listed in `excluded_types` is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulltextInfo {
    #[serde(default)]
    pub included_types: BTreeSet<String>,
    #[serde(default)]
    pub excluded_types: BTreeSet<String>,
}

impl FulltextInfo {
    pub fn is_fulltext_indexable(&self, doc_type: &str) -> bool {
        if self.included_types.is_empty() {
            !self.excluded_types.contains(doc_type)
        } else {
            self.included_types.contains(doc_type)
        }
    }
}

/// External answer to "does this document type get fulltext extraction".
pub trait FulltextOracle {
    fn is_indexable(&self, doc_type: &str) -> Result<bool>;

    /// The schema description attached to indexing requests.
    fn fulltext_info(&self) -> Result<FulltextInfo>;
}

impl FulltextOracle for FulltextInfo {
    fn is_indexable(&self, doc_type: &str) -> Result<bool> {
        Ok(self.is_fulltext_indexable(doc_type))
    }

    fn fulltext_info(&self) -> Result<FulltextInfo> {
        Ok(self.clone())
    }
}

/// The ids of one batch, split by indexability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchIds {
    /// Every id of the batch, in enumeration order.
    pub ids: Vec<DocumentId>,
    pub indexable: BTreeSet<DocumentId>,
}

impl BatchIds {
    pub fn is_indexable(&self, id: &DocumentId) -> bool {
        self.indexable.contains(id)
    }
}

/// Split a batch into indexable and non-indexable ids.
///
/// Each distinct type is asked once per batch. An oracle failure aborts
/// the batch; it is never treated as "not indexable".
pub fn classify_batch(
    members: &[DocumentRef],
    oracle: &dyn FulltextOracle,
) -> Result<BatchIds> {
    let mut answers: HashMap<&str, bool> = HashMap::new();
    let mut result = BatchIds {
        ids: Vec::with_capacity(members.len()),
        indexable: BTreeSet::new(),
    };

    for doc in members {
        let indexable = match answers.get(doc.doc_type.as_str()) {
            Some(&known) => known,
            None => {
                let answer =
                    oracle.is_indexable(&doc.doc_type).map_err(|e| match e {
                        Error::Oracle(_) => e,
                        other => Error::Oracle(other.to_string()),
                    })?;
                answers.insert(&doc.doc_type, answer);
                answer
            }
        };

        result.ids.push(doc.id.clone());
        if indexable {
            result.indexable.insert(doc.id.clone());
        }
    }

    Ok(result)
}
