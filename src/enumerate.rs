use crate::{
    document::DocumentRef,
    error::{Error, Result},
};

/// Which documents a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentFilter {
    pub include_proxies: bool,
    pub include_deleted: bool,
}

impl DocumentFilter {
    /// Live documents only: no proxies, nothing in the deleted state.
    pub const LIVE: Self = Self {
        include_proxies: false,
        include_deleted: false,
    };
}

/// Bulk, read-only document query service.
///
/// Implementations return results ordered by id and must not load
/// document content beyond id and type.
pub trait DocumentQuery {
    fn query_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<DocumentRef>>;
}

/// List every live document, ordered by id.
///
/// The full result is buffered so that batch partitioning is repeatable.
/// Any query failure is fatal for the run.
pub fn enumerate_documents(
    query: &dyn DocumentQuery,
) -> Result<Vec<DocumentRef>> {
    let mut docs =
        query
            .query_documents(&DocumentFilter::LIVE)
            .map_err(|e| match e {
                Error::Query(_) => e,
                other => Error::Query(other.to_string()),
            })?;

    // Enforce the total order even if the backend returns ties or drift.
    docs.sort_by(|a, b| a.id.cmp(&b.id));
    docs.dedup_by(|a, b| a.id == b.id);

    tracing::debug!(documents = docs.len(), "enumerated live documents");
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<Vec<DocumentRef>>);

    impl DocumentQuery for Canned {
        fn query_documents(
            &self,
            filter: &DocumentFilter,
        ) -> Result<Vec<DocumentRef>> {
            assert_eq!(*filter, DocumentFilter::LIVE);
            match &self.0 {
                Ok(docs) => Ok(docs.clone()),
                Err(e) => Err(Error::Session(e.to_string())),
            }
        }
    }

    #[test]
    fn results_are_sorted_and_unique() {
        let query = Canned(Ok(vec![
            DocumentRef::new("c", "File"),
            DocumentRef::new("a", "Note"),
            DocumentRef::new("b", "File"),
            DocumentRef::new("a", "Note"),
        ]));
        let docs = enumerate_documents(&query).unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn failures_surface_as_query_errors() {
        let query = Canned(Err(Error::Session("store unreachable".into())));
        let err = enumerate_documents(&query).unwrap_err();
        assert!(matches!(err, Error::Query(msg) if msg.contains("unreachable")));
    }

    #[test]
    fn empty_repository() {
        let query = Canned(Ok(vec![]));
        assert!(enumerate_documents(&query).unwrap().is_empty());
    }
}
