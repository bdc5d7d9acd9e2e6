use rayon::prelude::*;
use tantivy::IndexWriter;

use crate::{
    document::{AttributeValue, DocumentId, StoredDocument},
    error::Result,
    fulltext_index::{FulltextEntry, FulltextIndex},
};

/// Attributes under this prefix are system properties and never indexed.
const SYSTEM_PREFIX: &str = "ecm:";

/// Extract the indexable text of a document.
///
/// The title comes from the change trigger attribute, falling back to the
/// document id. The body joins every other text attribute in name order.
pub fn extract_entry(
    id: &DocumentId,
    doc: &StoredDocument,
    change_trigger: &str,
) -> FulltextEntry {
    let title = doc
        .attributes
        .get(change_trigger)
        .and_then(AttributeValue::as_text)
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or(id.as_str())
        .to_string();

    let body = doc
        .attributes
        .iter()
        .filter(|(name, _)| {
            name.as_str() != change_trigger && !name.starts_with(SYSTEM_PREFIX)
        })
        .filter_map(|(_, value)| value.as_text())
        .collect::<Vec<_>>()
        .join("\n");

    FulltextEntry {
        id: id.clone(),
        doc_type: doc.doc_type.clone(),
        title,
        body,
    }
}

/// Extract and index a set of documents, committing once at the end.
pub fn index_documents(
    index: &FulltextIndex,
    writer: &mut IndexWriter,
    docs: &[(DocumentId, StoredDocument)],
    change_trigger: &str,
) -> Result<usize> {
    // Extract in parallel, then index sequentially through the one writer.
    let entries: Vec<FulltextEntry> = docs
        .par_iter()
        .map(|(id, doc)| extract_entry(id, doc, change_trigger))
        .collect();

    for entry in &entries {
        index.upsert(writer, entry)?;
    }
    writer.commit()?;
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> StoredDocument {
        StoredDocument::new("File")
            .with_attribute("dc:title", AttributeValue::text("  Budget 2026 "))
            .with_attribute("dc:description", AttributeValue::text("numbers"))
            .with_attribute("note:text", AttributeValue::text("spreadsheet"))
            .with_attribute("ecm:fulltextJobId", AttributeValue::text("a"))
            .with_attribute("size", AttributeValue::Integer(12))
    }

    #[test]
    fn title_from_trigger_and_body_from_other_text() {
        let entry = extract_entry(&"a".into(), &doc(), "dc:title");
        assert_eq!(entry.title, "Budget 2026");
        assert_eq!(entry.body, "numbers\nspreadsheet");
        assert_eq!(entry.doc_type, "File");
    }

    #[test]
    fn title_falls_back_to_id() {
        let blank = StoredDocument::new("Note")
            .with_attribute("dc:title", AttributeValue::text("   "));
        assert_eq!(extract_entry(&"n-1".into(), &blank, "dc:title").title, "n-1");

        let untitled = StoredDocument::new("Note");
        assert_eq!(
            extract_entry(&"n-2".into(), &untitled, "dc:title").title,
            "n-2"
        );
    }

    #[test]
    fn index_documents_commits_entries() {
        let index = FulltextIndex::open_in_ram().unwrap();
        let mut writer = index.writer(15_000_000).unwrap();

        let count = index_documents(
            &index,
            &mut writer,
            &[("a".into(), doc())],
            "dc:title",
        )
        .unwrap();

        assert_eq!(count, 1);
        let hits = index.search("spreadsheet", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Budget 2026");
    }
}
