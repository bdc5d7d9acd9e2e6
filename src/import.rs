use std::io::BufRead;

use serde::Deserialize;

use crate::{
    document::{DocumentId, StoredDocument},
    error::{Error, Result},
    store::DocumentStore,
};

/// Documents are written to the store this many at a time.
const IMPORT_CHUNK: usize = 500;

/// One line of a JSON Lines import file.
#[derive(Debug, Deserialize)]
struct ImportRecord {
    id: DocumentId,
    #[serde(flatten)]
    document: StoredDocument,
}

/// Load documents from JSON Lines, one document per line.
///
/// Blank lines are skipped. Existing documents with the same id are
/// replaced. Returns the number of documents written.
pub fn import_documents(
    store: &DocumentStore,
    reader: impl BufRead,
) -> Result<usize> {
    let mut chunk = Vec::with_capacity(IMPORT_CHUNK);
    let mut imported = 0;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ImportRecord =
            serde_json::from_str(&line).map_err(|e| Error::Import {
                line: i + 1,
                message: e.to_string(),
            })?;
        chunk.push((record.id, record.document));

        if chunk.len() == IMPORT_CHUNK {
            store.batch_put_documents(&chunk)?;
            imported += chunk.len();
            chunk.clear();
        }
    }

    store.batch_put_documents(&chunk)?;
    imported += chunk.len();
    tracing::info!(imported, "documents imported");
    Ok(imported)
}
