use std::path::Path;

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    Term,
    collector::TopDocs,
    doc,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::*,
    tokenizer::{
        Language,
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::{document::DocumentId, error::Result};

/// Field names used in the schema.
pub mod fields {
    pub const ID: &str = "id";
    pub const DOC_TYPE: &str = "doc_type";
    pub const TITLE: &str = "title";
    pub const BODY: &str = "body";
}

/// Default writer memory budget, in bytes.
pub const WRITER_MEMORY: usize = 50_000_000;

#[derive(Clone, Copy)]
struct SchemaFields {
    id: Field,
    doc_type: Field,
    title: Field,
    body: Field,
}

/// Text extracted from one document, ready to be indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulltextEntry {
    pub id: DocumentId,
    pub doc_type: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct FulltextHit {
    pub score: f32,
    pub id: String,
    pub doc_type: String,
    pub title: String,
}

/// Tantivy index holding the extracted text of every indexed document.
pub struct FulltextIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let id = builder.add_text_field(fields::ID, STRING | STORED);
    let doc_type =
        builder.add_text_field(fields::DOC_TYPE, STRING | STORED | FAST);

    let indexing = TextFieldIndexing::default()
        .set_tokenizer("en_stem")
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let title = builder.add_text_field(
        fields::TITLE,
        TextOptions::default()
            .set_indexing_options(indexing.clone())
            .set_stored(),
    );
    let body = builder.add_text_field(
        fields::BODY,
        TextOptions::default().set_indexing_options(indexing),
    );

    let fields = SchemaFields {
        id,
        doc_type,
        title,
        body,
    };
    (builder.build(), fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

impl FulltextIndex {
    /// Open or create an index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, fields) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        };

        Self::from_index(index, fields)
    }

    /// Create an in-memory index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, fields) = build_schema();
        Self::from_index(Index::create_in_ram(schema), fields)
    }

    fn from_index(index: Index, fields: SchemaFields) -> Result<Self> {
        register_tokenizers(&index);
        let reader = index.reader()?;
        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    /// Create a writer with the given memory budget (in bytes).
    pub fn writer(&self, memory_budget: usize) -> Result<IndexWriter> {
        Ok(self.index.writer(memory_budget)?)
    }

    /// Replace whatever the index holds for this document.
    pub fn upsert(
        &self,
        writer: &IndexWriter,
        entry: &FulltextEntry,
    ) -> Result<()> {
        let f = self.fields;
        writer.delete_term(Term::from_field_text(f.id, entry.id.as_str()));
        writer.add_document(doc!(
            f.id => entry.id.as_str(),
            f.doc_type => entry.doc_type.as_str(),
            f.title => entry.title.as_str(),
            f.body => entry.body.as_str(),
        ))?;
        Ok(())
    }

    /// BM25 search over title and body, title boosted 2x, optionally
    /// restricted to one document type.
    pub fn search(
        &self,
        query_str: &str,
        doc_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<FulltextHit>> {
        let f = self.fields;
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let mut parser =
            QueryParser::for_index(&self.index, vec![f.title, f.body]);
        parser.set_field_boost(f.title, 2.0);
        let (user_query, _errors) = parser.parse_query_lenient(query_str);

        let query: Box<dyn Query> = match doc_type {
            Some(doc_type) => {
                let type_query = TermQuery::new(
                    Term::from_field_text(f.doc_type, doc_type),
                    IndexRecordOption::Basic,
                );
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, user_query),
                    (Occur::Must, Box::new(type_query)),
                ]))
            }
            None => user_query,
        };

        let top_docs = searcher.search(&*query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            hits.push(FulltextHit {
                score,
                id: extract_text(&doc, f.id),
                doc_type: extract_text(&doc, f.doc_type),
                title: extract_text(&doc, f.title),
            });
        }
        Ok(hits)
    }

    pub fn num_docs(&self) -> Result<u64> {
        self.reader.reload()?;
        Ok(self.reader.searcher().num_docs())
    }
}

impl std::fmt::Debug for FulltextIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulltextIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}
