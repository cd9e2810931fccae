//! Arrow schema of exported publications
//!
//! Scalar fields map to columns, string lists to `List<Utf8>`, and nested
//! records (authors, affiliations, databanks, grants) to JSON text columns.

use std::sync::{Arc, LazyLock};

use arrow::datatypes::{DataType, Field, Schema};

pub static PUBLICATIONS: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        // === Identifiers ===
        Field::new("pmid", DataType::Utf8, false),
        Field::new("url", DataType::Utf8, false),
        Field::new("doi", DataType::Utf8, true),
        // === Article ===
        Field::new("title", DataType::Utf8, true),
        Field::new("language", DataType::Utf8, true),
        Field::new("abstract_text", DataType::Utf8, true),
        Field::new("publication_date", DataType::Utf8, false),
        Field::new("publication_year", DataType::Utf8, false),
        Field::new("publication_types", list_utf8(), true),
        Field::new("sources", list_utf8(), true),
        Field::new("domains", list_utf8(), true),
        // === Journal ===
        Field::new("journal_title", DataType::Utf8, true),
        Field::new("issn_print", DataType::Utf8, true),
        Field::new("issn_electronic", DataType::Utf8, true),
        // === People (JSON) ===
        Field::new("authors_json", DataType::Utf8, true),
        Field::new("affiliations_json", DataType::Utf8, true),
        // === Indexing ===
        Field::new("keywords", list_utf8(), true),
        Field::new("mesh_headings", list_utf8(), true),
        Field::new("databank_json", DataType::Utf8, true),
        // === Funding ===
        Field::new("grants_json", DataType::Utf8, true),
        Field::new("has_grant", DataType::Boolean, false),
        Field::new("coi", DataType::Utf8, true),
        // === Enrichment ===
        Field::new("detected_countries", list_utf8(), true),
    ]))
});

fn list_utf8() -> DataType {
    DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
}

pub fn publications() -> &'static Schema {
    &PUBLICATIONS
}
