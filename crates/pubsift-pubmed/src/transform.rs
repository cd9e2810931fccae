//! Publications to Arrow RecordBatches

use std::sync::Arc;

use arrow::array::*;
use arrow::datatypes::Schema;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use pubsift_core::Publication;
use serde::Serialize;

use crate::schema;

pub const BATCH_SIZE: usize = 10_000;

/// Column buffers for [`schema::publications`].
pub struct PublicationAccumulator {
    schema: &'static Schema,
    pmid: Vec<String>,
    url: Vec<String>,
    doi: Vec<Option<String>>,
    title: Vec<Option<String>>,
    language: Vec<Option<String>>,
    abstract_text: Vec<Option<String>>,
    publication_date: Vec<String>,
    publication_year: Vec<String>,
    publication_types: Vec<Option<Vec<Option<String>>>>,
    sources: Vec<Option<Vec<Option<String>>>>,
    domains: Vec<Option<Vec<Option<String>>>>,
    journal_title: Vec<Option<String>>,
    issn_print: Vec<Option<String>>,
    issn_electronic: Vec<Option<String>>,
    authors_json: Vec<Option<String>>,
    affiliations_json: Vec<Option<String>>,
    keywords: Vec<Option<Vec<Option<String>>>>,
    mesh_headings: Vec<Option<Vec<Option<String>>>>,
    databank_json: Vec<Option<String>>,
    grants_json: Vec<Option<String>>,
    has_grant: Vec<bool>,
    coi: Vec<Option<String>>,
    detected_countries: Vec<Option<Vec<Option<String>>>>,
}

impl PublicationAccumulator {
    pub fn new() -> Self {
        Self {
            schema: schema::publications(),
            pmid: Vec::with_capacity(BATCH_SIZE),
            url: Vec::with_capacity(BATCH_SIZE),
            doi: Vec::with_capacity(BATCH_SIZE),
            title: Vec::with_capacity(BATCH_SIZE),
            language: Vec::with_capacity(BATCH_SIZE),
            abstract_text: Vec::with_capacity(BATCH_SIZE),
            publication_date: Vec::with_capacity(BATCH_SIZE),
            publication_year: Vec::with_capacity(BATCH_SIZE),
            publication_types: Vec::with_capacity(BATCH_SIZE),
            sources: Vec::with_capacity(BATCH_SIZE),
            domains: Vec::with_capacity(BATCH_SIZE),
            journal_title: Vec::with_capacity(BATCH_SIZE),
            issn_print: Vec::with_capacity(BATCH_SIZE),
            issn_electronic: Vec::with_capacity(BATCH_SIZE),
            authors_json: Vec::with_capacity(BATCH_SIZE),
            affiliations_json: Vec::with_capacity(BATCH_SIZE),
            keywords: Vec::with_capacity(BATCH_SIZE),
            mesh_headings: Vec::with_capacity(BATCH_SIZE),
            databank_json: Vec::with_capacity(BATCH_SIZE),
            grants_json: Vec::with_capacity(BATCH_SIZE),
            has_grant: Vec::with_capacity(BATCH_SIZE),
            coi: Vec::with_capacity(BATCH_SIZE),
            detected_countries: Vec::with_capacity(BATCH_SIZE),
        }
    }

    pub fn push(&mut self, p: Publication) {
        self.authors_json.push(to_json(&p.authors));
        self.affiliations_json.push(to_json(&p.affiliations));
        self.databank_json.push(to_json(&p.databank));
        self.grants_json.push(to_json(&p.grants));
        self.keywords
            .push(string_list(p.keywords.into_iter().map(|k| k.keyword)));
        self.detected_countries
            .push(string_list(p.detected_countries));

        self.pmid.push(p.pmid);
        self.url.push(p.url);
        self.doi.push(p.doi);
        self.title.push(non_empty(p.title));
        self.language.push(non_empty(p.language));
        self.abstract_text
            .push(p.abstracts.into_iter().next().map(|a| a.text));
        self.publication_date.push(p.publication_date);
        self.publication_year.push(p.publication_year);
        self.publication_types.push(string_list(p.publication_types));
        self.sources.push(string_list(p.sources));
        self.domains.push(string_list(p.domains));
        self.journal_title.push(p.journal_title);
        self.issn_print.push(p.issn_print);
        self.issn_electronic.push(p.issn_electronic);
        self.mesh_headings.push(string_list(p.mesh_headings));
        self.has_grant.push(p.has_grant);
        self.coi.push(p.coi);
    }

    pub fn len(&self) -> usize {
        self.pmid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pmid.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= BATCH_SIZE
    }

    pub fn take_batch(&mut self) -> Result<RecordBatch, ArrowError> {
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(std::mem::take(&mut self.pmid))),
            Arc::new(StringArray::from(std::mem::take(&mut self.url))),
            Arc::new(StringArray::from(std::mem::take(&mut self.doi))),
            Arc::new(StringArray::from(std::mem::take(&mut self.title))),
            Arc::new(StringArray::from(std::mem::take(&mut self.language))),
            Arc::new(StringArray::from(std::mem::take(&mut self.abstract_text))),
            Arc::new(StringArray::from(std::mem::take(&mut self.publication_date))),
            Arc::new(StringArray::from(std::mem::take(&mut self.publication_year))),
            build_list_string_array(std::mem::take(&mut self.publication_types)),
            build_list_string_array(std::mem::take(&mut self.sources)),
            build_list_string_array(std::mem::take(&mut self.domains)),
            Arc::new(StringArray::from(std::mem::take(&mut self.journal_title))),
            Arc::new(StringArray::from(std::mem::take(&mut self.issn_print))),
            Arc::new(StringArray::from(std::mem::take(&mut self.issn_electronic))),
            Arc::new(StringArray::from(std::mem::take(&mut self.authors_json))),
            Arc::new(StringArray::from(std::mem::take(&mut self.affiliations_json))),
            build_list_string_array(std::mem::take(&mut self.keywords)),
            build_list_string_array(std::mem::take(&mut self.mesh_headings)),
            Arc::new(StringArray::from(std::mem::take(&mut self.databank_json))),
            Arc::new(StringArray::from(std::mem::take(&mut self.grants_json))),
            Arc::new(BooleanArray::from(std::mem::take(&mut self.has_grant))),
            Arc::new(StringArray::from(std::mem::take(&mut self.coi))),
            build_list_string_array(std::mem::take(&mut self.detected_countries)),
        ];

        RecordBatch::try_new(Arc::new(self.schema.clone()), arrays)
    }
}

impl Default for PublicationAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// JSON array text, `None` when empty.
fn to_json<T: Serialize>(items: &[T]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    serde_json::to_string(items).ok()
}

fn string_list(items: impl IntoIterator<Item = String>) -> Option<Vec<Option<String>>> {
    let items: Vec<Option<String>> = items.into_iter().map(Some).collect();
    (!items.is_empty()).then_some(items)
}

/// Build List<Utf8> array from Vec<Option<Vec<Option<String>>>>
fn build_list_string_array(data: Vec<Option<Vec<Option<String>>>>) -> ArrayRef {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for row in &data {
        match row {
            Some(items) => {
                for item in items {
                    match item {
                        Some(s) => builder.values().append_value(s),
                        None => builder.values().append_null(),
                    }
                }
                builder.append(true);
            }
            None => builder.append(false),
        }
    }
    Arc::new(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubsift_core::record::{Abstract, Author, Grant, Keyword};

    fn publication(pmid: &str) -> Publication {
        Publication {
            pmid: pmid.to_string(),
            url: format!("https://www.ncbi.nlm.nih.gov/pubmed/{pmid}"),
            sources: vec!["pubmed".into()],
            domains: vec!["health".into()],
            publication_date: "2020-03-XX".into(),
            publication_year: "2020".into(),
            ..Default::default()
        }
    }

    #[test]
    fn accumulator_basic() {
        let mut acc = PublicationAccumulator::new();
        assert!(acc.is_empty());

        acc.push(publication("1"));
        assert_eq!(acc.len(), 1);

        let batch = acc.take_batch().unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.num_columns(), schema::publications().fields().len());
        assert!(acc.is_empty());
    }

    #[test]
    fn nested_fields_become_json() {
        let mut p = publication("2");
        p.title = "Title".into();
        p.abstracts = vec![Abstract {
            text: "Text".into(),
            lang: None,
        }];
        p.authors = vec![Author {
            author_position: 1,
            full_name: "Ada Lovelace".into(),
            ..Default::default()
        }];
        p.grants = vec![Grant {
            grantid: Some("G1".into()),
            ..Default::default()
        }];
        p.has_grant = true;
        p.keywords = vec![Keyword { keyword: "ticks".into() }];
        p.detected_countries = ["fr".to_string()].into();

        let mut acc = PublicationAccumulator::new();
        acc.push(p);
        let batch = acc.take_batch().unwrap();

        let authors = batch
            .column_by_name("authors_json")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert!(authors.value(0).contains("Ada Lovelace"));

        let affiliations = batch.column_by_name("affiliations_json").unwrap();
        assert!(affiliations.is_null(0));

        let countries = batch
            .column_by_name("detected_countries")
            .unwrap()
            .as_any()
            .downcast_ref::<ListArray>()
            .unwrap();
        assert_eq!(countries.value(0).len(), 1);

        let abstracts = batch
            .column_by_name("abstract_text")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(abstracts.value(0), "Text");
    }

    #[test]
    fn empty_lists_are_null() {
        let mut acc = PublicationAccumulator::new();
        let mut p = publication("3");
        p.sources.clear();
        acc.push(p);
        let batch = acc.take_batch().unwrap();
        assert!(batch.column_by_name("sources").unwrap().is_null(0));
        assert!(!batch.column_by_name("domains").unwrap().is_null(0));
    }

    #[test]
    fn build_list_string_array_with_nulls() {
        let arr = build_list_string_array(vec![Some(vec![Some("a".into()), None]), None]);
        assert_eq!(arr.len(), 2);
        assert!(arr.is_null(1));
    }
}
