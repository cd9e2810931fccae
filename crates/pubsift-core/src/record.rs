//! Canonical publication record produced by the notice parser.
//!
//! Field names match the JSON documents loaded into the document store, so
//! the structs serialize directly with serde. Empty optional fields are
//! omitted from the output.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Country codes attached to an affiliation or publication (sorted, unique).
pub type CountrySet = BTreeSet<String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalId {
    pub id_type: String,
    pub id_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_ids: Vec<ExternalId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub detected_countries: CountrySet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub author_position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_ids: Vec<ExternalId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affiliations: Vec<Affiliation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abstract {
    #[serde(rename = "abstract")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub keyword: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accession {
    pub accession_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Databank {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub accession_numbers: Vec<Accession>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grantid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub pmid: String,
    pub url: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub language: String,
    #[serde(default, rename = "abstract", skip_serializing_if = "Vec::is_empty")]
    pub abstracts: Vec<Abstract>,
    pub publication_date: String,
    pub publication_year: String,
    #[serde(default)]
    pub publication_types: Vec<String>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub affiliations: Vec<Affiliation>,
    #[serde(default)]
    pub keywords: Vec<Keyword>,
    #[serde(default)]
    pub mesh_headings: Vec<String>,
    #[serde(default)]
    pub databank: Vec<Databank>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<Grant>,
    #[serde(default)]
    pub has_grant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn_print: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn_electronic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_title: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub detected_countries: CountrySet,
}

/// Reason a parsed record does not have the shape downstream loaders expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingPmid,
    MissingUrl,
    BadDate(String),
    AuthorPosition { expected: u32, found: u32 },
    BadCountryCode(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPmid => write!(f, "missing pmid"),
            Self::MissingUrl => write!(f, "missing url"),
            Self::BadDate(d) => write!(f, "publication_date {d:?} is not YYYY-MM-DD"),
            Self::AuthorPosition { expected, found } => {
                write!(f, "author position {found}, expected {expected}")
            }
            Self::BadCountryCode(c) => write!(f, "country code {c:?} is not two lowercase letters"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl Publication {
    /// Check the structural invariants of a parsed record.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pmid.trim().is_empty() {
            return Err(ValidationError::MissingPmid);
        }
        if self.url.trim().is_empty() {
            return Err(ValidationError::MissingUrl);
        }
        if !is_partial_date(&self.publication_date) {
            return Err(ValidationError::BadDate(self.publication_date.clone()));
        }
        for (i, author) in self.authors.iter().enumerate() {
            let expected = i as u32 + 1;
            if author.author_position != expected {
                return Err(ValidationError::AuthorPosition {
                    expected,
                    found: author.author_position,
                });
            }
        }
        let author_affiliations = self.authors.iter().flat_map(|a| a.affiliations.iter());
        let codes = self
            .detected_countries
            .iter()
            .chain(self.affiliations.iter().flat_map(|a| &a.detected_countries))
            .chain(author_affiliations.flat_map(|a| &a.detected_countries));
        for code in codes {
            if !is_country_code(code) {
                return Err(ValidationError::BadCountryCode(code.clone()));
            }
        }
        Ok(())
    }

    /// Every affiliation name on the record, publication-level first.
    pub fn affiliation_names(&self) -> impl Iterator<Item = &str> {
        self.affiliations
            .iter()
            .chain(self.authors.iter().flat_map(|a| a.affiliations.iter()))
            .filter_map(|a| a.name.as_deref())
    }
}

/// `YYYY-MM-DD` where any digit may be an `X` placeholder.
fn is_partial_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, &b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit() || b == b'X',
        })
}

fn is_country_code(s: &str) -> bool {
    s.len() == 2 && s.bytes().all(|b| b.is_ascii_lowercase())
}
