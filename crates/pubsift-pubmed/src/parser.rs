//! PubMed notice parser using quick-xml
//!
//! Maps one `<PubmedArticle>` element, as returned by efetch or split out of
//! a bulk file, onto a [`Publication`].

use anyhow::{Context, Result};
use pubsift_core::record::{Abstract, Accession, Affiliation, Author, Databank, ExternalId, Grant, Keyword};
use pubsift_core::Publication;
use pubsift_store::RawNotice;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const PUBMED_URL: &str = "https://www.ncbi.nlm.nih.gov/pubmed/";

/// Why a notice produced no publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Placeholder left by a failed fetch
    EmptyPayload,
    /// Well-formed XML without a `PubmedArticle`
    NoArticle,
    /// Article without `ArticleId[IdType=pubmed]`
    NoPubmedId,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPayload => write!(f, "empty payload"),
            Self::NoArticle => write!(f, "no PubmedArticle element"),
            Self::NoPubmedId => write!(f, "no pubmed article id"),
        }
    }
}

/// Result of parsing one notice.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Box<Publication>),
    Skipped { pmid: String, reason: SkipReason },
    /// Payload is not well-formed XML
    Fatal { pmid: String, error: String },
}

impl ParseOutcome {
    /// Whether the stored payload is a broken PubMed record, as opposed to
    /// missing or of another kind.
    pub fn is_malformed(&self) -> bool {
        match self {
            Self::Parsed(_) => false,
            Self::Skipped { reason, .. } => *reason == SkipReason::NoPubmedId,
            Self::Fatal { .. } => true,
        }
    }

    /// Identifier of the notice that was not parsed.
    pub fn skipped_pmid(&self) -> Option<&str> {
        match self {
            Self::Parsed(_) => None,
            Self::Skipped { pmid, .. } | Self::Fatal { pmid, .. } => Some(pmid),
        }
    }
}

/// Parse a stored notice.
pub fn parse_notice(notice: &RawNotice) -> ParseOutcome {
    let skipped = |reason| ParseOutcome::Skipped {
        pmid: notice.pmid.clone(),
        reason,
    };
    if notice.is_empty() {
        return skipped(SkipReason::EmptyPayload);
    }
    match read_draft(&notice.notice) {
        Ok(Some(draft)) => match draft.into_publication() {
            Some(publication) => ParseOutcome::Parsed(Box::new(publication)),
            None => skipped(SkipReason::NoPubmedId),
        },
        Ok(None) => skipped(SkipReason::NoArticle),
        Err(e) => ParseOutcome::Fatal {
            pmid: notice.pmid.clone(),
            error: format!("{e:#}"),
        },
    }
}

/// Text of the first `<PMID>` element, if any.
pub fn extract_pmid(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"PMID" => {
                let pmid = read_text(&mut reader).ok()?;
                let pmid = pmid.trim();
                return (!pmid.is_empty()).then(|| pmid.to_string());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

/// Publications and skipped identifiers of a batch of notices, in input order.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub publications: Vec<Publication>,
    pub skipped: Vec<String>,
}

/// Parse `notices` in order. Notices without an identifier are ignored.
///
/// With `stop_on_malformed`, the first malformed outcome is returned as the
/// error instead of being recorded as skipped.
pub fn parse_batch<'n>(
    notices: impl IntoIterator<Item = &'n RawNotice>,
    stop_on_malformed: bool,
) -> std::result::Result<ParsedBatch, ParseOutcome> {
    let mut batch = ParsedBatch::default();
    for notice in notices {
        if notice.pmid.is_empty() {
            continue;
        }
        match parse_notice(notice) {
            ParseOutcome::Parsed(publication) => batch.publications.push(*publication),
            outcome if stop_on_malformed && outcome.is_malformed() => return Err(outcome),
            ParseOutcome::Skipped { pmid, reason } => {
                log::debug!("pmid {pmid}: skipped, {reason}");
                batch.skipped.push(pmid);
            }
            ParseOutcome::Fatal { pmid, error } => {
                log::warn!("pmid {pmid}: unreadable notice: {error}");
                batch.skipped.push(pmid);
            }
        }
    }
    Ok(batch)
}

/// `Year`/`Month`/`Day` children of a date element.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct DateParts {
    year: String,
    month: String,
    day: String,
}

impl DateParts {
    /// `YYYY-MM-DD`, missing parts as `X` placeholders.
    fn format(&self) -> String {
        let or = |s: &str, width: usize, fill: &str| {
            if s.is_empty() {
                fill.repeat(width)
            } else {
                format!("{s:0>width$}")
            }
        };
        format!(
            "{}-{}-{}",
            or(&self.year, 4, "X"),
            or(&self.month, 2, "X"),
            or(&self.day, 2, "X")
        )
    }
}

/// Fields collected while walking one article.
#[derive(Debug, Default)]
struct Draft {
    pubmed_id: Option<String>,
    doi: Option<String>,
    elocation_doi: Option<String>,
    title: String,
    language: Option<String>,
    abstract_text: Option<String>,
    article_date: Option<DateParts>,
    entrez_date: Option<DateParts>,
    date_completed: Option<DateParts>,
    publication_types: Vec<String>,
    authors: Vec<Author>,
    affiliations: Vec<Affiliation>,
    keywords: Vec<String>,
    mesh_headings: Vec<String>,
    suppl_mesh: Vec<String>,
    databank: Vec<Databank>,
    grants: Vec<Grant>,
    coi: Option<String>,
    issn_print: Option<String>,
    issn_electronic: Option<String>,
    journal_title: Option<String>,
}

impl Draft {
    fn into_publication(self) -> Option<Publication> {
        let pmid = self.pubmed_id?.trim().to_string();
        if pmid.is_empty() {
            return None;
        }

        let language: String = self.language.unwrap_or_default().chars().take(2).collect();
        let is_comment_or_letter = self
            .publication_types
            .iter()
            .any(|t| matches!(t.to_lowercase().as_str(), "letter" | "comment"));
        let doi = self
            .doi
            .or(self.elocation_doi)
            .map(|d| d.trim().to_lowercase())
            .filter(|d| d.contains("10") && !is_comment_or_letter);

        let publication_date = [self.article_date, self.entrez_date, self.date_completed]
            .into_iter()
            .map(|d| d.unwrap_or_default().format())
            .find(|d| !d.starts_with("XXXX"))
            .unwrap_or_else(|| DateParts::default().format());
        let publication_year: String = publication_date.chars().take(4).collect();
        let mut mesh_headings = self.mesh_headings;
        mesh_headings.extend(self.suppl_mesh);

        let abstracts = self
            .abstract_text
            .map(|text| Abstract {
                text,
                lang: (!language.is_empty()).then(|| language.clone()),
            })
            .into_iter()
            .collect();

        Some(Publication {
            url: format!("{PUBMED_URL}{pmid}"),
            pmid,
            sources: vec!["pubmed".to_string()],
            domains: vec!["health".to_string()],
            doi,
            title: self.title,
            language,
            abstracts,
            publication_date,
            publication_year,
            publication_types: self.publication_types,
            authors: self.authors,
            affiliations: self.affiliations,
            keywords: self.keywords.into_iter().map(|keyword| Keyword { keyword }).collect(),
            mesh_headings,
            databank: self.databank,
            has_grant: !self.grants.is_empty(),
            grants: self.grants,
            coi: self.coi,
            issn_print: self.issn_print,
            issn_electronic: self.issn_electronic,
            journal_title: self.journal_title,
            detected_countries: Default::default(),
        })
    }
}

/// Walk the first `PubmedArticle` of `xml`.
fn read_draft(xml: &str) -> Result<Option<Draft>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"PubmedArticle" => {
                let mut draft = Draft::default();
                parse_article(&mut reader, &mut draft).context("XML parse error")?;
                return Ok(Some(draft));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(e).context("XML parse error"),
            _ => {}
        }
        buf.clear();
    }
}

fn parse_article(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"MedlineCitation" => parse_medline_citation(reader, draft)?,
                b"PubmedData" => parse_pubmed_data(reader, draft)?,
                other => skip_element(reader, other)?,
            },
            Event::End(e) if e.name().as_ref() == b"PubmedArticle" => break,
            Event::Eof => anyhow::bail!("unexpected end of document inside PubmedArticle"),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_medline_citation(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"DateCompleted" => draft.date_completed = Some(read_date(reader, b"DateCompleted")?),
                b"Article" => parse_article_element(reader, draft)?,
                b"MeshHeadingList" => parse_mesh_list(reader, draft)?,
                b"SupplMeshList" => parse_suppl_mesh_list(reader, draft)?,
                b"KeywordList" => parse_keyword_list(reader, draft)?,
                b"CoiStatement" => draft.coi = Some(read_text_content(reader, b"CoiStatement")?),
                other => skip_element(reader, other)?,
            },
            Event::End(e) if e.name().as_ref() == b"MedlineCitation" => break,
            Event::Eof => anyhow::bail!("unexpected end of document inside MedlineCitation"),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_article_element(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Journal" => parse_journal(reader, draft)?,
                b"ArticleTitle" => draft.title = read_text_content(reader, b"ArticleTitle")?,
                b"ELocationID" => {
                    let is_doi = attr(&e, b"EIdType").as_deref() == Some("doi");
                    let value = read_text(reader)?;
                    if is_doi && draft.elocation_doi.is_none() {
                        draft.elocation_doi = Some(value);
                    }
                }
                b"Language" => {
                    let value = read_text(reader)?;
                    draft.language.get_or_insert(value);
                }
                b"Abstract" => parse_abstract(reader, draft)?,
                b"AuthorList" => parse_author_list(reader, draft)?,
                b"GrantList" => parse_grant_list(reader, draft)?,
                b"PublicationTypeList" => parse_pub_type_list(reader, draft)?,
                b"DataBankList" => parse_databank_list(reader, draft)?,
                b"ArticleDate" => {
                    let date = read_date(reader, b"ArticleDate")?;
                    draft.article_date.get_or_insert(date);
                }
                other => skip_element(reader, other)?,
            },
            Event::End(e) if e.name().as_ref() == b"Article" => break,
            Event::Eof => anyhow::bail!("unexpected end of document inside Article"),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_journal(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"ISSN" => {
                    let issn_type = attr(&e, b"IssnType");
                    let value = read_text(reader)?;
                    match issn_type.as_deref() {
                        Some("Print") => draft.issn_print = Some(value),
                        Some("Electronic") => draft.issn_electronic = Some(value),
                        _ => {}
                    }
                }
                b"Title" => {
                    let value = read_text_content(reader, b"Title")?;
                    draft.journal_title.get_or_insert(value);
                }
                other => skip_element(reader, other)?,
            },
            Event::End(e) if e.name().as_ref() == b"Journal" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Keep the first `AbstractText` only.
fn parse_abstract(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"AbstractText" => {
                let text = read_text_content(reader, b"AbstractText")?;
                draft.abstract_text.get_or_insert(text);
            }
            Event::Start(e) => skip_element(reader, e.name().as_ref())?,
            Event::End(e) if e.name().as_ref() == b"Abstract" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_author_list(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"Author" => {
                let position = draft.authors.len() as u32 + 1;
                let author = parse_author(reader, position, &mut draft.affiliations)?;
                draft.authors.push(author);
            }
            Event::End(e) if e.name().as_ref() == b"AuthorList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Parse one author; new affiliations are also added to `all_affiliations`.
fn parse_author(
    reader: &mut Reader<&[u8]>,
    position: u32,
    all_affiliations: &mut Vec<Affiliation>,
) -> Result<Author> {
    let mut author = Author {
        author_position: position,
        ..Default::default()
    };
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"LastName" => author.last_name = Some(read_text(reader)?),
                b"ForeName" => author.first_name = Some(read_text(reader)?),
                b"Identifier" => {
                    let source = attr(&e, b"Source").unwrap_or_default();
                    let value = read_text(reader)?;
                    if source.eq_ignore_ascii_case("orcid") {
                        if let Some(orcid) = normalize_orcid(&value) {
                            author.orcid = Some(orcid);
                        }
                    }
                    author.external_ids.push(ExternalId {
                        id_type: source.to_lowercase(),
                        id_value: value,
                    });
                }
                b"AffiliationInfo" => {
                    let affiliation = parse_affiliation_info(reader)?;
                    if !all_affiliations.contains(&affiliation) {
                        all_affiliations.push(affiliation.clone());
                    }
                    author.affiliations.push(affiliation);
                }
                other => skip_element(reader, other)?,
            },
            Event::End(e) if e.name().as_ref() == b"Author" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let first = author.first_name.as_deref().unwrap_or_default();
    let last = author.last_name.as_deref().unwrap_or_default();
    author.full_name = format!("{first} {last}").trim().to_string();
    Ok(author)
}

fn parse_affiliation_info(reader: &mut Reader<&[u8]>) -> Result<Affiliation> {
    let mut affiliation = Affiliation::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Affiliation" => affiliation.name = Some(read_text_content(reader, b"Affiliation")?),
                b"Identifier" => {
                    let source = attr(&e, b"Source").unwrap_or_default();
                    affiliation.external_ids.push(ExternalId {
                        id_type: source,
                        id_value: read_text(reader)?,
                    });
                }
                other => skip_element(reader, other)?,
            },
            Event::End(e) if e.name().as_ref() == b"AffiliationInfo" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(affiliation)
}

/// `descriptor__qualifier` for each heading (first qualifier only).
fn parse_mesh_list(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();
    let mut heading: Option<(String, Option<String>)> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"MeshHeading" => heading = Some((String::new(), None)),
                b"DescriptorName" => {
                    let text = read_text(reader)?;
                    if let Some((descriptor, _)) = heading.as_mut() {
                        *descriptor = text;
                    }
                }
                b"QualifierName" => {
                    let text = read_text(reader)?;
                    if let Some((_, qualifier)) = heading.as_mut() {
                        qualifier.get_or_insert(text);
                    }
                }
                other => skip_element(reader, other)?,
            },
            Event::End(e) if e.name().as_ref() == b"MeshHeading" => {
                if let Some((mut mesh, qualifier)) = heading.take() {
                    if let Some(qualifier) = qualifier {
                        mesh.push_str("__");
                        mesh.push_str(&qualifier);
                    }
                    if !mesh.is_empty() {
                        draft.mesh_headings.push(mesh);
                    }
                }
            }
            Event::End(e) if e.name().as_ref() == b"MeshHeadingList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_suppl_mesh_list(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"SupplMeshName" => {
                let name = read_text(reader)?;
                if !name.is_empty() {
                    draft.suppl_mesh.push(name);
                }
            }
            Event::End(e) if e.name().as_ref() == b"SupplMeshList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_keyword_list(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"Keyword" => {
                draft.keywords.push(read_text_content(reader, b"Keyword")?);
            }
            Event::End(e) if e.name().as_ref() == b"KeywordList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_grant_list(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"Grant" => {
                draft.grants.push(parse_grant(reader)?);
            }
            Event::End(e) if e.name().as_ref() == b"GrantList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_grant(reader: &mut Reader<&[u8]>) -> Result<Grant> {
    let mut grant = Grant::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"GrantID" => grant.grantid = Some(read_text(reader)?),
                b"Agency" => grant.agency = Some(read_text(reader)?),
                b"Country" => grant.country = Some(read_text(reader)?),
                other => skip_element(reader, other)?,
            },
            Event::End(e) if e.name().as_ref() == b"Grant" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(grant)
}

fn parse_pub_type_list(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"PublicationType" => {
                draft.publication_types.push(read_text(reader)?);
            }
            Event::End(e) if e.name().as_ref() == b"PublicationTypeList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_databank_list(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"DataBank" => {
                draft.databank.push(parse_databank(reader)?);
            }
            Event::End(e) if e.name().as_ref() == b"DataBankList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_databank(reader: &mut Reader<&[u8]>) -> Result<Databank> {
    let mut databank = Databank::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"DataBankName" => databank.name = Some(read_text(reader)?),
                b"AccessionNumber" => databank.accession_numbers.push(Accession {
                    accession_number: read_text(reader)?,
                }),
                // descend
                b"AccessionNumberList" => {}
                other => skip_element(reader, other)?,
            },
            Event::End(e) if e.name().as_ref() == b"DataBank" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(databank)
}

fn parse_pubmed_data(reader: &mut Reader<&[u8]>, draft: &mut Draft) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"History" | b"ArticleIdList" => {}
                b"PubMedPubDate" => {
                    let is_entrez = attr(&e, b"PubStatus").as_deref() == Some("entrez");
                    let date = read_date(reader, b"PubMedPubDate")?;
                    if is_entrez && draft.entrez_date.is_none() {
                        draft.entrez_date = Some(date);
                    }
                }
                b"ArticleId" => {
                    let id_type = attr(&e, b"IdType").unwrap_or_default();
                    let value = read_text(reader)?;
                    match id_type.as_str() {
                        "pubmed" => {
                            draft.pubmed_id.get_or_insert(value);
                        }
                        "doi" => {
                            draft.doi.get_or_insert(value);
                        }
                        _ => {}
                    }
                }
                other => skip_element(reader, other)?,
            },
            Event::End(e) if e.name().as_ref() == b"PubmedData" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Value of attribute `name` on `e`, unescaped.
fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Keep a 19-character ORCID as is; hyphenate a bare 16-character one.
fn normalize_orcid(raw: &str) -> Option<String> {
    raw.split('/').map(str::trim).find_map(|part| {
        let chars: Vec<char> = part.chars().collect();
        match chars.len() {
            19 => Some(part.to_string()),
            16 => Some(
                chars
                    .chunks(4)
                    .map(|c| c.iter().collect::<String>())
                    .collect::<Vec<_>>()
                    .join("-"),
            ),
            _ => None,
        }
    })
}

/// Skip an element and all its children
fn skip_element(reader: &mut Reader<&[u8]>, end_tag: &[u8]) -> Result<()> {
    let mut buf = Vec::new();
    let mut depth = 1;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                depth -= 1;
                if depth == 0 && e.name().as_ref() == end_tag {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Read text content until next end tag
fn read_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::End(_) => break,
            Event::Start(_) => text.push_str(&read_text(reader)?),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(text)
}

/// Read text content of a specific element, handling nested tags
fn read_text_content(reader: &mut Reader<&[u8]>, end_tag: &[u8]) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut depth = 1;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&e.unescape()?);
            }
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                depth -= 1;
                if depth == 0 && e.name().as_ref() == end_tag {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(text)
}

fn read_date(reader: &mut Reader<&[u8]>, end_tag: &[u8]) -> Result<DateParts> {
    let mut buf = Vec::new();
    let mut date = DateParts::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Year" => date.year = read_text(reader)?.trim().to_string(),
                b"Month" => date.month = read_text(reader)?.trim().to_string(),
                b"Day" => date.day = read_text(reader)?.trim().to_string(),
                other => skip_element(reader, other)?,
            },
            Event::End(e) if e.name().as_ref() == end_tag => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(date)
}
