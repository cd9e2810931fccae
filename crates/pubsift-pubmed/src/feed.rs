//! Incremental PubMed feed (NCBI E-utilities)
//!
//! `esearch` lists the identifiers of one Entrez-date partition, optionally
//! restricted to records modified since a given day; `efetch` returns the
//! XML of one record.

use std::time::Duration;

use chrono::NaiveDate;
use pubsift_core::{Retryable, StreamError, http_client, send_text};
use quick_xml::Reader;
use quick_xml::events::Event;

pub const EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Body fragments that mean efetch did not return a usable record.
const ERROR_MARKERS: [&str; 4] = [
    "<ERROR>",
    "API rate limit exceeded",
    "server error, please contact",
    "proxy server could not handle the request",
];

#[derive(Debug)]
pub enum FeedError {
    Stream(StreamError),
    /// Upstream answered with an error body
    Upstream(String),
    /// Response could not be read
    Protocol(String),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(e) => write!(f, "{e}"),
            Self::Upstream(msg) => write!(f, "upstream error: {msg}"),
            Self::Protocol(msg) => write!(f, "unexpected response: {msg}"),
        }
    }
}

impl std::error::Error for FeedError {}

impl From<StreamError> for FeedError {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}

impl Retryable for FeedError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Stream(e) => e.is_retryable(),
            Self::Upstream(_) => true,
            Self::Protocol(_) => false,
        }
    }
}

/// Query window of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    /// Entrez date of the partition
    pub partition: NaiveDate,
    /// Only records modified on or after this day
    pub modified_since: Option<NaiveDate>,
}

impl SearchWindow {
    /// esearch `term`, e.g.
    /// `(("2021/04/26"[EDat] : "2021/04/26"[EDat]) AND ("2021/05/01"[LR] : "3000"[LR]))`.
    pub fn term(&self) -> String {
        let day = self.partition.format("%Y/%m/%d");
        let mut term = format!("((\"{day}\"[EDat] : \"{day}\"[EDat])");
        if let Some(since) = self.modified_since {
            term.push_str(&format!(" AND (\"{}\"[LR] : \"3000\"[LR])", since.format("%Y/%m/%d")));
        }
        term.push(')');
        term
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    /// Total hits of the query, across pages
    pub count: usize,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Notice(String),
    /// Upstream no longer knows the identifier
    Deleted,
}

pub trait NoticeFeed: Send + Sync {
    fn search(&self, window: &SearchWindow, start: usize, page_size: usize) -> Result<SearchPage, FeedError>;

    fn fetch(&self, pmid: &str, timeout: Duration) -> Result<FetchOutcome, FeedError>;
}

impl<F: NoticeFeed + ?Sized> NoticeFeed for &F {
    fn search(&self, window: &SearchWindow, start: usize, page_size: usize) -> Result<SearchPage, FeedError> {
        (**self).search(window, start, page_size)
    }

    fn fetch(&self, pmid: &str, timeout: Duration) -> Result<FetchOutcome, FeedError> {
        (**self).fetch(pmid, timeout)
    }
}

/// E-utilities client.
#[derive(Debug, Clone)]
pub struct EutilsFeed {
    base_url: String,
    api_key: Option<String>,
    search_timeout: Duration,
}

impl EutilsFeed {
    pub fn new(base_url: &str, api_key: Option<String>, search_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            search_timeout,
        }
    }

    fn get(&self, endpoint: &str, query: &[(&str, String)]) -> reqwest::RequestBuilder {
        let mut request = http_client()
            .get(format!("{}/{endpoint}", self.base_url))
            .query(query);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key)]);
        }
        request
    }
}

impl NoticeFeed for EutilsFeed {
    fn search(&self, window: &SearchWindow, start: usize, page_size: usize) -> Result<SearchPage, FeedError> {
        let request = self.get(
            "esearch.fcgi",
            &[
                ("db", "pubmed".to_string()),
                ("term", window.term()),
                ("retmax", page_size.to_string()),
                ("retstart", start.to_string()),
            ],
        );
        let body = send_text(request, self.search_timeout)?;
        parse_search_response(&body)
    }

    fn fetch(&self, pmid: &str, timeout: Duration) -> Result<FetchOutcome, FeedError> {
        let request = self.get(
            "efetch.fcgi",
            &[
                ("db", "pubmed".to_string()),
                ("id", pmid.to_string()),
                ("rettype", "xml".to_string()),
            ],
        );
        let body = send_text(request, timeout)?;
        classify_fetch(body)
    }
}

/// Read `Count` and `IdList/Id` from an esearch response.
pub fn parse_search_response(xml: &str) -> Result<SearchPage, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut page = SearchPage::default();
    let mut count = None;
    let mut depth = 0usize;
    let mut in_id_list = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                match e.name().as_ref() {
                    // Only the top-level Count; TranslationStack repeats it per term
                    b"Count" if depth == 2 && count.is_none() => {
                        let text = read_text(&mut reader)?;
                        depth -= 1;
                        let n: usize = text
                            .trim()
                            .parse()
                            .map_err(|_| FeedError::Protocol(format!("bad Count {text:?}")))?;
                        count = Some(n);
                    }
                    b"IdList" => in_id_list = true,
                    b"Id" if in_id_list => {
                        let id = read_text(&mut reader)?;
                        depth -= 1;
                        page.ids.push(id.trim().to_string());
                    }
                    b"ERROR" => {
                        let msg = read_text(&mut reader)?;
                        return Err(FeedError::Upstream(msg));
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                depth = depth.saturating_sub(1);
                if e.name().as_ref() == b"IdList" {
                    in_id_list = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FeedError::Protocol(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    page.count = count.ok_or_else(|| FeedError::Protocol("no Count in esearch response".into()))?;
    Ok(page)
}

/// Decide what an efetch body means.
pub fn classify_fetch(body: String) -> Result<FetchOutcome, FeedError> {
    if let Some(marker) = ERROR_MARKERS.iter().find(|m| body.contains(*m)) {
        return Err(FeedError::Upstream(marker.to_string()));
    }
    let has_record = ["<PubmedArticle>", "<PubmedArticle ", "<PubmedBookArticle"]
        .iter()
        .any(|tag| body.contains(tag));
    if has_record {
        return Ok(FetchOutcome::Notice(body));
    }
    if body.contains("<PubmedArticleSet") {
        return Ok(FetchOutcome::Deleted);
    }
    Err(FeedError::Protocol("response is not a PubmedArticleSet".into()))
}

fn read_text(reader: &mut Reader<&[u8]>) -> Result<String, FeedError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(e)) => {
                let unescaped = e.unescape().map_err(|e| FeedError::Protocol(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::End(_)) | Ok(Event::Eof) => break,
            Err(e) => return Err(FeedError::Protocol(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}
