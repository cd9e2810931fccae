#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use pubsift_core::record::CountrySet;
use pubsift_core::{Publication, RetryPolicy};
use pubsift_geo::matcher::{EnrichResult, Strategy};
use pubsift_geo::{CountryMatcher, MatcherError, TaskState};
use pubsift_pubmed::{
    BulkDump, BulkFile, BulkSource, FeedError, FetchOutcome, HarvestConfig, NoticeFeed, SearchPage,
    SearchWindow,
};
use rustc_hash::FxHashMap;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Minimal efetch body for one article with a single affiliated author.
pub fn article(pmid: &str, affiliation: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<PubmedArticleSet><PubmedArticle><MedlineCitation Status="MEDLINE" Owner="NLM"><PMID Version="1">{pmid}</PMID>
<Article PubModel="Print"><ArticleTitle>Study {pmid}</ArticleTitle>
<AuthorList CompleteYN="Y"><Author ValidYN="Y"><LastName>Martin</LastName><ForeName>Claire</ForeName>
<AffiliationInfo><Affiliation>{affiliation}</Affiliation></AffiliationInfo></Author></AuthorList>
<Language>eng</Language>
<PublicationTypeList><PublicationType UI="D016428">Journal Article</PublicationType></PublicationTypeList>
</Article></MedlineCitation>
<PubmedData><History><PubMedPubDate PubStatus="entrez"><Year>2021</Year><Month>4</Month><Day>26</Day></PubMedPubDate></History>
<ArticleIdList><ArticleId IdType="pubmed">{pmid}</ArticleId></ArticleIdList></PubmedData></PubmedArticle></PubmedArticleSet>"#
    )
}

/// Same article without its pubmed `ArticleId`, which the parser rejects.
pub fn malformed_article(pmid: &str) -> String {
    article(pmid, "Somewhere").replace(&format!(r#"<ArticleId IdType="pubmed">{pmid}</ArticleId>"#), "")
}

/// No pauses, no search retries, small pages.
pub fn harvest_config() -> HarvestConfig {
    HarvestConfig {
        page_size: 2,
        request_delay: Duration::ZERO,
        retry_wait: Duration::ZERO,
        search_retry: RetryPolicy::immediate(0),
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Notice(String),
    Deleted,
    Fail,
}

/// Feed answering from a fixed table.
///
/// An identifier is returned by the search when it was modified on or after
/// the window's `modified_since`.
#[derive(Default)]
pub struct ScriptedFeed {
    modified: Mutex<Vec<(String, NaiveDate)>>,
    replies: Mutex<FxHashMap<String, Reply>>,
    pub fetches: Mutex<Vec<String>>,
    pub windows: Mutex<Vec<SearchWindow>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, pmid: &str, modified: NaiveDate, reply: Reply) {
        self.modified.lock().unwrap().push((pmid.to_string(), modified));
        self.replies.lock().unwrap().insert(pmid.to_string(), reply);
    }

    pub fn reply(&self, pmid: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(pmid.to_string(), reply);
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

impl NoticeFeed for ScriptedFeed {
    fn search(&self, window: &SearchWindow, start: usize, page_size: usize) -> Result<SearchPage, FeedError> {
        self.windows.lock().unwrap().push(*window);
        let ids: Vec<String> = self
            .modified
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, at)| window.modified_since.map_or(true, |since| *at >= since))
            .map(|(pmid, _)| pmid.clone())
            .collect();
        Ok(SearchPage {
            count: ids.len(),
            ids: ids.into_iter().skip(start).take(page_size).collect(),
        })
    }

    fn fetch(&self, pmid: &str, _timeout: Duration) -> Result<FetchOutcome, FeedError> {
        self.fetches.lock().unwrap().push(pmid.to_string());
        match self.replies.lock().unwrap().get(pmid) {
            Some(Reply::Notice(xml)) => Ok(FetchOutcome::Notice(xml.clone())),
            Some(Reply::Deleted) => Ok(FetchOutcome::Deleted),
            Some(Reply::Fail) | None => Err(FeedError::Upstream("scripted failure".into())),
        }
    }
}

/// Bulk source serving prepared dumps.
#[derive(Default)]
pub struct FakeBulk {
    files: Vec<BulkFile>,
    dumps: FxHashMap<String, BulkDump>,
    pub downloads: Mutex<Vec<String>>,
}

impl FakeBulk {
    /// `files` newest first.
    pub fn new(files: Vec<(&str, BulkDump)>) -> Self {
        let mut bulk = Self::default();
        for (key, dump) in files {
            bulk.files
                .push(BulkFile::from_url(format!("https://example.org/pubmed/{key}.xml.gz")));
            bulk.dumps.insert(key.to_string(), dump);
        }
        bulk
    }

    /// List `key` after the current files, with a download that always fails.
    pub fn unreachable(mut self, key: &str) -> Self {
        self.files
            .push(BulkFile::from_url(format!("https://example.org/pubmed/{key}.xml.gz")));
        self
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

impl BulkSource for FakeBulk {
    fn list_files(&self) -> Result<Vec<BulkFile>> {
        Ok(self.files.clone())
    }

    fn download(&self, file: &BulkFile) -> Result<BulkDump> {
        self.downloads.lock().unwrap().push(file.key.clone());
        self.dumps
            .get(&file.key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no dump for {}", file.key))
    }
}

/// Paris is France, Guadeloupe is gp, anything else is the US.
#[derive(Default)]
pub struct CityMatcher;

impl CountryMatcher for CityMatcher {
    fn probe(&self) -> bool {
        true
    }

    fn warm_up(&self) -> Result<(), MatcherError> {
        Ok(())
    }

    fn match_countries(&self, query: &str, _strategies: &[Strategy]) -> Result<CountrySet, MatcherError> {
        let code = if query.contains("Paris") {
            "fr"
        } else if query.contains("Guadeloupe") {
            "gp"
        } else {
            "us"
        };
        Ok([code.to_string()].into())
    }

    fn submit_enrich(&self, _: &[Publication], _: &[String]) -> Result<String, MatcherError> {
        Err(MatcherError::Protocol("not used".into()))
    }

    fn task_status(&self, _: &str) -> Result<TaskState, MatcherError> {
        Ok(TaskState::Finished(Box::new(EnrichResult::default())))
    }
}
