//! MEDLINE bulk files (baseline and daily updates) from the NCBI FTP mirror
//!
//! The directory listings are plain HTML; each `pubmed*.xml.gz` file holds
//! a `PubmedArticleSet` of articles plus, for update files, a
//! `DeleteCitation` list of identifiers removed upstream.

use std::time::Duration;

use anyhow::{Context, Result};
use pubsift_core::{RetryPolicy, download_gzip_text, http_client, retry_with_backoff, send_text};
use pubsift_store::RawNotice;
use quick_xml::Reader;
use quick_xml::events::Event;
use quick_xml::name::QName;

use crate::parser::extract_pmid;

pub const MEDLINE_URL: &str = "https://ftp.ncbi.nlm.nih.gov/pubmed";

/// Directories listed, oldest publication first.
const DIRECTORIES: [&str; 2] = ["baseline", "updatefiles"];

/// One downloadable bulk file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFile {
    /// File name up to the first dot, e.g. `pubmed24n1300`
    pub key: String,
    pub url: String,
}

impl BulkFile {
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let name = url.rsplit('/').next().unwrap_or(&url);
        let key = name.split('.').next().unwrap_or(name).to_string();
        Self { key, url }
    }
}

/// Contents of one bulk file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkDump {
    pub notices: Vec<RawNotice>,
    /// Identifiers listed under `DeleteCitation`
    pub deleted: Vec<String>,
}

pub trait BulkSource: Send + Sync {
    /// Every bulk file, newest first.
    fn list_files(&self) -> Result<Vec<BulkFile>>;

    fn download(&self, file: &BulkFile) -> Result<BulkDump>;
}

impl<B: BulkSource + ?Sized> BulkSource for &B {
    fn list_files(&self) -> Result<Vec<BulkFile>> {
        (**self).list_files()
    }

    fn download(&self, file: &BulkFile) -> Result<BulkDump> {
        (**self).download(file)
    }
}

/// HTTPS mirror of `ftp.ncbi.nlm.nih.gov/pubmed`.
#[derive(Debug, Clone)]
pub struct MedlineFtp {
    base_url: String,
    listing_timeout: Duration,
    retry: RetryPolicy,
}

impl MedlineFtp {
    pub fn new(base_url: &str, listing_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            listing_timeout,
            retry: RetryPolicy::default(),
        }
    }
}

impl BulkSource for MedlineFtp {
    fn list_files(&self) -> Result<Vec<BulkFile>> {
        let mut files = Vec::new();
        for dir in DIRECTORIES {
            let url = format!("{}/{dir}/", self.base_url);
            let html = retry_with_backoff("medline listing", self.retry, || {
                send_text(http_client().get(&url), self.listing_timeout)
            })
            .with_context(|| format!("Failed to list {url}"))?;
            let names = parse_html_listing(&html);
            log::debug!("{dir}: {} files", names.len());
            files.extend(names.into_iter().map(|name| BulkFile::from_url(format!("{url}{name}"))));
        }
        files.reverse();
        Ok(files)
    }

    fn download(&self, file: &BulkFile) -> Result<BulkDump> {
        let xml = retry_with_backoff("medline download", self.retry, || download_gzip_text(&file.url))
            .with_context(|| format!("Failed to download {}", file.url))?;
        split_dump(&xml).with_context(|| format!("Failed to split {}", file.key))
    }
}

/// Bulk file names of an HTML directory listing, sorted.
///
/// Lines look like
/// `<a href="pubmed24n0001.xml.gz">pubmed24n0001.xml.gz</a>  2023-12-14 13:47  19M`.
pub fn parse_html_listing(html: &str) -> Vec<String> {
    let mut names: Vec<String> = html
        .lines()
        .filter_map(|line| {
            let start = line.find("href=\"")? + 6;
            let rest = &line[start..];
            let name = &rest[..rest.find('"')?];
            (name.starts_with("pubmed") && name.ends_with(".xml.gz")).then(|| name.to_string())
        })
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Split a `PubmedArticleSet` document into one raw notice per article and
/// the identifiers of its `DeleteCitation` list.
pub fn split_dump(xml: &str) -> Result<BulkDump> {
    let mut reader = Reader::from_str(xml);
    let mut dump = BulkDump::default();
    let mut in_delete = false;

    loop {
        let start = reader.buffer_position() as usize;
        match reader.read_event().context("XML read failed")? {
            Event::Start(e) => match e.name().as_ref() {
                b"PubmedArticle" => {
                    reader
                        .read_to_end(QName(b"PubmedArticle"))
                        .context("unterminated PubmedArticle")?;
                    let raw = &xml[start..reader.buffer_position() as usize];
                    match extract_pmid(raw) {
                        Some(pmid) => dump.notices.push(RawNotice::new(pmid, raw)),
                        None => log::warn!("article without PMID at byte {start}, skipped"),
                    }
                }
                b"DeleteCitation" => in_delete = true,
                b"PMID" if in_delete => {
                    let pmid = reader.read_text(QName(b"PMID")).context("unterminated PMID")?;
                    let pmid = pmid.trim();
                    if !pmid.is_empty() {
                        dump.deleted.push(pmid.to_string());
                    }
                }
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"DeleteCitation" => in_delete = false,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(dump)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<html><body><pre>
<a href="/">Parent Directory</a>
<a href="README.txt">README.txt</a>             2023-12-14 13:47  4.5K
<a href="pubmed24n0002.xml.gz">pubmed24n0002.xml.gz</a>  2023-12-14 13:47   19M
<a href="pubmed24n0002.xml.gz.md5">pubmed24n0002.xml.gz.md5</a>  2023-12-14 13:47   60
<a href="pubmed24n0001.xml.gz">pubmed24n0001.xml.gz</a>  2023-12-14 13:47   18M
</pre></body></html>"#;

    const DUMP: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE PubmedArticleSet PUBLIC "-//NLM//DTD PubMedArticle, 1st January 2024//EN" "https://dtd.nlm.nih.gov/ncbi/pubmed/out/pubmed_240101.dtd">
<PubmedArticleSet>
<PubmedArticle><MedlineCitation Status="MEDLINE" Owner="NLM"><PMID Version="1">101</PMID><Article><ArticleTitle>One &amp; only</ArticleTitle></Article></MedlineCitation></PubmedArticle>
<PubmedArticle><MedlineCitation Status="MEDLINE" Owner="NLM"><PMID Version="1">102</PMID><Article><ArticleTitle>Two</ArticleTitle></Article></MedlineCitation></PubmedArticle>
<DeleteCitation>
<PMID Version="1">7</PMID>
<PMID Version="1">8</PMID>
</DeleteCitation>
</PubmedArticleSet>"#;

    #[test]
    fn listing_keeps_bulk_files_only() {
        assert_eq!(
            parse_html_listing(LISTING),
            vec!["pubmed24n0001.xml.gz", "pubmed24n0002.xml.gz"]
        );
    }

    #[test]
    fn file_key_from_url() {
        let file = BulkFile::from_url("https://ftp.ncbi.nlm.nih.gov/pubmed/updatefiles/pubmed24n1300.xml.gz");
        assert_eq!(file.key, "pubmed24n1300");
    }

    #[test]
    fn dump_splits_articles_and_deletions() {
        let dump = split_dump(DUMP).unwrap();
        let pmids: Vec<&str> = dump.notices.iter().map(|n| n.pmid.as_str()).collect();
        assert_eq!(pmids, vec!["101", "102"]);
        assert!(dump.notices[0].notice.starts_with("<PubmedArticle>"));
        assert!(dump.notices[0].notice.ends_with("</PubmedArticle>"));
        assert!(dump.notices[0].notice.contains("One &amp; only"));
        assert_eq!(dump.deleted, vec!["7", "8"]);
    }

    #[test]
    fn dump_without_deletions() {
        let dump = split_dump("<PubmedArticleSet></PubmedArticleSet>").unwrap();
        assert_eq!(dump, BulkDump::default());
    }

    #[test]
    #[ignore = "network"]
    fn live_listing_is_newest_first() {
        let ftp = MedlineFtp::new(MEDLINE_URL, Duration::from_secs(60));
        let files = ftp.list_files().unwrap();
        assert!(files.len() > 1000);
        assert!(files[0].key > files[files.len() - 1].key);
    }
}
