//! Client for the affiliation matcher microservice.
//!
//! Endpoints:
//! - `POST /match_api` `{query, type: "country", strategies}` → `{results: [codes]}`
//! - `GET /load` warms up the matcher's indexes
//! - `POST /enrich_filter` `{publications, countries_to_keep}` → `{data: {task_id}}`
//! - `GET /tasks/{id}` → `{data: {task_status, task_result}}`

use std::time::Duration;

use pubsift_core::record::CountrySet;
use pubsift_core::{Publication, Retryable, StreamError, http_client, send_json};
use serde::Deserialize;
use serde_json::Value;

/// Ordered list of matcher strategies tried in one query.
pub type Strategy = &'static [&'static str];

/// Fallback strategies for country detection, most specific first.
pub const COUNTRY_STRATEGIES: &[Strategy] = &[
    &["grid_city", "grid_name", "country_all_names"],
    &["grid_city", "country_all_names"],
    &["grid_city", "country_alpha3"],
    &["country_all_names"],
    &["country_subdivisions", "country_alpha3"],
];

#[derive(Debug)]
pub enum MatcherError {
    Stream(StreamError),
    /// Response did not have the expected shape
    Protocol(String),
}

impl std::fmt::Display for MatcherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(e) => write!(f, "matcher request failed: {e}"),
            Self::Protocol(msg) => write!(f, "unexpected matcher response: {msg}"),
        }
    }
}

impl std::error::Error for MatcherError {}

impl From<StreamError> for MatcherError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Decode(msg) => Self::Protocol(msg),
            other => Self::Stream(other),
        }
    }
}

impl Retryable for MatcherError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Stream(e) => e.is_retryable(),
            Self::Protocol(_) => false,
        }
    }
}

/// Output of a remote enrich task.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnrichResult {
    #[serde(default)]
    pub publications: Vec<Publication>,
    #[serde(default)]
    pub filtered_publications: Vec<Publication>,
}

/// State of a remote enrich task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Queued,
    Started,
    Finished(Box<EnrichResult>),
    /// Failed, or a status this client does not know
    Failed(String),
}

impl TaskState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Started)
    }
}

pub trait CountryMatcher: Send + Sync {
    /// Whether the matcher answers a known query.
    fn probe(&self) -> bool;

    /// Ask the matcher to load its indexes.
    fn warm_up(&self) -> Result<(), MatcherError>;

    fn match_countries(&self, query: &str, strategies: &[Strategy]) -> Result<CountrySet, MatcherError>;

    /// Start a remote annotate-and-filter task; returns its id.
    fn submit_enrich(
        &self,
        publications: &[Publication],
        countries_to_keep: &[String],
    ) -> Result<String, MatcherError>;

    fn task_status(&self, task_id: &str) -> Result<TaskState, MatcherError>;
}

impl<M: CountryMatcher + ?Sized> CountryMatcher for &M {
    fn probe(&self) -> bool {
        (**self).probe()
    }

    fn warm_up(&self) -> Result<(), MatcherError> {
        (**self).warm_up()
    }

    fn match_countries(&self, query: &str, strategies: &[Strategy]) -> Result<CountrySet, MatcherError> {
        (**self).match_countries(query, strategies)
    }

    fn submit_enrich(
        &self,
        publications: &[Publication],
        countries_to_keep: &[String],
    ) -> Result<String, MatcherError> {
        (**self).submit_enrich(publications, countries_to_keep)
    }

    fn task_status(&self, task_id: &str) -> Result<TaskState, MatcherError> {
        (**self).task_status(task_id)
    }
}

/// HTTP client for the matcher service.
#[derive(Debug, Clone)]
pub struct MatcherClient {
    base_url: String,
    timeout: Duration,
    load_timeout: Duration,
}

#[derive(Deserialize)]
struct MatchResponse {
    results: Vec<String>,
}

impl MatcherClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            load_timeout: Duration::from_secs(1000),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }
}

/// Lower-case and deduplicate the codes returned by the matcher.
fn normalize_codes(codes: Vec<String>) -> CountrySet {
    codes
        .into_iter()
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Read `data.task_id` from a submission response.
fn parse_task_id(body: &Value) -> Result<String, MatcherError> {
    match &body["data"]["task_id"] {
        Value::String(id) => Ok(id.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(MatcherError::Protocol(format!("no task id in {other}"))),
    }
}

/// Map a `/tasks/{id}` response onto [`TaskState`].
fn parse_task_state(mut body: Value) -> Result<TaskState, MatcherError> {
    let Some(status) = body["data"]["task_status"].as_str().map(str::to_string) else {
        return Ok(TaskState::Failed(format!("no task status in {body}")));
    };
    Ok(match status.as_str() {
        "queued" => TaskState::Queued,
        "started" => TaskState::Started,
        "finished" => {
            let result = body["data"]["task_result"].take();
            let result: EnrichResult =
                serde_json::from_value(result).map_err(|e| MatcherError::Protocol(e.to_string()))?;
            TaskState::Finished(Box::new(result))
        }
        other => TaskState::Failed(format!("status {other}")),
    })
}

impl CountryMatcher for MatcherClient {
    fn probe(&self) -> bool {
        let request = http_client()
            .post(self.url("match_api"))
            .json(&serde_json::json!({ "query": "france", "type": "country" }));
        match send_json::<Value>(request, self.timeout) {
            Ok(body) => body.get("results").is_some(),
            Err(e) => {
                log::debug!("matcher probe failed: {e}");
                false
            }
        }
    }

    fn warm_up(&self) -> Result<(), MatcherError> {
        let request = http_client().get(self.url("load"));
        let body: Value = send_json(request, self.load_timeout)?;
        log::debug!("matcher load: {body}");
        Ok(())
    }

    fn match_countries(&self, query: &str, strategies: &[Strategy]) -> Result<CountrySet, MatcherError> {
        let request = http_client().post(self.url("match_api")).json(&serde_json::json!({
            "query": query,
            "type": "country",
            "strategies": strategies,
        }));
        let resp: MatchResponse = send_json(request, self.timeout)?;
        Ok(normalize_codes(resp.results))
    }

    fn submit_enrich(
        &self,
        publications: &[Publication],
        countries_to_keep: &[String],
    ) -> Result<String, MatcherError> {
        let request = http_client().post(self.url("enrich_filter")).json(&serde_json::json!({
            "publications": publications,
            "countries_to_keep": countries_to_keep,
        }));
        let body: Value = send_json(request, self.timeout)?;
        parse_task_id(&body)
    }

    fn task_status(&self, task_id: &str) -> Result<TaskState, MatcherError> {
        let request = http_client().get(self.url(&format!("tasks/{task_id}")));
        parse_task_state(send_json(request, self.timeout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strategies_most_specific_first() {
        assert_eq!(COUNTRY_STRATEGIES.len(), 5);
        assert_eq!(COUNTRY_STRATEGIES[0], &["grid_city", "grid_name", "country_all_names"]);
        assert_eq!(COUNTRY_STRATEGIES[4], &["country_subdivisions", "country_alpha3"]);
        let wire = serde_json::to_value(COUNTRY_STRATEGIES).unwrap();
        assert_eq!(wire[3], json!(["country_all_names"]));
    }

    #[test]
    fn codes_normalized() {
        let codes = normalize_codes(vec!["FR".into(), "fr".into(), " us ".into(), "".into()]);
        assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec!["fr", "us"]);
    }

    #[test]
    fn task_id_string_or_number() {
        assert_eq!(parse_task_id(&json!({"data": {"task_id": "abc"}})).unwrap(), "abc");
        assert_eq!(parse_task_id(&json!({"data": {"task_id": 12}})).unwrap(), "12");
        assert!(parse_task_id(&json!({"status": "error"})).is_err());
    }

    #[test]
    fn task_states() {
        let pending = parse_task_state(json!({"data": {"task_status": "started"}})).unwrap();
        assert!(pending.is_pending());
        assert_eq!(
            parse_task_state(json!({"data": {"task_status": "queued"}})).unwrap(),
            TaskState::Queued
        );
        assert!(matches!(
            parse_task_state(json!({"data": {"task_status": "deferred"}})).unwrap(),
            TaskState::Failed(_)
        ));
        assert!(matches!(
            parse_task_state(json!({"status": "error"})).unwrap(),
            TaskState::Failed(_)
        ));
    }

    #[test]
    fn finished_task_carries_publications() {
        let body = json!({"data": {"task_status": "finished", "task_result": {
            "publications": [{"pmid": "1", "url": "u", "publication_date": "2020-01-01",
                              "publication_year": "2020", "detected_countries": ["fr"]}],
            "filtered_publications": []
        }}});
        let TaskState::Finished(result) = parse_task_state(body).unwrap() else {
            panic!("expected finished");
        };
        assert_eq!(result.publications.len(), 1);
        assert!(result.publications[0].detected_countries.contains("fr"));
        assert!(result.filtered_publications.is_empty());
    }
}
