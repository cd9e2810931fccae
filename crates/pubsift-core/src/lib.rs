//! pubsift core - shared infrastructure for the PubMed harvesting pipeline
//!
//! HTTP plumbing, retry, logging, progress, shutdown handling and the
//! canonical publication record model used by every other crate.

pub mod logging;
pub mod progress;
pub mod record;
pub mod retry;
pub mod shutdown;
pub mod single_flight;
pub mod sink;
pub mod stream;
pub mod wait;
pub mod work_queue;

// Re-exports for convenience
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use record::{Affiliation, Author, Publication, ValidationError};
pub use retry::{RetryPolicy, Retryable, retry_with_backoff};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown, shutdown_flag};
pub use single_flight::{FlightGuard, SingleFlight};
pub use sink::{ParquetSink, cleanup_tmp_files, is_valid_parquet};
pub use stream::{
    ByteCounter, GzipReader, HttpConfig, SHARED_RUNTIME, StreamError, download_gzip_text,
    http_client, http_config, open_gzip_reader, send_json, send_text, set_http_config,
};
pub use wait::{PollOutcome, poll_until};
pub use work_queue::WorkQueue;
