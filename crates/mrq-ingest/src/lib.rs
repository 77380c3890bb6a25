pub mod chunker;
pub mod client;
pub mod downloader;
pub mod progress;
pub mod rate_limiter;

pub use client::HttpKlineSource;
pub use downloader::{run_ingest, DownloadReport, DownloadSpec};
pub use progress::IngestProgressFile;
pub use rate_limiter::RateLimiter;
