//! Shared helpers for fetching, parsing and refreshing sources

pub mod decompression;
pub mod guide_id;
pub mod retry;
pub mod single_flight;
pub mod time;
pub mod url;
pub mod xmltv_parser;

pub use decompression::{CompressionFormat, DecompressionService};
pub use retry::{with_retry, RetryPolicy};
pub use single_flight::SingleFlight;
pub use url::{SourceLocation, UrlUtils};
