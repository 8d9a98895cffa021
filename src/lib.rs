//! Sheet Images Core Library
//!
//! Finds a product image for each spreadsheet row, downloads it and
//! normalizes it to a fixed thumbnail size. The output is an ordered
//! `(row, bitmap-or-nothing)` stream for an external document writer.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`fetch`] - Paced, retrying HTTP with a swappable browser-identity transport
//! - [`normalize`] - Decode, flatten to RGB, exact resize
//! - [`resolver`] - Image-resolution fallback pipeline and vendor catalog
//! - [`row`] - Two-column row priority on top of the pipeline
//! - [`batch`] - Ordered, cancellable, optionally concurrent batch driver
//! - [`input`] - CSV row source
//! - [`output`] - PNG thumbnails and JSON report for hand-off

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod fetch;
pub mod input;
pub mod normalize;
pub mod output;
pub mod resolver;
pub mod row;
#[cfg(test)]
pub mod test_support;
pub mod user_agent;

// Re-export commonly used types
pub use batch::{
    BatchDriver, BatchError, BatchReport, BatchStats, DEFAULT_ROW_CONCURRENCY, FailureReason,
    MAX_ROW_CONCURRENCY, ProcessingOutcome, SkipReason,
};
pub use fetch::{
    DEFAULT_MAX_RETRIES, FetchError, FetchKind, FetchTimeouts, FetchTransport, Fetcher,
    HostLimiter, HttpTransport, RateLimiter, RetryPolicy,
};
pub use input::{ColumnRef, InputError, read_rows, read_rows_from, sheet_row_number};
pub use normalize::{Bitmap, ColorMode, DecodeError, TargetSize, normalize, normalize_to};
pub use output::{OutputError, ReportFile, RowStatus, write_outputs};
pub use resolver::{
    CatalogError, DEFAULT_SEARCH_BASE_URL, ImageStrategy, ResolutionPipeline, ResolutionTrace,
    ResolveError, ResolvedImage, SearchFallback, StrategyKind, VendorCatalog,
};
pub use row::{RowProcessor, SourceRow};
pub use user_agent::BrowserIdentity;
