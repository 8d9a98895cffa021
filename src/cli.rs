//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use sheet_images_core::{ColumnRef, SearchFallback, TargetSize};

/// Find, download and normalize a product image for every spreadsheet row.
///
/// Reads a CSV export, resolves each row's image through a fallback chain
/// (direct link, vendor CDN guess, page meta tags, JSON-LD, image search),
/// and writes one PNG thumbnail per row plus a JSON report.
///
/// Unset options fall back to the config file, then to built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "sheet-images")]
#[command(author, version, about)]
pub struct Args {
    /// CSV file with a header row
    pub input: PathBuf,

    /// Column holding product page URLs (header name or zero-based index)
    #[arg(short = 'p', long, value_name = "COL")]
    pub page_column: Option<ColumnRef>,

    /// Column holding direct image URLs (header name or zero-based index)
    #[arg(short = 'i', long, value_name = "COL")]
    pub image_column: Option<ColumnRef>,

    /// Directory for thumbnails and report.json [default: ./thumbnails]
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Thumbnail size preset
    #[arg(long, value_enum, conflicts_with_all = ["width", "height"])]
    pub preset: Option<PresetArg>,

    /// Thumbnail width in pixels (1-4096)
    #[arg(long, requires = "height", value_parser = clap::value_parser!(u32).range(1..=4096))]
    pub width: Option<u32>,

    /// Thumbnail height in pixels (1-4096)
    #[arg(long, requires = "width", value_parser = clap::value_parser!(u32).range(1..=4096))]
    pub height: Option<u32>,

    /// Rows processed at once (1-16) [default: 1]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: Option<u8>,

    /// Requests in flight per host (1-8) [default: 2]
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=8))]
    pub per_host: Option<u8>,

    /// Maximum retry attempts for transient failures (0-10) [default: 3]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Minimum delay between requests to the same domain in milliseconds (0 disables, max 60000) [default: 500]
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: Option<u64>,

    /// When the image-search fallback may run [default: always]
    #[arg(long, value_enum)]
    pub search_fallback: Option<SearchFallbackArg>,

    /// Disable the image-search fallback (same as --search-fallback never)
    #[arg(long, conflicts_with = "search_fallback")]
    pub no_search: bool,

    /// Image search endpoint (DuckDuckGo-compatible)
    #[arg(long, value_name = "URL", hide = true)]
    pub search_endpoint: Option<String>,

    /// Resolve and download only the first N rows, print each result, and write nothing
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub preview: Option<u16>,

    /// Vendor catalog JSON replacing the built-in one
    #[arg(long, value_name = "FILE")]
    pub vendors: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Named thumbnail sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PresetArg {
    /// 179x135, a spreadsheet cell
    Cell,
    /// 800x600, a slide image
    Slide,
}

impl From<PresetArg> for TargetSize {
    fn from(preset: PresetArg) -> Self {
        match preset {
            PresetArg::Cell => TargetSize::CELL,
            PresetArg::Slide => TargetSize::SLIDE,
        }
    }
}

/// CLI spelling of [`SearchFallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchFallbackArg {
    Always,
    WhenScrapingSkipped,
    Never,
}

impl From<SearchFallbackArg> for SearchFallback {
    fn from(arg: SearchFallbackArg) -> Self {
        match arg {
            SearchFallbackArg::Always => SearchFallback::Always,
            SearchFallbackArg::WhenScrapingSkipped => SearchFallback::WhenScrapingSkipped,
            SearchFallbackArg::Never => SearchFallback::Never,
        }
    }
}
