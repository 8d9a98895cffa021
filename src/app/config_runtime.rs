//! Merges CLI flags, file config and built-in defaults into run settings.

use std::path::PathBuf;
use std::time::Duration;

use sheet_images_core::fetch::constants::{DEFAULT_PER_HOST_LIMIT, DEFAULT_REQUEST_DELAY_MS};
use sheet_images_core::{
    ColumnRef, DEFAULT_MAX_RETRIES, DEFAULT_ROW_CONCURRENCY, DEFAULT_SEARCH_BASE_URL,
    FetchTimeouts, SearchFallback, TargetSize,
};

use crate::app_config::{FileConfig, VerbositySetting};
use crate::cli::Args;

/// Output directory when neither flag nor config names one.
pub(crate) const DEFAULT_OUTPUT_DIR: &str = "thumbnails";

/// Everything a run needs, after precedence is applied.
#[derive(Debug, Clone)]
pub(crate) struct RunSettings {
    pub(crate) input: PathBuf,
    pub(crate) page_column: Option<ColumnRef>,
    pub(crate) image_column: Option<ColumnRef>,
    pub(crate) output_dir: PathBuf,
    pub(crate) target: TargetSize,
    pub(crate) concurrency: usize,
    pub(crate) per_host: usize,
    pub(crate) rate_limit: Duration,
    pub(crate) max_retries: u32,
    pub(crate) timeouts: FetchTimeouts,
    pub(crate) search_fallback: SearchFallback,
    pub(crate) search_endpoint: String,
    pub(crate) vendors_file: Option<PathBuf>,
    pub(crate) preview: Option<usize>,
    pub(crate) quiet: bool,
    pub(crate) log_level: &'static str,
}

/// CLI flags > config file > built-in defaults.
pub(crate) fn resolve_settings(args: &Args, file: Option<&FileConfig>) -> RunSettings {
    let empty = FileConfig::default();
    let file = file.unwrap_or(&empty);

    let target = match (args.preset, args.width, args.height) {
        (Some(preset), _, _) => TargetSize::from(preset),
        (None, Some(width), Some(height)) => TargetSize::new(width, height),
        _ => match (file.thumbnail_width, file.thumbnail_height) {
            (Some(width), Some(height)) => TargetSize::new(width, height),
            _ => TargetSize::default(),
        },
    };

    let search_fallback = if args.no_search {
        SearchFallback::Never
    } else {
        args.search_fallback
            .map(SearchFallback::from)
            .or(file.search_fallback)
            .unwrap_or_default()
    };

    let defaults = FetchTimeouts::default();
    let timeouts = FetchTimeouts {
        page: file
            .page_timeout_secs
            .map_or(defaults.page, Duration::from_secs),
        image: file
            .image_timeout_secs
            .map_or(defaults.image, Duration::from_secs),
        probe: file
            .probe_timeout_secs
            .map_or(defaults.probe, Duration::from_secs),
    };

    let verbosity = if args.quiet || args.verbose > 0 {
        None
    } else {
        file.verbosity
    };
    let quiet = args.quiet || verbosity == Some(VerbositySetting::Quiet);

    RunSettings {
        input: args.input.clone(),
        page_column: args.page_column.clone(),
        image_column: args.image_column.clone(),
        output_dir: args
            .output_dir
            .clone()
            .or_else(|| file.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        target,
        concurrency: args
            .concurrency
            .or(file.concurrency)
            .map_or(DEFAULT_ROW_CONCURRENCY, usize::from),
        per_host: args
            .per_host
            .or(file.per_host_limit)
            .map_or(DEFAULT_PER_HOST_LIMIT, usize::from),
        rate_limit: Duration::from_millis(
            args.rate_limit
                .or(file.rate_limit)
                .unwrap_or(DEFAULT_REQUEST_DELAY_MS),
        ),
        max_retries: args
            .max_retries
            .or(file.max_retries)
            .map_or(DEFAULT_MAX_RETRIES, u32::from),
        timeouts,
        search_fallback,
        search_endpoint: args
            .search_endpoint
            .clone()
            .or_else(|| file.search_endpoint.clone())
            .unwrap_or_else(|| DEFAULT_SEARCH_BASE_URL.to_string()),
        vendors_file: args.vendors.clone().or_else(|| file.vendors_file.clone()),
        preview: args.preview.map(usize::from),
        quiet,
        log_level: resolve_default_log_level(args.quiet, args.verbose, verbosity),
    }
}

/// `-q` > `-v` count > config verbosity > info. `RUST_LOG` beats all of these.
pub(crate) fn resolve_default_log_level(
    quiet: bool,
    verbose: u8,
    config: Option<VerbositySetting>,
) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => {}
        1 => return "debug",
        _ => return "trace",
    }
    match config {
        Some(VerbositySetting::Quiet) => "error",
        Some(VerbositySetting::Verbose) => "debug",
        Some(VerbositySetting::Debug) => "trace",
        Some(VerbositySetting::Default) | None => "info",
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use sheet_images_core::fetch::constants::{
        IMAGE_TIMEOUT_SECS, PAGE_TIMEOUT_SECS, PROBE_TIMEOUT_SECS,
    };

    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["sheet-images", "rows.csv", "-p", "url"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_without_config() {
        let s = resolve_settings(&args(&[]), None);
        assert_eq!(s.concurrency, 1);
        assert_eq!(s.per_host, 2);
        assert_eq!(s.rate_limit, Duration::from_millis(500));
        assert_eq!(s.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(s.target, TargetSize::CELL);
        assert_eq!(s.search_fallback, SearchFallback::Always);
        assert_eq!(s.output_dir, PathBuf::from("thumbnails"));
        assert_eq!(s.search_endpoint, DEFAULT_SEARCH_BASE_URL);
        assert_eq!(s.timeouts.page, Duration::from_secs(PAGE_TIMEOUT_SECS));
        assert_eq!(s.timeouts.image, Duration::from_secs(IMAGE_TIMEOUT_SECS));
        assert_eq!(s.timeouts.probe, Duration::from_secs(PROBE_TIMEOUT_SECS));
        assert_eq!(s.log_level, "info");
        assert_eq!(s.preview, None);
        assert_eq!(resolve_settings(&args(&["--preview", "3"]), None).preview, Some(3));
    }

    #[test]
    fn test_config_fills_unset_flags_only() {
        let file = FileConfig {
            concurrency: Some(4),
            rate_limit: Some(100),
            per_host_limit: Some(3),
            thumbnail_width: Some(64),
            thumbnail_height: Some(32),
            search_fallback: Some(SearchFallback::Never),
            probe_timeout_secs: Some(2),
            ..FileConfig::default()
        };
        let s = resolve_settings(&args(&["-c", "8"]), Some(&file));
        assert_eq!(s.concurrency, 8, "flag wins");
        assert_eq!(s.rate_limit, Duration::from_millis(100));
        assert_eq!(s.per_host, 3);
        assert_eq!(s.target, TargetSize::new(64, 32));
        assert_eq!(s.search_fallback, SearchFallback::Never);
        assert_eq!(s.timeouts.probe, Duration::from_secs(2));
    }

    #[test]
    fn test_preset_beats_config_size() {
        let file = FileConfig {
            thumbnail_width: Some(64),
            thumbnail_height: Some(32),
            ..FileConfig::default()
        };
        let s = resolve_settings(&args(&["--preset", "slide"]), Some(&file));
        assert_eq!(s.target, TargetSize::SLIDE);
    }

    #[test]
    fn test_no_search_forces_never() {
        let file = FileConfig {
            search_fallback: Some(SearchFallback::Always),
            ..FileConfig::default()
        };
        let s = resolve_settings(&args(&["--no-search"]), Some(&file));
        assert_eq!(s.search_fallback, SearchFallback::Never);
    }

    #[test]
    fn test_log_level_precedence() {
        assert_eq!(resolve_default_log_level(true, 2, Some(VerbositySetting::Debug)), "error");
        assert_eq!(resolve_default_log_level(false, 1, Some(VerbositySetting::Quiet)), "debug");
        assert_eq!(resolve_default_log_level(false, 3, None), "trace");
        assert_eq!(resolve_default_log_level(false, 0, Some(VerbositySetting::Verbose)), "debug");
        assert_eq!(resolve_default_log_level(false, 0, None), "info");
    }

    #[test]
    fn test_config_quiet_sets_quiet_unless_flags_given() {
        let file = FileConfig {
            verbosity: Some(VerbositySetting::Quiet),
            ..FileConfig::default()
        };
        assert!(resolve_settings(&args(&[]), Some(&file)).quiet);
        assert!(!resolve_settings(&args(&["-v"]), Some(&file)).quiet);
    }
}
