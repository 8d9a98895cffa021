use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use sheet_images_core::{
    BatchDriver, BatchStats, Fetcher, HostLimiter, HttpTransport, RateLimiter,
    ResolutionPipeline, RetryPolicy, RowProcessor, VendorCatalog, read_rows, write_outputs,
};
use tracing::{debug, info, warn};

use crate::app::config_runtime::{self, RunSettings};
use crate::app::{exit_handler, preview, progress_manager, summary, terminal};
use crate::app_config;
use crate::cli::Args;
use crate::ProcessExit;

pub(crate) async fn run_sheet_images() -> Result<ProcessExit> {
    let args = Args::parse();

    let loaded = app_config::load_default_file_config()?;
    let settings = config_runtime::resolve_settings(&args, loaded.config.as_ref());

    let no_color = terminal::no_color_env_requested() || terminal::is_dumb_terminal();
    terminal::init_tracing(settings.log_level, no_color);

    debug!(?args, "CLI arguments parsed");
    if let (Some(path), Some(config)) = (&loaded.path, &loaded.config) {
        debug!(
            config = %path.display(),
            verbosity = config.verbosity.map_or("unset", |v| v.as_str()),
            "Loaded config file"
        );
    }
    info!("sheet-images starting");

    let mut rows = read_rows(
        &settings.input,
        settings.page_column.as_ref(),
        settings.image_column.as_ref(),
    )
    .with_context(|| format!("Failed to read rows from {}", settings.input.display()))?;
    info!(rows = rows.len(), "Rows loaded");

    let catalog = load_catalog(&settings)?;
    if !settings.quiet
        && let Some(kind) = preview::sample_column_kind(&rows, &catalog)
    {
        println!("{}", preview::render_column_hint(kind));
    }
    if let Some(limit) = settings.preview {
        rows.truncate(limit);
        debug!(rows = rows.len(), "Preview run; outputs will not be written");
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let driver = build_driver(&settings, catalog, Arc::clone(&cancel))?;

    let cancel_signal = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_signal.store(true, Ordering::SeqCst);
            warn!("Interrupt received; stopping after in-flight rows (Ctrl+C again to exit now)");
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(i32::from(ProcessExit::Failure.code()));
            }
        }
    });

    let total = rows.len();
    let stats = Arc::new(BatchStats::new());
    let use_spinner = terminal::should_use_spinner(
        io::stderr().is_terminal(),
        settings.quiet,
        terminal::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) =
        progress_manager::spawn_progress_ui(use_spinner, Arc::clone(&stats), total);

    let report = driver
        .process_rows_with_stats(rows, Arc::clone(&cancel), stats)
        .await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    if report.was_cancelled {
        warn!("Interrupted by Ctrl+C; unprocessed rows were skipped");
    }

    if settings.preview.is_some() {
        for line in preview::render_preview_lines(&report) {
            println!("{line}");
        }
        return Ok(exit_handler::determine_exit_outcome(
            report.failed_rows().len(),
            report.was_cancelled,
        ));
    }

    let written = write_outputs(&settings.output_dir, &report).with_context(|| {
        format!(
            "Failed to write thumbnails to {}",
            settings.output_dir.display()
        )
    })?;

    if !settings.quiet {
        let width = summary::terminal_width();
        println!(
            "{}",
            summary::truncate_to_width(&summary::render_totals_line(&written), width)
        );
        for line in summary::render_failure_summary_lines(&report.failed_rows(), width) {
            println!("{line}");
        }
        println!("Output: {}", settings.output_dir.display());
    }

    Ok(exit_handler::determine_exit_outcome(
        written.failed,
        report.was_cancelled,
    ))
}

fn load_catalog(settings: &RunSettings) -> Result<Arc<VendorCatalog>> {
    let catalog = match &settings.vendors_file {
        Some(path) => VendorCatalog::load(path)
            .with_context(|| format!("Failed to load vendor catalog {}", path.display()))?,
        None => VendorCatalog::embedded().context("Built-in vendor catalog is invalid")?,
    };
    debug!(vendors = catalog.vendor_count(), "Vendor catalog ready");
    Ok(Arc::new(catalog))
}

fn build_driver(
    settings: &RunSettings,
    catalog: Arc<VendorCatalog>,
    cancel: Arc<AtomicBool>,
) -> Result<BatchDriver> {
    let transport = HttpTransport::new().context("Failed to create HTTP client")?;
    let fetcher = Fetcher::new(Arc::new(transport))
        .with_retry_policy(RetryPolicy::with_max_attempts(
            settings.max_retries.saturating_add(1),
        ))
        .with_rate_limiter(Arc::new(RateLimiter::new(settings.rate_limit)))
        .with_host_limiter(Arc::new(HostLimiter::new(settings.per_host)))
        .with_timeouts(settings.timeouts)
        .with_cancel_flag(cancel);

    let pipeline = ResolutionPipeline::standard(
        fetcher,
        catalog,
        settings.search_endpoint.clone(),
    )
    .with_search_fallback(settings.search_fallback);
    debug!(
        strategies = pipeline.strategy_count(),
        search_fallback = %settings.search_fallback,
        "Resolution pipeline ready"
    );

    let processor = Arc::new(RowProcessor::new(Arc::new(pipeline)));
    let driver = BatchDriver::new(processor, settings.target, settings.concurrency)
        .context("Invalid batch settings")?;
    Ok(driver)
}
