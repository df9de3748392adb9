use std::{process, sync::Arc};

use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use vitrine::{
    application::{
        error::AppError,
        page::PageView,
        ports::{ContentSource, GraphqlTransport},
        prefetch::PrefetchReport,
        runtime::{ContentRuntime, RuntimeConfig},
    },
    cache::{CacheConfig, PrefetchProgress},
    config,
    infra::{
        graphql::{GraphqlContentSource, HttpTransport},
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Warm(config::WarmArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let runtime = build_runtime(&settings)?;

    match command {
        config::Command::Warm(_) => run_warm(&runtime).await,
        config::Command::Page(args) => run_page(&runtime, &args.slug).await,
    }
}

fn build_runtime(settings: &config::Settings) -> Result<ContentRuntime, AppError> {
    let transport: Arc<dyn GraphqlTransport> = Arc::new(HttpTransport::new(&settings.backend)?);
    let window = CacheConfig::from(settings).batch_window();
    let source: Arc<dyn ContentSource> =
        Arc::new(GraphqlContentSource::from_transport(transport, window));

    info!(
        endpoint = %settings.backend.endpoint,
        tenant = %settings.backend.tenant,
        locale = %settings.backend.locale,
        batching = settings.backend.supports_batching,
        "content runtime configured"
    );
    Ok(ContentRuntime::new(RuntimeConfig::from(settings), source))
}

async fn run_warm(runtime: &ContentRuntime) -> Result<(), AppError> {
    let Some(handle) = runtime.ensure_prefetch() else {
        warn!("prefetch is disabled; nothing to do");
        return Ok(());
    };

    let reporter = tokio::spawn(log_progress(runtime.subscribe_progress()));
    let report: PrefetchReport = handle
        .await
        .map_err(|err| AppError::unexpected(format!("prefetch task failed: {err}")))?;
    reporter.abort();

    info!(
        total = report.total,
        fetched = report.fetched,
        skipped = report.skipped,
        failed = report.failed,
        media_sections = report.media_sections.len(),
        "cache warm complete"
    );
    Ok(())
}

async fn log_progress(mut rx: watch::Receiver<PrefetchProgress>) {
    while rx.changed().await.is_ok() {
        let progress = *rx.borrow_and_update();
        info!(
            completed = progress.completed,
            total = progress.total,
            percent = progress.percent(),
            "prefetch progress"
        );
    }
}

async fn run_page(runtime: &ContentRuntime, slug: &str) -> Result<(), AppError> {
    let view = runtime.page_service().load_or_fallback(runtime.locale(), slug).await;
    if let PageView::Fallback { message, .. } = &view {
        warn!(slug, reason = *message, "page unavailable; printing fallback");
    }

    let json = serde_json::to_string_pretty(view.page())
        .map_err(|err| AppError::unexpected(format!("failed to encode page: {err}")))?;
    println!("{json}");
    Ok(())
}
