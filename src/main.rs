use std::io::Write;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use plantpad::{
    application::{
        context::AppContext,
        error::AppError,
        render::{RenderOutcome, RenderScheduler},
    },
    cache::RenderCache,
    config::{self, CacheCommand, CliArgs, Command},
    domain::DiagramSource,
    infra::{embedded::EmbeddedServer, error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const TARGET: &str = "plantpad::main";

/// How often the preview command re-reads the watched source file.
const FILE_POLL_INTERVAL: Duration = Duration::from_millis(300);

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
    let cli = CliArgs::parse();
    let settings = config::load(&cli)
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    let command = cli
        .command
        .unwrap_or(Command::Check(config::CheckArgs::default()));

    match command {
        Command::Render(args) => run_render(settings, args).await,
        Command::Preview(args) => run_preview(settings, args).await,
        Command::Check(_) => run_check(settings).await,
        Command::Cache(args) => run_cache(settings, args.command),
    }
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let source = read_source(&args.file)?;
    if source.is_blank() {
        return Err(AppError::validation("diagram source is empty"));
    }

    let app = AppContext::new(settings)?;
    let format = app.settings.render.format;

    let image = match app.cache.lookup(source.as_str()) {
        Some(entry) => entry.image,
        None => {
            let outcome = app
                .client
                .fetch_render(&source, &app.endpoint.current(), format)
                .await?;
            if outcome.is_cacheable()
                && let Some(image) = outcome.image()
            {
                app.cache.store(source.as_str(), image);
            }
            match outcome {
                RenderOutcome::Rendered { image }
                | RenderOutcome::ErrorDiagram { image }
                | RenderOutcome::CachedFallback { image, .. } => image,
                RenderOutcome::Failed { reason } => return Err(AppError::Render(reason)),
            }
        }
    };

    write_image(args.output.as_deref(), &image)
}

async fn run_preview(
    settings: config::Settings,
    args: config::PreviewArgs,
) -> Result<(), AppError> {
    let app = AppContext::new(settings)?;
    let format = app.settings.render.format;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.file.with_extension(format.file_extension()));

    let mut embedded = start_embedded_if_configured(&app).await?;

    app.monitor
        .check_status_with_retry(
            app.settings.monitor.startup_retries,
            app.settings.monitor.retry_delay,
        )
        .await;
    let monitor = Arc::clone(&app.monitor);
    let poll_interval = app.settings.monitor.poll_interval;
    let monitor_task = tokio::spawn(async move { monitor.run(poll_interval).await });

    let scheduler = app.scheduler();
    info!(
        target = TARGET,
        op = "preview::watch",
        source = %args.file.display(),
        output = %output.display(),
        server = %app.endpoint.current(),
        "Watching diagram source"
    );

    let result = preview_loop(&app, &scheduler, &args.file, &output).await;

    monitor_task.abort();
    let _ = monitor_task.await;
    if let Some(server) = embedded.as_mut() {
        server.stop().await;
    }

    result
}

async fn preview_loop(
    app: &AppContext,
    scheduler: &RenderScheduler,
    source_path: &Path,
    output: &Path,
) -> Result<(), AppError> {
    let mut preview_rx = scheduler.preview();
    let mut monitor_rx = app.monitor.subscribe();
    let mut poll = tokio::time::interval(FILE_POLL_INTERVAL);
    let mut last_text: Option<String> = None;
    let mut last_written: Option<String> = None;
    let mut degraded_seen = false;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(InfraError::from)?;
                info!(target = TARGET, op = "preview::watch", "Shutting down");
                return Ok(());
            }
            _ = poll.tick() => {
                match std::fs::read_to_string(source_path) {
                    Ok(text) => {
                        if last_text.as_deref() != Some(text.as_str()) {
                            last_text = Some(text.clone());
                            scheduler.source_changed(text);
                        }
                    }
                    Err(err) => {
                        warn!(
                            target = TARGET,
                            op = "preview::read",
                            path = %source_path.display(),
                            error = %err,
                            "Failed to read diagram source"
                        );
                    }
                }
            }
            changed = preview_rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = preview_rx.borrow_and_update().clone();
                if let Some(message) = snapshot.error.as_deref() {
                    warn!(
                        target = TARGET,
                        op = "preview::update",
                        error = message,
                        "Render failed; keeping last preview"
                    );
                }
                if let Some(image) = snapshot.image
                    && last_written.as_deref() != Some(image.as_str())
                {
                    if let Err(err) = std::fs::write(output, &image) {
                        warn!(
                            target = TARGET,
                            op = "preview::write",
                            path = %output.display(),
                            error = %err,
                            "Failed to write preview image"
                        );
                    } else {
                        last_written = Some(image);
                    }
                }
            }
            changed = monitor_rx.changed() => {
                if changed.is_err() {
                    continue;
                }
                let snapshot = monitor_rx.borrow_and_update().clone();
                if snapshot.degraded && !degraded_seen {
                    warn!(
                        target = TARGET,
                        op = "preview::monitor",
                        status = snapshot.status.label(),
                        "Render server unavailable; previews will use the offline cache"
                    );
                }
                degraded_seen = snapshot.degraded;
            }
        }
    }
}

async fn start_embedded_if_configured(
    app: &AppContext,
) -> Result<Option<EmbeddedServer>, AppError> {
    if !app.settings.server.use_embedded {
        return Ok(None);
    }

    let mut server = EmbeddedServer::new(&app.settings.server);
    let status = server.start().await?;
    app.endpoint.use_embedded(status.url);
    Ok(Some(server))
}

async fn run_check(settings: config::Settings) -> Result<(), AppError> {
    let app = AppContext::new(settings)?;
    let online = app
        .monitor
        .check_status_with_retry(
            app.settings.monitor.startup_retries,
            app.settings.monitor.retry_delay,
        )
        .await;

    let snapshot = app.monitor.snapshot();
    println!("server: {}", app.endpoint.current());
    println!("status: {}", snapshot.status.label());

    if online { Ok(()) } else { Err(AppError::ServerOffline) }
}

fn run_cache(settings: config::Settings, command: CacheCommand) -> Result<(), AppError> {
    let cache = RenderCache::open(settings.cache.max_entries, settings.cache.path.clone());

    match command {
        CacheCommand::Stats => {
            println!("entries: {} / {}", cache.len(), settings.cache.max_entries);
            match settings.cache.path.as_deref() {
                Some(path) => println!("persisted: {}", path.display()),
                None => println!("persisted: none (memory only)"),
            }
        }
        CacheCommand::Clear => {
            cache.clear();
            println!("cache cleared");
        }
    }

    Ok(())
}

fn read_source(path: &Path) -> Result<DiagramSource, AppError> {
    let text = std::fs::read_to_string(path).map_err(InfraError::from)?;
    Ok(DiagramSource::from(text))
}

fn write_image(output: Option<&Path>, image: &str) -> Result<(), AppError> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(InfraError::from)?;
            }
            std::fs::write(path, image).map_err(InfraError::from)?;
            info!(
                target = TARGET,
                op = "render::write",
                path = %path.display(),
                image_bytes = image.len(),
                "Image written"
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(image.as_bytes())
                .and_then(|()| stdout.write_all(b"\n"))
                .map_err(InfraError::from)?;
        }
    }
    Ok(())
}
