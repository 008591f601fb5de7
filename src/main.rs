use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use overhave::auth::{ConfiguredTokenSource, StaticTokenSource, TokenProvider, TokenizerClient};
use overhave::config::{AppConfig, BackendConfig, TokenSourceConfig};
use overhave::persistence::FileStore;
use overhave::publication::{ConfiguredBackend, GitlabClient, Publisher, StashClient, StatusPoller};
use overhave::queue::{SpoolConfig, SpoolQueue, Stream, StreamKind};
use overhave::server::{AppState, build_router};
use overhave::sync::{DirectoryFeatureSource, GherkinKeywords, Synchronizer};
use overhave::worker::{
    CommandExecutor, CommandSpec, ConsumerRunner, EmulationHandler, PublicationHandler, TestRunHandler,
};

type AppPublisher = Publisher<ConfiguredBackend, ConfiguredTokenSource, FileStore>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overhave=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let store = Arc::new(
        FileStore::open(&config.state_dir)
            .with_context(|| format!("failed to open state in {}", config.state_dir.display()))?,
    );

    if config.sync_on_startup {
        synchronize(&config, &store)?;
    }

    let queue = Arc::new(SpoolQueue::new(
        SpoolConfig::new(&config.spool_dir, &config.consumer_name)
            .with_claim_lease(config.claim_lease),
    ));
    let streams: Vec<Stream> = config.streams.iter().map(|k| Stream::for_kind(*k)).collect();
    let publisher = build_publisher(&config, &store)?;

    let shutdown = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    for stream in &streams {
        if let Some(task) = spawn_runner(&config, &queue, stream, publisher.as_ref(), &shutdown) {
            tasks.push(task);
        }
    }

    tasks.push(tokio::spawn(housekeeping(
        queue.clone(),
        streams.clone(),
        config.done_retention,
        shutdown.clone(),
    )));

    if let Some(publisher) = &publisher {
        let poller = StatusPoller::new(publisher.clone(), config.status_poll_interval);
        tasks.push(tokio::spawn(poller.run(shutdown.clone())));
    }

    if let Some(addr) = config.http_addr {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "Operator endpoints listening");
        let app = build_router(AppState::new(queue.as_ref().clone(), streams.clone()));
        let stop = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(stop.cancelled_owned());
            if let Err(e) = serve.await {
                warn!(error = %e, "Operator server failed");
            }
        }));
    }

    info!(
        consumer = %config.consumer_name,
        streams = ?config.streams,
        "Worker started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested, finishing in-flight work");
    shutdown.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Task ended abnormally");
        }
    }
    info!("Worker stopped");
    Ok(())
}

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Removes long-acknowledged tasks from the spool every hour.
async fn housekeeping(
    queue: Arc<SpoolQueue>,
    streams: Vec<Stream>,
    retention: Duration,
    shutdown: CancellationToken,
) {
    loop {
        for stream in &streams {
            if let Err(e) = queue.cleanup_acknowledged(stream, retention) {
                warn!(stream = %stream, error = %e, "Spool cleanup failed");
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(HOUSEKEEPING_INTERVAL) => {}
        }
    }
}

fn synchronize(config: &AppConfig, store: &Arc<FileStore>) -> anyhow::Result<()> {
    let Some(features_dir) = &config.features_dir else {
        warn!("Startup synchronization requested but OVERHAVE_FEATURES_DIR is unset");
        return Ok(());
    };
    let synchronizer = Synchronizer::new(
        DirectoryFeatureSource::new(features_dir),
        store.clone(),
        GherkinKeywords::for_language(config.language),
    );
    let report = synchronizer
        .synchronize(config.sync_create_missing)
        .context("feature synchronization failed")?;
    info!(
        created = report.created.len(),
        updated = report.updated.len(),
        stale = report.stale.len(),
        invalid = report.invalid.len(),
        "Startup synchronization done"
    );
    Ok(())
}

fn build_publisher(
    config: &AppConfig,
    store: &Arc<FileStore>,
) -> anyhow::Result<Option<Arc<AppPublisher>>> {
    let (Some(backend), Some(token_source)) = (&config.backend, &config.token_source) else {
        if config.backend.is_some() {
            warn!("Publication backend configured without a token source; publishing disabled");
        }
        return Ok(None);
    };

    let backend = match backend.clone() {
        BackendConfig::Stash(settings) => ConfiguredBackend::Stash(StashClient::new(settings)?),
        BackendConfig::Gitlab(settings) => ConfiguredBackend::Gitlab(GitlabClient::new(settings)?),
    };
    let source = match token_source.clone() {
        TokenSourceConfig::Static(value) => ConfiguredTokenSource::Static(StaticTokenSource::new(value)),
        TokenSourceConfig::Tokenizer(settings) => {
            ConfiguredTokenSource::Tokenizer(TokenizerClient::new(settings)?)
        }
    };
    let tokens = Arc::new(TokenProvider::new(source, config.token_ttl));
    Ok(Some(Arc::new(Publisher::new(
        backend,
        tokens,
        store.clone(),
        config.initiator.clone(),
    ))))
}

/// Starts the runner for `stream`, or returns `None` if nothing is configured
/// to serve it.
fn spawn_runner(
    config: &AppConfig,
    queue: &Arc<SpoolQueue>,
    stream: &Stream,
    publisher: Option<&Arc<AppPublisher>>,
    shutdown: &CancellationToken,
) -> Option<JoinHandle<()>> {
    let queue = queue.clone();
    let stream = stream.clone();
    let runner_config = config.runner.clone();
    let shutdown = shutdown.clone();

    let executor = |command: &Option<CommandSpec>| {
        command
            .clone()
            .map(|spec| CommandExecutor::new(spec).with_timeout(config.command_timeout))
    };

    match stream.kind {
        StreamKind::Test => {
            let Some(executor) = executor(&config.test_command) else {
                warn!("OVERHAVE_TEST_COMMAND is unset; not consuming the test stream");
                return None;
            };
            let runner =
                ConsumerRunner::new(queue, TestRunHandler::new(executor), stream, runner_config);
            Some(tokio::spawn(async move {
                runner.run(shutdown).await;
            }))
        }
        StreamKind::Emulation => {
            let Some(executor) = executor(&config.emulation_command) else {
                warn!("OVERHAVE_EMULATION_COMMAND is unset; not consuming the emulation stream");
                return None;
            };
            let runner =
                ConsumerRunner::new(queue, EmulationHandler::new(executor), stream, runner_config);
            Some(tokio::spawn(async move {
                runner.run(shutdown).await;
            }))
        }
        StreamKind::Publication => {
            let Some(publisher) = publisher else {
                warn!("No publication backend and token source; not consuming the publication stream");
                return None;
            };
            let handler = PublicationHandler::new(publisher.clone());
            let runner = ConsumerRunner::new(queue, handler, stream, runner_config);
            Some(tokio::spawn(async move {
                runner.run(shutdown).await;
            }))
        }
    }
}
