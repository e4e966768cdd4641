//! Vision Agent - watches trading videos and live charts, emits trade signals
//!
//! Usage:
//!   vision-agent [--mode SHADOW|PAPER|LIVE] [--model VERSION] <video-url-or-playlist>...
//!   vision-agent [--mode ...] --live
//!   vision-agent [--mode ...]            (reads one input per line from stdin)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use uuid::Uuid;

use vision_agent::classifier::{HttpClassifier, SequenceClassifier};
use vision_agent::client::BackendClient;
use vision_agent::config::{AgentConfig, AgentMode, FeedKind};
use vision_agent::dispatch::SignalSink;
use vision_agent::features::FeatureExtractor;
use vision_agent::observability::MetricsCollector;
use vision_agent::pipeline::Pipeline;
use vision_agent::runner::AgentRunner;
use vision_agent::session::{SessionRegistry, SessionStatus};
use vision_agent::source::{BinanceKlinesFeed, LiveChartSource, PriceFeed, SyntheticFeed};
use vision_agent::state::FileSessionRegistry;

/// Parsed command line
#[derive(Debug, Default)]
struct Args {
    mode: Option<AgentMode>,
    model: Option<String>,
    live: bool,
    inputs: Vec<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--mode" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--mode requires a value"))?;
                args.mode = Some(value.parse()?);
            }
            "--model" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--model requires a value"))?;
                args.model = Some(value);
            }
            "--live" => args.live = true,
            _ => args.inputs.push(arg),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let mut config = AgentConfig::load()?;
    if let Some(mode) = args.mode {
        config.mode = mode;
        config.validate()?;
    }
    if let Some(model) = args.model {
        config.model_version = model;
    }

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level())
        .init();

    info!("Starting Vision Agent...");
    info!(
        "Mode: {} | Model: {} | Threshold: {:.2}",
        config.mode, config.model_version, config.confidence_threshold
    );

    let config = Arc::new(config);
    let metrics = MetricsCollector::new();

    // Backend doubles as signal sink and session registry
    let (sink, registry): (Option<Arc<dyn SignalSink>>, Arc<dyn SessionRegistry>) =
        match (&config.backend_url, &config.backend_key) {
            (Some(url), Some(key)) if config.has_backend() => {
                let client = Arc::new(BackendClient::new(url, key, &config.user_id)?);
                info!("Backend: {}", url);
                let sink: Arc<dyn SignalSink> = client.clone();
                let registry: Arc<dyn SessionRegistry> = client;
                (Some(sink), registry)
            }
            _ => {
                let registry = FileSessionRegistry::new(&config.state_dir);
                registry.init().await?;
                info!("No backend configured, sessions stored in {:?}", config.state_dir);
                let registry: Arc<dyn SessionRegistry> = Arc::new(registry);
                (None, registry)
            }
        };

    let classifier: Option<Arc<dyn SequenceClassifier>> = match &config.classifier_url {
        Some(url) => Some(Arc::new(HttpClassifier::new(
            url,
            &config.model_version,
            config.sequence_length,
        )?)),
        None => {
            warn!("No classifier configured, only keyword overrides can fire");
            None
        }
    };

    let extractor = FeatureExtractor::from_config(&config);
    let pipeline = Pipeline::new(config.clone(), extractor, classifier, sink, metrics.clone())?;
    let runner = AgentRunner::new(pipeline, registry);

    if args.live {
        run_live(&runner, &config).await?;
    } else if !args.inputs.is_empty() {
        for input in &args.inputs {
            for state in runner.process_source(input).await {
                report(&state.session_id, state.status, state.error_message.as_deref());
            }
        }
    } else {
        info!("Reading inputs from stdin, one per line");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            info!("Received: {}", input);
            for state in runner.process_source(input).await {
                report(&state.session_id, state.status, state.error_message.as_deref());
            }
        }
    }

    metrics.print_stats().await;
    Ok(())
}

async fn run_live(runner: &AgentRunner, config: &AgentConfig) -> anyhow::Result<()> {
    let live = &config.live;
    let feed: Arc<dyn PriceFeed> = match live.feed {
        FeedKind::Binance => Arc::new(BinanceKlinesFeed::new(&live.binance_url)?),
        FeedKind::Synthetic => Arc::new(SyntheticFeed::new(
            rand::random(),
            rust_decimal::Decimal::try_from(config.default_entry_price)?,
        )),
    };
    info!("Live: {} {} via {}", live.symbol, live.timeframe, feed.name());

    let source = Box::new(LiveChartSource::new(feed, config));
    let session_id = format!("live-{}-{}", live.symbol.to_lowercase(), Uuid::new_v4().simple());
    let stop = Arc::new(AtomicBool::new(false));
    let mut handle = runner.spawn_live(source, session_id, stop.clone());

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, stopping live session...");
            stop.store(true, Ordering::SeqCst);
            None
        }
        joined = &mut handle => Some(joined),
    };
    let state = match finished {
        Some(joined) => joined?,
        None => handle.await?,
    };

    report(&state.session_id, state.status, state.error_message.as_deref());
    Ok(())
}

fn report(session_id: &str, status: SessionStatus, error_message: Option<&str>) {
    match status {
        SessionStatus::Failed => error!(
            "Session {} failed: {}",
            session_id,
            error_message.unwrap_or("unknown error")
        ),
        _ => info!("Session {} {}", session_id, status),
    }
}
