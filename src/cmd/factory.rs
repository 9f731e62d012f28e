//! The `factory_mode` command: load configuration and flow, drive the engine,
//! and map the run outcome to an exit code.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use rackflow::config::Configuration;
use rackflow::device::DeviceRegistry;
use rackflow::engine::ExecutionEngine;
use rackflow::flow::loader::FlowLoader;
use rackflow::handlers::HandlerRegistry;
use rackflow::logging::LogSet;
use rackflow::ops;
use rackflow::output::{self, OutputMode};
use rackflow::progress::FlowProgressTracker;

/// Run a factory flow end to end. Returns the process exit code: 0 when the
/// flow completed, 1 otherwise.
pub async fn cmd_factory_mode(
    config_path: &Path,
    flow_path: &Path,
    log_dir: &Path,
    output_mode: Option<OutputMode>,
) -> Result<i32> {
    let config = Configuration::load(config_path)?;
    let mode = output_mode
        .or_else(|| config.output_mode())
        .unwrap_or(OutputMode::Gui);

    let logs = Arc::new(LogSet::create(log_dir)?);
    logs.engine.info(&format!(
        "factory_mode starting (config: {}, flow: {})",
        config_path.display(),
        flow_path.display()
    ));

    // Registries are populated before loading so the loader can validate
    // every operation and handler reference.
    let operations = Arc::new(ops::builtin_registry());
    let handlers = Arc::new(HandlerRegistry::with_builtins());
    let config = Arc::new(config);

    let flow = FlowLoader::new(&config, &operations, &handlers)
        .load_file(flow_path)
        .context("Flow validation failed")?;

    let tracker = Arc::new(FlowProgressTracker::new(Some(logs.progress_json_path())));
    let devices = Arc::new(DeviceRegistry::new(Arc::clone(&config), Arc::clone(&logs)));

    // Ctrl-C flips the cancellation signal; in-flight capabilities observe it
    // through their context and the engine unwinds to teardown.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let (event_tx, event_rx) = mpsc::channel(256);
    let renderer = output::spawn_renderer(mode, event_rx);

    let engine = ExecutionEngine::new(
        Arc::clone(&config),
        operations,
        devices,
        handlers,
        Arc::clone(&tracker),
        Arc::clone(&logs),
        cancel_rx,
    )
    .with_event_channel(event_tx);

    let outcome = engine.execute(&flow).await;
    drop(engine);
    renderer.await.ok();

    logs.engine.info(&format!(
        "factory_mode finished: success={} ({} completed, {} failed, {:.1}s)",
        outcome.success,
        outcome.completed_flows,
        outcome.failed_flows,
        outcome.duration.as_secs_f64()
    ));

    if mode != OutputMode::None {
        let verdict = if outcome.success {
            style("Completed").green().bold().to_string()
        } else {
            style("Failed").red().bold().to_string()
        };
        println!(
            "{verdict}: {} flows completed, {} failed in {:.1}s",
            outcome.completed_flows,
            outcome.failed_flows,
            outcome.duration.as_secs_f64()
        );
        println!("Progress written to {}", logs.progress_json_path().display());
    }

    Ok(if outcome.success { 0 } else { 1 })
}
