//! Error-handler registry and built-in handlers.
//!
//! Handlers are referenced by name from flow YAML and resolved through the
//! registry at load time. One handler can serve both call shapes: step-level
//! (`step` is `Some`, the return value decides whether the flow continues)
//! and flow-level (`step` is `None`, the return value is ignored).
//!
//! Handlers are diagnostic, not corrective: recovery belongs to optional
//! flows, which run before any handler fires.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::device::DeviceType;
use crate::flow::FlowStep;
use crate::logging::LogSet;

/// Context handed to every handler invocation: the run's variables, the log
/// directory, and the devices the flow has touched so far.
pub struct HandlerContext {
    pub variables: BTreeMap<String, serde_yaml::Value>,
    pub log_dir: PathBuf,
    pub devices: Vec<(DeviceType, String, ConnectionConfig)>,
    pub logs: Arc<LogSet>,
}

impl HandlerContext {
    fn variable_str(&self, name: &str) -> Option<String> {
        self.variables.get(name)?.as_str().map(str::to_string)
    }
}

/// A named error handler.
///
/// Returning `Ok(true)` from a step-level invocation means "recovered,
/// continue the flow". Errors are logged by the engine and treated as a
/// `false` return; they never propagate outward.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(
        &self,
        step: Option<&FlowStep>,
        error: &str,
        ctx: &HandlerContext,
    ) -> anyhow::Result<bool>;
}

/// Name-to-handler dispatch table, populated at program start.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn ErrorHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("default_error_handler", Arc::new(DefaultErrorHandler));
        registry.register(
            "error_handler_collect_nvdebug_logs",
            Arc::new(CollectNvdebugLogs),
        );
        registry
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn ErrorHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ErrorHandler>> {
        self.handlers.get(name).cloned()
    }
}

/// Logs the failure and aborts the flow.
pub struct DefaultErrorHandler;

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle(
        &self,
        step: Option<&FlowStep>,
        error: &str,
        ctx: &HandlerContext,
    ) -> anyhow::Result<bool> {
        match step {
            Some(step) => ctx.logs.engine.error(&format!(
                "{} - step {} failed: {error}",
                step.device_id, step.name
            )),
            None => ctx.logs.engine.error(&format!("flow failed: {error}")),
        }
        Ok(false)
    }
}

/// Runs the external `nvdebug` diagnostic collector against every device the
/// flow has touched, writing each device's bundle under the log directory.
/// Typically wired as the flow-level handler.
pub struct CollectNvdebugLogs;

#[async_trait]
impl ErrorHandler for CollectNvdebugLogs {
    async fn handle(
        &self,
        step: Option<&FlowStep>,
        error: &str,
        ctx: &HandlerContext,
    ) -> anyhow::Result<bool> {
        match step {
            Some(step) => ctx.logs.engine.error(&format!(
                "{} - step {} failed: {error}, collecting diagnostics",
                step.device_id, step.name
            )),
            None => ctx
                .logs
                .engine
                .error(&format!("flow failed: {error}, collecting diagnostics")),
        }

        let nvdebug_path = ctx
            .variable_str("nvdebug_path")
            .unwrap_or_else(|| "nvdebug".to_string());

        for (device_type, device_id, connection) in &ctx.devices {
            let out_dir = ctx.log_dir.join(format!("nvdebug_logs_{device_id}"));
            // A prior handler invocation in this run already collected.
            if out_dir.exists() {
                ctx.logs.engine.info(&format!(
                    "{device_id} - diagnostic bundle already present, skipping collection"
                ));
                continue;
            }
            if let Err(e) = std::fs::create_dir_all(&out_dir) {
                ctx.logs
                    .engine
                    .error(&format!("{device_id} - could not create {}: {e}", out_dir.display()));
                continue;
            }

            let platform = match device_type {
                DeviceType::Compute => "arm64",
                DeviceType::Switch => "NVSwitch",
            };
            let output = tokio::process::Command::new(&nvdebug_path)
                .arg("-i")
                .arg(&connection.ip)
                .arg("-u")
                .arg(&connection.user)
                .arg("-p")
                .arg(&connection.password)
                .arg("-t")
                .arg(platform)
                .arg("-o")
                .arg(&out_dir)
                .output()
                .await;

            match output {
                Ok(out) if out.status.success() => {
                    ctx.logs
                        .engine
                        .info(&format!("{device_id} - diagnostics collected"));
                }
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    ctx.logs.engine.error(&format!(
                        "{device_id} - diagnostic collection failed: {}",
                        stderr.trim()
                    ));
                }
                Err(e) => {
                    ctx.logs.engine.error(&format!(
                        "{device_id} - could not run {nvdebug_path}: {e}"
                    ));
                }
            }
        }

        Ok(false)
    }
}
