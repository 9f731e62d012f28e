//! The capability seam and operation registry.
//!
//! A `Capability` is an invocable operation registered for a device type.
//! Capabilities own their I/O and timeouts; the engine hands them a device
//! handle, the post-expansion parameters, and a context carrying the step
//! deadline and the run's cancellation signal.
//!
//! Vendor device libraries (Redfish, SSH, PLDM) plug in here. The built-ins
//! registered by [`builtin_registry`] are the transport-free operations every
//! platform needs: timed waits, operator log lines, and external tool runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::device::{DeviceHandle, DeviceType};
use crate::errors::EngineError;
use crate::flow::Parameters;
use crate::logging::LogSet;

/// Result of one capability invocation.
#[derive(Debug, Clone)]
pub struct OpOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl OpOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Per-invocation context passed alongside the parameters.
///
/// The capability is responsible for honoring the deadline and for checking
/// the cancellation signal during long I/O; the engine never force-kills an
/// invocation.
#[derive(Clone)]
pub struct CapabilityContext {
    pub timeout: Option<Duration>,
    pub cancel: watch::Receiver<bool>,
    pub logs: Arc<LogSet>,
}

impl CapabilityContext {
    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// An invocable operation on one device type.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(
        &self,
        handle: &DeviceHandle,
        parameters: &Parameters,
        ctx: &CapabilityContext,
    ) -> OpOutcome;
}

/// Static dispatch table `(device_type, operation) -> Capability`.
///
/// Populated once at program start; the engine reads it without locking.
#[derive(Default)]
pub struct OperationRegistry {
    operations: BTreeMap<(DeviceType, String), Arc<dyn Capability>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        device_type: DeviceType,
        operation: &str,
        capability: Arc<dyn Capability>,
    ) {
        self.operations
            .insert((device_type, operation.to_string()), capability);
    }

    pub fn contains(&self, device_type: DeviceType, operation: &str) -> bool {
        self.operations
            .contains_key(&(device_type, operation.to_string()))
    }

    pub fn get(&self, device_type: DeviceType, operation: &str) -> Option<Arc<dyn Capability>> {
        self.operations
            .get(&(device_type, operation.to_string()))
            .cloned()
    }
}

/// Sleep for `parameters.seconds`, waking early on cancellation.
struct WaitOp;

#[async_trait]
impl Capability for WaitOp {
    async fn invoke(
        &self,
        handle: &DeviceHandle,
        parameters: &Parameters,
        ctx: &CapabilityContext,
    ) -> OpOutcome {
        let seconds = match parameters.get("seconds").and_then(|v| v.as_u64()) {
            Some(s) => s,
            None => return OpOutcome::failure("wait requires an integer 'seconds' parameter"),
        };
        ctx.logs
            .device(handle.device_type)
            .info(&format!("{} - waiting {seconds}s", handle.device_id));

        if ctx.cancelled() {
            return OpOutcome::failure("wait interrupted by cancellation");
        }
        let mut cancel = ctx.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => OpOutcome::success(),
            _ = cancel.changed() => OpOutcome::failure("wait interrupted by cancellation"),
        }
    }
}

/// Write `parameters.message` to the device-type operation log.
struct LogMessageOp;

#[async_trait]
impl Capability for LogMessageOp {
    async fn invoke(
        &self,
        handle: &DeviceHandle,
        parameters: &Parameters,
        ctx: &CapabilityContext,
    ) -> OpOutcome {
        let message = match parameters.get("message").and_then(|v| v.as_str()) {
            Some(m) => m,
            None => return OpOutcome::failure("log_message requires a string 'message' parameter"),
        };
        ctx.logs
            .device(handle.device_type)
            .info(&format!("{} - {message}", handle.device_id));
        OpOutcome::success()
    }
}

/// Run an external command (`parameters.command` + optional `args` list),
/// succeeding on exit status zero. Honors the step deadline.
struct RunCommandOp;

#[async_trait]
impl Capability for RunCommandOp {
    async fn invoke(
        &self,
        handle: &DeviceHandle,
        parameters: &Parameters,
        ctx: &CapabilityContext,
    ) -> OpOutcome {
        let command = match parameters.get("command").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return OpOutcome::failure("run_command requires a string 'command' parameter"),
        };
        let args: Vec<String> = parameters
            .get("args")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        ctx.logs.device(handle.device_type).info(&format!(
            "{} - running: {command} {}",
            handle.device_id,
            args.join(" ")
        ));

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(&args);
        let run = async {
            match cmd.output().await {
                Ok(output) if output.status.success() => OpOutcome::success(),
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    OpOutcome::failure(format!(
                        "{command} exited with {}: {}",
                        output.status,
                        stderr.trim()
                    ))
                }
                Err(e) => OpOutcome::failure(format!("failed to spawn {command}: {e}")),
            }
        };

        match ctx.timeout {
            Some(deadline) => match tokio::time::timeout(deadline, run).await {
                Ok(outcome) => outcome,
                Err(_) => OpOutcome::failure(format!(
                    "{command}: {}",
                    EngineError::CapabilityTimeout {
                        seconds: deadline.as_secs()
                    }
                )),
            },
            None => run.await,
        }
    }
}

/// The operation set available without a vendor device library.
pub fn builtin_registry() -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    let wait: Arc<dyn Capability> = Arc::new(WaitOp);
    let log_message: Arc<dyn Capability> = Arc::new(LogMessageOp);
    let run_command: Arc<dyn Capability> = Arc::new(RunCommandOp);
    for device_type in [DeviceType::Compute, DeviceType::Switch] {
        registry.register(device_type, "wait", Arc::clone(&wait));
        registry.register(device_type, "log_message", Arc::clone(&log_message));
        registry.register(device_type, "run_command", Arc::clone(&run_command));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use tempfile::tempdir;

    fn test_handle() -> DeviceHandle {
        let yaml = "ip: 10.0.0.1\nuser: admin\npassword: secret";
        let connection: ConnectionConfig = serde_yaml::from_str(yaml).unwrap();
        DeviceHandle::new(DeviceType::Compute, "tray-0", connection)
    }

    fn test_ctx(dir: &std::path::Path) -> (CapabilityContext, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let ctx = CapabilityContext {
            timeout: None,
            cancel: rx,
            logs: Arc::new(LogSet::create(dir).unwrap()),
        };
        (ctx, tx)
    }

    #[tokio::test]
    async fn test_registry_lookup_is_per_device_type() {
        let registry = builtin_registry();
        assert!(registry.contains(DeviceType::Compute, "wait"));
        assert!(registry.contains(DeviceType::Switch, "wait"));
        assert!(!registry.contains(DeviceType::Compute, "flash_firmware"));
    }

    #[tokio::test]
    async fn test_wait_requires_seconds() {
        let dir = tempdir().unwrap();
        let (ctx, _tx) = test_ctx(dir.path());
        let outcome = WaitOp.invoke(&test_handle(), &Parameters::new(), &ctx).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("seconds"));
    }

    #[tokio::test]
    async fn test_wait_aborts_on_cancellation() {
        let dir = tempdir().unwrap();
        let (ctx, tx) = test_ctx(dir.path());
        let mut params = Parameters::new();
        params.insert("seconds".to_string(), serde_json::json!(3600));

        let handle = test_handle();
        let invoke = WaitOp.invoke(&handle, &params, &ctx);
        tx.send(true).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), invoke)
            .await
            .expect("cancellation should end the wait promptly");
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_log_message_writes_device_log() {
        let dir = tempdir().unwrap();
        let (ctx, _tx) = test_ctx(dir.path());
        let mut params = Parameters::new();
        params.insert("message".to_string(), serde_json::json!("starting flash"));
        let outcome = LogMessageOp.invoke(&test_handle(), &params, &ctx).await;
        assert!(outcome.success);
        let text =
            std::fs::read_to_string(dir.path().join("compute_factory_flow.log")).unwrap();
        assert!(text.contains("tray-0 - starting flash"));
    }

    #[tokio::test]
    async fn test_run_command_reports_nonzero_exit() {
        let dir = tempdir().unwrap();
        let (ctx, _tx) = test_ctx(dir.path());
        let mut params = Parameters::new();
        params.insert("command".to_string(), serde_json::json!("false"));
        let outcome = RunCommandOp.invoke(&test_handle(), &params, &ctx).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_run_command_success() {
        let dir = tempdir().unwrap();
        let (ctx, _tx) = test_ctx(dir.path());
        let mut params = Parameters::new();
        params.insert("command".to_string(), serde_json::json!("true"));
        let outcome = RunCommandOp.invoke(&test_handle(), &params, &ctx).await;
        assert!(outcome.success, "{:?}", outcome.error);
    }
}
