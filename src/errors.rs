//! Typed error hierarchy for the rackflow orchestrator.
//!
//! Two top-level enums cover the two phases of a run:
//! - `ValidationError`: load-time failures (YAML shape, dangling references,
//!   undefined variables). Always fatal, always reported with a path into the
//!   offending document.
//! - `EngineError`: runtime failures inside the execution engine. These are
//!   caught at the engine boundary and surface only through flow status and
//!   telemetry.

use thiserror::Error;

/// Errors raised while loading configuration or flow YAML.
///
/// Every variant carries enough context to point the operator at the exact
/// document location. Loading never partially succeeds: the first validation
/// error aborts the load.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{path}: missing required field '{field}'")]
    MissingField { path: String, field: String },

    #[error("{path}: expected {expected}")]
    TypeMismatch { path: String, expected: String },

    #[error("{path}: invalid device_type '{value}' (expected one of: compute, switch)")]
    InvalidDeviceType { path: String, value: String },

    #[error("{path}: no connection entry for {device_type} device '{device_id}'")]
    UnknownConnection {
        path: String,
        device_type: String,
        device_id: String,
    },

    #[error("{path}: operation '{operation}' is not registered for device type {device_type}")]
    UnknownOperation {
        path: String,
        device_type: String,
        operation: String,
    },

    #[error("{path}: duplicate tag '{tag}' (first defined at {first})")]
    DuplicateTag {
        path: String,
        tag: String,
        first: String,
    },

    #[error("{path}: jump target '{target}' does not resolve to a tag in this scope")]
    UnknownJumpTarget { path: String, target: String },

    #[error("{path}: parallel steps cannot carry jump targets")]
    JumpInParallelStep { path: String },

    #[error("{path}: optional flow '{name}' is not defined")]
    UnknownOptionalFlow { path: String, name: String },

    #[error("{path}: error handler '{name}' is not registered")]
    UnknownErrorHandler { path: String, name: String },

    #[error("circular jump_on_failure chain: {cycle}")]
    CircularJump { cycle: String },

    #[error("circular execute_optional_flow reference: {cycle}")]
    CircularOptionalFlow { cycle: String },

    #[error("undefined variable '{name}' referenced at {path}")]
    VariableNotDefined { name: String, path: String },
}

/// Errors raised during flow execution.
///
/// None of these propagate past the engine boundary; they are recorded in the
/// progress tracker and folded into the flow's final status.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Capability(String),

    #[error("operation exceeded its {seconds}s deadline")]
    CapabilityTimeout { seconds: u64 },

    #[error("step {step_index} visited {visits} times, exceeding the loop cap of {cap}")]
    LoopDetected {
        step_index: usize,
        visits: u32,
        cap: u32,
    },

    #[error("flow execution cancelled")]
    Cancelled,

    #[error("error handler '{name}' failed: {message}")]
    Handler { name: String, message: String },

    #[error("no device handle available for {device_type} '{device_id}'")]
    UnknownDevice {
        device_type: String,
        device_id: String,
    },
}

impl EngineError {
    /// Timeouts are reported distinctly but handled exactly like any other
    /// capability failure.
    pub fn is_capability_failure(&self) -> bool {
        matches!(
            self,
            EngineError::Capability(_) | EngineError::CapabilityTimeout { .. }
        )
    }
}
