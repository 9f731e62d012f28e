//! Events emitted during flow execution.
//!
//! The engine emits the same event stream regardless of presentation; the
//! output renderers subscribe and decide what to show. Events are also
//! serializable so external tooling can tail them.

use serde::Serialize;

use crate::progress::{FlowStatus, JumpKind};

/// One engine-level event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// A batch of independent flows is about to run (concurrently if > 1).
    BatchStarted { flows: Vec<String> },
    /// A flow began executing.
    FlowStarted { flow: String, total_steps: usize },
    /// One attempt of a step began (attempt 0 is the first try).
    StepStarted {
        flow: String,
        step: String,
        attempt: u32,
    },
    /// A step's attempt cluster finished.
    StepFinished {
        flow: String,
        step: String,
        success: bool,
        duration_seconds: f64,
    },
    /// A jump moved the flow's instruction pointer.
    JumpTaken {
        flow: String,
        kind: JumpKind,
        from: String,
        to: String,
    },
    /// A failing step triggered its recovery flow.
    OptionalFlowTriggered {
        flow: String,
        caller: String,
        name: String,
    },
    /// A flow reached a terminal status.
    FlowFinished { flow: String, status: FlowStatus },
    /// The whole run finished.
    EngineFinished {
        success: bool,
        completed_flows: usize,
        failed_flows: usize,
        duration_seconds: f64,
    },
}
