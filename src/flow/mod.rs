//! Flow graph datatypes.
//!
//! Four node kinds make up the workflow DSL: `FlowStep` (one operation on one
//! device), `ParallelStep` (concurrent children), `IndependentFlow` (a
//! self-contained, tag-isolated step list), and optional flows (independent
//! flows triggerable by `execute_optional_flow`). The loader produces these;
//! the engine treats them as immutable.

pub mod loader;

use serde::Serialize;
use std::collections::BTreeMap;

use crate::device::DeviceType;

/// Post-expansion step parameters, handed to capabilities verbatim.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// The atomic unit: one operation on one device, with retry and flow-control
/// options.
#[derive(Debug, Clone, Serialize)]
pub struct FlowStep {
    /// Display name; defaults to the operation name.
    pub name: String,
    pub device_type: DeviceType,
    pub device_id: String,
    pub operation: String,
    pub parameters: Parameters,
    pub tag: Option<String>,
    pub retry_count: u32,
    pub wait_after_seconds: u64,
    pub wait_between_retries_seconds: u64,
    pub timeout_seconds: Option<u64>,
    pub jump_on_success: Option<String>,
    pub jump_on_failure: Option<String>,
    pub execute_optional_flow: Option<String>,
    pub execute_on_error: Option<String>,
}

/// A group of steps executed concurrently. Succeeds iff every child succeeds.
#[derive(Debug, Clone, Serialize)]
pub struct ParallelStep {
    pub name: String,
    pub children: Vec<FlowStep>,
    pub max_workers: usize,
}

/// One entry in an independent flow's step list.
#[derive(Debug, Clone, Serialize)]
pub enum StepNode {
    Step(FlowStep),
    Parallel(ParallelStep),
}

impl StepNode {
    pub fn name(&self) -> &str {
        match self {
            StepNode::Step(s) => &s.name,
            StepNode::Parallel(p) => &p.name,
        }
    }

    /// Number of leaf steps under this node, for progress totals.
    pub fn leaf_count(&self) -> usize {
        match self {
            StepNode::Step(_) => 1,
            StepNode::Parallel(p) => p.children.len(),
        }
    }
}

/// A self-contained flow with its own tag scope and instruction pointer.
#[derive(Debug, Clone, Serialize)]
pub struct IndependentFlow {
    pub name: String,
    pub steps: Vec<StepNode>,
}

impl IndependentFlow {
    /// Total leaf steps, for the progress tracker.
    pub fn total_steps(&self) -> usize {
        self.steps.iter().map(StepNode::leaf_count).sum()
    }

    /// Tag-to-index map over this flow's scope.
    pub fn tag_indices(&self) -> BTreeMap<String, usize> {
        let mut map = BTreeMap::new();
        for (i, node) in self.steps.iter().enumerate() {
            if let StepNode::Step(step) = node {
                if let Some(tag) = &step.tag {
                    map.insert(tag.clone(), i);
                }
            }
        }
        map
    }
}

/// One entry in the top-level step list.
#[derive(Debug, Clone, Serialize)]
pub enum FlowEntry {
    Step(FlowStep),
    Parallel(ParallelStep),
    /// A group of independent flows declared together; consecutive top-level
    /// groups are merged into one concurrent batch by the engine.
    Independent(Vec<IndependentFlow>),
}

/// A fully validated flow: the ordered top-level entries, the optional flows
/// they may trigger, and the flow-level error handler, if any.
#[derive(Debug, Clone, Serialize)]
pub struct Flow {
    pub entries: Vec<FlowEntry>,
    pub optional_flows: BTreeMap<String, IndependentFlow>,
    /// Flow-level error handler name, from flow settings or configuration.
    pub on_error: Option<String>,
}
