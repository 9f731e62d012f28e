//! Thread-safe execution telemetry and the `flow_progress.json` snapshot.
//!
//! The tracker holds plain records only, never live engine state. All
//! mutating operations take one mutex with short critical sections; snapshots
//! deep-copy the aggregate under the same lock and serialize outside it, so
//! the JSON always reflects a consistent point-in-time view. Derived
//! aggregates (averages, longest step, most-retried step) are recomputed at
//! snapshot time from the step records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use uuid::Uuid;

use crate::flow::{FlowStep, Parameters};

/// Final disposition of one step execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    /// Bypassed by a forward jump; never attempted.
    Skipped,
}

/// Lifecycle of a tracked flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct JumpRecord {
    pub kind: JumpKind,
    pub target: String,
}

/// One attempt-cluster of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepExecution {
    pub execution_id: Uuid,
    pub step_name: String,
    pub operation: String,
    pub device_type: String,
    pub device_id: String,
    pub step_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub parameters: Parameters,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub retry_count: u32,
    pub retry_attempts: u32,
    pub retry_durations: Vec<f64>,
    pub status: StepStatus,
    pub final_result: bool,
    pub error_messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump_taken: Option<JumpRecord>,
    pub optional_flows_triggered: Vec<String>,
    pub optional_flow_results: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handler_executed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handler_result: Option<bool>,
}

/// Per-flow aggregation. Derived fields are filled in at snapshot time.
#[derive(Debug, Clone, Serialize)]
pub struct FlowInfo {
    pub status: FlowStatus,
    pub current_step: String,
    pub completed_steps: usize,
    pub total_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_testtime: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    #[serde(skip)]
    pub parent_flow: Option<String>,
    pub error_messages: Vec<String>,
    pub steps_executed: Vec<StepExecution>,
    pub optional_flows: BTreeMap<String, FlowInfo>,

    // Derived aggregates, recomputed at snapshot time.
    pub retries_executed: u32,
    pub jump_on_success_executed: u32,
    pub jump_on_failure_executed: u32,
    pub failed_steps_count: usize,
    pub average_step_duration: f64,
    pub longest_step_duration: f64,
    pub step_with_most_retries: String,
}

impl FlowInfo {
    fn new(total_steps: usize) -> Self {
        Self {
            status: FlowStatus::Pending,
            current_step: "Not Started".to_string(),
            completed_steps: 0,
            total_steps,
            started_at: None,
            completed_at: None,
            total_testtime: 0.0,
            caller: None,
            parent_flow: None,
            error_messages: Vec::new(),
            steps_executed: Vec::new(),
            optional_flows: BTreeMap::new(),
            retries_executed: 0,
            jump_on_success_executed: 0,
            jump_on_failure_executed: 0,
            failed_steps_count: 0,
            average_step_duration: 0.0,
            longest_step_duration: 0.0,
            step_with_most_retries: String::new(),
        }
    }

    fn recompute_aggregates(&mut self) {
        self.retries_executed = self.steps_executed.iter().map(|s| s.retry_attempts).sum();
        self.jump_on_success_executed = self
            .steps_executed
            .iter()
            .filter(|s| matches!(&s.jump_taken, Some(j) if j.kind == JumpKind::Success))
            .count() as u32;
        self.jump_on_failure_executed = self
            .steps_executed
            .iter()
            .filter(|s| matches!(&s.jump_taken, Some(j) if j.kind == JumpKind::Failure))
            .count() as u32;
        self.failed_steps_count = self
            .steps_executed
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count();

        let finished: Vec<&StepExecution> = self
            .steps_executed
            .iter()
            .filter(|s| s.completed_at.is_some() && s.status != StepStatus::Skipped)
            .collect();
        if finished.is_empty() {
            self.average_step_duration = 0.0;
            self.longest_step_duration = 0.0;
        } else {
            let total: f64 = finished.iter().map(|s| s.duration_seconds).sum();
            self.average_step_duration = total / finished.len() as f64;
            self.longest_step_duration = finished
                .iter()
                .map(|s| s.duration_seconds)
                .fold(0.0, f64::max);
        }
        self.step_with_most_retries = self
            .steps_executed
            .iter()
            .filter(|s| s.retry_attempts > 0)
            .max_by_key(|s| s.retry_attempts)
            .map(|s| s.step_name.clone())
            .unwrap_or_default();
    }
}

/// First free key for a flow name: the name itself, then `name (2)`, ...
fn unique_key(flows: &BTreeMap<String, FlowInfo>, name: &str) -> String {
    if !flows.contains_key(name) {
        return name.to_string();
    }
    let mut suffix = 2;
    loop {
        let key = format!("{name} ({suffix})");
        if !flows.contains_key(&key) {
            return key;
        }
        suffix += 1;
    }
}

#[derive(Default)]
struct TrackerState {
    flows: BTreeMap<String, FlowInfo>,
    step_clocks: HashMap<Uuid, Instant>,
    flow_clocks: HashMap<String, Instant>,
}

impl TrackerState {
    fn flow_mut(&mut self, flow_key: &str) -> &mut FlowInfo {
        self.flows
            .entry(flow_key.to_string())
            .or_insert_with(|| FlowInfo::new(0))
    }

    fn step_mut(&mut self, flow_key: &str, execution_id: Uuid) -> Option<&mut StepExecution> {
        self.flows
            .get_mut(flow_key)?
            .steps_executed
            .iter_mut()
            .find(|s| s.execution_id == execution_id)
    }
}

/// Accumulates step and flow telemetry behind a single monitor lock.
pub struct FlowProgressTracker {
    state: Mutex<TrackerState>,
    json_path: Option<PathBuf>,
}

impl FlowProgressTracker {
    pub fn new(json_path: Option<PathBuf>) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            json_path,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().expect("progress tracker lock poisoned")
    }

    /// Register a flow before it starts (status Pending) and return its
    /// tracker key. Keys are derived from the flow name, suffixed on
    /// collision, so a repeated name cannot clobber an earlier record.
    pub fn register_flow(&self, name: &str, total_steps: usize) -> String {
        let mut state = self.lock();
        let key = unique_key(&state.flows, name);
        state.flows.insert(key.clone(), FlowInfo::new(total_steps));
        key
    }

    /// Register an optional flow triggered by `caller_step` inside
    /// `parent_key`. Same collision-safe keying as [`Self::register_flow`]:
    /// concurrent flows triggering one optional flow name each get their own
    /// record.
    pub fn register_child_flow(
        &self,
        parent_key: &str,
        caller_step: &str,
        name: &str,
        total_steps: usize,
    ) -> String {
        let mut state = self.lock();
        let key = unique_key(&state.flows, name);
        let mut info = FlowInfo::new(total_steps);
        info.parent_flow = Some(parent_key.to_string());
        info.caller = Some(caller_step.to_string());
        state.flows.insert(key.clone(), info);
        key
    }

    /// Mark a flow as running, stamping its start time.
    pub fn flow_started(&self, flow_key: &str, total_steps: usize) {
        let mut state = self.lock();
        state
            .flow_clocks
            .insert(flow_key.to_string(), Instant::now());
        let info = state.flow_mut(flow_key);
        if info.total_steps == 0 {
            info.total_steps = total_steps;
        }
        info.status = FlowStatus::Running;
        info.started_at = Some(Utc::now());
    }

    /// Open a step execution record; returns its id for later updates.
    pub fn step_started(&self, flow_key: &str, step: &FlowStep, step_index: usize) -> Uuid {
        let execution_id = Uuid::new_v4();
        let record = StepExecution {
            execution_id,
            step_name: step.name.clone(),
            operation: step.operation.clone(),
            device_type: step.device_type.to_string(),
            device_id: step.device_id.clone(),
            step_index,
            tag: step.tag.clone(),
            parameters: step.parameters.clone(),
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: 0.0,
            retry_count: step.retry_count,
            retry_attempts: 0,
            retry_durations: Vec::new(),
            status: StepStatus::Running,
            final_result: false,
            error_messages: Vec::new(),
            jump_taken: None,
            optional_flows_triggered: Vec::new(),
            optional_flow_results: BTreeMap::new(),
            error_handler_executed: None,
            error_handler_result: None,
        };
        let mut state = self.lock();
        state.step_clocks.insert(execution_id, Instant::now());
        let info = state.flow_mut(flow_key);
        info.current_step = step.name.clone();
        info.steps_executed.push(record);
        execution_id
    }

    /// Record one failed attempt inside a retry cluster.
    pub fn step_retry(
        &self,
        flow_key: &str,
        execution_id: Uuid,
        attempt_duration: f64,
        error: Option<String>,
    ) {
        let mut state = self.lock();
        if let Some(record) = state.step_mut(flow_key, execution_id) {
            record.retry_attempts += 1;
            record.retry_durations.push(attempt_duration);
            if let Some(error) = error {
                record.error_messages.push(error);
            }
        }
    }

    /// Append an error message without counting a retry (the final attempt).
    pub fn step_error(&self, flow_key: &str, execution_id: Uuid, error: String) {
        let mut state = self.lock();
        if let Some(record) = state.step_mut(flow_key, execution_id) {
            record.error_messages.push(error);
        }
    }

    /// Close a step execution record; returns its wall-clock duration.
    pub fn step_finished(&self, flow_key: &str, execution_id: Uuid, success: bool) -> f64 {
        let mut state = self.lock();
        let duration = state
            .step_clocks
            .remove(&execution_id)
            .map(|clock| clock.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let mut counted = false;
        if let Some(record) = state.step_mut(flow_key, execution_id) {
            record.completed_at = Some(Utc::now());
            record.duration_seconds = duration;
            record.final_result = success;
            record.status = if success {
                StepStatus::Completed
            } else {
                StepStatus::Failed
            };
            counted = success;
        }
        if counted {
            state.flow_mut(flow_key).completed_steps += 1;
        }
        duration
    }

    /// Record a step that a forward jump bypassed.
    pub fn step_skipped(&self, flow_key: &str, step: &FlowStep, step_index: usize) {
        let execution_id = self.step_started(flow_key, step, step_index);
        let mut state = self.lock();
        state.step_clocks.remove(&execution_id);
        if let Some(record) = state.step_mut(flow_key, execution_id) {
            record.status = StepStatus::Skipped;
            record.completed_at = Some(record.started_at);
        }
    }

    pub fn jump_recorded(&self, flow_key: &str, execution_id: Uuid, kind: JumpKind, target: &str) {
        let mut state = self.lock();
        if let Some(record) = state.step_mut(flow_key, execution_id) {
            record.jump_taken = Some(JumpRecord {
                kind,
                target: target.to_string(),
            });
        }
    }

    pub fn optional_flow_triggered(&self, flow_key: &str, execution_id: Uuid, name: &str) {
        let mut state = self.lock();
        if let Some(record) = state.step_mut(flow_key, execution_id) {
            record.optional_flows_triggered.push(name.to_string());
            record.optional_flow_results.insert(name.to_string(), false);
        }
    }

    pub fn optional_flow_result(
        &self,
        flow_key: &str,
        execution_id: Uuid,
        name: &str,
        success: bool,
    ) {
        let mut state = self.lock();
        if let Some(record) = state.step_mut(flow_key, execution_id) {
            record.optional_flow_results.insert(name.to_string(), success);
        }
    }

    pub fn handler_executed(
        &self,
        flow_key: &str,
        execution_id: Uuid,
        name: &str,
        result: bool,
    ) {
        let mut state = self.lock();
        if let Some(record) = state.step_mut(flow_key, execution_id) {
            record.error_handler_executed = Some(name.to_string());
            record.error_handler_result = Some(result);
        }
    }

    /// Close a flow with its final status and optional failure reason.
    pub fn flow_finished(&self, flow_key: &str, status: FlowStatus, error: Option<String>) {
        let mut state = self.lock();
        let testtime = state
            .flow_clocks
            .remove(flow_key)
            .map(|clock| clock.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let info = state.flow_mut(flow_key);
        info.status = status;
        info.completed_at = Some(Utc::now());
        info.total_testtime = testtime;
        if status == FlowStatus::Completed {
            info.current_step = "Done".to_string();
        }
        if let Some(error) = error {
            info.error_messages.push(error);
        }
    }

    pub fn flow_status(&self, flow_key: &str) -> Option<FlowStatus> {
        self.lock().flows.get(flow_key).map(|f| f.status)
    }

    /// Failure reason of the most recent failed step in a flow.
    pub fn last_step_error(&self, flow_key: &str) -> Option<String> {
        let state = self.lock();
        let info = state.flows.get(flow_key)?;
        let step = info
            .steps_executed
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Failed)?;
        let detail = step
            .error_messages
            .last()
            .cloned()
            .unwrap_or_else(|| "no error detail".to_string());
        Some(format!("Step '{}' failed: {detail}", step.step_name))
    }

    /// Point-in-time JSON document: top-level flows keyed by name, optional
    /// flows nested under their parents, derived aggregates recomputed.
    pub fn snapshot(&self) -> serde_json::Value {
        let state = self.lock();
        let mut flows = state.flows.clone();
        drop(state);

        for info in flows.values_mut() {
            info.recompute_aggregates();
        }

        // Nest optional flows under their parents. Children are detached
        // first so a missing parent leaves the child at top level rather
        // than dropping it.
        let child_keys: Vec<String> = flows
            .iter()
            .filter(|(_, info)| info.parent_flow.is_some())
            .map(|(key, _)| key.clone())
            .collect();
        for key in child_keys {
            let child = flows.remove(&key).expect("key collected above");
            let parent_key = child.parent_flow.clone().expect("filtered on parent");
            match flows.get_mut(&parent_key) {
                Some(parent) => {
                    parent.optional_flows.insert(key, child);
                }
                None => {
                    flows.insert(key, child);
                }
            }
        }

        serde_json::json!({ "flows": flows })
    }

    /// Serialize a snapshot and write it to `flow_progress.json`. The file
    /// write happens outside the tracker lock.
    pub fn write_snapshot(&self) {
        let Some(path) = &self.json_path else {
            return;
        };
        let snapshot = self.snapshot();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(text) => {
                if std::fs::write(path, text).is_err() {
                    eprintln!("warning: failed to write {}", path.display());
                }
            }
            Err(e) => eprintln!("warning: failed to serialize progress snapshot: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;

    fn test_step(name: &str) -> FlowStep {
        FlowStep {
            name: name.to_string(),
            device_type: DeviceType::Compute,
            device_id: "tray-0".to_string(),
            operation: "flash_firmware".to_string(),
            parameters: Parameters::new(),
            tag: None,
            retry_count: 2,
            wait_after_seconds: 0,
            wait_between_retries_seconds: 0,
            timeout_seconds: None,
            jump_on_success: None,
            jump_on_failure: None,
            execute_optional_flow: None,
            execute_on_error: None,
        }
    }

    #[test]
    fn test_step_lifecycle_completed() {
        let tracker = FlowProgressTracker::new(None);
        tracker.flow_started("main", 1);
        let id = tracker.step_started("main", &test_step("flash"), 0);
        tracker.step_finished("main", id, true);
        tracker.flow_finished("main", FlowStatus::Completed, None);

        let snapshot = tracker.snapshot();
        let flow = &snapshot["flows"]["main"];
        assert_eq!(flow["status"], "Completed");
        assert_eq!(flow["completed_steps"], 1);
        let step = &flow["steps_executed"][0];
        assert_eq!(step["status"], "completed");
        assert_eq!(step["final_result"], true);
    }

    #[test]
    fn test_retries_are_counted_and_errors_collected() {
        let tracker = FlowProgressTracker::new(None);
        tracker.flow_started("main", 1);
        let id = tracker.step_started("main", &test_step("flash"), 0);
        tracker.step_retry("main", id, 0.5, Some("e1".to_string()));
        tracker.step_retry("main", id, 0.6, Some("e2".to_string()));
        tracker.step_finished("main", id, true);

        let snapshot = tracker.snapshot();
        let flow = &snapshot["flows"]["main"];
        assert_eq!(flow["retries_executed"], 2);
        assert_eq!(flow["step_with_most_retries"], "flash");
        let step = &flow["steps_executed"][0];
        assert_eq!(step["retry_attempts"], 2);
        assert_eq!(step["error_messages"], serde_json::json!(["e1", "e2"]));
    }

    #[test]
    fn test_failed_step_does_not_count_completed() {
        let tracker = FlowProgressTracker::new(None);
        tracker.flow_started("main", 1);
        let id = tracker.step_started("main", &test_step("flash"), 0);
        tracker.step_error("main", id, "bmc timeout".to_string());
        tracker.step_finished("main", id, false);
        tracker.flow_finished(
            "main",
            FlowStatus::Failed,
            tracker.last_step_error("main"),
        );

        let snapshot = tracker.snapshot();
        let flow = &snapshot["flows"]["main"];
        assert_eq!(flow["status"], "Failed");
        assert_eq!(flow["completed_steps"], 0);
        assert_eq!(flow["failed_steps_count"], 1);
        let reason = flow["error_messages"][0].as_str().unwrap();
        assert!(reason.contains("flash"));
        assert!(reason.contains("bmc timeout"));
    }

    #[test]
    fn test_optional_flow_nests_under_parent_with_caller() {
        let tracker = FlowProgressTracker::new(None);
        tracker.flow_started("main", 1);
        let id = tracker.step_started("main", &test_step("A"), 0);
        tracker.optional_flow_triggered("main", id, "R");
        let key = tracker.register_child_flow("main", "A", "R", 1);
        assert_eq!(key, "R");
        tracker.flow_started("R", 1);
        let rid = tracker.step_started("R", &test_step("recover"), 0);
        tracker.step_finished("R", rid, true);
        tracker.flow_finished("R", FlowStatus::Completed, None);
        tracker.optional_flow_result("main", id, "R", true);
        tracker.step_finished("main", id, true);
        tracker.flow_finished("main", FlowStatus::Completed, None);

        let snapshot = tracker.snapshot();
        let optional = &snapshot["flows"]["main"]["optional_flows"]["R"];
        assert_eq!(optional["status"], "Completed");
        assert_eq!(optional["caller"], "A");
        let step = &snapshot["flows"]["main"]["steps_executed"][0];
        assert_eq!(step["optional_flows_triggered"], serde_json::json!(["R"]));
        assert_eq!(step["optional_flow_results"]["R"], true);
    }

    #[test]
    fn test_jump_recorded_on_step() {
        let tracker = FlowProgressTracker::new(None);
        tracker.flow_started("main", 2);
        let id = tracker.step_started("main", &test_step("B"), 0);
        tracker.jump_recorded("main", id, JumpKind::Failure, "end");
        tracker.step_finished("main", id, false);

        let snapshot = tracker.snapshot();
        let flow = &snapshot["flows"]["main"];
        assert_eq!(flow["jump_on_failure_executed"], 1);
        let step = &flow["steps_executed"][0];
        assert_eq!(step["jump_taken"]["kind"], "failure");
        assert_eq!(step["jump_taken"]["target"], "end");
    }

    #[test]
    fn test_skipped_step_recorded_without_duration() {
        let tracker = FlowProgressTracker::new(None);
        tracker.flow_started("main", 2);
        tracker.step_skipped("main", &test_step("C"), 1);
        let snapshot = tracker.snapshot();
        let step = &snapshot["flows"]["main"]["steps_executed"][0];
        assert_eq!(step["status"], "skipped");
        assert_eq!(step["final_result"], false);
        assert_eq!(snapshot["flows"]["main"]["completed_steps"], 0);
    }

    #[test]
    fn test_register_child_flow_disambiguates_colliding_names() {
        let tracker = FlowProgressTracker::new(None);
        tracker.flow_started("x", 1);
        tracker.flow_started("y", 1);

        let first = tracker.register_child_flow("x", "AX", "R", 1);
        let second = tracker.register_child_flow("y", "AY", "R", 1);
        assert_eq!(first, "R");
        assert_eq!(second, "R (2)");

        tracker.flow_started(&first, 1);
        tracker.flow_started(&second, 1);
        tracker.flow_finished(&first, FlowStatus::Completed, None);
        tracker.flow_finished(&second, FlowStatus::Completed, None);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot["flows"]["x"]["optional_flows"]["R"]["caller"], "AX");
        assert_eq!(
            snapshot["flows"]["y"]["optional_flows"]["R (2)"]["caller"],
            "AY"
        );
    }

    #[test]
    fn test_register_flow_suffixes_repeated_names() {
        let tracker = FlowProgressTracker::new(None);
        assert_eq!(tracker.register_flow("f", 1), "f");
        assert_eq!(tracker.register_flow("f", 1), "f (2)");
        assert_eq!(tracker.register_flow("f", 1), "f (3)");
    }

    #[test]
    fn test_snapshot_is_idempotent_without_new_events() {
        let tracker = FlowProgressTracker::new(None);
        tracker.flow_started("main", 1);
        let id = tracker.step_started("main", &test_step("flash"), 0);
        tracker.step_finished("main", id, true);
        tracker.flow_finished("main", FlowStatus::Completed, None);

        let first = serde_json::to_string(&tracker.snapshot()).unwrap();
        let second = serde_json::to_string(&tracker.snapshot()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_write_snapshot_creates_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow_progress.json");
        let tracker = FlowProgressTracker::new(Some(path.clone()));
        tracker.flow_started("main", 0);
        tracker.flow_finished("main", FlowStatus::Completed, None);
        tracker.write_snapshot();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["flows"]["main"]["status"], "Completed");
    }

    #[test]
    fn test_concurrent_updates_from_two_flows() {
        use std::sync::Arc;
        let tracker = Arc::new(FlowProgressTracker::new(None));
        let mut handles = Vec::new();
        for flow in ["x", "y"] {
            let tracker = Arc::clone(&tracker);
            handles.push(std::thread::spawn(move || {
                tracker.flow_started(flow, 10);
                for i in 0..10 {
                    let id = tracker.step_started(flow, &test_step(&format!("s{i}")), i);
                    tracker.step_finished(flow, id, true);
                }
                tracker.flow_finished(flow, FlowStatus::Completed, None);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot["flows"]["x"]["completed_steps"], 10);
        assert_eq!(snapshot["flows"]["y"]["completed_steps"], 10);
    }
}
