//! Engine scenario tests over scripted mock capabilities.

use super::*;
use crate::expand::expand_tree;
use crate::flow::loader::FlowLoader;
use crate::flow::Parameters;
use crate::handlers::ErrorHandler;
use crate::ops::{Capability, OpOutcome};
use crate::device::{DeviceHandle, DeviceType};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tempfile::tempdir;

const TEST_CONFIG: &str = r#"
variables: {}
connection:
  compute:
    tray-0: { ip: 10.0.0.10, user: admin, password: secret }
    tray-1: { ip: 10.0.0.11, user: admin, password: secret }
  switch:
    sw-0: { ip: 10.0.0.20, user: admin, password: secret }
settings:
  default_retry_count: 0
"#;

/// A capability that replays a scripted outcome sequence, then succeeds.
struct Scripted {
    outcomes: Mutex<VecDeque<Result<(), String>>>,
    calls: AtomicU32,
    delay_ms: u64,
}

impl Scripted {
    fn new(outcomes: &[Result<(), &str>]) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(
                outcomes
                    .iter()
                    .map(|o| o.map_err(str::to_string))
                    .collect(),
            ),
            calls: AtomicU32::new(0),
            delay_ms: 0,
        })
    }

    fn succeeding() -> Arc<Self> {
        Self::new(&[])
    }

    fn slow(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            delay_ms,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for Scripted {
    async fn invoke(
        &self,
        _handle: &DeviceHandle,
        _parameters: &Parameters,
        _ctx: &CapabilityContext,
    ) -> OpOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Err(message)) => OpOutcome::failure(message),
            _ => OpOutcome::success(),
        }
    }
}

/// An error handler that records its invocations.
struct Recording {
    calls: AtomicU32,
    result: bool,
}

impl Recording {
    fn returning(result: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            result,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ErrorHandler for Recording {
    async fn handle(
        &self,
        _step: Option<&FlowStep>,
        _error: &str,
        _ctx: &HandlerContext,
    ) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result)
    }
}

struct Harness {
    operations: OperationRegistry,
    handlers: HandlerRegistry,
    config: String,
}

impl Harness {
    fn new() -> Self {
        Self {
            operations: OperationRegistry::new(),
            handlers: HandlerRegistry::with_builtins(),
            config: TEST_CONFIG.to_string(),
        }
    }

    fn with_config(mut self, config: &str) -> Self {
        self.config = config.to_string();
        self
    }

    fn op(mut self, name: &str, capability: Arc<dyn Capability>) -> Self {
        for device_type in [DeviceType::Compute, DeviceType::Switch] {
            self.operations
                .register(device_type, name, Arc::clone(&capability));
        }
        self
    }

    fn handler(mut self, name: &str, handler: Arc<dyn ErrorHandler>) -> Self {
        self.handlers.register(name, handler);
        self
    }

    async fn run(self, flow_yaml: &str) -> (EngineOutcome, serde_json::Value) {
        let dir = tempdir().unwrap();
        let config: Arc<Configuration> =
            Arc::new(serde_yaml::from_str(&self.config).unwrap());
        let operations = Arc::new(self.operations);
        let handlers = Arc::new(self.handlers);

        let tree: serde_yaml::Value = serde_yaml::from_str(flow_yaml).unwrap();
        let expanded = expand_tree(&tree, &config.variables).unwrap();
        let flow = FlowLoader::new(&config, &operations, &handlers)
            .load(&expanded)
            .unwrap();

        let logs = Arc::new(LogSet::create(dir.path()).unwrap());
        let tracker = Arc::new(FlowProgressTracker::new(None));
        let devices = Arc::new(DeviceRegistry::new(
            Arc::clone(&config),
            Arc::clone(&logs),
        ));
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let engine = ExecutionEngine::new(
            config,
            operations,
            devices,
            handlers,
            Arc::clone(&tracker),
            logs,
            cancel_rx,
        );
        let outcome = engine.execute(&flow).await;
        (outcome, tracker.snapshot())
    }
}

fn step_yaml(op: &str) -> String {
    format!("{{ device_type: compute, device_id: tray-0, operation: {op} }}")
}

#[tokio::test]
async fn test_happy_path_two_linear_steps() {
    let s1 = Scripted::succeeding();
    let s2 = Scripted::succeeding();
    let flow = r#"
steps:
  - name: g
    independent_flows:
      - name: main
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_s1, name: s1 }
          - { device_type: compute, device_id: tray-0, operation: op_s2, name: s2 }
"#;
    let (outcome, snapshot) = Harness::new()
        .op("op_s1", s1.clone())
        .op("op_s2", s2.clone())
        .run(flow)
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.completed_flows, 1);
    let main = &snapshot["flows"]["main"];
    assert_eq!(main["status"], "Completed");
    assert_eq!(main["completed_steps"], 2);
    assert_eq!(main["steps_executed"].as_array().unwrap().len(), 2);
    assert_eq!(main["retries_executed"], 0);
    assert_eq!(main["jump_on_success_executed"], 0);
    assert_eq!(main["jump_on_failure_executed"], 0);
    assert_eq!(s1.calls(), 1);
    assert_eq!(s2.calls(), 1);
}

#[tokio::test]
async fn test_bare_steps_are_wrapped_into_single_step_flows() {
    let op = Scripted::succeeding();
    let flow = format!("steps:\n  - {}\n  - {}\n", step_yaml("op_x"), step_yaml("op_x"));
    let (outcome, snapshot) = Harness::new().op("op_x", op.clone()).run(&flow).await;

    assert!(outcome.success);
    assert_eq!(outcome.completed_flows, 2);
    let flows = snapshot["flows"].as_object().unwrap();
    assert!(flows.contains_key("Single Step: op_x"));
    assert!(flows.contains_key("Single Step: op_x (2)"));
    assert_eq!(op.calls(), 2);
}

#[tokio::test]
async fn test_retry_then_success() {
    let op = Scripted::new(&[Err("e1"), Err("e2"), Ok(())]);
    let flow = r#"
steps:
  - name: g
    independent_flows:
      - name: main
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_flaky, retry_count: 2 }
"#;
    let (outcome, snapshot) = Harness::new().op("op_flaky", op.clone()).run(flow).await;

    assert!(outcome.success);
    let steps = snapshot["flows"]["main"]["steps_executed"]
        .as_array()
        .unwrap();
    assert_eq!(steps.len(), 1);
    let record = &steps[0];
    assert_eq!(record["retry_attempts"], 2);
    assert_eq!(record["final_result"], true);
    assert_eq!(record["status"], "completed");
    assert_eq!(record["error_messages"], serde_json::json!(["e1", "e2"]));
    assert_eq!(op.calls(), 3);
}

#[tokio::test]
async fn test_retry_count_zero_means_one_attempt() {
    let op = Scripted::new(&[Err("boom")]);
    let flow = format!("steps:\n  - {}\n", step_yaml("op_once"));
    let (outcome, _) = Harness::new().op("op_once", op.clone()).run(&flow).await;
    assert!(!outcome.success);
    assert_eq!(op.calls(), 1);
}

#[tokio::test]
async fn test_optional_flow_rescues_failing_step() {
    // A fails once, recovery flow runs, the fresh retry cluster succeeds.
    let op_a = Scripted::new(&[Err("fail1"), Ok(())]);
    let op_r = Scripted::succeeding();
    let flow = r#"
optional_flows:
  R:
    - { device_type: compute, device_id: tray-0, operation: op_recover, name: recover }
steps:
  - name: g
    independent_flows:
      - name: main
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_a, name: A,
              retry_count: 0, execute_optional_flow: R }
"#;
    let (outcome, snapshot) = Harness::new()
        .op("op_a", op_a.clone())
        .op("op_recover", op_r.clone())
        .run(flow)
        .await;

    assert!(outcome.success);
    let main = &snapshot["flows"]["main"];
    assert_eq!(main["status"], "Completed");

    let steps = main["steps_executed"].as_array().unwrap();
    assert_eq!(steps.len(), 2, "one failed cluster, one fresh cluster");
    assert_eq!(steps[0]["status"], "failed");
    assert_eq!(
        steps[0]["optional_flows_triggered"],
        serde_json::json!(["R"])
    );
    assert_eq!(steps[0]["optional_flow_results"]["R"], true);
    assert_eq!(steps[1]["status"], "completed");

    let recovery = &main["optional_flows"]["R"];
    assert_eq!(recovery["status"], "Completed");
    assert_eq!(recovery["caller"], "A");
    assert_eq!(op_a.calls(), 2);
    assert_eq!(op_r.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_flows_triggering_same_optional_flow_keep_separate_records() {
    // Both flows fail their step once and trigger the recovery flow named R;
    // each trigger must keep its own tracker record under a distinct key.
    let op_x = Scripted::new(&[Err("x down"), Ok(())]);
    let op_y = Scripted::new(&[Err("y down"), Ok(())]);
    let op_r = Scripted::succeeding();
    let flow = r#"
optional_flows:
  R:
    - { device_type: compute, device_id: tray-0, operation: op_recover }
steps:
  - name: g
    independent_flows:
      - name: X
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_x, name: AX,
              retry_count: 0, execute_optional_flow: R }
      - name: Y
        steps:
          - { device_type: compute, device_id: tray-1, operation: op_y, name: AY,
              retry_count: 0, execute_optional_flow: R }
"#;
    let (outcome, snapshot) = Harness::new()
        .op("op_x", op_x.clone())
        .op("op_y", op_y.clone())
        .op("op_recover", op_r.clone())
        .run(flow)
        .await;

    assert!(outcome.success);
    assert_eq!(op_r.calls(), 2, "each trigger runs its own recovery");

    let mut seen_keys = Vec::new();
    for (flow_name, caller) in [("X", "AX"), ("Y", "AY")] {
        let info = &snapshot["flows"][flow_name];
        assert_eq!(info["status"], "Completed");

        let nested = info["optional_flows"].as_object().unwrap();
        assert_eq!(nested.len(), 1, "{flow_name} owns exactly one recovery record");
        let (key, recovery) = nested.iter().next().unwrap();
        assert_eq!(recovery["status"], "Completed");
        assert_eq!(recovery["caller"], caller);

        // The step's trigger entry matches its nested record's key.
        let steps = info["steps_executed"].as_array().unwrap();
        let failed = steps.iter().find(|s| s["status"] == "failed").unwrap();
        assert_eq!(
            failed["optional_flows_triggered"],
            serde_json::json!([key.as_str()])
        );
        assert_eq!(failed["optional_flow_results"][key.as_str()], true);
        seen_keys.push(key.clone());
    }

    seen_keys.sort();
    assert_eq!(seen_keys, vec!["R".to_string(), "R (2)".to_string()]);
}

#[tokio::test]
async fn test_optional_flow_failure_fails_flow_immediately() {
    // Level A failure preempts Levels B and C.
    let op_a = Scripted::new(&[Err("fail1")]);
    let op_r = Scripted::new(&[Err("recovery failed")]);
    let handler = Recording::returning(true);
    let flow = r#"
optional_flows:
  R:
    - { device_type: compute, device_id: tray-0, operation: op_recover }
steps:
  - name: g
    independent_flows:
      - name: main
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_a, name: A,
              retry_count: 0, execute_optional_flow: R, execute_on_error: recover,
              jump_on_failure: end }
          - { device_type: compute, device_id: tray-0, operation: op_a, name: D, tag: end }
"#;
    let (outcome, snapshot) = Harness::new()
        .op("op_a", op_a.clone())
        .op("op_recover", op_r)
        .handler("recover", handler.clone())
        .run(flow)
        .await;

    assert!(!outcome.success);
    assert_eq!(snapshot["flows"]["main"]["status"], "Failed");
    assert_eq!(handler.calls(), 0, "handler must not fire after Level A failure");
    assert_eq!(op_a.calls(), 1, "no jump, no re-execution");
    assert_eq!(
        snapshot["flows"]["main"]["optional_flows"]["R"]["status"],
        "Failed"
    );
}

#[tokio::test]
async fn test_jump_on_failure_bypasses_handler() {
    let op_ok = Scripted::succeeding();
    let op_b = Scripted::new(&[Err("b failed")]);
    let handler = Recording::returning(true);
    let flow = r#"
steps:
  - name: g
    independent_flows:
      - name: main
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_ok, name: A, tag: start }
          - { device_type: compute, device_id: tray-0, operation: op_b, name: B, tag: mid,
              retry_count: 0, jump_on_failure: end, execute_on_error: h }
          - { device_type: compute, device_id: tray-0, operation: op_ok, name: C, tag: tail }
          - { device_type: compute, device_id: tray-0, operation: op_ok, name: D, tag: end }
"#;
    let (outcome, snapshot) = Harness::new()
        .op("op_ok", op_ok)
        .op("op_b", op_b)
        .handler("h", handler.clone())
        .run(flow)
        .await;

    assert!(outcome.success, "flow completes via D");
    assert_eq!(handler.calls(), 0, "jump preempts the step handler");

    let main = &snapshot["flows"]["main"];
    assert_eq!(main["status"], "Completed");
    assert_eq!(main["jump_on_failure_executed"], 1);

    let steps = main["steps_executed"].as_array().unwrap();
    let b = steps.iter().find(|s| s["step_name"] == "B").unwrap();
    assert_eq!(b["jump_taken"]["kind"], "failure");
    assert_eq!(b["jump_taken"]["target"], "end");
    let c = steps.iter().find(|s| s["step_name"] == "C").unwrap();
    assert_eq!(c["status"], "skipped");
    let d = steps.iter().find(|s| s["step_name"] == "D").unwrap();
    assert_eq!(d["status"], "completed");
}

#[tokio::test]
async fn test_step_handler_recovers_and_flow_handler_stays_silent() {
    let op_a = Scripted::new(&[Err("e1"), Err("e2")]);
    let step_handler = Recording::returning(true);
    let flow_handler = Recording::returning(false);
    let flow = r#"
settings:
  execute_on_error: flow_collect
steps:
  - name: g
    independent_flows:
      - name: main
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_a, name: A,
              retry_count: 1, execute_on_error: recover }
          - { device_type: compute, device_id: tray-0, operation: op_after, name: after }
"#;
    let op_after = Scripted::succeeding();
    let (outcome, snapshot) = Harness::new()
        .op("op_a", op_a)
        .op("op_after", op_after.clone())
        .handler("recover", step_handler.clone())
        .handler("flow_collect", flow_handler.clone())
        .run(flow)
        .await;

    assert!(outcome.success);
    assert_eq!(step_handler.calls(), 1);
    assert_eq!(flow_handler.calls(), 0, "flow-level handler only fires on flow failure");
    assert_eq!(op_after.calls(), 1, "pointer advanced past the recovered step");

    let a = &snapshot["flows"]["main"]["steps_executed"][0];
    assert_eq!(a["status"], "failed");
    assert_eq!(a["error_handler_executed"], "recover");
    assert_eq!(a["error_handler_result"], true);
}

#[tokio::test]
async fn test_flow_handler_runs_once_on_flow_failure() {
    let op_a = Scripted::new(&[Err("unrecoverable")]);
    let flow_handler = Recording::returning(false);
    let flow = r#"
settings:
  execute_on_error: flow_collect
steps:
  - name: g
    independent_flows:
      - name: main
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_a, name: A, retry_count: 0 }
"#;
    let (outcome, snapshot) = Harness::new()
        .op("op_a", op_a)
        .handler("flow_collect", flow_handler.clone())
        .run(flow)
        .await;

    assert!(!outcome.success);
    assert_eq!(flow_handler.calls(), 1);
    let main = &snapshot["flows"]["main"];
    assert_eq!(main["status"], "Failed");
    let reason = main["error_messages"][0].as_str().unwrap();
    assert!(reason.contains("unrecoverable"));
}

#[tokio::test]
async fn test_two_independent_flows_run_concurrently() {
    let slow = Scripted::slow(200);
    let flow = r#"
steps:
  - name: g
    independent_flows:
      - name: X
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_slow }
      - name: Y
        steps:
          - { device_type: compute, device_id: tray-1, operation: op_slow }
"#;
    let clock = Instant::now();
    let (outcome, snapshot) = Harness::new().op("op_slow", slow.clone()).run(flow).await;
    let elapsed = clock.elapsed();

    assert!(outcome.success);
    assert!(elapsed >= Duration::from_millis(200));
    assert!(
        elapsed < Duration::from_millis(390),
        "flows should overlap, took {elapsed:?}"
    );
    assert_eq!(snapshot["flows"]["X"]["status"], "Completed");
    assert_eq!(snapshot["flows"]["Y"]["status"], "Completed");
    assert_eq!(slow.calls(), 2);
}

#[tokio::test]
async fn test_failure_aborts_later_batches() {
    let op_fail = Scripted::new(&[Err("dead")]);
    let op_later = Scripted::succeeding();
    let flow = r#"
steps:
  - name: g
    independent_flows:
      - name: first
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_fail, retry_count: 0 }
  - { device_type: compute, device_id: tray-0, operation: op_later }
"#;
    let (outcome, _) = Harness::new()
        .op("op_fail", op_fail)
        .op("op_later", op_later.clone())
        .run(flow)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.failed_flows, 1);
    assert_eq!(op_later.calls(), 0, "later batches must not start");
}

#[tokio::test]
async fn test_parallel_step_fails_if_any_child_fails() {
    let op_ok = Scripted::succeeding();
    let op_bad = Scripted::new(&[Err("child down")]);
    let flow = r#"
steps:
  - name: fan out
    parallel:
      - { device_type: compute, device_id: tray-0, operation: op_ok }
      - { device_type: compute, device_id: tray-1, operation: op_bad, retry_count: 0 }
    max_workers: 2
"#;
    let (outcome, snapshot) = Harness::new()
        .op("op_ok", op_ok)
        .op("op_bad", op_bad)
        .run(flow)
        .await;

    assert!(!outcome.success);
    let flow_info = &snapshot["flows"]["Parallel Steps: fan out"];
    assert_eq!(flow_info["status"], "Failed");
    assert_eq!(flow_info["failed_steps_count"], 1);
}

#[tokio::test]
async fn test_empty_parallel_step_succeeds() {
    let flow = r#"
steps:
  - name: nothing
    parallel: []
"#;
    let (outcome, _) = Harness::new().run(flow).await;
    assert!(outcome.success);
}

#[tokio::test]
async fn test_empty_steps_list_completes() {
    let (outcome, snapshot) = Harness::new().run("steps: []").await;
    assert!(outcome.success);
    assert_eq!(outcome.completed_flows, 0);
    assert!(snapshot["flows"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn test_self_jump_trips_loop_detection() {
    const LOOP_CONFIG: &str = r#"
connection:
  compute:
    tray-0: { ip: 10.0.0.10, user: admin, password: secret }
settings:
  default_retry_count: 0
  max_step_visits: 3
"#;
    let op = Scripted::succeeding();
    let flow = r#"
steps:
  - name: g
    independent_flows:
      - name: main
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_spin, tag: again,
              jump_on_success: again }
"#;
    let (outcome, snapshot) = Harness::new()
        .with_config(LOOP_CONFIG)
        .op("op_spin", op.clone())
        .run(flow)
        .await;

    assert!(!outcome.success);
    assert_eq!(op.calls(), 3, "cap of 3 visits allows 3 executions");
    let main = &snapshot["flows"]["main"];
    assert_eq!(main["status"], "Failed");
    let reason = main["error_messages"][0].as_str().unwrap();
    assert!(reason.contains("loop cap"));
}

#[tokio::test]
async fn test_jump_on_success_moves_pointer() {
    let op = Scripted::succeeding();
    let flow = r#"
steps:
  - name: g
    independent_flows:
      - name: main
        steps:
          - { device_type: compute, device_id: tray-0, operation: op_ok, name: A,
              jump_on_success: finish }
          - { device_type: compute, device_id: tray-0, operation: op_ok, name: B }
          - { device_type: compute, device_id: tray-0, operation: op_ok, name: C, tag: finish }
"#;
    let (outcome, snapshot) = Harness::new().op("op_ok", op.clone()).run(flow).await;

    assert!(outcome.success);
    assert_eq!(op.calls(), 2, "B is bypassed");
    let main = &snapshot["flows"]["main"];
    assert_eq!(main["jump_on_success_executed"], 1);
    let steps = main["steps_executed"].as_array().unwrap();
    let b = steps.iter().find(|s| s["step_name"] == "B").unwrap();
    assert_eq!(b["status"], "skipped");
}
