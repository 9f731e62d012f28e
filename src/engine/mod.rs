//! The unified execution engine.
//!
//! Before scheduling, every top-level construct is wrapped into an
//! [`IndependentFlow`]: maximal runs of consecutive independent flows become
//! one concurrent batch, and bare steps or parallel blocks become synthetic
//! single-step flows. The engine then walks the batched list, driving each
//! flow with an instruction pointer that honors retries, jumps, optional
//! recovery flows, and the step/flow error handlers.
//!
//! Failure handling is layered; the first matching level wins:
//! A) `execute_optional_flow` (success grants one fresh retry cluster,
//!    failure fails the flow), B) `jump_on_failure`, C) the step's
//!    `execute_on_error` handler, D) flow failure, after which the flow-level
//!    handler runs once for diagnostics.

pub mod events;

use futures_util::future::{join_all, BoxFuture};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Semaphore};
use uuid::Uuid;

use crate::config::Configuration;
use crate::device::DeviceRegistry;
use crate::engine::events::FlowEvent;
use crate::errors::EngineError;
use crate::flow::{Flow, FlowEntry, FlowStep, IndependentFlow, ParallelStep, StepNode};
use crate::handlers::{HandlerContext, HandlerRegistry};
use crate::logging::LogSet;
use crate::ops::{CapabilityContext, OperationRegistry};
use crate::progress::{FlowProgressTracker, FlowStatus, JumpKind};

/// Final result of one engine run.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub success: bool,
    pub completed_flows: usize,
    pub failed_flows: usize,
    pub duration: Duration,
}

/// What to do after a step has exhausted its failure-handling levels.
enum Resolution {
    /// The flow fails; remaining steps do not run.
    FlowFailed,
    /// The step is considered handled; advance the pointer.
    Continue,
    /// Move the pointer to this index.
    Jump(usize),
}

/// Drives a loaded [`Flow`] to completion.
pub struct ExecutionEngine {
    config: Arc<Configuration>,
    operations: Arc<OperationRegistry>,
    devices: Arc<DeviceRegistry>,
    handlers: Arc<HandlerRegistry>,
    tracker: Arc<FlowProgressTracker>,
    logs: Arc<LogSet>,
    events: Option<mpsc::Sender<FlowEvent>>,
    cancel: watch::Receiver<bool>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Configuration>,
        operations: Arc<OperationRegistry>,
        devices: Arc<DeviceRegistry>,
        handlers: Arc<HandlerRegistry>,
        tracker: Arc<FlowProgressTracker>,
        logs: Arc<LogSet>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            operations,
            devices,
            handlers,
            tracker,
            logs,
            events: None,
            cancel,
        }
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<FlowEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn emit(&self, event: FlowEvent) {
        if let Some(tx) = &self.events {
            tx.send(event).await.ok();
        }
    }

    /// Execute the whole top-level flow. Any independent-flow failure aborts
    /// the remaining batches; teardown (handle close, final snapshot) runs on
    /// every exit path.
    pub async fn execute(&self, flow: &Flow) -> EngineOutcome {
        let clock = Instant::now();
        let batches = batch_entries(&flow.entries);
        let optional = &flow.optional_flows;

        let mut completed_flows = 0usize;
        let mut failed_flows = 0usize;
        let mut last_error: Option<String> = None;

        for batch in &batches {
            if self.cancelled() {
                last_error = Some(EngineError::Cancelled.to_string());
                failed_flows += 1;
                break;
            }

            // Registration assigns each flow a unique tracker key, so
            // repeated wrapper names cannot clobber earlier records.
            let keyed: Vec<(String, &IndependentFlow)> = batch
                .iter()
                .map(|independent| {
                    let key = self
                        .tracker
                        .register_flow(&independent.name, independent.total_steps());
                    (key, independent)
                })
                .collect();

            self.emit(FlowEvent::BatchStarted {
                flows: keyed.iter().map(|(key, _)| key.clone()).collect(),
            })
            .await;
            self.tracker.write_snapshot();

            let results: Vec<(String, bool)> = if keyed.len() == 1 {
                let (key, independent) = &keyed[0];
                let ok = self.run_independent_flow(independent, optional, key).await;
                vec![(key.clone(), ok)]
            } else {
                self.logs.engine.info(&format!(
                    "executing {} independent flows concurrently",
                    keyed.len()
                ));
                let futures: Vec<_> = keyed
                    .iter()
                    .map(|(key, independent)| {
                        let key = key.clone();
                        let independent: &IndependentFlow = *independent;
                        async move {
                            let ok = self
                                .run_independent_flow(independent, optional, &key)
                                .await;
                            (key, ok)
                        }
                    })
                    .collect();
                join_all(futures).await
            };

            for (key, ok) in results {
                if ok {
                    completed_flows += 1;
                } else {
                    failed_flows += 1;
                    last_error = self
                        .tracker
                        .last_step_error(&key)
                        .or(last_error)
                        .or_else(|| Some(format!("independent flow '{key}' failed")));
                }
            }

            if failed_flows > 0 {
                self.logs
                    .engine
                    .error("aborting remaining batches after flow failure");
                break;
            }
        }

        let success = failed_flows == 0 && !self.cancelled();
        if !success {
            if last_error.is_none() {
                last_error = Some(EngineError::Cancelled.to_string());
            }
            if let Some(name) = &flow.on_error {
                self.run_flow_level_handler(name, last_error.as_deref().unwrap_or("flow failed"))
                    .await;
            }
        }

        self.devices.close_all();
        self.tracker.write_snapshot();

        let duration = clock.elapsed();
        self.emit(FlowEvent::EngineFinished {
            success,
            completed_flows,
            failed_flows,
            duration_seconds: duration.as_secs_f64(),
        })
        .await;

        EngineOutcome {
            success,
            completed_flows,
            failed_flows,
            duration,
        }
    }

    /// Run one independent flow to its terminal status.
    async fn run_independent_flow(
        &self,
        flow: &IndependentFlow,
        optional: &BTreeMap<String, IndependentFlow>,
        flow_key: &str,
    ) -> bool {
        self.logs
            .engine
            .info(&format!("executing independent flow: {flow_key}"));
        let total_steps = flow.total_steps();
        self.tracker.flow_started(flow_key, total_steps);
        self.emit(FlowEvent::FlowStarted {
            flow: flow_key.to_string(),
            total_steps,
        })
        .await;

        let result = self.run_flow_steps(flow, optional, flow_key).await;
        let (status, error, ok) = match result {
            Ok(()) => (FlowStatus::Completed, None, true),
            Err(reason) => (FlowStatus::Failed, Some(reason), false),
        };
        self.tracker.flow_finished(flow_key, status, error);
        self.emit(FlowEvent::FlowFinished {
            flow: flow_key.to_string(),
            status,
        })
        .await;
        self.tracker.write_snapshot();
        ok
    }

    /// Type-erased recursion point for optional flows.
    fn run_flow_boxed<'a>(
        &'a self,
        flow: &'a IndependentFlow,
        optional: &'a BTreeMap<String, IndependentFlow>,
        flow_key: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(self.run_independent_flow(flow, optional, flow_key))
    }

    /// The instruction-pointer loop over one flow's step list.
    async fn run_flow_steps(
        &self,
        flow: &IndependentFlow,
        optional: &BTreeMap<String, IndependentFlow>,
        flow_key: &str,
    ) -> Result<(), String> {
        let tags = flow.tag_indices();
        let visit_cap = self.config.settings.max_step_visits;
        let mut visits: HashMap<usize, u32> = HashMap::new();
        let mut skipped: HashSet<usize> = HashSet::new();
        let mut pointer = 0usize;

        while pointer < flow.steps.len() {
            if self.cancelled() {
                self.logs
                    .engine
                    .warn(&format!("{flow_key} - execution cancelled"));
                return Err(EngineError::Cancelled.to_string());
            }

            let count = visits.entry(pointer).or_insert(0);
            *count += 1;
            if *count > visit_cap {
                let err = EngineError::LoopDetected {
                    step_index: pointer,
                    visits: *count,
                    cap: visit_cap,
                };
                self.logs.engine.error(&format!("{flow_key} - {err}"));
                return Err(err.to_string());
            }

            match &flow.steps[pointer] {
                StepNode::Parallel(parallel) => {
                    if self
                        .run_parallel_step(parallel, optional, flow_key, pointer)
                        .await
                    {
                        pointer += 1;
                    } else {
                        return Err(self
                            .tracker
                            .last_step_error(flow_key)
                            .unwrap_or_else(|| {
                                format!("parallel step '{}' failed", parallel.name)
                            }));
                    }
                }
                StepNode::Step(step) => {
                    let exec_id = self.tracker.step_started(flow_key, step, pointer);
                    self.logs.device(step.device_type).info(&format!(
                        "{} - executing {} ({})",
                        step.device_id, step.name, step.operation
                    ));
                    let failure = self.run_retry_cluster(flow_key, step, exec_id).await;
                    if failure.is_none() {
                        let duration = self.tracker.step_finished(flow_key, exec_id, true);
                        self.emit(FlowEvent::StepFinished {
                            flow: flow_key.to_string(),
                            step: step.name.clone(),
                            success: true,
                            duration_seconds: duration,
                        })
                        .await;
                        self.tracker.write_snapshot();

                        if let Some(target) = &step.jump_on_success {
                            let Some(&target_index) = tags.get(target) else {
                                return Err(format!(
                                    "jump target '{target}' not found in flow '{flow_key}'"
                                ));
                            };
                            self.tracker
                                .jump_recorded(flow_key, exec_id, JumpKind::Success, target);
                            self.emit(FlowEvent::JumpTaken {
                                flow: flow_key.to_string(),
                                kind: JumpKind::Success,
                                from: step.name.clone(),
                                to: target.clone(),
                            })
                            .await;
                            self.record_forward_skips(
                                flow,
                                flow_key,
                                pointer + 1,
                                target_index,
                                &visits,
                                &mut skipped,
                            );
                            pointer = target_index;
                        } else {
                            pointer += 1;
                        }

                        if step.wait_after_seconds > 0 {
                            self.logs.engine.info(&format!(
                                "{} - waiting {}s after {}",
                                step.device_id, step.wait_after_seconds, step.name
                            ));
                            tokio::time::sleep(Duration::from_secs(step.wait_after_seconds))
                                .await;
                        }
                    } else {
                        let last_error = failure.expect("checked is_none above");
                        let resolution = self
                            .handle_step_failure(
                                flow_key, step, pointer, exec_id, last_error, &tags, optional,
                                true,
                            )
                            .await;
                        match resolution {
                            Resolution::Continue => pointer += 1,
                            Resolution::Jump(target_index) => {
                                self.record_forward_skips(
                                    flow,
                                    flow_key,
                                    pointer + 1,
                                    target_index,
                                    &visits,
                                    &mut skipped,
                                );
                                pointer = target_index;
                            }
                            Resolution::FlowFailed => {
                                return Err(self
                                    .tracker
                                    .last_step_error(flow_key)
                                    .unwrap_or_else(|| format!("step '{}' failed", step.name)));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Execute a parallel block's children concurrently, bounded by
    /// `max_workers`. Children cannot jump; each still gets its own retries,
    /// optional flow, and step-level handler.
    async fn run_parallel_step(
        &self,
        parallel: &ParallelStep,
        optional: &BTreeMap<String, IndependentFlow>,
        flow_key: &str,
        step_index: usize,
    ) -> bool {
        if parallel.children.is_empty() {
            return true;
        }
        self.logs.engine.info(&format!(
            "{flow_key} - executing parallel steps: {}",
            parallel.name
        ));
        let semaphore = Semaphore::new(parallel.max_workers.max(1));
        let futures: Vec<_> = parallel
            .children
            .iter()
            .map(|child| {
                let semaphore = &semaphore;
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("parallel semaphore never closed");
                    self.run_parallel_child(flow_key, child, step_index, optional)
                        .await
                }
            })
            .collect();
        let results = join_all(futures).await;
        results.into_iter().all(|ok| ok)
    }

    async fn run_parallel_child(
        &self,
        flow_key: &str,
        child: &FlowStep,
        step_index: usize,
        optional: &BTreeMap<String, IndependentFlow>,
    ) -> bool {
        let exec_id = self.tracker.step_started(flow_key, child, step_index);
        self.logs.device(child.device_type).info(&format!(
            "{} - executing {} ({})",
            child.device_id, child.name, child.operation
        ));
        let failure = self.run_retry_cluster(flow_key, child, exec_id).await;
        match failure {
            None => {
                let duration = self.tracker.step_finished(flow_key, exec_id, true);
                self.emit(FlowEvent::StepFinished {
                    flow: flow_key.to_string(),
                    step: child.name.clone(),
                    success: true,
                    duration_seconds: duration,
                })
                .await;
                self.tracker.write_snapshot();
                if child.wait_after_seconds > 0 {
                    tokio::time::sleep(Duration::from_secs(child.wait_after_seconds)).await;
                }
                true
            }
            Some(last_error) => {
                let no_tags = BTreeMap::new();
                let resolution = self
                    .handle_step_failure(
                        flow_key, child, step_index, exec_id, last_error, &no_tags, optional,
                        false,
                    )
                    .await;
                matches!(resolution, Resolution::Continue)
            }
        }
    }

    /// One attempt cluster: up to `1 + retry_count` invocations. Returns
    /// `None` on success, or the last error after exhaustion.
    async fn run_retry_cluster(
        &self,
        flow_key: &str,
        step: &FlowStep,
        exec_id: Uuid,
    ) -> Option<EngineError> {
        let handle = match self.devices.get(step.device_type, &step.device_id) {
            Ok(handle) => handle,
            Err(e) => {
                self.logs.engine.error(&format!("{} - {e}", step.device_id));
                self.tracker.step_error(flow_key, exec_id, e.to_string());
                return Some(e);
            }
        };
        let Some(capability) = self.operations.get(step.device_type, &step.operation) else {
            let message = format!(
                "operation '{}' is not registered for device type {}",
                step.operation, step.device_type
            );
            self.logs
                .engine
                .error(&format!("{} - {message}", step.device_id));
            self.tracker.step_error(flow_key, exec_id, message.clone());
            return Some(EngineError::Capability(message));
        };

        let ctx = CapabilityContext {
            timeout: step.timeout_seconds.map(Duration::from_secs),
            cancel: self.cancel.clone(),
            logs: Arc::clone(&self.logs),
        };

        let mut last_error = String::new();
        for attempt in 0..=step.retry_count {
            if self.cancelled() {
                self.tracker
                    .step_error(flow_key, exec_id, EngineError::Cancelled.to_string());
                return Some(EngineError::Cancelled);
            }
            if attempt > 0 {
                self.logs.engine.info(&format!(
                    "{} - retry attempt {attempt}/{} for step {}",
                    step.device_id, step.retry_count, step.name
                ));
                if step.wait_between_retries_seconds > 0 {
                    tokio::time::sleep(Duration::from_secs(step.wait_between_retries_seconds))
                        .await;
                }
            }
            self.emit(FlowEvent::StepStarted {
                flow: flow_key.to_string(),
                step: step.name.clone(),
                attempt,
            })
            .await;

            let attempt_clock = Instant::now();
            let outcome = capability.invoke(&handle, &step.parameters, &ctx).await;
            let attempt_duration = attempt_clock.elapsed().as_secs_f64();

            if outcome.success {
                self.logs.engine.info(&format!(
                    "{} - step {} succeeded",
                    step.device_id, step.name
                ));
                return None;
            }
            last_error = outcome
                .error
                .unwrap_or_else(|| format!("operation '{}' failed", step.operation));
            self.logs.engine.error(&format!(
                "{} - step {} failed: {last_error}",
                step.device_id, step.name
            ));
            if attempt < step.retry_count {
                self.tracker
                    .step_retry(flow_key, exec_id, attempt_duration, Some(last_error.clone()));
            } else {
                self.tracker
                    .step_error(flow_key, exec_id, last_error.clone());
            }
        }
        Some(EngineError::Capability(last_error))
    }

    /// The multi-level failure protocol. The first matching level wins;
    /// subsequent levels do not fire.
    #[allow(clippy::too_many_arguments)]
    async fn handle_step_failure(
        &self,
        flow_key: &str,
        step: &FlowStep,
        step_index: usize,
        exec_id: Uuid,
        mut last_error: EngineError,
        tags: &BTreeMap<String, usize>,
        optional: &BTreeMap<String, IndependentFlow>,
        allow_jumps: bool,
    ) -> Resolution {
        let mut current_exec = exec_id;

        // Level A - recovery flow.
        if let Some(opt_name) = &step.execute_optional_flow {
            if let Some(opt_flow) = optional.get(opt_name) {
                self.logs.engine.info(&format!(
                    "{} - step {} failed, executing optional flow '{opt_name}'",
                    step.device_id, step.name
                ));
                // The tracker key may carry a collision suffix when another
                // concurrent flow triggered the same optional flow; all
                // records for this trigger use that key.
                let opt_key = self.tracker.register_child_flow(
                    flow_key,
                    &step.name,
                    opt_name,
                    opt_flow.total_steps(),
                );
                self.tracker
                    .optional_flow_triggered(flow_key, current_exec, &opt_key);
                self.emit(FlowEvent::OptionalFlowTriggered {
                    flow: flow_key.to_string(),
                    caller: step.name.clone(),
                    name: opt_key.clone(),
                })
                .await;

                let rescued = self.run_flow_boxed(opt_flow, optional, &opt_key).await;
                self.tracker
                    .optional_flow_result(flow_key, current_exec, &opt_key, rescued);

                if !rescued {
                    self.logs.engine.error(&format!(
                        "{} - optional flow '{opt_name}' failed, failing flow",
                        step.device_id
                    ));
                    self.finish_failed_step(flow_key, current_exec, &step.name).await;
                    return Resolution::FlowFailed;
                }

                // Close the failed cluster and re-execute the step from
                // scratch with a fresh retry budget.
                self.logs.engine.info(&format!(
                    "{} - optional flow '{opt_name}' succeeded, retrying {} with fresh retry count",
                    step.device_id, step.name
                ));
                self.finish_failed_step(flow_key, current_exec, &step.name).await;

                let retry_exec = self.tracker.step_started(flow_key, step, step_index);
                current_exec = retry_exec;
                match self.run_retry_cluster(flow_key, step, retry_exec).await {
                    None => {
                        let duration = self.tracker.step_finished(flow_key, retry_exec, true);
                        self.emit(FlowEvent::StepFinished {
                            flow: flow_key.to_string(),
                            step: step.name.clone(),
                            success: true,
                            duration_seconds: duration,
                        })
                        .await;
                        self.tracker.write_snapshot();

                        if let Some(target) = &step.jump_on_success {
                            let Some(&target_index) = tags.get(target) else {
                                self.logs.engine.error(&format!(
                                    "{} - jump target '{target}' not found",
                                    step.device_id
                                ));
                                return Resolution::FlowFailed;
                            };
                            self.tracker.jump_recorded(
                                flow_key,
                                retry_exec,
                                JumpKind::Success,
                                target,
                            );
                            self.emit(FlowEvent::JumpTaken {
                                flow: flow_key.to_string(),
                                kind: JumpKind::Success,
                                from: step.name.clone(),
                                to: target.clone(),
                            })
                            .await;
                            return Resolution::Jump(target_index);
                        }
                        if step.wait_after_seconds > 0 {
                            tokio::time::sleep(Duration::from_secs(step.wait_after_seconds))
                                .await;
                        }
                        return Resolution::Continue;
                    }
                    Some(retry_error) => {
                        self.logs.engine.error(&format!(
                            "{} - step {} failed even after optional flow '{opt_name}'",
                            step.device_id, step.name
                        ));
                        last_error = retry_error;
                        // Fall through to Level B.
                    }
                }
            }
        }

        // Level B - jump on failure. Handlers do not fire.
        if allow_jumps {
            if let Some(target) = &step.jump_on_failure {
                let Some(&target_index) = tags.get(target) else {
                    self.logs.engine.error(&format!(
                        "{} - jump target '{target}' not found",
                        step.device_id
                    ));
                    self.finish_failed_step(flow_key, current_exec, &step.name).await;
                    return Resolution::FlowFailed;
                };
                self.logs.engine.info(&format!(
                    "{} - jumping to tag '{target}' on failure",
                    step.device_id
                ));
                self.tracker
                    .jump_recorded(flow_key, current_exec, JumpKind::Failure, target);
                self.emit(FlowEvent::JumpTaken {
                    flow: flow_key.to_string(),
                    kind: JumpKind::Failure,
                    from: step.name.clone(),
                    to: target.clone(),
                })
                .await;
                self.finish_failed_step(flow_key, current_exec, &step.name).await;
                return Resolution::Jump(target_index);
            }
        }

        // Level C - step-level error handler.
        if let Some(handler_name) = &step.execute_on_error {
            if let Some(handler) = self.handlers.get(handler_name) {
                self.logs.engine.info(&format!(
                    "{} - executing error handler '{handler_name}' for step {}",
                    step.device_id, step.name
                ));
                let ctx = self.handler_context();
                let recovered = match handler
                    .handle(Some(step), &last_error.to_string(), &ctx)
                    .await
                {
                    Ok(result) => result,
                    Err(e) => {
                        let handler_error = EngineError::Handler {
                            name: handler_name.clone(),
                            message: e.to_string(),
                        };
                        self.logs
                            .engine
                            .error(&format!("{} - {handler_error}", step.device_id));
                        false
                    }
                };
                self.tracker
                    .handler_executed(flow_key, current_exec, handler_name, recovered);
                self.finish_failed_step(flow_key, current_exec, &step.name).await;
                if recovered {
                    self.logs.engine.info(&format!(
                        "{} - error handler indicates flow can continue",
                        step.device_id
                    ));
                    return Resolution::Continue;
                }
                return Resolution::FlowFailed;
            }
        }

        // Level D - flow failed.
        self.finish_failed_step(flow_key, current_exec, &step.name).await;
        Resolution::FlowFailed
    }

    /// Close a failed step record, emit its event, and snapshot.
    async fn finish_failed_step(&self, flow_key: &str, exec_id: Uuid, step_name: &str) {
        let duration = self.tracker.step_finished(flow_key, exec_id, false);
        self.emit(FlowEvent::StepFinished {
            flow: flow_key.to_string(),
            step: step_name.to_string(),
            success: false,
            duration_seconds: duration,
        })
        .await;
        self.tracker.write_snapshot();
    }

    /// Record steps a forward jump bypassed, once per index.
    fn record_forward_skips(
        &self,
        flow: &IndependentFlow,
        flow_key: &str,
        from: usize,
        to: usize,
        visits: &HashMap<usize, u32>,
        skipped: &mut HashSet<usize>,
    ) {
        if to <= from {
            return;
        }
        for index in from..to {
            if visits.contains_key(&index) || !skipped.insert(index) {
                continue;
            }
            match &flow.steps[index] {
                StepNode::Step(step) => self.tracker.step_skipped(flow_key, step, index),
                StepNode::Parallel(parallel) => {
                    for child in &parallel.children {
                        self.tracker.step_skipped(flow_key, child, index);
                    }
                }
            }
        }
    }

    fn handler_context(&self) -> HandlerContext {
        HandlerContext {
            variables: self.config.variables.clone(),
            log_dir: self.logs.directory.clone(),
            devices: self.devices.touched(),
            logs: Arc::clone(&self.logs),
        }
    }

    async fn run_flow_level_handler(&self, name: &str, error: &str) {
        let Some(handler) = self.handlers.get(name) else {
            self.logs
                .engine
                .error(&format!("flow-level error handler '{name}' not found"));
            return;
        };
        self.logs
            .engine
            .info(&format!("executing flow-level error handler '{name}'"));
        let ctx = self.handler_context();
        // Flow-level handlers run for diagnostics only; the result is ignored
        // and a handler error never propagates.
        if let Err(e) = handler.handle(None, error, &ctx).await {
            self.logs
                .engine
                .error(&format!("flow-level error handler '{name}' failed: {e}"));
        }
    }
}

/// Group the top-level entries for scheduling: consecutive independent flows
/// form one concurrent batch, everything else becomes a synthetic single-step
/// flow so the engine has a single execution path.
fn batch_entries(entries: &[FlowEntry]) -> Vec<Vec<IndependentFlow>> {
    let mut batches: Vec<Vec<IndependentFlow>> = Vec::new();
    let mut pending: Vec<IndependentFlow> = Vec::new();

    for entry in entries {
        match entry {
            FlowEntry::Independent(flows) => pending.extend(flows.iter().cloned()),
            FlowEntry::Step(step) => {
                if !pending.is_empty() {
                    batches.push(std::mem::take(&mut pending));
                }
                batches.push(vec![IndependentFlow {
                    name: format!("Single Step: {}", step.name),
                    steps: vec![StepNode::Step(step.clone())],
                }]);
            }
            FlowEntry::Parallel(parallel) => {
                if !pending.is_empty() {
                    batches.push(std::mem::take(&mut pending));
                }
                batches.push(vec![IndependentFlow {
                    name: format!("Parallel Steps: {}", parallel.name),
                    steps: vec![StepNode::Parallel(parallel.clone())],
                }]);
            }
        }
    }
    if !pending.is_empty() {
        batches.push(pending);
    }
    batches
}

#[cfg(test)]
mod tests;
