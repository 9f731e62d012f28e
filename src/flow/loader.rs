//! Flow YAML loading and static validation.
//!
//! The loader consumes a post-expansion YAML tree and produces the typed
//! [`Flow`] graph. Validation order: shape, registry lookups, scope
//! construction, tag uniqueness, reference resolution (jumps, optional flows,
//! error handlers, cycles), then default propagation. Any failure aborts the
//! load with a path into the document, e.g. `steps[12].parameters`.

use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Configuration;
use crate::device::DeviceType;
use crate::errors::ValidationError;
use crate::expand::expand_tree;
use crate::flow::{Flow, FlowEntry, FlowStep, IndependentFlow, Parameters, ParallelStep, StepNode};
use crate::handlers::HandlerRegistry;
use crate::ops::OperationRegistry;

/// Per-flow defaults after merging flow-file settings over the configuration.
#[derive(Debug, Clone)]
struct StepDefaults {
    retry_count: u32,
    wait_after_seconds: u64,
    wait_between_retries_seconds: u64,
}

/// Loads and validates flow documents against the configured registries.
pub struct FlowLoader<'a> {
    config: &'a Configuration,
    operations: &'a OperationRegistry,
    handlers: &'a HandlerRegistry,
}

impl<'a> FlowLoader<'a> {
    pub fn new(
        config: &'a Configuration,
        operations: &'a OperationRegistry,
        handlers: &'a HandlerRegistry,
    ) -> Self {
        Self {
            config,
            operations,
            handlers,
        }
    }

    /// Read a flow file from disk, expand variables, and load it.
    pub fn load_file(&self, path: &Path) -> Result<Flow> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read flow file {}", path.display()))?;
        let tree: Value = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse flow file {}", path.display()))?;
        let expanded = expand_tree(&tree, &self.config.variables)?;
        let flow = self.load(&expanded)?;
        Ok(flow)
    }

    /// Validate a post-expansion tree and build the flow graph.
    pub fn load(&self, tree: &Value) -> Result<Flow, ValidationError> {
        let root = as_mapping(tree, "flow")?;
        let flow_settings = root.get("settings").map(|v| as_mapping(v, "settings")).transpose()?;

        let defaults = self.step_defaults(flow_settings)?;

        // Optional flows first so main-step references can resolve against them.
        let mut optional_flows = BTreeMap::new();
        if let Some(raw) = root.get("optional_flows") {
            let map = as_mapping(raw, "optional_flows")?;
            for (key, value) in map {
                let name = key.as_str().ok_or_else(|| ValidationError::TypeMismatch {
                    path: "optional_flows".to_string(),
                    expected: "string flow names".to_string(),
                })?;
                let path = format!("optional_flows.{name}");
                let steps = self.parse_step_list(value, &path, &defaults)?;
                let flow = IndependentFlow {
                    name: name.to_string(),
                    steps,
                };
                self.validate_scope(&flow.steps, &path)?;
                optional_flows.insert(name.to_string(), flow);
            }
        }

        let mut entries = Vec::new();
        if let Some(raw_steps) = root.get("steps") {
            let list = as_sequence(raw_steps, "steps")?;
            let mut main_scope: Vec<StepNode> = Vec::new();
            for (i, item) in list.iter().enumerate() {
                let path = format!("steps[{i}]");
                let map = as_mapping(item, &path)?;
                if map.get("independent_flows").is_some() {
                    entries.push(FlowEntry::Independent(
                        self.parse_independent_group(map, &path, &defaults)?,
                    ));
                } else if map.get("parallel").is_some() {
                    entries.push(FlowEntry::Parallel(self.parse_parallel(map, &path, &defaults)?));
                } else {
                    let step = self.parse_flow_step(map, &path, &defaults, false)?;
                    main_scope.push(StepNode::Step(step.clone()));
                    entries.push(FlowEntry::Step(step));
                }
            }
            // The main sequence of bare steps forms one tag scope.
            self.validate_scope(&main_scope, "steps")?;
        }

        // Every independent flow and parallel block is its own scope.
        for (i, entry) in entries.iter().enumerate() {
            match entry {
                FlowEntry::Independent(flows) => {
                    for flow in flows {
                        self.validate_scope(&flow.steps, &format!("steps[{i}].{}", flow.name))?;
                    }
                }
                FlowEntry::Parallel(parallel) => {
                    let children: Vec<StepNode> = parallel
                        .children
                        .iter()
                        .map(|s| StepNode::Step(s.clone()))
                        .collect();
                    self.validate_scope(&children, &format!("steps[{i}].parallel"))?;
                }
                FlowEntry::Step(_) => {}
            }
        }

        self.validate_optional_flow_refs(&entries, &optional_flows)?;
        validate_optional_flow_cycles(&optional_flows)?;

        let on_error = match flow_settings.and_then(|s| s.get("execute_on_error")) {
            Some(value) => Some(expect_str(value, "settings.execute_on_error")?),
            None => self.config.settings.execute_on_error.clone(),
        };
        if let Some(name) = &on_error {
            if !self.handlers.contains(name) {
                return Err(ValidationError::UnknownErrorHandler {
                    path: "settings.execute_on_error".to_string(),
                    name: name.clone(),
                });
            }
        }

        Ok(Flow {
            entries,
            optional_flows,
            on_error,
        })
    }

    fn step_defaults(&self, flow_settings: Option<&Mapping>) -> Result<StepDefaults, ValidationError> {
        let mut defaults = StepDefaults {
            retry_count: self.config.default_retry_count(),
            wait_after_seconds: self.config.settings.default_wait_after_seconds,
            wait_between_retries_seconds: self.config.settings.default_wait_between_retries_seconds,
        };
        if let Some(settings) = flow_settings {
            if let Some(v) = settings.get("default_retry_count") {
                defaults.retry_count = expect_u64(v, "settings.default_retry_count")? as u32;
            }
            if let Some(v) = settings.get("default_wait_after_seconds") {
                defaults.wait_after_seconds = expect_u64(v, "settings.default_wait_after_seconds")?;
            }
            if let Some(v) = settings.get("default_wait_between_retries_seconds") {
                defaults.wait_between_retries_seconds =
                    expect_u64(v, "settings.default_wait_between_retries_seconds")?;
            }
        }
        Ok(defaults)
    }

    /// Parse a list of FlowStep / ParallelStep items (independent-flow bodies
    /// and optional flows).
    fn parse_step_list(
        &self,
        value: &Value,
        path: &str,
        defaults: &StepDefaults,
    ) -> Result<Vec<StepNode>, ValidationError> {
        let list = as_sequence(value, path)?;
        let mut steps = Vec::with_capacity(list.len());
        for (i, item) in list.iter().enumerate() {
            let item_path = format!("{path}[{i}]");
            let map = as_mapping(item, &item_path)?;
            if map.get("parallel").is_some() {
                steps.push(StepNode::Parallel(self.parse_parallel(map, &item_path, defaults)?));
            } else {
                steps.push(StepNode::Step(self.parse_flow_step(
                    map, &item_path, defaults, false,
                )?));
            }
        }
        Ok(steps)
    }

    fn parse_independent_group(
        &self,
        map: &Mapping,
        path: &str,
        defaults: &StepDefaults,
    ) -> Result<Vec<IndependentFlow>, ValidationError> {
        let raw = map
            .get("independent_flows")
            .expect("caller checked for key");
        let list = as_sequence(raw, &format!("{path}.independent_flows"))?;
        let mut flows = Vec::with_capacity(list.len());
        for (i, item) in list.iter().enumerate() {
            let flow_path = format!("{path}.independent_flows[{i}]");
            let flow_map = as_mapping(item, &flow_path)?;
            let name = match flow_map.get("name") {
                Some(v) => expect_str(v, &format!("{flow_path}.name"))?,
                None => format!("independent_flow_{i}"),
            };
            let steps_value =
                flow_map
                    .get("steps")
                    .ok_or_else(|| ValidationError::MissingField {
                        path: flow_path.clone(),
                        field: "steps".to_string(),
                    })?;
            let steps = self.parse_step_list(steps_value, &format!("{flow_path}.steps"), defaults)?;
            flows.push(IndependentFlow { name, steps });
        }
        Ok(flows)
    }

    fn parse_parallel(
        &self,
        map: &Mapping,
        path: &str,
        defaults: &StepDefaults,
    ) -> Result<ParallelStep, ValidationError> {
        let raw = map.get("parallel").expect("caller checked for key");
        let list = as_sequence(raw, &format!("{path}.parallel"))?;
        let mut children = Vec::with_capacity(list.len());
        for (i, item) in list.iter().enumerate() {
            let child_path = format!("{path}.parallel[{i}]");
            let child_map = as_mapping(item, &child_path)?;
            children.push(self.parse_flow_step(child_map, &child_path, defaults, true)?);
        }
        let name = match map.get("name") {
            Some(v) => expect_str(v, &format!("{path}.name"))?,
            None => "Parallel Steps".to_string(),
        };
        let max_workers = match map.get("max_workers") {
            Some(v) => expect_u64(v, &format!("{path}.max_workers"))? as usize,
            None => children.len().max(1),
        };
        Ok(ParallelStep {
            name,
            children,
            max_workers,
        })
    }

    fn parse_flow_step(
        &self,
        map: &Mapping,
        path: &str,
        defaults: &StepDefaults,
        in_parallel: bool,
    ) -> Result<FlowStep, ValidationError> {
        let device_type_str = require_str(map, "device_type", path)?;
        let device_type = DeviceType::parse(&device_type_str).ok_or_else(|| {
            ValidationError::InvalidDeviceType {
                path: format!("{path}.device_type"),
                value: device_type_str.clone(),
            }
        })?;
        let device_id = require_str(map, "device_id", path)?;
        let operation = require_str(map, "operation", path)?;

        if self.config.connection_for(device_type, &device_id).is_none() {
            return Err(ValidationError::UnknownConnection {
                path: format!("{path}.device_id"),
                device_type: device_type.to_string(),
                device_id,
            });
        }
        if !self.operations.contains(device_type, &operation) {
            return Err(ValidationError::UnknownOperation {
                path: format!("{path}.operation"),
                device_type: device_type.to_string(),
                operation,
            });
        }

        let parameters = match map.get("parameters") {
            Some(value) => parse_parameters(value, &format!("{path}.parameters"))?,
            None => Parameters::new(),
        };

        let jump_on_success = get_str(map, "jump_on_success", path)?;
        let jump_on_failure = get_str(map, "jump_on_failure", path)?;
        if in_parallel && (jump_on_success.is_some() || jump_on_failure.is_some()) {
            return Err(ValidationError::JumpInParallelStep {
                path: path.to_string(),
            });
        }

        let execute_on_error = get_str(map, "execute_on_error", path)?;
        if let Some(name) = &execute_on_error {
            if !self.handlers.contains(name) {
                return Err(ValidationError::UnknownErrorHandler {
                    path: format!("{path}.execute_on_error"),
                    name: name.clone(),
                });
            }
        }

        let name = match get_str(map, "name", path)? {
            Some(name) => name,
            None => operation.clone(),
        };

        Ok(FlowStep {
            name,
            device_type,
            device_id,
            operation,
            parameters,
            tag: get_str(map, "tag", path)?,
            retry_count: match map.get("retry_count") {
                Some(v) => expect_u64(v, &format!("{path}.retry_count"))? as u32,
                None => defaults.retry_count,
            },
            wait_after_seconds: match map.get("wait_after_seconds") {
                Some(v) => expect_u64(v, &format!("{path}.wait_after_seconds"))?,
                None => defaults.wait_after_seconds,
            },
            wait_between_retries_seconds: match map.get("wait_between_retries_seconds") {
                Some(v) => expect_u64(v, &format!("{path}.wait_between_retries_seconds"))?,
                None => defaults.wait_between_retries_seconds,
            },
            timeout_seconds: match map.get("timeout_seconds") {
                Some(v) => Some(expect_u64(v, &format!("{path}.timeout_seconds"))?),
                None => None,
            },
            jump_on_success,
            jump_on_failure,
            execute_optional_flow: get_str(map, "execute_optional_flow", path)?,
            execute_on_error,
        })
    }

    /// Tag uniqueness, jump resolution, and jump-cycle detection for one scope.
    ///
    /// Each parallel block nested in the scope is validated as its own scope.
    fn validate_scope(&self, steps: &[StepNode], scope_path: &str) -> Result<(), ValidationError> {
        let mut tags: BTreeMap<String, String> = BTreeMap::new();
        for (i, node) in steps.iter().enumerate() {
            match node {
                StepNode::Step(step) => {
                    if let Some(tag) = &step.tag {
                        let path = format!("{scope_path}[{i}]");
                        if let Some(first) = tags.get(tag) {
                            return Err(ValidationError::DuplicateTag {
                                path,
                                tag: tag.clone(),
                                first: first.clone(),
                            });
                        }
                        tags.insert(tag.clone(), path);
                    }
                }
                StepNode::Parallel(parallel) => {
                    let children: Vec<StepNode> = parallel
                        .children
                        .iter()
                        .map(|s| StepNode::Step(s.clone()))
                        .collect();
                    self.validate_scope(&children, &format!("{scope_path}[{i}].parallel"))?;
                }
            }
        }

        let mut failure_targets: BTreeMap<String, String> = BTreeMap::new();
        for (i, node) in steps.iter().enumerate() {
            if let StepNode::Step(step) = node {
                for target in [&step.jump_on_success, &step.jump_on_failure]
                    .into_iter()
                    .flatten()
                {
                    if !tags.contains_key(target) {
                        return Err(ValidationError::UnknownJumpTarget {
                            path: format!("{scope_path}[{i}]"),
                            target: target.clone(),
                        });
                    }
                }
                if let (Some(tag), Some(target)) = (&step.tag, &step.jump_on_failure) {
                    failure_targets.insert(tag.clone(), target.clone());
                }
            }
        }

        // A jump_on_failure chain among tagged steps must not loop back on
        // itself; the runtime visit cap would catch it, but it is an
        // authoring error we can reject up front.
        for start in failure_targets.keys() {
            let mut seen = vec![start.clone()];
            let mut current = failure_targets.get(start);
            while let Some(next) = current {
                if seen.contains(next) {
                    seen.push(next.clone());
                    return Err(ValidationError::CircularJump {
                        cycle: seen.join(" -> "),
                    });
                }
                seen.push(next.clone());
                current = failure_targets.get(next);
            }
        }

        Ok(())
    }

    fn validate_optional_flow_refs(
        &self,
        entries: &[FlowEntry],
        optional_flows: &BTreeMap<String, IndependentFlow>,
    ) -> Result<(), ValidationError> {
        let check = |step: &FlowStep, path: String| -> Result<(), ValidationError> {
            if let Some(name) = &step.execute_optional_flow {
                if !optional_flows.contains_key(name) {
                    return Err(ValidationError::UnknownOptionalFlow {
                        path,
                        name: name.clone(),
                    });
                }
            }
            Ok(())
        };

        for (i, entry) in entries.iter().enumerate() {
            match entry {
                FlowEntry::Step(step) => check(step, format!("steps[{i}]"))?,
                FlowEntry::Parallel(parallel) => {
                    for (j, child) in parallel.children.iter().enumerate() {
                        check(child, format!("steps[{i}].parallel[{j}]"))?;
                    }
                }
                FlowEntry::Independent(flows) => {
                    for flow in flows {
                        for (j, node) in flow.steps.iter().enumerate() {
                            let base = format!("steps[{i}].{}[{j}]", flow.name);
                            match node {
                                StepNode::Step(step) => check(step, base)?,
                                StepNode::Parallel(parallel) => {
                                    for (k, child) in parallel.children.iter().enumerate() {
                                        check(child, format!("{base}.parallel[{k}]"))?;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        for (name, flow) in optional_flows {
            for (j, node) in flow.steps.iter().enumerate() {
                let base = format!("optional_flows.{name}[{j}]");
                match node {
                    StepNode::Step(step) => check(step, base)?,
                    StepNode::Parallel(parallel) => {
                        for (k, child) in parallel.children.iter().enumerate() {
                            check(child, format!("{base}.parallel[{k}]"))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Optional flows must not trigger each other in a cycle.
fn validate_optional_flow_cycles(
    optional_flows: &BTreeMap<String, IndependentFlow>,
) -> Result<(), ValidationError> {
    fn visit(
        name: &str,
        optional_flows: &BTreeMap<String, IndependentFlow>,
        path: &mut Vec<String>,
    ) -> Result<(), ValidationError> {
        if path.iter().any(|p| p == name) {
            let mut cycle = path.clone();
            cycle.push(name.to_string());
            return Err(ValidationError::CircularOptionalFlow {
                cycle: cycle.join(" -> "),
            });
        }
        let Some(flow) = optional_flows.get(name) else {
            return Ok(());
        };
        path.push(name.to_string());
        for node in &flow.steps {
            let steps: Vec<&FlowStep> = match node {
                StepNode::Step(step) => vec![step],
                StepNode::Parallel(parallel) => parallel.children.iter().collect(),
            };
            for step in steps {
                if let Some(next) = &step.execute_optional_flow {
                    visit(next, optional_flows, path)?;
                }
            }
        }
        path.pop();
        Ok(())
    }

    for name in optional_flows.keys() {
        visit(name, optional_flows, &mut Vec::new())?;
    }
    Ok(())
}

fn parse_parameters(value: &Value, path: &str) -> Result<Parameters, ValidationError> {
    let map = as_mapping(value, path)?;
    let mut params = Parameters::new();
    for (key, item) in map {
        let key = key.as_str().ok_or_else(|| ValidationError::TypeMismatch {
            path: path.to_string(),
            expected: "string parameter names".to_string(),
        })?;
        let json =
            serde_json::to_value(item).map_err(|_| ValidationError::TypeMismatch {
                path: format!("{path}.{key}"),
                expected: "a JSON-representable value".to_string(),
            })?;
        params.insert(key.to_string(), json);
    }
    Ok(params)
}

fn as_mapping<'v>(value: &'v Value, path: &str) -> Result<&'v Mapping, ValidationError> {
    value.as_mapping().ok_or_else(|| ValidationError::TypeMismatch {
        path: path.to_string(),
        expected: "a mapping".to_string(),
    })
}

fn as_sequence<'v>(value: &'v Value, path: &str) -> Result<&'v Vec<Value>, ValidationError> {
    value.as_sequence().ok_or_else(|| ValidationError::TypeMismatch {
        path: path.to_string(),
        expected: "a list".to_string(),
    })
}

fn expect_str(value: &Value, path: &str) -> Result<String, ValidationError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ValidationError::TypeMismatch {
            path: path.to_string(),
            expected: "a string".to_string(),
        })
}

fn expect_u64(value: &Value, path: &str) -> Result<u64, ValidationError> {
    value.as_u64().ok_or_else(|| ValidationError::TypeMismatch {
        path: path.to_string(),
        expected: "a non-negative integer".to_string(),
    })
}

fn get_str(map: &Mapping, key: &str, path: &str) -> Result<Option<String>, ValidationError> {
    match map.get(key) {
        Some(Value::Null) | None => Ok(None),
        Some(value) => Ok(Some(expect_str(value, &format!("{path}.{key}"))?)),
    }
}

fn require_str(map: &Mapping, key: &str, path: &str) -> Result<String, ValidationError> {
    let value = get_str(map, key, path)?.ok_or_else(|| ValidationError::MissingField {
        path: path.to_string(),
        field: key.to_string(),
    })?;
    if value.is_empty() {
        return Err(ValidationError::MissingField {
            path: path.to_string(),
            field: key.to_string(),
        });
    }
    Ok(value)
}
