//! Output modes and event renderers.
//!
//! The engine emits [`FlowEvent`]s regardless of presentation; a renderer
//! task subscribes to the stream and draws what the selected mode calls for.
//! `gui` shows live per-flow progress bars, `log` streams styled console
//! lines, `json` prints one machine-parsable line per finished step, and
//! `none` stays silent. The file log and `flow_progress.json` are written in
//! every mode.

use clap::ValueEnum;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::engine::events::FlowEvent;
use crate::progress::{FlowStatus, JumpKind};

/// Console presentation selected by `--output-mode` or
/// `configuration.variables.output_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum OutputMode {
    None,
    Gui,
    Log,
    Json,
}

impl OutputMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(OutputMode::None),
            "gui" => Some(OutputMode::Gui),
            "log" => Some(OutputMode::Log),
            "json" => Some(OutputMode::Json),
            // Legacy alias kept for old configurations.
            "all" => Some(OutputMode::Log),
            _ => None,
        }
    }
}

/// Renders the event stream for one run.
struct Renderer {
    mode: OutputMode,
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl Renderer {
    fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn render(&mut self, event: &FlowEvent) {
        match self.mode {
            OutputMode::None => {}
            OutputMode::Json => self.render_json(event),
            OutputMode::Log => self.render_log(event),
            OutputMode::Gui => self.render_gui(event),
        }
    }

    fn render_json(&self, event: &FlowEvent) {
        if let FlowEvent::StepFinished {
            step,
            success,
            duration_seconds,
            ..
        } = event
        {
            let verdict = if *success { "SUCCESS" } else { "FAILED" };
            println!("[{verdict}] - {step} ({duration_seconds:.1}s)");
        }
    }

    fn render_log(&self, event: &FlowEvent) {
        match event {
            FlowEvent::BatchStarted { flows } if flows.len() > 1 => {
                self.print_line(format!(
                    "{} {} independent flows in parallel",
                    style("▶").green().bold(),
                    flows.len()
                ));
            }
            FlowEvent::BatchStarted { .. } => {}
            FlowEvent::FlowStarted { flow, total_steps } => {
                self.print_line(format!(
                    "{} Flow {}: {} steps",
                    style("▶").green().bold(),
                    style(flow).yellow(),
                    total_steps
                ));
            }
            FlowEvent::StepStarted {
                flow,
                step,
                attempt,
            } => {
                if *attempt > 0 {
                    self.print_line(format!(
                        "  {} {}: retrying {} (attempt {})",
                        style("↻").cyan(),
                        style(flow).dim(),
                        step,
                        attempt + 1
                    ));
                }
            }
            FlowEvent::StepFinished {
                flow,
                step,
                success,
                duration_seconds,
            } => {
                let mark = if *success {
                    style("✓").green().to_string()
                } else {
                    style("✗").red().to_string()
                };
                self.print_line(format!(
                    "  {mark} {}: {} ({:.1}s)",
                    style(flow).dim(),
                    step,
                    duration_seconds
                ));
            }
            FlowEvent::JumpTaken {
                flow, kind, from, to,
            } => {
                let label = match kind {
                    JumpKind::Success => "jump on success",
                    JumpKind::Failure => "jump on failure",
                };
                self.print_line(format!(
                    "  {} {}: {label} {} → {}",
                    style("↷").cyan(),
                    style(flow).dim(),
                    from,
                    style(to).yellow()
                ));
            }
            FlowEvent::OptionalFlowTriggered { flow, caller, name } => {
                self.print_line(format!(
                    "  {} {}: step {} triggered recovery flow {}",
                    style("⟲").yellow(),
                    style(flow).dim(),
                    caller,
                    style(name).yellow()
                ));
            }
            FlowEvent::FlowFinished { flow, status } => {
                let line = match status {
                    FlowStatus::Completed => format!(
                        "{} Flow {} completed",
                        style("✓").green().bold(),
                        style(flow).green()
                    ),
                    FlowStatus::Failed => format!(
                        "{} Flow {} failed",
                        style("✗").red().bold(),
                        style(flow).red()
                    ),
                    _ => return,
                };
                self.print_line(line);
            }
            FlowEvent::EngineFinished {
                success,
                completed_flows,
                failed_flows,
                duration_seconds,
            } => {
                let verdict = if *success {
                    style("completed").green().bold().to_string()
                } else {
                    style("failed").red().bold().to_string()
                };
                self.print_line(format!(
                    "Run {verdict}: {completed_flows} flows completed, {failed_flows} failed in {duration_seconds:.1}s"
                ));
            }
        }
    }

    fn render_gui(&mut self, event: &FlowEvent) {
        match event {
            FlowEvent::FlowStarted { flow, total_steps } => {
                let bar_style = ProgressStyle::default_bar()
                    .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .expect("progress bar template is a valid static string")
                    .progress_chars("█▓▒░");
                let bar = self
                    .multi
                    .add(ProgressBar::new((*total_steps).max(1) as u64));
                bar.set_style(bar_style);
                bar.set_prefix(flow.clone());
                self.bars.insert(flow.clone(), bar);
            }
            FlowEvent::StepStarted { flow, step, .. } => {
                if let Some(bar) = self.bars.get(flow) {
                    bar.set_message(step.clone());
                }
            }
            FlowEvent::StepFinished { flow, success, .. } => {
                if let Some(bar) = self.bars.get(flow) {
                    if *success {
                        bar.inc(1);
                    }
                }
            }
            FlowEvent::OptionalFlowTriggered { flow, name, .. } => {
                if let Some(bar) = self.bars.get(flow) {
                    bar.set_message(format!("recovery: {name}"));
                }
            }
            FlowEvent::FlowFinished { flow, status } => {
                if let Some(bar) = self.bars.get(flow) {
                    match status {
                        FlowStatus::Completed => bar.finish_with_message("done"),
                        FlowStatus::Failed => bar.abandon_with_message("failed"),
                        _ => {}
                    }
                }
            }
            FlowEvent::EngineFinished {
                success,
                completed_flows,
                failed_flows,
                duration_seconds,
            } => {
                let verdict = if *success { "completed" } else { "failed" };
                self.print_line(format!(
                    "Run {verdict}: {completed_flows} flows completed, {failed_flows} failed in {duration_seconds:.1}s"
                ));
            }
            _ => {}
        }
    }
}

/// Spawn the renderer task for one run. The task ends when the engine drops
/// its event sender.
pub fn spawn_renderer(
    mode: OutputMode,
    mut rx: mpsc::Receiver<FlowEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut renderer = Renderer::new(mode);
        while let Some(event) = rx.recv().await {
            renderer.render(&event);
        }
    })
}
