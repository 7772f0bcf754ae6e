use super::state::{CommandMetadata, RunSummary};
use crate::parser::types::CommandId;
use tokio::sync::broadcast;

/// Flow execution events for real-time updates
#[derive(Debug, Clone)]
pub enum OrchestraEvent {
    // Flow events
    FlowStarted {
        command_count: usize,
        depth: usize,
    },
    FlowFinished {
        success: bool,
        duration_ms: u64,
        depth: usize,
    },

    // Command events
    CommandStarted {
        index: usize,
        id: CommandId,
        command: String,
        depth: usize,
    },
    CommandCompleted {
        index: usize,
        id: CommandId,
        duration_ms: u64,
        depth: usize,
    },
    CommandFailed {
        index: usize,
        id: CommandId,
        error: String,
        duration_ms: u64,
        depth: usize,
    },
    CommandSkipped {
        index: usize,
        id: CommandId,
        depth: usize,
    },
    /// A loop child is about to run again
    CommandReset {
        id: CommandId,
        command: String,
        depth: usize,
    },
    CommandMetadataUpdated {
        id: CommandId,
        metadata: CommandMetadata,
    },
}

/// Event emitter for broadcasting flow events
pub struct EventEmitter {
    sender: broadcast::Sender<OrchestraEvent>,
}

const CHANNEL_CAPACITY: usize = 1024;

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<OrchestraEvent>) {
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        (Self { sender }, receiver)
    }

    /// Publish an event; having no subscriber is fine
    pub fn emit(&self, event: OrchestraEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestraEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration as StdDuration;

/// Console event listener for printing real-time updates
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    /// Render events until every emitter is dropped, then return the totals
    pub async fn listen(mut receiver: broadcast::Receiver<OrchestraEvent>) -> RunSummary {
        use colored::Colorize;
        use indicatif::ProgressDrawTarget;
        use std::io::IsTerminal;

        // Piped output gets no escape codes
        let multi = if std::io::stdout().is_terminal() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let mut summary = RunSummary::default();
        let mut spinners: Vec<Option<ProgressBar>> = Vec::new();
        let mut command_texts: Vec<String> = Vec::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("Console listener fell behind, {} events dropped", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            summary.record(&event);

            match event {
                OrchestraEvent::FlowStarted {
                    command_count,
                    depth,
                } => {
                    // Parent spinners stop ticking while the nested flow prints
                    for pb in spinners.iter_mut().take(depth).filter_map(Option::take) {
                        pb.finish();
                    }

                    let indent = "    ".repeat(depth);
                    let label = if depth == 0 { "Flow" } else { "Sub-flow" };
                    multi
                        .println(format!(
                            "{}  {} {} ({} commands)",
                            indent,
                            "→".blue(),
                            label.white().bold(),
                            command_count
                        ))
                        .ok();
                }

                OrchestraEvent::FlowFinished {
                    success,
                    duration_ms,
                    depth,
                } => {
                    for pb in spinners.drain(..).flatten() {
                        pb.finish();
                    }
                    let status = if success {
                        "PASSED".green().bold()
                    } else {
                        "FAILED".red().bold()
                    };
                    let indent = "    ".repeat(depth);
                    println!("{}  {} Flow [{}] {}ms", indent, "←".blue(), status, duration_ms);
                }

                OrchestraEvent::CommandStarted {
                    index,
                    command,
                    depth,
                    ..
                } => {
                    if depth >= spinners.len() {
                        spinners.resize(depth + 1, None);
                        command_texts.resize(depth + 1, String::new());
                    }

                    let pb = multi.add(ProgressBar::new_spinner());
                    let indent = "    ".repeat(depth);
                    if let Ok(style) = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template(&format!("{}    {{spinner}} {{msg}}", indent))
                    {
                        pb.set_style(style);
                    }

                    let body = format!("[{}] {}... ", index, command.dimmed());
                    pb.set_message(body.clone());
                    pb.enable_steady_tick(StdDuration::from_millis(100));

                    spinners[depth] = Some(pb);
                    command_texts[depth] = body;
                }

                OrchestraEvent::CommandCompleted {
                    duration_ms, depth, ..
                } => {
                    if depth < spinners.len() {
                        let indent = "    ".repeat(depth);
                        finish_line(
                            spinners[depth].take(),
                            format!(
                                "{}    {} {}({}ms)",
                                indent,
                                "✓".green(),
                                command_texts[depth],
                                duration_ms
                            ),
                        )
                        .await;
                    }
                }

                OrchestraEvent::CommandFailed {
                    error,
                    duration_ms,
                    depth,
                    ..
                } => {
                    if depth < spinners.len() {
                        let indent = "    ".repeat(depth);
                        finish_line(
                            spinners[depth].take(),
                            format!(
                                "{}    {} {}({}ms)\n{}      {}",
                                indent,
                                "✗".red(),
                                command_texts[depth],
                                duration_ms,
                                indent,
                                error.red()
                            ),
                        )
                        .await;
                    }
                }

                OrchestraEvent::CommandSkipped { depth, .. } => {
                    if depth < spinners.len() {
                        let indent = "    ".repeat(depth);
                        finish_line(
                            spinners[depth].take(),
                            format!(
                                "{}    {} {}({})",
                                indent,
                                "○".yellow(),
                                command_texts[depth],
                                "skipped".dimmed()
                            ),
                        )
                        .await;
                    }
                }

                OrchestraEvent::CommandReset { command, depth, .. } => {
                    log::debug!("{}Reset: {}", "    ".repeat(depth), command);
                }

                OrchestraEvent::CommandMetadataUpdated { id, metadata } => {
                    if let Some(runs) = metadata.number_of_runs {
                        log::debug!("Command {} ran {} times", id, runs);
                    }
                }
            }
        }

        for pb in spinners.into_iter().flatten() {
            pb.finish();
        }
        summary
    }
}

/// Replace a spinner by a plain final line
async fn finish_line(spinner: Option<ProgressBar>, line: String) {
    if let Some(pb) = spinner {
        pb.finish_and_clear();
        // Let the clear render before printing over it
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }
    println!("{}", line);
}

impl RunSummary {
    /// Fold one event into the totals
    pub fn record(&mut self, event: &OrchestraEvent) {
        match event {
            OrchestraEvent::CommandStarted { .. } => self.total_commands += 1,
            OrchestraEvent::CommandCompleted { .. } => self.completed += 1,
            OrchestraEvent::CommandFailed { .. } => self.failed += 1,
            OrchestraEvent::CommandSkipped { .. } => self.skipped += 1,
            OrchestraEvent::FlowFinished {
                duration_ms,
                depth: 0,
                ..
            } => self.total_duration_ms = Some(*duration_ms),
            _ => {}
        }
    }
}
