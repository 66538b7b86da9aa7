//! Host-facing command surface.
//!
//! The host (an editor, or the terminal bridge) only has to run a [`BridgeCommand`] through the
//! [`CommandDispatcher`] and display what comes back. Nothing here returns an error to the host:
//! every failure ends up as a notification or display text.

use std::sync::Arc;

use crate::client::{failure_message, ApiClient};
use crate::orchestrator::{ProgressReporter, ServiceOrchestrator, ServiceState};
use crate::protocol::QueryContext;
use crate::supervisor::ServiceName;

/// Lines of code before the cursor sent as completion context.
pub const COMPLETION_CONTEXT_LINES: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCommand {
    StartServices,
    StopServices,
    Status,
    Health,
    Ask {
        question: String,
        use_memory: bool,
        context: Option<QueryContext>,
    },
    ExplainCode {
        code: String,
        language: String,
    },
    CompleteCode {
        code_context: String,
        language: String,
        request: String,
    },
    ImproveCode {
        code: String,
        language: String,
    },
    ShowActionMenu,
}

/// Entries of the action menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Ask,
    Explain,
    Complete,
    Improve,
    StartServices,
    StopServices,
}

impl MenuAction {
    pub const ALL: [MenuAction; 6] = [
        MenuAction::Ask,
        MenuAction::Explain,
        MenuAction::Complete,
        MenuAction::Improve,
        MenuAction::StartServices,
        MenuAction::StopServices,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MenuAction::Ask => "Ask AI a question",
            MenuAction::Explain => "Explain selected code",
            MenuAction::Complete => "Complete code at cursor",
            MenuAction::Improve => "Improve selected code",
            MenuAction::StartServices => "Start AI services",
            MenuAction::StopServices => "Stop AI services",
        }
    }
}

/// What the host's active editor currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditorContext {
    pub file: Option<String>,
    pub language: String,
    pub selection: String,
    /// Text before the cursor, already limited to [`COMPLETION_CONTEXT_LINES`].
    pub context_before_cursor: String,
}

/// Capabilities the dispatcher needs from the host.
pub trait Host: ProgressReporter {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
    fn show_result(&self, title: &str, body: &str);
    /// `None` when the user dismisses the menu.
    fn choose_action(&self, actions: &[MenuAction]) -> Option<MenuAction>;
    /// `None` when the user cancels the prompt.
    fn input(&self, prompt: &str) -> Option<String>;
    fn editor_context(&self) -> Option<EditorContext>;
}

/// Text of `lines` lines before `cursor_line` (0-based) up to the start of the cursor line.
pub fn context_before_cursor(text: &str, cursor_line: usize, lines: usize) -> String {
    let start = cursor_line.saturating_sub(lines);
    text.lines()
        .skip(start)
        .take(cursor_line - start)
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct CommandDispatcher<H> {
    host: Arc<H>,
    orchestrator: ServiceOrchestrator,
    client: Arc<ApiClient>,
}

impl<H: Host + 'static> CommandDispatcher<H> {
    pub fn new(host: Arc<H>, orchestrator: ServiceOrchestrator, client: Arc<ApiClient>) -> Self {
        Self {
            host,
            orchestrator,
            client,
        }
    }

    pub fn orchestrator(&self) -> &ServiceOrchestrator {
        &self.orchestrator
    }

    /// Host activation: start services when `auto_start` is set.
    pub async fn activate(&self, auto_start: bool) {
        tracing::info!(auto_start, "bridge activated");
        if auto_start {
            self.run(BridgeCommand::StartServices).await;
        }
    }

    pub async fn run(&self, command: BridgeCommand) {
        let command = match command {
            BridgeCommand::ShowActionMenu => match self.menu_command() {
                Some(command) => command,
                None => return,
            },
            other => other,
        };

        match command {
            BridgeCommand::StartServices => self.start_services().await,
            BridgeCommand::StopServices => {
                self.orchestrator.shutdown().await;
                self.host.info("AI services stopped.");
            }
            BridgeCommand::Status => self.status().await,
            BridgeCommand::Health => match self.client.health().await {
                Ok(true) => self.host.info("Agent API is healthy."),
                Ok(false) => self.host.error("Agent API answered but did not report ok."),
                Err(e) => self.host.error(&failure_message(&e)),
            },
            BridgeCommand::Ask {
                question,
                use_memory,
                context,
            } => {
                if question.trim().is_empty() {
                    return;
                }
                let answer = self.client.query_with_context(&question, use_memory, context).await;
                self.host.show_result("AI", &answer);
            }
            BridgeCommand::ExplainCode { code, language } => {
                if code.trim().is_empty() {
                    self.host.error("No code selected!");
                    return;
                }
                let explanation = self.client.explain_code(&code, &language).await;
                self.host.show_result("Explanation", &explanation);
            }
            BridgeCommand::CompleteCode {
                code_context,
                language,
                request,
            } => {
                if request.trim().is_empty() {
                    return;
                }
                let completion = self.client.complete_code(&code_context, &language, &request).await;
                self.host.show_result("Completion", &completion);
            }
            BridgeCommand::ImproveCode { code, language } => {
                if code.trim().is_empty() {
                    self.host.error("No code selected!");
                    return;
                }
                let improved = self.client.improve_code(&code, &language).await;
                self.host.show_result("Improved code", &improved);
            }
            BridgeCommand::ShowActionMenu => tracing::debug!("menu selection resolved to another menu"),
        }
    }

    async fn start_services(&self) {
        if self.orchestrator.state().await == ServiceState::Running {
            self.host.info("AI services are already running.");
            return;
        }
        let progress: Arc<dyn ProgressReporter> = self.host.clone();
        match self.orchestrator.ensure_running(progress).await {
            Ok(report) if report.already_running => self.host.info("AI services are already running."),
            Ok(report) => {
                let assumed: Vec<&str> = report.assumed().map(ServiceName::label).collect();
                if assumed.is_empty() {
                    self.host.info("AI services started successfully!");
                } else {
                    self.host.info(&format!(
                        "AI services started. Still warming up: {}.",
                        assumed.join(", ")
                    ));
                }
            }
            Err(e) => self.host.error(&format!("Failed to start AI services: {}", e)),
        }
    }

    async fn status(&self) {
        let supervisor = self.orchestrator.supervisor();
        let mut lines = vec![format!("services: {:?}", self.orchestrator.state().await)];
        for service in ServiceName::STARTUP_ORDER {
            let running = supervisor.is_running(service).await;
            let line = match supervisor.pid(service).await {
                Some(pid) => format!("{:<10} running (pid {})", service.as_str(), pid),
                None if running => format!("{:<10} running", service.as_str()),
                None => format!("{:<10} stopped", service.as_str()),
            };
            lines.push(line);
        }
        lines.push(format!("endpoint: {}", self.client.endpoint().current_base_url().await));
        self.host.show_result("Service status", &lines.join("\n"));
    }

    /// Ask the host for an action and the input it needs.
    fn menu_command(&self) -> Option<BridgeCommand> {
        let action = self.host.choose_action(&MenuAction::ALL)?;
        match action {
            MenuAction::StartServices => Some(BridgeCommand::StartServices),
            MenuAction::StopServices => Some(BridgeCommand::StopServices),
            MenuAction::Ask => {
                let question = self.host.input("Your question to the AI")?;
                let context = self.host.editor_context().and_then(|ctx| {
                    ctx.file.map(|file| QueryContext {
                        file,
                        language: ctx.language,
                    })
                });
                Some(BridgeCommand::Ask {
                    question,
                    use_memory: true,
                    context,
                })
            }
            MenuAction::Explain | MenuAction::Improve => {
                let Some(ctx) = self.host.editor_context() else {
                    self.host.error("No active editor!");
                    return None;
                };
                if action == MenuAction::Explain {
                    Some(BridgeCommand::ExplainCode {
                        code: ctx.selection,
                        language: ctx.language,
                    })
                } else {
                    Some(BridgeCommand::ImproveCode {
                        code: ctx.selection,
                        language: ctx.language,
                    })
                }
            }
            MenuAction::Complete => {
                let Some(ctx) = self.host.editor_context() else {
                    self.host.error("No active editor!");
                    return None;
                };
                let request = self.host.input("Describe the code you want to generate")?;
                Some(BridgeCommand::CompleteCode {
                    code_context: ctx.context_before_cursor,
                    language: ctx.language,
                    request,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_capped_before_cursor() {
        let text: String = (0..100).map(|i| format!("line{}\n", i)).collect();
        let ctx = context_before_cursor(&text, 60, COMPLETION_CONTEXT_LINES);
        let lines: Vec<&str> = ctx.lines().collect();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "line10");
        assert_eq!(lines[49], "line59");
    }

    #[test]
    fn context_near_top_takes_everything_above() {
        let ctx = context_before_cursor("a\nb\nc\nd", 2, COMPLETION_CONTEXT_LINES);
        assert_eq!(ctx, "a\nb");
        assert_eq!(context_before_cursor("a\nb", 0, COMPLETION_CONTEXT_LINES), "");
    }

    #[test]
    fn menu_labels_are_distinct() {
        let mut labels: Vec<&str> = MenuAction::ALL.iter().map(|a| a.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), MenuAction::ALL.len());
    }
}
