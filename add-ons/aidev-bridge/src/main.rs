//! aidev-bridge: terminal host for the AI dev team services.
//!
//! Runs one bridge command per invocation. `start` and `chat` own the service processes for
//! their lifetime and stop them on exit.

use aidev_core::{
    context_before_cursor, ApiClient, BridgeCommand, BridgeConfig, CommandDispatcher, EditorContext, EndpointResolver,
    Host, MenuAction, ProcessSupervisor, ProgressReporter, QueryContext, ServiceOrchestrator, ServiceState,
    SettingsStore, COMPLETION_CONTEXT_LINES,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long `chat` waits for service teardown before exiting anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "aidev-bridge", version, about = "Local AI dev team services from the terminal")]
struct Cli {
    /// Config file (defaults to $AIDEV_CONFIG or config/aidev.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace holding docker-compose.yml and the launch scripts.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the store, inference and agent services and keep them attached until Ctrl-C.
    Start,
    /// Stop all services.
    Stop,
    /// Show service and endpoint status.
    Status,
    /// Probe the agent's /health endpoint.
    Health,
    /// Ask a general question.
    Ask {
        #[arg(required = true)]
        question: Vec<String>,
        #[arg(long)]
        no_memory: bool,
    },
    /// Explain the code in a file.
    Explain {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        lang: Option<String>,
    },
    /// Complete code at a line of a file.
    Complete {
        #[arg(long)]
        file: PathBuf,
        /// 1-based cursor line.
        #[arg(long)]
        line: usize,
        #[arg(long)]
        request: String,
        #[arg(long)]
        lang: Option<String>,
    },
    /// Suggest improvements for the code in a file.
    Improve {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        lang: Option<String>,
    },
    /// Pick an action from the menu.
    Menu {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Interactive session; starts services if configured and stops them on exit.
    Chat {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

/// Prints results to stdout and prompts on stdin.
///
/// Menu prompts and the chat loop read from the same line channel, so stdin has a single reader.
struct TerminalHost {
    editor: Option<EditorContext>,
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl TerminalHost {
    fn new(editor: Option<EditorContext>, lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            editor,
            lines: Mutex::new(lines),
        }
    }

    /// Next input line; `None` at end of input.
    async fn next_line(&self) -> Option<String> {
        self.lines.lock().await.recv().await
    }
}

/// Forward stdin lines from a dedicated thread until EOF or until the receiver is gone.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not read stdin");
                    break;
                }
            }
        }
    });
    rx
}

impl ProgressReporter for TerminalHost {
    fn report(&self, message: &str) {
        eprintln!("… {}", message);
    }
}

impl Host for TerminalHost {
    fn info(&self, message: &str) {
        println!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("error: {}", message);
    }

    fn show_result(&self, title: &str, body: &str) {
        println!("── {} ──\n{}", title, body);
    }

    fn choose_action(&self, actions: &[MenuAction]) -> Option<MenuAction> {
        for (i, action) in actions.iter().enumerate() {
            println!("  {}. {}", i + 1, action.label());
        }
        let choice = self.input("Choose an action")?;
        let index = choice.trim().parse::<usize>().ok()?;
        actions.get(index.checked_sub(1)?).copied()
    }

    fn input(&self, prompt: &str) -> Option<String> {
        print!("{}: ", prompt);
        std::io::stdout().flush().ok()?;
        let line = tokio::task::block_in_place(|| self.lines.blocking_lock().blocking_recv())?;
        let line = line.trim().to_string();
        (!line.is_empty()).then_some(line)
    }

    fn editor_context(&self) -> Option<EditorContext> {
        self.editor.clone()
    }
}

fn language_for(path: &Path) -> String {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    match ext {
        "rs" => "rust",
        "py" => "python",
        "ts" => "typescript",
        "js" => "javascript",
        "md" => "markdown",
        "sh" => "shellscript",
        "" => "plaintext",
        other => other,
    }
    .to_string()
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Whole-file editor context with the cursor at the end.
fn editor_context_for(path: &Path) -> anyhow::Result<EditorContext> {
    let text = read_source(path)?;
    let line_count = text.lines().count();
    Ok(EditorContext {
        file: Some(path.display().to_string()),
        language: language_for(path),
        context_before_cursor: context_before_cursor(&text, line_count, COMPLETION_CONTEXT_LINES),
        selection: text,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[aidev-bridge] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load_from(path),
        None => BridgeConfig::load(),
    }
    .context("loading bridge config")?;
    if let Some(workspace) = cli.workspace.clone() {
        config.workspace_root = workspace;
    }

    let user_settings = SettingsStore::new(config.settings_path()).load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring unreadable user settings");
        Default::default()
    });
    tracing::debug!(
        workspace = %config.workspace_root.display(),
        agent_api_url = %config.effective_agent_api_url(&user_settings),
        "bridge configured"
    );

    let editor = match &cli.command {
        Command::Menu { file: Some(file) } | Command::Chat { file: Some(file) } => Some(editor_context_for(file)?),
        _ => None,
    };
    let host = Arc::new(TerminalHost::new(editor, stdin_lines()));

    let orchestrator = ServiceOrchestrator::new(ProcessSupervisor::new(config.launch_settings()));
    let resolver = Arc::new(EndpointResolver::from_config(&config));
    let client = Arc::new(ApiClient::from_config(&config, resolver));
    let dispatcher = CommandDispatcher::new(host.clone(), orchestrator, client);

    let command = match cli.command {
        Command::Start => {
            serve(&dispatcher).await;
            return Ok(());
        }
        Command::Stop => BridgeCommand::StopServices,
        Command::Status => BridgeCommand::Status,
        Command::Health => BridgeCommand::Health,
        Command::Ask { question, no_memory } => BridgeCommand::Ask {
            question: question.join(" "),
            use_memory: !no_memory,
            context: None,
        },
        Command::Explain { file, lang } => BridgeCommand::ExplainCode {
            code: read_source(&file)?,
            language: lang.unwrap_or_else(|| language_for(&file)),
        },
        Command::Complete {
            file,
            line,
            request,
            lang,
        } => {
            let text = read_source(&file)?;
            BridgeCommand::CompleteCode {
                code_context: context_before_cursor(&text, line.saturating_sub(1), COMPLETION_CONTEXT_LINES),
                language: lang.unwrap_or_else(|| language_for(&file)),
                request,
            }
        }
        Command::Improve { file, lang } => BridgeCommand::ImproveCode {
            code: read_source(&file)?,
            language: lang.unwrap_or_else(|| language_for(&file)),
        },
        Command::Menu { .. } => BridgeCommand::ShowActionMenu,
        Command::Chat { .. } => {
            let auto_start = config.effective_auto_start(&user_settings);
            chat(&dispatcher, host.as_ref(), auto_start).await;
            return Ok(());
        }
    };

    dispatcher.run(command).await;
    Ok(())
}

/// Start services, forward their output until Ctrl-C, then deactivate.
async fn serve(dispatcher: &CommandDispatcher<TerminalHost>) {
    dispatcher.run(BridgeCommand::StartServices).await;
    if dispatcher.orchestrator().state().await != ServiceState::Running {
        return;
    }
    tracing::info!("services attached; press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for CTRL-C");
    }
    deactivate(dispatcher).await;
}

async fn deactivate(dispatcher: &CommandDispatcher<TerminalHost>) {
    if let Some(handle) = dispatcher.orchestrator().deactivate().await {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            tracing::warn!("service teardown still running at exit");
        }
    }
}

/// Read questions until end of input, `/quit` or Ctrl-C, then deactivate.
async fn chat(dispatcher: &CommandDispatcher<TerminalHost>, host: &TerminalHost, auto_start: bool) {
    dispatcher.activate(auto_start).await;
    println!("Type a question, /menu, /status, /start, /stop or /quit.");

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let line = tokio::select! {
            line = host.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; ending chat");
                break;
            }
        };
        let Some(line) = line else { break };

        let command = match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/menu" => BridgeCommand::ShowActionMenu,
            "/status" => BridgeCommand::Status,
            "/start" => BridgeCommand::StartServices,
            "/stop" => BridgeCommand::StopServices,
            question => BridgeCommand::Ask {
                question: question.to_string(),
                use_memory: true,
                context: host.editor.as_ref().and_then(|ctx| {
                    ctx.file.clone().map(|file| QueryContext {
                        file,
                        language: ctx.language.clone(),
                    })
                }),
            },
        };
        dispatcher.run(command).await;
    }

    deactivate(dispatcher).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with(lines: &[&str]) -> (TerminalHost, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        for line in lines {
            tx.send(line.to_string()).unwrap();
        }
        (TerminalHost::new(None, rx), tx)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn menu_prompts_and_chat_read_the_same_lines_in_order() {
        let (host, tx) = host_with(&["1", "what is a lifetime?", "/status"]);

        assert_eq!(host.choose_action(&MenuAction::ALL), Some(MenuAction::Ask));
        assert_eq!(host.input("Your question to the AI").as_deref(), Some("what is a lifetime?"));
        assert_eq!(host.next_line().await.as_deref(), Some("/status"));

        drop(tx);
        assert_eq!(host.next_line().await, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blank_or_closed_input_cancels_the_prompt() {
        let (host, tx) = host_with(&["   ", "9"]);
        assert_eq!(host.input("Your question to the AI"), None);
        assert_eq!(host.choose_action(&MenuAction::ALL), None);

        drop(tx);
        assert_eq!(host.input("Your question to the AI"), None);
    }

    #[test]
    fn language_follows_extension() {
        assert_eq!(language_for(Path::new("src/main.rs")), "rust");
        assert_eq!(language_for(Path::new("Makefile")), "plaintext");
        assert_eq!(language_for(Path::new("query.sql")), "sql");
    }
}
