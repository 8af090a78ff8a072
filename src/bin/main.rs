use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use solargraph_bridge::host::{EditorHost, MessageKind};
use solargraph_bridge::lsp::content_cache::PLACEHOLDER;
use solargraph_bridge::lsp::lifecycle::{Command, LifecycleController, load_configuration};
use solargraph_bridge::{BridgeError, BridgeResult};
use std::future::Future;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tower_lsp_server::ls_types::{Documentation, HoverContents};

/// Time allowed for a documentation page to render.
const PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Drive a Solargraph backend from the command line
#[derive(Parser)]
#[command(name = "solargraph-bridge")]
#[command(version)]
#[command(about = "Drive a Solargraph backend from the command line")]
struct Cli {
    /// Workspace root (default: current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// How to reach the backend
    #[arg(long, global = true, value_enum)]
    transport: Option<Transport>,

    /// Path or name of the solargraph executable
    #[arg(long, global = true)]
    command_path: Option<String>,

    /// Run the backend through `bundle exec`
    #[arg(long, global = true)]
    use_bundler: bool,

    /// Accept the first action of every prompt
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    Socket,
    Stdio,
    External,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Transport::Socket => "socket",
            Transport::Stdio => "stdio",
            Transport::External => "external",
        }
    }
}

#[derive(clap::Args)]
struct Position {
    /// Ruby source file
    file: PathBuf,
    /// Zero-based line
    line: u32,
    /// Zero-based column
    column: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Show hover documentation at a position
    Hover(Position),
    /// List completions at a position
    Complete(Position),
    /// Show signatures at a position
    Signature(Position),
    /// Show definition locations of the symbol at a position
    Definition(Position),
    /// Search the documentation
    Search {
        /// Search term; prompted for when omitted
        query: Option<String>,
    },
    /// Render a `solargraph:` page or a `command:` documentation link
    Open { uri: String },
    /// Compare the installed gem with the latest release
    CheckVersion,
    /// Build documentation for installed gems
    DocumentGems {
        /// Rebuild documentation that already exists
        #[arg(long)]
        rebuild: bool,
    },
    /// Write a default .solargraph.yml to the workspace
    Config,
    /// Download the core library documentation
    DownloadCore,
    /// Pre-build the workspace's documentation cache
    Prepare,
}

impl Commands {
    /// Whether the command talks to a running backend.
    fn needs_backend(&self) -> bool {
        !matches!(
            self,
            Commands::Config | Commands::DownloadCore | Commands::Prepare
        )
    }
}

/// [`EditorHost`] writing to stderr and reading answers from stdin.
struct TerminalHost {
    interactive: bool,
    assume_yes: bool,
    opened: Mutex<Vec<String>>,
}

impl TerminalHost {
    fn new(assume_yes: bool) -> Self {
        Self {
            interactive: std::io::stdin().is_terminal(),
            assume_yes,
            opened: Mutex::new(Vec::new()),
        }
    }

    fn take_opened(&self) -> Vec<String> {
        std::mem::take(&mut *self.opened.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

async fn read_line() -> Option<String> {
    let mut line = String::new();
    match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

impl EditorHost for TerminalHost {
    fn set_status(&self, text: &str) {
        log::info!(target: "solargraph_bridge::host", "{}", text);
    }

    fn show_message(
        &self,
        kind: MessageKind,
        message: &str,
        actions: &[String],
    ) -> impl Future<Output = Option<String>> + Send {
        let prefix = match kind {
            MessageKind::Info => "info",
            MessageKind::Warning => "warning",
            MessageKind::Error => "error",
        };
        eprintln!("{}: {}", prefix, message);

        let actions = actions.to_vec();
        let ask = !actions.is_empty() && self.interactive && !self.assume_yes;
        let assume_yes = self.assume_yes;
        async move {
            if assume_yes {
                return actions.first().cloned();
            }
            if !ask {
                return None;
            }
            for (i, action) in actions.iter().enumerate() {
                eprintln!("  [{}] {}", i + 1, action);
            }
            eprint!("Choose an action (Enter to dismiss): ");
            let answer = read_line().await?;
            let index = answer.trim().parse::<usize>().ok()?;
            actions.get(index.checked_sub(1)?).cloned()
        }
    }

    fn prompt_input(&self, prompt: &str) -> impl Future<Output = Option<String>> + Send {
        let interactive = self.interactive;
        if interactive {
            eprint!("{} ", prompt);
        }
        async move {
            if !interactive {
                return None;
            }
            read_line().await.filter(|line| !line.trim().is_empty())
        }
    }

    fn confirm_retry(&self, message: &str) -> impl Future<Output = bool> + Send {
        eprintln!("{}", message);
        let assume_yes = self.assume_yes;
        let interactive = self.interactive;
        async move {
            if assume_yes {
                return true;
            }
            if !interactive {
                return false;
            }
            eprint!("Retry? [y/N] ");
            matches!(read_line().await.as_deref().map(str::trim), Some("y" | "Y" | "yes"))
        }
    }

    fn open_document(&self, uri: &str, title: &str) {
        eprintln!("== {} ==", title);
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(uri.to_string());
    }
}

fn override_settings(cli: &Cli) -> Value {
    let mut settings = Map::new();
    if let Some(transport) = cli.transport {
        settings.insert("transport".to_string(), Value::from(transport.as_str()));
    }
    if let Some(command_path) = &cli.command_path {
        settings.insert("commandPath".to_string(), Value::from(command_path.as_str()));
    }
    if cli.use_bundler {
        settings.insert("useBundler".to_string(), Value::Bool(true));
    }
    Value::Object(settings)
}

fn source_text(file: &Path) -> BridgeResult<String> {
    Ok(std::fs::read_to_string(file)?)
}

/// Wait until `uri` has rendered, then return its content.
async fn rendered_page(
    controller: &LifecycleController<TerminalHost>,
    changes: &mut tokio::sync::broadcast::Receiver<String>,
    uri: &str,
) -> BridgeResult<String> {
    let deadline = tokio::time::Instant::now() + PAGE_TIMEOUT;
    loop {
        let content = controller.provide_document_content(uri)?;
        if content != PLACEHOLDER {
            return Ok(content);
        }
        match tokio::time::timeout_at(deadline, changes.recv()).await {
            Ok(Ok(_)) | Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => {}
            Ok(Err(_)) | Err(_) => {
                return Err(BridgeError::transport(format!("timed out loading {}", uri)));
            }
        }
    }
}

async fn run(cli: Cli, controller: &LifecycleController<TerminalHost>) -> BridgeResult<()> {
    let mut changes = controller.document_changes();

    let command = match cli.command {
        Commands::Hover(position) => {
            let text = source_text(&position.file)?;
            let params = controller.position_params(text, position.line, position.column, &position.file);
            match controller.provide_hover(&params).await.map(|hover| hover.contents) {
                Some(HoverContents::Markup(markup)) => println!("{}", markup.value),
                Some(_) | None => eprintln!("No documentation found"),
            }
            return Ok(());
        }
        Commands::Complete(position) => {
            let text = source_text(&position.file)?;
            let params = controller.position_params(text, position.line, position.column, &position.file);
            for item in controller.provide_completion(&params).await {
                match item.detail {
                    Some(detail) => println!("{}\t{}", item.label, detail),
                    None => println!("{}", item.label),
                }
            }
            return Ok(());
        }
        Commands::Signature(position) => {
            let text = source_text(&position.file)?;
            let params = controller.position_params(text, position.line, position.column, &position.file);
            for signature in controller.provide_signature_help(&params).await {
                println!("{}", signature.label);
                if let Some(Documentation::MarkupContent(doc)) = signature.documentation {
                    println!("{}\n", doc.value);
                }
            }
            return Ok(());
        }
        Commands::Definition(position) => {
            let text = source_text(&position.file)?;
            let params = controller.position_params(text, position.line, position.column, &position.file);
            for location in controller.provide_definition(&params).await {
                println!("{}", location);
            }
            return Ok(());
        }
        Commands::Search { query } => Command::SearchDocumentation { query },
        Commands::Open { uri } => Command::from_command_uri(&uri)
            .unwrap_or(Command::OpenDocumentUrl { uri }),
        Commands::CheckVersion => Command::CheckGemVersion,
        Commands::DocumentGems { rebuild } => Command::BuildGemDocs { rebuild },
        Commands::Config => Command::WriteDefaultConfig,
        Commands::DownloadCore => Command::DownloadCore,
        Commands::Prepare => Command::Prepare,
    };

    controller.execute(command).await?;
    for uri in controller.host().take_opened() {
        println!("{}", rendered_page(controller, &mut changes, &uri).await?);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let workspace = match cli.workspace.clone().map(Ok).unwrap_or_else(std::env::current_dir) {
        Ok(workspace) => workspace,
        Err(e) => {
            eprintln!("Error: Could not determine the workspace: {}", e);
            std::process::exit(1);
        }
    };

    let config = load_configuration(vec![workspace], Some(override_settings(&cli)));
    let controller = LifecycleController::new(TerminalHost::new(cli.yes), config);

    if cli.command.needs_backend()
        && let Err(e) = controller.activate().await
    {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let result = run(cli, &controller).await;
    controller.deactivate().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
