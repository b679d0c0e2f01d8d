//! gpchat - interactive terminal front-end
//!
//! Reads prompts from stdin, streams answers to stdout and progress to
//! stderr. Lines starting with `/` are commands; `/help` lists them.
//! Ctrl-C during a turn abandons it and moves the prompt into the draft slot.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use gpchat::agent::{AgentEvent, ReasoningConfig, ResearchConfig};
use gpchat::config::{self, AppConfig, Backend};
use gpchat::sandbox::PythonSandbox;
use gpchat::transcript::HistoryStore;
use gpchat::turn::{guess_mime_type, CanvasValidation, PendingFile, Pylint, ReasoningEffort};
use gpchat::{EventSink, Session, SessionWorkspace, TurnOrchestrator, TurnSettings};

#[derive(Parser)]
#[command(author, version, about = "Chat with an LLM that can run and fix its own Python code")]
struct Cli {
    /// Env file to load before reading configuration
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Directory searched for *.env files when --env-file is not given
    #[arg(long, default_value = "env")]
    env_dir: PathBuf,

    /// Use the local Ollama backend instead of Gemini
    #[arg(long)]
    ollama: bool,

    /// Override the model identifier
    #[arg(long)]
    model: Option<String>,

    /// Start with Google Search grounding enabled
    #[arg(long)]
    search: bool,

    /// Start with automatic code execution enabled
    #[arg(long)]
    auto_plot: bool,

    /// Disable automatic history saving
    #[arg(long)]
    no_auto_save: bool,
}

const HELP: &str = "\
Commands:
  /search            toggle Google Search grounding
  /research          toggle deep research
  /reason            toggle deep reasoning
  /plot              toggle automatic code execution
  /effort low|high   set reasoning effort
  /attach <path>     attach a file to the next turn
  /canvas <n> <path> load a file into editor buffer n (1-based)
  /review <n>        ask the model to review editor buffer n
  /validate <n>      run pylint on editor buffer n and explain the report
  /save              save the conversation now
  /load <file>       restore a saved conversation
  /history           list saved conversations
  /draft [send [text]|discard]
                     show, resend or discard an interrupted prompt
  /usage             show session token usage
  /metrics           print Prometheus metrics
  /quit              exit";

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn load_env(cli: &Cli) -> CliResult<()> {
    match &cli.env_file {
        Some(path) => config::load_env_file(path)?,
        None => {
            for path in config::find_env_files(&cli.env_dir)? {
                config::load_env_file(path)?;
            }
        }
    }
    Ok(())
}

/// 1-based canvas number from the command line to a buffer index; defaults to 1.
fn canvas_index(arg: &str) -> CliResult<usize> {
    let arg = arg.trim();
    let number: usize = if arg.is_empty() { 1 } else { arg.parse()? };
    if number == 0 {
        return Err("editor buffers are numbered from 1".into());
    }
    Ok(number - 1)
}

/// Print agent events as they arrive.
async fn render_events(mut rx: UnboundedReceiver<AgentEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::TextDelta(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            AgentEvent::Thought(text) => eprintln!("  💭 {text}"),
            AgentEvent::Status(text) => eprintln!("⏳ {text}"),
            AgentEvent::Warning(text) => eprintln!("⚠️  {text}"),
            AgentEvent::Error(text) => eprintln!("❌ {text}"),
            AgentEvent::ExecutionOutput { text, images } => {
                println!("\n--- execution output ---\n{text}");
                if images > 0 {
                    println!("[{images} chart(s) captured]");
                }
            }
        }
    }
}

struct Repl {
    orchestrator: TurnOrchestrator,
    history: Arc<HistoryStore>,
    workspace: SessionWorkspace,
    session: Session,
    settings: TurnSettings,
    events: EventSink,
}

impl Repl {
    async fn run_prompt(&mut self, prompt: &str) {
        let turn = self
            .orchestrator
            .run_turn(&mut self.session, prompt, &self.settings, &self.events);

        let result = tokio::select! {
            result = turn => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };
        println!();

        match result {
            Some(Ok(outcome)) => {
                if let Some(file) = outcome.saved_as {
                    tracing::debug!(file = %file, "Conversation saved");
                }
            }
            Some(Err(e)) => eprintln!("❌ {e}"),
            None => {
                self.session.recover_interrupted();
                eprintln!("Turn cancelled. Use /draft to resend or discard it.");
            }
        }
    }

    fn attach(&mut self, path: &str) -> CliResult<()> {
        let path = PathBuf::from(path);
        let bytes = std::fs::read(&path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        let staged = self.workspace.stage(&name, &bytes)?;

        match PendingFile::from_bytes(&name, guess_mime_type(&path), &bytes) {
            Ok(file) => {
                self.session.uploads.push(file.with_staged_path(staged));
                eprintln!("📎 {name} attached ({} bytes)", bytes.len());
            }
            Err(e) => {
                // Still reachable from executed code
                self.session.files.insert(name.clone(), staged);
                eprintln!("⚠️  {e}; {name} is only available to executed code");
            }
        }
        Ok(())
    }

    /// Returns false when the REPL should exit.
    async fn command(&mut self, line: &str) -> CliResult<bool> {
        let mut words = line.splitn(2, char::is_whitespace);
        let name = words.next().unwrap_or_default();
        let arg = words.next().map(str::trim).unwrap_or_default();

        match name {
            "/quit" | "/exit" => return Ok(false),
            "/help" => eprintln!("{HELP}"),
            "/search" => {
                self.settings.web_search = !self.settings.web_search;
                eprintln!("search: {}", self.settings.web_search);
            }
            "/research" => {
                self.settings.deep_research = !self.settings.deep_research;
                eprintln!("deep research: {}", self.settings.deep_research);
            }
            "/reason" => {
                self.settings.deep_reasoning = !self.settings.deep_reasoning;
                eprintln!("deep reasoning: {}", self.settings.deep_reasoning);
            }
            "/plot" => {
                self.settings.auto_plot = !self.settings.auto_plot;
                eprintln!("auto plot: {}", self.settings.auto_plot);
            }
            "/effort" => {
                self.settings.reasoning_effort = arg.parse::<ReasoningEffort>()?;
                eprintln!("reasoning effort: {:?}", self.settings.reasoning_effort);
            }
            "/attach" => self.attach(arg)?,
            "/canvas" => {
                let (index, path) = arg.split_once(char::is_whitespace).ok_or("usage: /canvas <n> <path>")?;
                let index = canvas_index(index)?;
                let code = std::fs::read_to_string(path.trim())?;
                self.session.set_editor(index, code);
                self.session.multi_editor = self.session.editors.len() > 1;
                eprintln!("Canvas-{} loaded", index + 1);
            }
            "/review" => {
                let index = canvas_index(arg)?;
                let result = self
                    .orchestrator
                    .review_canvas(&mut self.session, index, &self.settings, &self.events)
                    .await;
                println!();
                result?;
            }
            "/validate" => {
                let index = canvas_index(arg)?;
                let result = self
                    .orchestrator
                    .validate_canvas(&mut self.session, index, &self.settings, &self.events)
                    .await;
                println!();
                match result? {
                    CanvasValidation::NoCode => eprintln!("No code to validate."),
                    CanvasValidation::SyntaxError => eprintln!("Fix the syntax error first."),
                    CanvasValidation::Clean => eprintln!("✅ Canvas-{}: pylint found no issues", index + 1),
                    CanvasValidation::Reviewed(_) => {}
                }
            }
            "/save" => match self.orchestrator.save(&mut self.session).await {
                Some(file) => eprintln!("💾 saved as {file}"),
                None => eprintln!("Nothing saved (conversation too short)"),
            },
            "/load" => {
                let snapshot = self.history.load(arg)?;
                self.session.restore(arg, snapshot);
                eprintln!("Restored {} messages from {arg}", self.session.transcript.len());
            }
            "/history" => {
                for entry in self.history.list()? {
                    eprintln!("{}  {:>4} msgs  {}", entry.saved_at, entry.message_count, entry.file);
                }
            }
            "/draft" => {
                let (action, text) = arg
                    .split_once(char::is_whitespace)
                    .map(|(a, t)| (a, t.trim()))
                    .unwrap_or((arg, ""));
                match (action, self.session.draft().map(str::to_string)) {
                    (_, None) => eprintln!("No draft"),
                    ("send", Some(draft)) => {
                        let text = if text.is_empty() { draft } else { text.to_string() };
                        self.session.discard_draft();
                        self.run_prompt(&text).await;
                    }
                    ("discard", Some(_)) => {
                        self.session.discard_draft();
                        eprintln!("Draft discarded");
                    }
                    (_, Some(draft)) => eprintln!("Draft:\n{draft}"),
                }
            }
            "/usage" => {
                let usage = self.session.usage;
                eprintln!(
                    "session tokens: {} (in {}, out {})",
                    usage.total_tokens, usage.input_tokens, usage.output_tokens
                );
            }
            "/metrics" => println!("{}", gpchat::metrics::gather_text()),
            other => eprintln!("Unknown command {other}; try /help"),
        }
        Ok(true)
    }
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    load_env(&cli)?;

    let mut config = AppConfig::from_env()?;
    if cli.ollama {
        config.backend = Backend::Ollama;
    }
    if let Some(model) = cli.model.clone() {
        match config.backend {
            Backend::Gemini => config.gemini_model = model,
            Backend::Ollama => config.ollama_model = model,
        }
    }

    gpchat::tracing::init_tracing("gpchat", config.otlp_endpoint.as_deref())?;

    let transport = config.build_transport()?;
    let workspace = SessionWorkspace::create(&config.workspace_dir)?;
    let sandbox = PythonSandbox::new()
        .with_python_bin(&config.python_bin)
        .with_user_site(config.python_user_site)
        .with_timeout(config.execution_timeout)
        .with_working_dir(workspace.dir());
    let history = Arc::new(HistoryStore::new(&config.history_dir)?.with_titler(transport.clone()));

    let orchestrator = TurnOrchestrator::new(transport, Arc::new(sandbox))
        .with_research_config(ResearchConfig {
            pause: config.pause,
            ..ResearchConfig::default()
        })
        .with_reasoning_config(ReasoningConfig {
            pause: config.pause,
            ..ReasoningConfig::default()
        })
        .with_linter(Arc::new(Pylint::new().with_python_bin(&config.python_bin)))
        .with_auto_save(history.clone())
        .with_max_output_tokens(config.max_output_tokens);

    let (events, rx) = EventSink::channel();
    let renderer = tokio::spawn(render_events(rx));

    let mut repl = Repl {
        orchestrator,
        history,
        workspace,
        session: Session::new(Some(&config.system_instruction)),
        settings: TurnSettings {
            web_search: cli.search,
            auto_plot: cli.auto_plot,
            auto_save: !cli.no_auto_save,
            ..TurnSettings::default()
        },
        events,
    };

    eprintln!("gpchat ({}) - /help for commands, /quit to exit", config.model());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('/') {
            match repl.command(line).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => eprintln!("❌ {e}"),
            }
        } else if repl.session.draft().is_some() {
            eprintln!("An interrupted prompt is waiting; use /draft send or /draft discard first.");
        } else {
            repl.run_prompt(line).await;
        }
    }

    repl.workspace.cleanup();
    drop(repl);
    let _ = renderer.await;
    gpchat::tracing::shutdown_tracing();
    Ok(())
}
