//! chatbot - conversational search bot for a chat application

mod auth;
mod backend;
mod commands;
mod config;
mod session;
mod tools;
mod utils;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chatbot_agent::{
    AgentEvent, ChatGraph, CheckpointStore, DirectoryPrompts, GraphConfig, InMemoryStore,
    PromptSelector, ProviderTransport, RetryConfig, SearchScopeClassifier, StoreConfig, Transport,
};
use chatbot_agent::tool::names;
use chatbot_ai::Model;
use chatbot_ai::providers::anthropic::AnthropicProvider;
use clap::Parser;

use crate::backend::HttpBackend;
use crate::commands::CommandResult;
use crate::config::Config;

/// chatbot - search your chats by talking to a bot
#[derive(Parser, Debug)]
#[command(name = "chatbot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: ~/.config/chatbot/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model to use (default: claude-3-haiku-20240307)
    #[arg(short, long)]
    model: Option<String>,

    /// Conversation thread id
    #[arg(short, long)]
    thread: Option<String>,

    /// Authorization value forwarded to the chat backend
    #[arg(long, env = "CHATBOT_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Run in non-interactive mode with a single message
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// List stored threads
    #[arg(long)]
    threads: bool,

    /// Forget the selected thread and exit
    #[arg(long)]
    reset: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::new("chatbot_cli=debug,chatbot_agent=debug,chatbot_ai=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = match args.config {
        Some(ref path) => Config::load_from(path),
        None => Config::load(),
    };

    let store = build_store(&cfg);

    if args.threads {
        return list_threads(store.as_ref()).await;
    }

    let api_key = match cfg.api_key() {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("Set your API key with: export CLAUDE_API_KEY=your-key");
            eprintln!("Or add it to the config file: chatbot --init-config");
            std::process::exit(1);
        }
    };

    let mut model = Model::anthropic(args.model.as_deref().unwrap_or(cfg.model()));
    if let Some(ref base_url) = cfg.llm.base_url {
        model.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(max_tokens) = cfg.llm.max_tokens {
        model.max_tokens = max_tokens;
    }

    let retry = RetryConfig {
        max_retries: cfg.llm.max_retries.unwrap_or(RetryConfig::default().max_retries),
        ..RetryConfig::default()
    };
    let transport: Arc<dyn Transport> = Arc::new(
        ProviderTransport::new(Arc::new(AnthropicProvider::new(api_key))).with_retry_config(retry),
    );

    let prompts: Arc<dyn PromptSelector> = match cfg.prompts.dir {
        Some(ref dir) => Arc::new(DirectoryPrompts::new(dir)),
        None => Arc::new(chatbot_agent::BuiltinPrompts),
    };

    let backend =
        Arc::new(HttpBackend::new(&cfg.backend).context("failed to build backend client")?);
    let classifier = Arc::new(SearchScopeClassifier::new(
        transport.clone(),
        model.clone(),
        prompts.clone(),
    ));

    let mut graph_config = GraphConfig::new(model.clone());
    graph_config.summarizer.threshold = cfg.summarization.threshold;

    let mut graph = ChatGraph::new(graph_config, transport, store).with_prompts(prompts);
    graph.set_tools(tools::all(backend, classifier));
    let graph = Arc::new(graph);

    let thread_id = auth::resolve_thread_id(
        args.thread.as_deref(),
        args.auth_token.as_deref(),
        &cfg.auth.thread_claim,
    );

    if args.reset {
        if graph.reset(&thread_id).await? {
            println!("Thread {} forgotten.", thread_id);
        } else {
            println!("Thread {} has no stored state.", thread_id);
        }
        return Ok(());
    }

    let cancel = graph.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let session = Session {
        graph,
        thread_id,
        auth: args.auth_token,
    };

    if let Some(command) = args.command {
        return run_command(&session, &command).await;
    }

    run_interactive(&session, &model).await
}

/// Everything one CLI run talks to
struct Session {
    graph: Arc<ChatGraph>,
    thread_id: String,
    auth: Option<String>,
}

fn build_store(cfg: &Config) -> Arc<dyn CheckpointStore> {
    if !cfg.store.in_memory {
        let dir = cfg
            .store
            .dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(session::FileStore::default_dir);
        tracing::debug!(dir = %dir.display(), "storing threads on disk");
        return Arc::new(session::FileStore::new(dir));
    }

    let defaults = StoreConfig::default();
    Arc::new(InMemoryStore::new(StoreConfig {
        max_threads: cfg.store.max_threads.unwrap_or(defaults.max_threads),
        idle_ttl: match cfg.store.idle_ttl_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.idle_ttl,
        },
    }))
}

async fn list_threads(store: &dyn CheckpointStore) -> anyhow::Result<()> {
    let threads = store.list().await?;
    if threads.is_empty() {
        println!("No stored threads.");
        return Ok(());
    }

    println!("Stored threads:\n");
    for thread_id in threads {
        let Some(checkpoint) = store.load(&thread_id).await? else {
            continue;
        };
        let updated = chrono::DateTime::from_timestamp_millis(checkpoint.updated_at)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {}  {:>4} msgs  {}",
            thread_id,
            updated,
            checkpoint.state.messages().len(),
            checkpoint.state.search_scope
        );
    }
    println!("\nResume with: chatbot --thread <ID>");
    Ok(())
}

/// Print events for one turn until the graph suspends or fails
fn spawn_printer(graph: &ChatGraph) -> tokio::task::JoinHandle<()> {
    let mut receiver = graph.subscribe();
    let is_tty = io::IsTerminal::is_terminal(&io::stdout());

    tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            let terminal = event.is_terminal();
            match event {
                AgentEvent::ToolExecutionStart {
                    tool_name,
                    arguments,
                    ..
                } => {
                    if tool_name == names::REPLY {
                        let text = arguments.get("message").and_then(|m| m.as_str()).unwrap_or("");
                        print!("bot> {}", text);
                    } else {
                        print!("[{}...", tool_name);
                    }
                    io::stdout().flush().ok();
                }
                AgentEvent::ToolExecutionEnd {
                    tool_name,
                    result,
                    is_error,
                    ..
                } => {
                    if tool_name == names::REPLY {
                        println!();
                        if is_error {
                            println!("  [not delivered: {}]", utils::preview(&result, 80));
                        }
                    } else if is_error {
                        println!(" error]");
                        println!("  {}", utils::preview(&result, 80));
                    } else {
                        println!(" {}]", utils::preview(&result, 60));
                    }
                }
                AgentEvent::SummarizationStart { message_count } => {
                    println!("[Summarizing {} messages]", message_count);
                }
                AgentEvent::SummarizationEnd { removed } => {
                    println!("[Summarized: {} messages folded into the summary]", removed);
                }
                AgentEvent::Suspended { steps, usage, .. } => {
                    if is_tty {
                        println!("[{} steps | {} in, {} out]", steps, usage.input, usage.output);
                    }
                }
                _ => {}
            }
            if terminal {
                break;
            }
        }
    })
}

/// Send one message; replies are printed by the event printer as they go out
async fn send(session: &Session, input: &str) -> anyhow::Result<()> {
    let printer = spawn_printer(&session.graph);
    let result = session
        .graph
        .send(&session.thread_id, input, session.auth.as_deref())
        .await;

    // The printer stops on the terminal event; give it a moment to drain.
    let _ = tokio::time::timeout(Duration::from_millis(200), printer).await;

    let outcome = result?;
    tracing::debug!(
        steps = outcome.steps,
        scope = %outcome.search_scope,
        summarized = outcome.summarized,
        "turn finished"
    );
    Ok(())
}

async fn run_command(session: &Session, command: &str) -> anyhow::Result<()> {
    println!("you> {}", command);
    println!();
    send(session, command).await
}

async fn run_interactive(session: &Session, model: &Model) -> anyhow::Result<()> {
    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!("chatbot ({}) thread: {}", model.id, session.thread_id);
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::execute_command(input) {
            match result {
                CommandResult::Message(msg) => println!("{}", msg),
                CommandResult::ShowState => {
                    let state = session.graph.state(&session.thread_id).await?;
                    println!("{}", commands::describe_state(&session.thread_id, state.as_ref()));
                }
                CommandResult::Reset => match session.graph.reset(&session.thread_id).await {
                    Ok(true) => println!("Thread forgotten."),
                    Ok(false) => println!("Nothing to forget."),
                    Err(e) => println!("Reset failed: {}", e),
                },
                CommandResult::Threads => {
                    let threads = session.graph.threads().await?;
                    if threads.is_empty() {
                        println!("No stored threads.");
                    }
                    for id in threads {
                        let marker = if id == session.thread_id { "*" } else { " " };
                        println!("{} {}", marker, id);
                    }
                }
                CommandResult::Exit => break,
                CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            println!();
            continue;
        }

        if let Err(e) = send(session, input).await {
            eprintln!("Error: {}", e);
            if session.graph.cancel_token().is_cancelled() {
                break;
            }
        }
        println!();
    }

    Ok(())
}
