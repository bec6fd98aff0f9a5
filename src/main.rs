mod cli;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use futures::StreamExt;
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};

use parley_core::events::TurnEvent;
use parley_core::ids::ThreadId;
use parley_core::messages::Role;
use parley_core::provider::{LlmProvider, StreamOptions};
use parley_engine::{
    create_default_registry, ChatGraph, ChatService, DecisionStep, Dispatcher, TitleGenerator, ToolsConfig,
};
use parley_llm::provider::DEFAULT_BASE_URL;
use parley_llm::GeminiProvider;
use parley_settings::{get_settings, init_settings, resolve_data_path, ApiKeys, ParleySettings};
use parley_store::{ConnectionConfig, Database, SqliteCheckpointStore, TitleStore};
use parley_telemetry::{init_telemetry, TelemetryConfig};

use cli::{ChatArgs, Cli, Command, ServeArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.settings {
        Some(path) => parley_settings::load_settings_from_path(path),
        None => parley_settings::load_settings(),
    }
    .context("failed to load settings")?;
    if init_settings(loaded).is_err() {
        bail!("settings were initialized twice");
    }
    let settings = get_settings();

    let telemetry = Arc::new(init_telemetry(TelemetryConfig {
        log_level: settings.logging.level.clone(),
        module_levels: settings
            .logging
            .modules
            .iter()
            .map(|(module, level)| (module.clone(), level.clone()))
            .collect(),
        json: settings.logging.json,
        log_to_sqlite: settings.logging.sqlite_sink,
        log_db_path: resolve_data_path(&settings.logging.logs_db_path),
        ..Default::default()
    }));

    let needs_model = matches!(cli.command, Command::Chat(_) | Command::Serve(_));
    let service = Arc::new(build_service(settings, &ApiKeys::from_env(), needs_model)?);

    match cli.command {
        Command::Chat(args) => chat(&service, args).await,
        Command::Threads => {
            for session in service.sessions()? {
                println!("{}\t{}", session.thread_id, session.title);
            }
            Ok(())
        }
        Command::History { thread_id } => {
            for message in service.load_history(&ThreadId::from_raw(thread_id))? {
                println!("{}: {}", role_label(&message.role), message.content);
            }
            Ok(())
        }
        Command::Delete { thread_id } => {
            if !service.delete_thread(&ThreadId::from_raw(thread_id.clone()))? {
                bail!("no such thread: {thread_id}");
            }
            println!("deleted {thread_id}");
            Ok(())
        }
        Command::Rename { thread_id, title } => {
            let thread_id = ThreadId::from_raw(thread_id);
            if !service.rename_thread(&thread_id, &title)? {
                bail!("title must not be empty");
            }
            println!("{thread_id}\t{}", service.title(&thread_id));
            Ok(())
        }
        Command::Serve(args) => serve(service, telemetry, settings, args).await,
    }
}

fn build_service(settings: &ParleySettings, keys: &ApiKeys, needs_model: bool) -> anyhow::Result<ChatService> {
    let db_path = resolve_data_path(&settings.storage.database_path);
    let db = Database::open(
        &db_path,
        &ConnectionConfig {
            pool_size: settings.storage.pool_size,
            ..Default::default()
        },
    )
    .with_context(|| format!("failed to open {}", db_path.display()))?;
    tracing::debug!(path = %db_path.display(), "checkpoint database opened");

    let titles = Arc::new(TitleStore::open(resolve_data_path(&settings.storage.titles_path))?);

    if settings.model.provider != "gemini" {
        bail!("unsupported model provider '{}'", settings.model.provider);
    }
    let api_key = match keys.gemini.clone() {
        Some(key) => key,
        None if needs_model => bail!("set GEMINI_API_KEY (or GOOGLE_API_KEY) to chat"),
        // Thread management commands never call the model.
        None => SecretString::from(""),
    };
    let base_url = settings.model.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let chat_model: Arc<dyn LlmProvider> = Arc::new(GeminiProvider::with_base_url(
        api_key.clone(),
        settings.model.model.clone(),
        base_url,
    )?);
    let title_model: Arc<dyn LlmProvider> = Arc::new(GeminiProvider::with_base_url(
        api_key,
        settings.model.title_model.clone(),
        base_url,
    )?);

    let registry = Arc::new(create_default_registry(&ToolsConfig {
        stock_base_url: settings.tools.stock_base_url.clone(),
        alphavantage_api_key: keys.alphavantage.clone(),
        search_base_url: settings.tools.search_base_url.clone(),
        max_search_results: settings.tools.max_search_results,
        http_timeout: Duration::from_millis(settings.tools.http_timeout_ms),
    })?);

    let mut decide = DecisionStep::new(chat_model, &registry).with_options(StreamOptions {
        max_tokens: settings.model.max_output_tokens,
        temperature: Some(settings.model.temperature),
    });
    if let Some(prompt) = &settings.model.system_prompt {
        decide = decide.with_system_prompt(prompt.clone());
    }
    let dispatcher =
        Dispatcher::new(registry).with_tool_timeout(Duration::from_millis(settings.graph.tool_timeout_ms));

    let graph = ChatGraph::new(Arc::new(SqliteCheckpointStore::new(db)), decide, dispatcher)
        .with_max_tool_rounds(settings.graph.max_tool_rounds);

    Ok(ChatService::new(graph, Arc::clone(&titles)).with_titler(TitleGenerator::new(title_model, titles)))
}

async fn chat(service: &ChatService, args: ChatArgs) -> anyhow::Result<()> {
    let thread_id = args
        .thread
        .map(ThreadId::from_raw)
        .unwrap_or_else(|| service.new_thread());

    if let Some(message) = args.message {
        return print_turn(service, &thread_id, message).await;
    }

    println!("{thread_id} ({}). Ctrl-D to exit.", service.title(&thread_id));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = print_turn(service, &thread_id, line.to_string()).await {
            eprintln!("error: {e:#}");
        }
    }
    println!();
    Ok(())
}

/// Stream one turn to stdout. Ctrl-C cancels the turn, not the process.
async fn print_turn(service: &ChatService, thread_id: &ThreadId, text: String) -> anyhow::Result<()> {
    let mut stream = service.send(thread_id, text)?;
    let mut stdout = std::io::stdout();
    let mut streamed = false;

    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            _ = tokio::signal::ctrl_c() => {
                service.cancel(thread_id);
                continue;
            }
        };
        let Some(event) = event else {
            break;
        };
        match event {
            TurnEvent::Token { delta } => {
                streamed = true;
                write!(stdout, "{delta}")?;
                stdout.flush()?;
            }
            TurnEvent::ToolStarted { name, .. } => {
                if streamed {
                    writeln!(stdout)?;
                }
                streamed = false;
                writeln!(stdout, "[using `{name}`…]")?;
            }
            TurnEvent::ToolFinished { name, is_error, .. } => {
                let status = if is_error { "failed" } else { "finished" };
                writeln!(stdout, "[`{name}` {status}]")?;
            }
            TurnEvent::Message { .. } => {}
            TurnEvent::Completed { message } => {
                if !streamed {
                    write!(stdout, "{}", message.content)?;
                }
                writeln!(stdout)?;
            }
            TurnEvent::Failed { error } => {
                if streamed {
                    writeln!(stdout)?;
                }
                bail!(error);
            }
        }
    }
    Ok(())
}

async fn serve(
    service: Arc<ChatService>,
    telemetry: Arc<parley_telemetry::TelemetryGuard>,
    settings: &ParleySettings,
    args: ServeArgs,
) -> anyhow::Result<()> {
    let config = parley_server::ServerConfig {
        host: args.host.unwrap_or_else(|| settings.server.host.clone()),
        port: args.port.unwrap_or(settings.server.port),
    };
    let state = parley_server::AppState::new(service).with_telemetry(telemetry);
    let handle = parley_server::start(config, state)
        .await
        .context("failed to start server")?;
    println!("listening on http://{}", handle.addr);

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn role_label(role: &Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}
