//! Chime CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt as _;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chime")]
#[command(about = "Proactive group-chat engine with a staged message pipeline")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Minimal command set for the stdin dev harness.
struct DevCommands;

#[async_trait::async_trait]
impl chime::pipeline::CommandRegistry for DevCommands {
    fn parse(&self, text: &str) -> Option<chime::pipeline::ParsedCommand> {
        chime::pipeline::command::parse_prefixed(text, "/")
    }

    async fn execute(
        &self,
        command: &chime::pipeline::ParsedCommand,
        _message: &chime::InboundMessage,
    ) -> chime::Result<Option<String>> {
        match command.name.as_str() {
            "ping" => Ok(Some("pong".into())),
            _ => Ok(None),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = if let Some(path) = cli.config {
        chime::config::Config::load_from_path(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?
    } else {
        chime::config::Config::load().context("failed to load configuration")?
    };
    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let db = chime::db::Db::connect(&config.data_dir)
        .await
        .context("failed to open database")?;

    let history = chime::archive::SqliteHistory::new(db.pool.clone());
    let deps = chime::EngineDeps {
        analyzer: Arc::new(chime::llm::LlmClient::from_config(&config.llm)),
        history: Arc::new(history.clone()),
        knowledge: Arc::new(chime::knowledge::NoKnowledge),
        archiver: Arc::new(chime::archive::SqliteThreadArchiver::new(db.pool.clone())),
        sink: Arc::new(chime::delivery::TracingSink),
        prompts: Arc::new(chime::prompts::PromptEngine::new(config.personas.clone())),
        runtime_config: chime::config::RuntimeConfig::new(&config),
    };

    let store = Arc::new(chime::proactive::ThreadStore::new());
    let engine = chime::proactive::ProactiveEngine::new(store, deps.clone());

    let hooks = Arc::new(chime::pipeline::HookBus::new());
    let registry: Arc<dyn chime::pipeline::CommandRegistry> = Arc::new(DevCommands);
    let mut pipeline = chime::pipeline::Pipeline::new(hooks.clone());
    pipeline.register(Arc::new(chime::pipeline::systems::CommandDetect::new(
        registry.clone(),
    )));
    pipeline.register(Arc::new(chime::pipeline::systems::CommandExecute::new(
        registry,
        hooks.clone(),
    )));
    pipeline.register(Arc::new(chime::pipeline::systems::ReplyPrepare));
    pipeline.register(Arc::new(chime::pipeline::systems::ReplySend::new(
        deps.sink.clone(),
    )));
    pipeline.register(Arc::new(chime::pipeline::systems::HistoryRecord::new(
        history,
    )));
    engine.install_completion_trigger(&hooks);

    tracing::info!("chime started; feed lines as '<group> <user-id> <text>'");

    let stdin_loop = tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(message) = parse_line(&line) else {
                tracing::warn!(%line, "expected '<group> <user-id> <text>'");
                continue;
            };
            if let Err(error) = pipeline.run(message).await {
                tracing::error!(%error, "pipeline run failed");
            }
        }
    });

    tokio::select! {
        _ = stdin_loop => {
            tracing::info!("stdin closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    db.close().await;
    tracing::info!("chime stopped");
    Ok(())
}

/// Parse a dev-harness line into a group message.
fn parse_line(line: &str) -> Option<chime::InboundMessage> {
    let mut parts = line.splitn(3, ' ');
    let group = parts.next()?.trim();
    let user_id: i64 = parts.next()?.trim().parse().ok()?;
    let text = parts.next()?.trim();
    if group.is_empty() || text.is_empty() {
        return None;
    }
    Some(chime::InboundMessage {
        id: uuid::Uuid::new_v4().to_string(),
        group_id: Some(Arc::from(group)),
        sender_id: user_id,
        content: text.to_string(),
        segments: vec![chime::Segment::Text {
            text: text.to_string(),
        }],
        addressed_bot: false,
        timestamp: chrono::Utc::now(),
    })
}
