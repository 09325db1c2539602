//! mnemos - interactive terminal front end.
//!
//! Each stdin line becomes an inbound event for a single local conversation.
//! Replies go to stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use mnemos_core::{
    AgentLoop, AgentReply, CompactionEngine, CompactionNotifier, CompactionOutcome,
    CompactionScheduler, EngineConfig, EventGate, InboundEvent, LogMeasurementTool, MnemosResult,
    ReplySink, Retriever, SearchMemoryTool, SqliteStore, StopReason, TokenUsage, ToolRegistry,
    UsageSink,
};
use mnemos_embeddings::EmbedderFactory;
use mnemos_llm::LlmFactory;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONVERSATION_ID: &str = "cli";

/// Poll interval while waiting for queued turns to finish on exit.
const DRAIN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Compact,
    Sweep,
    Say(&'a str),
    Empty,
}

fn parse_command(line: &str) -> Command<'_> {
    match line.trim() {
        "" => Command::Empty,
        "/quit" | "/exit" => Command::Quit,
        "/compact" => Command::Compact,
        "/sweep" => Command::Sweep,
        _ => Command::Say(line),
    }
}

struct StdoutReplies;

#[async_trait]
impl ReplySink for StdoutReplies {
    async fn deliver(&self, reply: AgentReply) -> MnemosResult<()> {
        if reply.stop_reason != StopReason::Completed {
            warn!(stop_reason = ?reply.stop_reason, "Reply stopped early");
        }
        let marker = if reply.degraded { " (memory unavailable)" } else { "" };
        println!("mnemos{}> {}", marker, reply.text);
        Ok(())
    }
}

struct StdoutNotifier;

#[async_trait]
impl CompactionNotifier for StdoutNotifier {
    async fn notify(&self, _conversation_id: &str, summary: &str) -> MnemosResult<()> {
        println!("[memory] {}", summary);
        Ok(())
    }
}

struct LogUsage;

#[async_trait]
impl UsageSink for LogUsage {
    async fn record(
        &self,
        conversation_id: &str,
        model: &str,
        usage: TokenUsage,
    ) -> MnemosResult<()> {
        info!(
            conversation_id,
            model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Token usage"
        );
        Ok(())
    }
}

fn load_config() -> anyhow::Result<EngineConfig> {
    let base = match std::env::var("MNEMOS_CONFIG") {
        Ok(path) => EngineConfig::from_file(PathBuf::from(&path))
            .with_context(|| format!("failed to load config from {}", path))?,
        Err(_) => EngineConfig::default(),
    };
    Ok(base.with_env_overrides()?)
}

fn describe(outcome: &CompactionOutcome) -> String {
    match outcome {
        CompactionOutcome::NotDue => "nothing to compact".to_string(),
        CompactionOutcome::Skipped => "another compaction is running".to_string(),
        CompactionOutcome::Completed(report) => report
            .summary()
            .unwrap_or_else(|| format!("compacted {} turns, no changes", report.turns_compacted)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("mnemos_core=debug".parse()?),
        )
        .init();

    let config = load_config()?;

    let llm = LlmFactory::from_config(&config.llm)?;
    let extraction_llm = LlmFactory::from_config(config.extraction_llm())?;
    let embedder = EmbedderFactory::from_config(&config.embedder)?;

    let store = Arc::new(SqliteStore::new(&config.database_path).with_context(|| {
        format!("failed to open database at {}", config.database_path.display())
    })?);
    info!(path = %config.database_path.display(), "Opened memory store");

    let retriever = Arc::new(Retriever::new(
        store.clone(),
        embedder.clone(),
        config.retrieval.clone(),
    ));

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(SearchMemoryTool::new(retriever.clone())))?;
    tools.register(Arc::new(LogMeasurementTool::new(store.clone())))?;

    let compaction = Arc::new(
        CompactionEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            extraction_llm,
            Some(embedder),
            config.compaction.clone(),
        )
        .with_notifier(Arc::new(StdoutNotifier)),
    );

    let agent = AgentLoop::new(
        llm,
        Arc::new(tools),
        store.clone(),
        retriever,
        Arc::new(StdoutReplies),
        config.agent.clone(),
    )
    .with_compaction(compaction.clone())
    .with_usage_sink(Arc::new(LogUsage));

    let gate = EventGate::new(config.gate.clone(), Arc::new(agent));

    let mut scheduler = CompactionScheduler::new(compaction.clone(), store.clone()).await?;
    scheduler.start().await?;

    info!("Ready. Type a message, /compact, /sweep or /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut message_id: i64 = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Compact => match compaction.force_compact(CONVERSATION_ID).await {
                Ok(outcome) => println!("[memory] {}", describe(&outcome)),
                Err(e) => warn!(error = %e, "Compaction failed"),
            },
            Command::Sweep => match scheduler.run_now().await {
                Ok(result) => println!(
                    "[memory] sweep checked {} compacted {} failed {}",
                    result.checked, result.compacted, result.failed
                ),
                Err(e) => warn!(error = %e, "Sweep failed"),
            },
            Command::Say(text) => {
                message_id += 1;
                gate.process_event(InboundEvent::text(
                    format!("cli-{}", message_id),
                    CONVERSATION_ID,
                    message_id,
                    text,
                ));
            }
        }
    }

    gate.flush_pending();
    while gate.in_flight() > 0 {
        tokio::time::sleep(DRAIN_POLL).await;
    }

    scheduler.shutdown().await?;
    info!("Stopped cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("  "), Command::Empty);
        assert_eq!(parse_command("/quit"), Command::Quit);
        assert_eq!(parse_command("/exit "), Command::Quit);
        assert_eq!(parse_command("/compact"), Command::Compact);
        assert_eq!(parse_command("/sweep"), Command::Sweep);
        assert_eq!(parse_command("weighed 80 kg"), Command::Say("weighed 80 kg"));
    }

    #[test]
    fn test_describe_outcomes() {
        assert_eq!(describe(&CompactionOutcome::NotDue), "nothing to compact");
        assert_eq!(
            describe(&CompactionOutcome::Skipped),
            "another compaction is running"
        );
    }
}
