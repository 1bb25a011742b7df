#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarm::harness::{InProcessPorts, ScriptedReply};
use swarm::ports::MessageStore;
use swarm::{
    load_config, AccountId, AuthorId, BotId, BotParticipant, BotRole, ChatConfig, ConversationId,
    ConversationState, DispatchService, MessageState, Result, SagaStatus, SwarmError,
    SwarmLifecycle, UserId,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(code = e.code(), "Command failed: {e}");
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Demo { goal } => {
            let demo = run_demo(&goal, cli.config).await?;
            print_transcript(&demo).await;
            Ok(())
        }
        Commands::Status { goal } => {
            let demo = run_demo(&goal, cli.config).await?;
            print_status(&demo).await;
            Ok(())
        }
    }
}

struct Demo {
    ports: InProcessPorts,
    lifecycle: Arc<SwarmLifecycle<InProcessPorts>>,
    conversation_id: ConversationId,
}

const LEADER_MODEL: &str = "demo-leader";
const WORKER_MODEL: &str = "demo-worker";

async fn run_demo(goal: &str, config_path: Option<PathBuf>) -> Result<Demo> {
    let settings = load_config(config_path).await?;
    let ports = InProcessPorts::new();
    ports.set_account(AccountId::new("demo-account")).await;

    let conversation_id = ConversationId::new("demo-conversation");
    let leader = BotParticipant::new(BotId::new("atlas"), "Atlas", BotRole::Leader)
        .with_model(LEADER_MODEL);
    let worker =
        BotParticipant::new(BotId::new("bolt"), "Bolt", BotRole::Worker).with_model(WORKER_MODEL);

    ports
        .insert_conversation(ConversationState {
            id: conversation_id.clone(),
            participants: vec![leader, worker],
            available_tools: vec!["echo".to_string()],
            config: ChatConfig::for_goal(""),
            initial_leader_system_message: None,
        })
        .await;

    // Kick-off round, then the round for the human's status question.
    ports
        .script_for(
            LEADER_MODEL,
            vec![
                ScriptedReply::text(
                    "Breaking the goal into research, drafting and review subtasks.",
                    12,
                ),
                ScriptedReply::tool_call("echo", json!({"message": "collecting status"}), 5),
                ScriptedReply::text("All tracks are on schedule.", 4),
            ],
        )
        .await;
    ports
        .script_for(
            WORKER_MODEL,
            vec![
                ScriptedReply::text("Standing by for my assignment.", 8),
                ScriptedReply::text("Drafting section two, halfway there.", 6),
            ],
        )
        .await;

    let dispatch = Arc::new(DispatchService::new(Arc::new(ports.clone()), settings));
    let lifecycle = Arc::new(SwarmLifecycle::new(dispatch, conversation_id.clone()));
    let user = UserId::new("demo-user");

    lifecycle.start(Some(goal.to_string()), user.clone()).await?;
    wait_for_round(&ports, &lifecycle, 3).await?;

    let question =
        MessageState::standalone_prompt("How is progress looking?", AuthorId::Human(user.clone()));
    MessageStore::add_message(&ports, &conversation_id, &question).await?;
    lifecycle.handle_external_message(question.id, user).await?;
    wait_for_round(&ports, &lifecycle, 6).await?;

    Ok(Demo {
        ports,
        lifecycle,
        conversation_id,
    })
}

/// The lifecycle drains on a spawned task; poll until the scripted round
/// has fully played out and the machine has parked back to idle. Waiting
/// for idle matters: the round's stats update lands after its last message.
async fn wait_for_round(
    ports: &InProcessPorts,
    lifecycle: &Arc<SwarmLifecycle<InProcessPorts>>,
    expected: usize,
) -> Result<()> {
    for _ in 0..500 {
        if ports.transcript().await.len() >= expected
            && lifecycle.current_status().await == SagaStatus::Idle
        {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(SwarmError::Internal(format!(
        "demo conversation stalled before reaching {expected} messages"
    )))
}

async fn print_transcript(demo: &Demo) {
    println!("\n🐝 Swarm transcript ({})\n", demo.conversation_id);
    for message in demo.ports.transcript().await {
        let author = match &message.user {
            AuthorId::Bot(id) => id.value().to_string(),
            AuthorId::Human(id) => format!("human:{}", id.value()),
        };
        let role = message
            .config
            .role
            .map_or("-", |r| r.as_str());
        println!("{author:<16} {role:<10} {}", message.text);
    }

    let debits = demo.ports.billing_debits().await;
    let billed: i128 = debits
        .iter()
        .filter_map(|d| d.delta.trim_start_matches('-').parse::<i128>().ok())
        .sum();
    println!("\n💳 Billing entries: {} (total {} credits)", debits.len(), billed);
}

async fn print_status(demo: &Demo) {
    let Some(state) = demo.ports.conversation(&demo.conversation_id).await else {
        println!("No demo conversation found");
        return;
    };
    let config = &state.config;

    println!("\n📊 Swarm status for {}\n", demo.conversation_id);
    println!("  Goal:            {}", config.goal);
    println!(
        "  Leader:          {}",
        config
            .swarm_leader
            .as_ref()
            .map_or("-", |id| id.value())
    );
    println!("  Participants:    {}", state.participants.len());
    println!(
        "  Saga status:     {}",
        demo.lifecycle.current_saga_status().await
    );

    if let Some(stats) = &config.stats {
        println!(
            "  Tool calls:      {} / {}",
            stats.total_tool_calls, config.limits.max_tool_calls
        );
        println!(
            "  Credits:         {} / {}",
            stats.total_credits, config.limits.max_credits
        );
    }
    println!(
        "  Pending calls:   {}",
        config.pending_tool_calls.len()
    );

    if demo.lifecycle.current_saga_status().await == SagaStatus::Idle {
        println!("\n✅ Swarm is idle and up to date");
    }
}
