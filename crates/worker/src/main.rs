//! Chatdesk background worker
//!
//! Usage:
//!   chatdesk-worker run                          scheduled summary sweep
//!   chatdesk-worker escalate <conversation_id>   re-run escalation for one conversation
//!   chatdesk-worker provision <agent_id>         provision an agent with the AI provider

mod provision;
mod summarize;

use std::sync::Arc;

use anyhow::{bail, Context};
use chatdesk_api::escalation::{EscalationOutcome, EscalationWorker};
use chatdesk_api::inference::InferenceClient;
use chatdesk_api::websocket::{Broadcaster, RedisBroadcaster, RoomManager};
use chatdesk_api::{telemetry, Config};
use chatdesk_shared::{create_pool, run_migrations, PgChatStore};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("run");

    let config = Config::from_env().context("Failed to load configuration")?;
    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool).await.context("Failed to run migrations")?;

    let client = InferenceClient::new(config.inference_config());

    match command {
        "run" => run_scheduler(config, pool, client).await,
        "escalate" => {
            let conversation_id = parse_id(args.get(1), "conversation_id")?;
            let store = Arc::new(PgChatStore::new(pool));
            let broadcaster = broadcaster(&config).await?;
            let worker = EscalationWorker::new(store, Arc::new(client), broadcaster);

            match worker.escalate(conversation_id).await? {
                EscalationOutcome::Created(ticket) => {
                    info!(conversation_id = %conversation_id, ticket = %ticket.reference(), "Ticket created");
                }
                EscalationOutcome::AlreadyExists | EscalationOutcome::InProgress => {
                    info!(conversation_id = %conversation_id, "Ticket already exists; nothing to do");
                }
            }
            Ok(())
        }
        "provision" => {
            let agent_id = parse_id(args.get(1), "agent_id")?;
            let provisioned = provision::provision_agent(&pool, &client, agent_id).await?;
            info!(
                agent_id = %agent_id,
                agent_ref = %provisioned.agent_ref,
                knowledge_ref = %provisioned.knowledge_ref,
                "Agent provisioned"
            );
            Ok(())
        }
        other => bail!("Unknown command '{other}' (expected run, escalate or provision)"),
    }
}

async fn run_scheduler(
    config: Config,
    pool: sqlx::PgPool,
    client: InferenceClient,
) -> anyhow::Result<()> {
    let store = Arc::new(PgChatStore::new(pool));
    let ai = Arc::new(client);
    let min_messages = config.summary_min_messages;

    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(config.summary_schedule.as_str(), move |_id, _scheduler| {
        let store = Arc::clone(&store);
        let ai = Arc::clone(&ai);
        Box::pin(async move {
            summarize::summarize_pending(store.as_ref(), ai.as_ref(), min_messages).await;
        })
    })
    .with_context(|| format!("Invalid SUMMARY_SCHEDULE '{}'", config.summary_schedule))?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    info!(schedule = %config.summary_schedule, "Worker started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Worker shutting down");
    Ok(())
}

/// Announcements reach live sessions only through Redis; without it they are
/// persisted and picked up on the next reconnect.
async fn broadcaster(config: &Config) -> anyhow::Result<Arc<dyn Broadcaster>> {
    Ok(match &config.redis_url {
        Some(url) => Arc::new(RedisBroadcaster::connect(url).await?),
        None => Arc::new(RoomManager::new()),
    })
}

fn parse_id(raw: Option<&String>, name: &str) -> anyhow::Result<Uuid> {
    let raw = raw.with_context(|| format!("Missing <{name}> argument"))?;
    Uuid::parse_str(raw).with_context(|| format!("Invalid {name}: {raw}"))
}
