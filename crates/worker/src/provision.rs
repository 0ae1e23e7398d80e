//! Agent provisioning against the AI provider
//!
//! Re-runnable: each provider reference is stored as soon as it is obtained,
//! so a failed run resumes where it stopped.

use anyhow::Context;
use chatdesk_api::inference::{AgentDefinition, InferenceClient};
use chatdesk_shared::{Agent, AgentDirectory, PgChatStore};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

const DEFAULT_PROVIDER: &str = "OpenAI";

#[derive(Debug)]
pub struct Provisioned {
    pub agent_ref: String,
    pub knowledge_ref: String,
}

pub async fn provision_agent(
    pool: &PgPool,
    client: &InferenceClient,
    agent_id: Uuid,
) -> anyhow::Result<Provisioned> {
    let store = PgChatStore::new(pool.clone());
    let agent = store
        .find_agent(agent_id)
        .await?
        .with_context(|| format!("Agent {agent_id} not found"))?;

    let knowledge_ref = ensure_knowledge_config(pool, client, &agent).await?;
    let agent_ref = ensure_provider_agent(pool, client, &agent).await?;

    client
        .link_knowledge_to_agent(&agent_ref, &knowledge_ref)
        .await
        .context("Failed to link knowledge base to agent")?;

    info!(
        agent_id = %agent_id,
        agent_ref = %agent_ref,
        knowledge_ref = %knowledge_ref,
        "Agent provisioned"
    );
    Ok(Provisioned {
        agent_ref,
        knowledge_ref,
    })
}

async fn ensure_knowledge_config(
    pool: &PgPool,
    client: &InferenceClient,
    agent: &Agent,
) -> anyhow::Result<String> {
    if let Some(existing) = agent.knowledge_ref.as_deref().filter(|r| !r.trim().is_empty()) {
        info!(agent_id = %agent.id, "Knowledge config already provisioned");
        return Ok(existing.to_string());
    }

    // Collection names are unique provider-side, so they are fixed per agent
    let collection_name: String = sqlx::query_scalar(
        r#"
        INSERT INTO knowledge_bases (id, agent_id, collection_name)
        VALUES ($1, $2, $3)
        ON CONFLICT (agent_id) DO UPDATE SET agent_id = EXCLUDED.agent_id
        RETURNING collection_name
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(agent.id)
    .bind(collection_name_for(agent.id))
    .fetch_one(pool)
    .await?;

    let knowledge_ref = client
        .create_knowledge_config(&collection_name, &agent.model)
        .await
        .context("Failed to create knowledge config")?;

    sqlx::query("UPDATE knowledge_bases SET provider_rag_id = $1 WHERE agent_id = $2")
        .bind(&knowledge_ref)
        .bind(agent.id)
        .execute(pool)
        .await?;

    info!(agent_id = %agent.id, knowledge_ref = %knowledge_ref, "Created knowledge config");
    Ok(knowledge_ref)
}

async fn ensure_provider_agent(
    pool: &PgPool,
    client: &InferenceClient,
    agent: &Agent,
) -> anyhow::Result<String> {
    if let Some(existing) = agent
        .provider_agent_id
        .as_deref()
        .filter(|r| !r.trim().is_empty())
    {
        info!(agent_id = %agent.id, "Provider agent already provisioned");
        return Ok(existing.to_string());
    }

    let agent_ref = client
        .create_agent(&AgentDefinition {
            name: agent.name.clone(),
            system_prompt: agent.system_prompt.clone(),
            provider_id: DEFAULT_PROVIDER.to_string(),
            model: agent.model.clone(),
            temperature: agent.temperature,
            top_p: agent.top_p,
        })
        .await
        .context("Failed to create provider agent")?;

    sqlx::query("UPDATE agents SET provider_agent_id = $1, updated_at = NOW() WHERE id = $2")
        .bind(&agent_ref)
        .bind(agent.id)
        .execute(pool)
        .await?;

    info!(agent_id = %agent.id, agent_ref = %agent_ref, "Created provider agent");
    Ok(agent_ref)
}

fn collection_name_for(agent_id: Uuid) -> String {
    format!("agent{}", agent_id.simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_is_stable_and_alphanumeric() {
        let id = Uuid::new_v4();
        let name = collection_name_for(id);
        assert_eq!(name, collection_name_for(id));
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
