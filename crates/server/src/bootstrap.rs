//! Composition root: connects the database, builds the gateway clients, the
//! orchestrator and the work queue, replays persisted jobs, and spawns the
//! single queue worker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::Router;
use secrecy::SecretString;
use tracing::info;

use parley_agent::{
    IdentityResolver, LlmIntentClassifier, Orchestrator, OrchestratorConfig, Services,
};
use parley_core::config::{AppConfig, LlmProvider};
use parley_core::errors::ProcessingError;
use parley_core::jobs::{JobId, QueuedJob};
use parley_core::sentiment::LexiconSentimentAnalyzer;
use parley_db::repositories::{
    JobRepository, SqlConversationRepository, SqlCustomerRepository, SqlEscalationRepository,
    SqlJobRepository, SqlMessageRepository, SqlMetricsRepository, SqlRuleExecutionRepository,
    SqlRuleRepository,
};
use parley_db::{connect, migrations, DbPool};
use parley_gateway::chat::ChatClient;
use parley_gateway::client::{GatewayClient, RetryPolicy};
use parley_gateway::commerce::{CommerceProvider, HttpCommerceClient, NoopCommerceProvider};
use parley_gateway::llm::HttpLlmClient;
use parley_queue::{DelayedWorkQueue, JobStore, Worker};

use crate::handlers::{
    CustomerSyncHandler, FollowUpHandler, OrderSyncHandler, ProcessEventHandler,
    TicketStatusHandler,
};
use crate::{health, webhook};

const CHAT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct App {
    pub router: Router,
    pub db_pool: DbPool,
}

/// Mirrors queue contents into the `queued_job` table.
struct PersistentJobStore {
    jobs: SqlJobRepository,
}

#[async_trait]
impl JobStore for PersistentJobStore {
    async fn persist(&self, job: &QueuedJob) -> Result<(), ProcessingError> {
        self.jobs.save(job).await.map_err(|err| ProcessingError::Persistence(err.to_string()))
    }

    async fn remove(&self, id: &JobId) -> Result<(), ProcessingError> {
        self.jobs.delete(id).await.map_err(|err| ProcessingError::Persistence(err.to_string()))
    }
}

fn llm_base_url(config: &AppConfig) -> String {
    config.llm.base_url.clone().unwrap_or_else(|| {
        match config.llm.provider {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Anthropic => "https://api.anthropic.com/v1",
            LlmProvider::Ollama => "http://127.0.0.1:11434/v1",
        }
        .to_string()
    })
}

fn commerce_provider(config: &AppConfig) -> anyhow::Result<Arc<dyn CommerceProvider>> {
    if !config.commerce.enabled {
        return Ok(Arc::new(NoopCommerceProvider));
    }
    let base_url = config
        .commerce
        .base_url
        .clone()
        .context("commerce is enabled but `commerce.base_url` is not set")?;
    let api_token = config
        .commerce
        .api_token
        .clone()
        .context("commerce is enabled but `commerce.api_token` is not set")?;
    let gateway = GatewayClient::over_http(CHAT_HTTP_TIMEOUT, RetryPolicy::default())
        .context("building commerce http client")?;
    Ok(Arc::new(HttpCommerceClient::new(gateway, base_url, api_token)))
}

pub async fn bootstrap(config: &AppConfig) -> anyhow::Result<App> {
    let pool = connect(&config.database)
        .await
        .with_context(|| format!("connecting to database `{}`", config.database.url))?;
    migrations::run_pending(&pool).await.context("running migrations")?;

    // Queue first: pending jobs persisted by a previous run are replayed
    // before the webhook starts accepting new ones.
    let job_repo = SqlJobRepository::new(pool.clone());
    let queue = Arc::new(DelayedWorkQueue::new(Arc::new(PersistentJobStore {
        jobs: SqlJobRepository::new(pool.clone()),
    })));
    let pending = job_repo.list_pending().await.context("loading persisted jobs")?;
    queue.restore(pending);

    let chat_gateway = GatewayClient::over_http(CHAT_HTTP_TIMEOUT, RetryPolicy::default())
        .context("building chat http client")?;
    let chat = Arc::new(ChatClient::new(
        chat_gateway,
        config.chat.base_url.clone(),
        config.chat.api_token.clone(),
        config.chat.default_country_prefix.clone(),
    ));

    let llm_timeout = Duration::from_secs(config.llm.timeout_secs.max(1));
    let llm_gateway = GatewayClient::over_http(
        llm_timeout,
        RetryPolicy { max_attempts: config.llm.max_attempts.max(1), ..RetryPolicy::default() },
    )
    .context("building llm http client")?;
    let llm = Arc::new(HttpLlmClient::new(
        llm_gateway,
        llm_base_url(config),
        config.llm.api_key.clone().unwrap_or_else(|| SecretString::from(String::new())),
        config.llm.model.clone(),
        llm_timeout,
    ));

    let commerce = commerce_provider(config)?;

    let customers = Arc::new(SqlCustomerRepository::new(pool.clone()));
    let conversations = Arc::new(SqlConversationRepository::new(pool.clone()));
    let escalations = Arc::new(SqlEscalationRepository::new(pool.clone()));
    let services = Services {
        conversations: conversations.clone(),
        messages: Arc::new(SqlMessageRepository::new(pool.clone())),
        rules: Arc::new(SqlRuleRepository::new(pool.clone())),
        rule_executions: Arc::new(SqlRuleExecutionRepository::new(pool.clone())),
        escalations: escalations.clone(),
        metrics: Arc::new(SqlMetricsRepository::new(pool.clone())),
        classifier: Arc::new(LlmIntentClassifier::new(llm.clone())),
        llm,
        messenger: chat,
        commerce,
        sentiment: Arc::new(LexiconSentimentAnalyzer::new()),
        queue: queue.clone(),
    };
    let messenger = services.messenger.clone();
    let identity =
        IdentityResolver::new(customers.clone(), config.chat.default_country_prefix.clone());
    let orchestrator =
        Arc::new(Orchestrator::new(services, identity, OrchestratorConfig::default()));

    let worker = Worker::new(queue.clone())
        .register("process_event", Arc::new(ProcessEventHandler::new(orchestrator)))
        .register(
            "ticket_resolved",
            Arc::new(TicketStatusHandler::new(conversations.clone(), escalations.clone())),
        )
        .register(
            "ticket_escalated",
            Arc::new(TicketStatusHandler::new(conversations.clone(), escalations)),
        )
        .register(
            "follow_up",
            Arc::new(FollowUpHandler::new(conversations, customers.clone(), messenger)),
        )
        .register(
            "customer_sync",
            Arc::new(CustomerSyncHandler::new(
                customers.clone(),
                config.chat.default_country_prefix.clone(),
            )),
        )
        .register("order_sync", Arc::new(OrderSyncHandler::new(customers)));
    tokio::spawn(async move { worker.run().await });
    info!(event_name = "worker_started", "queue worker running");

    let router = webhook::router(webhook::WebhookState {
        queue,
        secret: config.chat.webhook_secret.clone(),
        allow_unsigned: config.chat.allow_unsigned,
        immediate_priority: config.queue.immediate_priority,
        default_max_attempts: config.queue.default_max_attempts,
    })
    .merge(health::router(pool.clone()));

    Ok(App { router, db_pool: pool })
}
