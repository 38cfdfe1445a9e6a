//! 按配置组装编排器：LLM 客户端 → 分类闸门，远程 Agent 客户端，Stripe 客户端 → 注册表 → 执行器

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::agent::HttpAgentBackend;
use crate::classifier::ClassifierGate;
use crate::config::AppConfig;
use crate::core::credentials::CredentialStore;
use crate::core::orchestrator::Orchestrator;
use crate::dispatch::stripe::{stripe_registry, HttpStripeClient};
use crate::dispatch::ActionExecutor;
use crate::llm::{LlmClient, OpenAiClient, DEEPSEEK_BASE_URL};

/// 按 llm.provider 创建客户端（openai / deepseek，均为 OpenAI 兼容端点）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let llm = &cfg.llm;
    match llm.provider.as_str() {
        "deepseek" => {
            let base_url = llm.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);
            let api_key = llm
                .api_key
                .clone()
                .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok());
            tracing::info!(model = %llm.model, base_url = %base_url, "using deepseek model");
            Arc::new(OpenAiClient::new(Some(base_url), &llm.model, api_key.as_deref()))
        }
        other => {
            if other != "openai" {
                tracing::warn!(provider = %other, "unknown llm provider, falling back to openai");
            }
            tracing::info!(model = %llm.model, "using openai-compatible model");
            Arc::new(OpenAiClient::new(
                llm.base_url.as_deref(),
                &llm.model,
                llm.api_key.as_deref(),
            ))
        }
    }
}

/// 生产环境组装；凭证库为空，由 /api/credentials 注册
pub fn build_orchestrator(cfg: &AppConfig) -> anyhow::Result<Orchestrator> {
    cfg.validate().context("invalid configuration")?;
    let classifier = ClassifierGate::new(
        create_llm_from_config(cfg),
        Duration::from_secs(cfg.llm.timeouts.request),
    );

    let agent = HttpAgentBackend::new(&cfg.agent.base_url, Duration::from_secs(cfg.agent.timeout_secs))?;

    let stripe_timeout = Duration::from_secs(cfg.stripe.timeout_secs);
    let stripe = HttpStripeClient::new(&cfg.stripe.base_url, cfg.stripe.api_version.clone(), stripe_timeout)
        .context("failed to build stripe client")?;
    let registry = stripe_registry(Arc::new(stripe), cfg.stripe.max_pages);
    tracing::info!(operations = registry.len(), "dispatch table ready");

    let executor = ActionExecutor::new(
        Arc::new(registry),
        Arc::new(CredentialStore::new()),
        stripe_timeout,
    );

    Ok(Orchestrator::new(classifier, Arc::new(agent), executor, cfg.app.max_turns))
}
