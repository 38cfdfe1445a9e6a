//! 分类闸门与摘要生成
//!
//! classify：让模型判断用户消息是否需要调用 Stripe；不需要时模型的回复即最终答案。
//! summarize：STOP 之后把动作日志整理成面向用户的总结。
//! 两者都只调用一次模型，失败（含超时）即终止请求，不重试。

use std::sync::Arc;
use std::time::Duration;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::core::RelayError;
use crate::llm::{LlmClient, Message};

/// 分类结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Verdict {
    /// 消息是否需要调用 Stripe API（支付、客户、产品、价格、发票等）
    pub needs_action: bool,
    /// needs_action 为 false 时是直接给用户的回答；为 true 时是简短理由
    pub response: String,
}

const CLASSIFIER_PREAMBLE: &str = "You are a helpful assistant. Decide whether the user's message requires \
Stripe API integration (payments, customers, products, prices, invoices, refunds, checkout, billing portal). \
If it does, set needs_action to true and give a brief explanation in response. \
Otherwise set needs_action to false and answer the user's message helpfully in response. \
Reply with a single JSON object matching this schema and nothing else:";

const SUMMARY_INSTRUCTION: &str = "You are a helpful assistant. Below are the user's original request, \
the actions that were executed on their Stripe account and the final results. \
Write a short, friendly summary for the user of what was done and any important identifiers or links. \
Do not invent actions that are not listed.";

fn classifier_instruction() -> String {
    let schema = schema_for!(Verdict);
    let schema_json = serde_json::to_string_pretty(&schema).unwrap_or_default();
    format!("{CLASSIFIER_PREAMBLE}\n{schema_json}")
}

pub struct ClassifierGate {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl ClassifierGate {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn classify(&self, message: &str) -> Result<Verdict, RelayError> {
        let messages = [
            Message::system(classifier_instruction()),
            Message::user(message),
        ];
        let raw = self.call(&messages).await.map_err(RelayError::Classifier)?;
        let verdict = parse_verdict(&raw)?;
        tracing::debug!(needs_action = verdict.needs_action, rationale = %verdict.response, "classified");
        self.log_usage("classify");
        Ok(verdict)
    }

    pub async fn summarize(&self, context: &str) -> Result<String, RelayError> {
        let messages = [Message::system(SUMMARY_INSTRUCTION), Message::user(context)];
        let raw = self.call(&messages).await.map_err(RelayError::Summary)?;
        let summary = raw.trim();
        if summary.is_empty() {
            return Err(RelayError::Summary("model returned an empty summary".to_string()));
        }
        self.log_usage("summarize");
        Ok(summary.to_string())
    }

    /// 累计 token 使用：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    fn log_usage(&self, step: &str) {
        let (prompt, completion, total) = self.token_usage();
        tracing::info!(
            step,
            prompt_tokens = prompt,
            completion_tokens = completion,
            total_tokens = total,
            "model usage"
        );
    }

    async fn call(&self, messages: &[Message]) -> Result<String, String> {
        match timeout(self.timeout, self.llm.complete(messages)).await {
            Ok(result) => result,
            Err(_) => Err(format!("model call timed out after {}s", self.timeout.as_secs())),
        }
    }
}

/// 解析模型回复：优先 JSON（可在 ```json 代码块中），其次兼容以整词 true / false 开头的旧格式
pub fn parse_verdict(raw: &str) -> Result<Verdict, RelayError> {
    let text = raw.trim();

    if let Some(candidate) = json_candidate(text) {
        if let Ok(verdict) = serde_json::from_str::<Verdict>(candidate) {
            return Ok(verdict);
        }
    }

    let head: String = text.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let boundary_ok = text[head.len()..]
        .chars()
        .next()
        .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
    let needs_action = match head.to_ascii_lowercase().as_str() {
        "true" if boundary_ok => true,
        "false" if boundary_ok => false,
        _ => {
            let preview: String = text.chars().take(80).collect();
            return Err(RelayError::MalformedClassification(preview));
        }
    };

    let rest = text[head.len()..]
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '.' | ',' | ':' | ';' | '-'));
    Ok(Verdict {
        needs_action,
        response: rest.to_string(),
    })
}

fn json_candidate(text: &str) -> Option<&str> {
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .and_then(|s| s.trim_end().strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(text);
    let start = inner.find('{')?;
    let end = inner.rfind('}')?;
    (start < end).then(|| &inner[start..=end])
}
