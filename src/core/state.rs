//! 单次请求的对话状态
//!
//! ConversationTurn 只在一次请求内存在：编排循环在动作完成时修改它，请求结束即丢弃。

use serde::Serialize;
use serde_json::Value;

/// 编排循环阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Start,
    AwaitingClassification,
    AwaitingAgent,
    ExecutingAction,
    Summarizing,
    Done,
}

#[derive(Clone, Debug)]
pub struct ConversationTurn {
    pub user_id: String,
    pub session_id: Option<String>,
    pub original_message: String,
    /// 下一次发给远程 Agent 的消息
    pub current_message: String,
    /// 按顺序记录的动作结果文本（成功与失败都记）
    pub action_log: Vec<String>,
    pub phase: LoopPhase,
    /// 已完成的 Agent 交换次数
    pub exchanges: usize,
}

impl ConversationTurn {
    pub fn new(user_id: &str, message: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: None,
            original_message: message.to_string(),
            current_message: message.to_string(),
            action_log: Vec::new(),
            phase: LoopPhase::Start,
            exchanges: 0,
        }
    }

    pub fn transition(&mut self, next: LoopPhase) {
        tracing::debug!(from = ?self.phase, to = ?next, exchanges = self.exchanges, "phase");
        self.phase = next;
    }

    /// 记录一次动作结果，并作为下一条发给 Agent 的消息
    pub fn record_action(&mut self, outcome: String) {
        self.action_log.push(outcome.clone());
        self.current_message = outcome;
    }

    /// 生成摘要所用的上下文
    pub fn summary_context(&self, final_results: &Value) -> String {
        let mut context = format!("User request: {}\n", self.original_message);
        for (i, action) in self.action_log.iter().enumerate() {
            context.push_str(&format!("Action {}: {}\n", i + 1, action));
        }
        context.push_str(&format!("Final results: {}", final_results));
        context
    }
}
