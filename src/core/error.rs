//! 错误类型
//!
//! RelayError：单次请求的致命错误（传输、协议、解码、轮数上限、取消），直接终止请求；
//! ActionError：单个动作的可恢复错误，由编排循环转为文本反馈给远程 Agent，不终止对话。

use thiserror::Error;

/// 请求级致命错误
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("classifier call failed: {0}")]
    Classifier(String),

    #[error("classifier response malformed: {0}")]
    MalformedClassification(String),

    #[error("session creation failed: {0}")]
    Session(String),

    #[error("agent exchange failed: {0}")]
    AgentTransport(String),

    #[error("agent response malformed: {0}")]
    AgentDecode(String),

    /// 远程 Agent 返回了 EXEC / STOP / ERROR 之外的事件类型
    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    #[error("summary generation failed: {0}")]
    Summary(String),

    #[error("max turns exceeded ({0})")]
    MaxTurnsExceeded(usize),

    #[error("cancelled")]
    Cancelled,
}

/// 错误大类，决定 HTTP 状态码与日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Input,
    Transport,
    Protocol,
    Decode,
    Limit,
    Cancelled,
}

impl RelayError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RelayError::InvalidRequest(_) => ErrorClass::Input,
            RelayError::Classifier(_)
            | RelayError::Session(_)
            | RelayError::AgentTransport(_)
            | RelayError::Summary(_) => ErrorClass::Transport,
            RelayError::UnknownEvent(_) => ErrorClass::Protocol,
            RelayError::MalformedClassification(_) | RelayError::AgentDecode(_) => {
                ErrorClass::Decode
            }
            RelayError::MaxTurnsExceeded(_) => ErrorClass::Limit,
            RelayError::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// 面向用户的阶段描述，用作流式 error 事件的 message
    pub fn stage(&self) -> &'static str {
        match self {
            RelayError::InvalidRequest(_) => "Invalid request",
            RelayError::Classifier(_) | RelayError::MalformedClassification(_) => {
                "Failed to analyze message"
            }
            RelayError::Session(_) => "Failed to create session",
            RelayError::AgentTransport(_) | RelayError::AgentDecode(_) => {
                "Failed to process with agent"
            }
            RelayError::UnknownEvent(_) => "Unknown event",
            RelayError::Summary(_) => "Failed to generate summary",
            RelayError::MaxTurnsExceeded(_) => "Conversation exceeded the turn limit",
            RelayError::Cancelled => "Processing cancelled",
        }
    }
}

/// 单个动作（EXEC）的可恢复错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("unknown function: {0}")]
    UnknownOperation(String),

    #[error("credential resolution failed: {0}")]
    CredentialResolutionFailed(String),

    #[error("invalid arguments: {0}")]
    ArgumentShapeInvalid(String),

    #[error("upstream call failed: {0}")]
    UpstreamCallFailed(String),
}
