//! 远程 Agent：协议类型、HTTP 客户端、Scripted 测试实现

pub mod client;
pub mod mock;
pub mod wire;

pub use client::{AgentBackend, HttpAgentBackend};
pub use mock::ScriptedAgent;
pub use wire::{describe_error, AgentEvent, AgentResponse};
