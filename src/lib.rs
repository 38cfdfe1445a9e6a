//! payrelay - Stripe 对话式编排服务
//!
//! 模块划分：
//! - **agent**: 远程 Agent 协议、HTTP 客户端与 Scripted 实现
//! - **classifier**: 分类闸门（是否需要调用 Stripe）与摘要生成
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、凭证库、对话状态、编排循环、进度事件与流式发射器
//! - **dispatch**: 操作注册表、声明式参数编组、执行器、Stripe 操作集
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Scripted）
//! - **observability**: tracing 初始化
//! - **web**: axum HTTP 接口（feature `web`）

pub mod agent;
pub mod classifier;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod llm;
pub mod observability;
#[cfg(feature = "web")]
pub mod web;

pub use crate::core::{Orchestrator, ProcessResult, ProgressEvent, RelayError, TurnRequest};
