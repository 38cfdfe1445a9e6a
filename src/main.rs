//! payrelay 服务入口
//!
//! 启动: cargo run -- [config.toml]
//! 初始化日志 → 加载配置 → 组装编排器 → 启动 HTTP 服务（PORT 环境变量优先于 server.port）。

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use payrelay::config::load_config;
use payrelay::core::build_orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    payrelay::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let orchestrator = build_orchestrator(&cfg).context("Failed to build orchestrator")?;

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(cfg.server.port);
    let host: IpAddr = cfg
        .server
        .host
        .parse()
        .with_context(|| format!("invalid server.host: {}", cfg.server.host))?;

    payrelay::web::serve(Arc::new(orchestrator), SocketAddr::new(host, port)).await
}
