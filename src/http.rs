use reqwest::Client;
use std::time::Duration;

use crate::config::{ReportingConfig, UpstreamConfig};

/// 上游请求（字体/crates.io/GitHub）使用的 HTTP Client。
///
/// 说明：
/// - 每个服务上下文持有一份 `Client`（内部自带连接池），测试可构造互相隔离的上下文。
/// - 所有出站请求都带有超时，避免慢上游把请求无限挂起。
pub fn upstream_client(cfg: &UpstreamConfig) -> Result<Client, reqwest::Error> {
    build_client(cfg.timeout(), &cfg.user_agent)
}

/// 错误上报使用的 HTTP Client（超时更短，仅“尽力而为”）。
pub fn reporting_client(cfg: &ReportingConfig, user_agent: &str) -> Result<Client, reqwest::Error> {
    build_client(cfg.timeout(), user_agent)
}

fn build_client(timeout: Duration, user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .user_agent(user_agent)
        .build()
}
