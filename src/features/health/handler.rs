use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json},
};
use serde::Serialize;

use crate::features::og::{ComponentHealth, ComponentStatus};
use crate::state::AppState;

/// Prometheus 文本格式
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// 健康检查响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// 服务状态：任一组件不可用时为 degraded（进程本身仍可服务）
    #[schema(example = "healthy")]
    pub status: String,
    /// 服务名称
    #[schema(example = "apex-og-image")]
    pub service: String,
    /// 当前版本（Cargo package version）
    #[schema(example = "0.1.0")]
    pub version: String,
    /// 栅格化引擎是否已完成初始化（首个图片请求之前为 false）
    pub engine_ready: bool,
    /// 各组件最近一次观测到的状态
    pub components: Vec<ComponentHealth>,
}

#[utoipa::path(
    get,
    path = "/health",
    summary = "健康检查",
    description = "用于探活的健康检查端点，返回服务状态、版本、引擎就绪情况与组件状态。不会触发引擎初始化。",
    responses((status = 200, description = "服务健康", body = HealthResponse)),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let components = state.og.metrics().components();
    let status = if components
        .iter()
        .any(|c| c.status == ComponentStatus::Unhealthy)
    {
        "degraded"
    } else {
        "healthy"
    };
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: status.to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            engine_ready: state.og.engine().is_ready(),
            components,
        }),
    )
}

#[utoipa::path(
    get,
    path = "/metrics",
    summary = "运行指标",
    description = "Prometheus 文本格式：准入/限流、字体来源、元数据降级、输出格式、错误上报计数与组件状态。",
    responses((status = 200, description = "Prometheus exposition", body = String, content_type = "text/plain")),
    tag = "Health"
)]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .og
        .metrics()
        .to_prometheus_format(state.og.reporter().submitted());
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body)
}
