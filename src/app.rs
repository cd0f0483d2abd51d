use axum::{Json, Router, routing::get};
use tower_http::compression::CompressionLayer;
use utoipa::OpenApi;

use crate::features::health::handler::{health_check, metrics};
use crate::features::og::create_og_router;
use crate::openapi::ApiDoc;
use crate::request_id::request_id_middleware;
use crate::state::AppState;

fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    // PNG 已经压缩过，压缩只浪费 CPU；SVG 降级输出与 JSON 文档仍然压缩。
    SizeAbove::default()
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("application/octet-stream"))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// 组装完整路由：图片（`/`、`/og`）、健康检查、运行指标、OpenAPI 文档。
///
/// 外层依次是 request_id 中间件与响应压缩。
pub fn build_router(state: AppState) -> Router {
    Router::<AppState>::new()
        .merge(create_og_router())
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/api-docs/openapi.json", get(openapi_json))
        .with_state(state)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(CompressionLayer::new().compress_when(compression_predicate()))
}
