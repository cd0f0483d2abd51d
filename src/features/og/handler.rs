use axum::{
    Router,
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};

use crate::{error::AppError, state::AppState};

use super::types::{ImageRequest, OgQuery};

#[utoipa::path(
    get,
    path = "/",
    summary = "生成 Open Graph 预览图",
    description = "按标题/副标题与版本徽章生成 1200x630 的预览图。栅格化失败时退回 SVG（200，不缓存）。`/og` 为等价别名。",
    params(OgQuery),
    responses(
        (status = 200, description = "PNG（image/png，可缓存 1 小时）或 SVG 降级输出（image/svg+xml）"),
        (status = 429, description = "超出限流（带 Retry-After）", body = String, content_type = "text/plain"),
        (status = 500, description = "引擎初始化、字体或版式失败", body = String, content_type = "text/plain")
    ),
    tag = "OgImage"
)]
pub async fn og_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<OgQuery>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = state.og.client_id(&headers);
    let req = ImageRequest::from_query(&q, client_id);
    state.og.generate(&req).await
}

/// `/og` 别名，行为与 `/` 完全一致
#[utoipa::path(
    get,
    path = "/og",
    summary = "生成 Open Graph 预览图（别名）",
    description = "与 `GET /` 相同，供挂载在 /og 路径下的链接使用。",
    params(OgQuery),
    responses(
        (status = 200, description = "PNG（image/png，可缓存 1 小时）或 SVG 降级输出（image/svg+xml）"),
        (status = 429, description = "超出限流（带 Retry-After）", body = String, content_type = "text/plain"),
        (status = 500, description = "引擎初始化、字体或版式失败", body = String, content_type = "text/plain")
    ),
    tag = "OgImage"
)]
pub async fn og_image_alias(
    state: State<AppState>,
    headers: HeaderMap,
    query: Query<OgQuery>,
) -> Result<impl IntoResponse, AppError> {
    og_image(state, headers, query).await
}

pub fn create_og_router() -> Router<AppState> {
    Router::new()
        .route("/", get(og_image))
        .route("/og", get(og_image_alias))
}
