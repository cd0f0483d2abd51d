use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    routing::get,
};
use tower::ServiceExt;

use apex_og_image::AppError;
use apex_og_image::request_id::{current_request_id, request_id_middleware};

async fn echo_handler() -> String {
    current_request_id().unwrap_or_default()
}

async fn limited_handler() -> Result<&'static str, AppError> {
    Err(AppError::RateLimitExceeded {
        retry_after_secs: 42,
    })
}

fn build_app() -> Router {
    Router::new()
        .route("/echo", get(echo_handler))
        .route("/limited", get(limited_handler))
        .layer(axum::middleware::from_fn(request_id_middleware))
}

fn header_str<'a>(resp: &'a axum::response::Response, name: &str) -> &'a str {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

#[tokio::test]
async fn request_id_is_generated_when_missing() {
    let resp = build_app()
        .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
        .await
        .expect("request /echo");

    assert_eq!(resp.status(), StatusCode::OK);
    let request_id = header_str(&resp, "x-request-id").to_string();
    assert!(request_id.starts_with("og_"), "x-request-id should be generated");

    // 处理函数内可读取到同一个 ID
    let body = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    assert_eq!(std::str::from_utf8(&body).unwrap(), request_id);
}

#[tokio::test]
async fn request_id_uses_client_value_when_valid() {
    let resp = build_app()
        .oneshot(
            Request::builder()
                .uri("/echo")
                .header("x-request-id", "cf-ray.8a1b2c3d_ams")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request /echo");

    assert_eq!(header_str(&resp, "x-request-id"), "cf-ray.8a1b2c3d_ams");
}

#[tokio::test]
async fn invalid_client_value_is_replaced() {
    let resp = build_app()
        .oneshot(
            Request::builder()
                .uri("/echo")
                .header("x-request-id", "bad id/with spaces")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request /echo");

    assert!(header_str(&resp, "x-request-id").starts_with("og_"));
}

#[tokio::test]
async fn error_responses_keep_request_id_and_plain_text_body() {
    let resp = build_app()
        .oneshot(
            Request::builder()
                .uri("/limited")
                .header("x-request-id", "err.req-001")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request /limited");

    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&resp, "x-request-id"), "err.req-001");
    assert_eq!(header_str(&resp, "retry-after"), "42");
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    let body = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    assert_eq!(
        std::str::from_utf8(&body).unwrap(),
        "Rate limit exceeded. Please try again later."
    );
}
