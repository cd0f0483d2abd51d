use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// 应用统一错误类型
///
/// 只有限流、引擎初始化、字体不可用与版式失败会以非 200 状态返回给调用方；
/// 其余变体在管线内部被降级处理，只用于日志与错误上报。
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// 超出固定窗口限流
    #[error("请求过于频繁，{retry_after_secs} 秒后可重试")]
    RateLimitExceeded { retry_after_secs: u64 },

    /// 栅格化引擎初始化失败
    #[error("栅格化引擎初始化失败: {0}")]
    EngineInitFailed(String),

    /// 远程与内嵌字体均不可用
    #[error("字体不可用: {0}")]
    FontUnavailable(String),

    /// 元数据获取失败（降级为占位符）
    #[error("元数据获取失败: {0}")]
    MetadataUnavailable(String),

    /// 版式构建失败
    #[error("版式构建失败: {0}")]
    RenderFailure(String),

    /// 栅格化失败（降级为 SVG 输出）
    #[error("栅格化失败: {0}")]
    RasterizationFailure(String),

    /// 错误上报失败（始终吞掉）
    #[error("错误上报失败: {0}")]
    ReportingFailure(String),

    /// 上游请求超时
    #[error("请求超时: {0}")]
    Timeout(String),

    /// 网络请求错误
    #[error("网络错误: {0}")]
    Network(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AppError {
    /// 是否终止当前请求（以非 200 状态返回）
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AppError::MetadataUnavailable(_)
                | AppError::RasterizationFailure(_)
                | AppError::ReportingFailure(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回给调用方的纯文本内容：不透出上游地址等内部细节，详情只进日志与上报。
    fn public_message(&self) -> &'static str {
        match self {
            AppError::RateLimitExceeded { .. } => "Rate limit exceeded. Please try again later.",
            AppError::EngineInitFailed(_) => "Failed to initialize image renderer",
            AppError::FontUnavailable(_) => "Failed to load font",
            AppError::RenderFailure(_) => "Failed to generate image",
            _ => "Internal server error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut res = (self.status_code(), self.public_message()).into_response();
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if let AppError::RateLimitExceeded { retry_after_secs } = self
            && let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string())
        {
            res.headers_mut().insert(header::RETRY_AFTER, v);
        }
        res
    }
}

// =============== Error conversions for common external errors ===============

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else {
            AppError::Network(err.to_string())
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;
    use axum::http::{StatusCode, header};
    use axum::response::IntoResponse;
    use std::time::Duration;

    async fn start_hanging_http_server() -> std::net::SocketAddr {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind tcp listener");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    // 不返回任何 HTTP 响应，触发客户端 read timeout。
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    drop(socket);
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn app_error_from_reqwest_timeout_is_timeout() {
        let addr = start_hanging_http_server().await;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("build reqwest client");

        let err = client
            .get(format!("http://{addr}/"))
            .send()
            .await
            .expect_err("expected timeout");
        assert!(err.is_timeout(), "expected reqwest timeout, got: {err}");

        let app: AppError = err.into();
        assert!(
            matches!(app, AppError::Timeout(_)),
            "expected AppError::Timeout, got: {app:?}"
        );
    }

    #[test]
    fn rate_limit_maps_to_429_with_retry_after() {
        let resp = AppError::RateLimitExceeded {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            resp.headers().get(header::RETRY_AFTER).unwrap(),
            "42"
        );
        assert!(resp.headers().get(header::CACHE_CONTROL).is_none());
    }

    #[test]
    fn fatal_errors_map_to_plain_text_500() {
        for err in [
            AppError::EngineInitFailed("wasm".into()),
            AppError::FontUnavailable("empty".into()),
            AppError::RenderFailure("overflow".into()),
        ] {
            assert!(err.is_fatal());
            let resp = err.into_response();
            assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(
                resp.headers().get(header::CONTENT_TYPE).unwrap(),
                "text/plain; charset=utf-8"
            );
        }
    }

    #[test]
    fn degradations_are_not_fatal() {
        assert!(!AppError::MetadataUnavailable("x".into()).is_fatal());
        assert!(!AppError::RasterizationFailure("x".into()).is_fatal());
        assert!(!AppError::ReportingFailure("x".into()).is_fatal());
    }
}
