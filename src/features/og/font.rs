use axum::body::Bytes;
use base64::{Engine as _, engine::general_purpose::STANDARD as base64_engine};
use reqwest::Client;

use crate::config::FontConfig;
use crate::error::AppError;

use super::reporter::{ErrorReporter, Phase};
use super::types::{FontAsset, FontSource};

/// 随服务打包的兜底字体（base64）。
///
/// 目前为空：兜底路径永远失败，远程字体不可用时请求以 500 结束。
/// 可通过 `font.embedded_base64` 配置真实字体。
pub const EMBEDDED_FONT_BASE64: &str = "";

/// 字体解析：远程优先，失败后回退到内嵌字体
pub struct FontResolver {
    client: Client,
    url: String,
    family: String,
    embedded_base64: String,
    reporter: ErrorReporter,
}

impl FontResolver {
    pub fn new(client: Client, cfg: &FontConfig, reporter: ErrorReporter) -> Self {
        Self {
            client,
            url: cfg.url.clone(),
            family: cfg.family.clone(),
            embedded_base64: cfg
                .embedded_base64
                .clone()
                .unwrap_or_else(|| EMBEDDED_FONT_BASE64.to_string()),
            reporter,
        }
    }

    /// 两个来源各自失败时分别上报一次（`remote` / `embedded`），之后才返回最终失败。
    pub async fn resolve(&self, client_id: &str) -> Result<FontAsset, AppError> {
        match self.fetch_remote().await {
            Ok(data) => {
                return Ok(FontAsset {
                    data,
                    family: self.family.clone(),
                    source: FontSource::Remote,
                });
            }
            Err(e) => self.reporter.report(Phase::Remote, &e, client_id),
        }

        match self.decode_embedded() {
            Ok(data) => {
                tracing::warn!(bytes = data.len(), "远程字体不可用，已回退到内嵌字体");
                Ok(FontAsset {
                    data,
                    family: self.family.clone(),
                    source: FontSource::Embedded,
                })
            }
            Err(e) => {
                self.reporter.report(Phase::Embedded, &e, client_id);
                Err(AppError::FontUnavailable(
                    "远程字体与内嵌字体均不可用".to_string(),
                ))
            }
        }
    }

    async fn fetch_remote(&self) -> Result<Bytes, AppError> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Network(format!(
                "字体请求返回 {status}: {}",
                self.url
            )));
        }
        let data = resp.bytes().await?;
        if data.is_empty() {
            return Err(AppError::FontUnavailable(format!(
                "远程字体内容为空: {}",
                self.url
            )));
        }
        Ok(data)
    }

    fn decode_embedded(&self) -> Result<Bytes, AppError> {
        let raw = self.embedded_base64.trim();
        if raw.is_empty() {
            return Err(AppError::FontUnavailable("内嵌字体为空".to_string()));
        }
        let decoded = base64_engine
            .decode(raw)
            .map_err(|e| AppError::FontUnavailable(format!("内嵌字体解码失败: {e}")))?;
        if decoded.is_empty() {
            return Err(AppError::FontUnavailable("内嵌字体解码后为空".to_string()));
        }
        Ok(Bytes::from(decoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};

    async fn start_font_host() -> String {
        let app = Router::new()
            .route("/ok.ttf", get(|| async { &b"\x00\x01\x00\x00font"[..] }))
            .route("/empty.ttf", get(|| async { "" }))
            .route(
                "/missing.ttf",
                get(|| async { (StatusCode::NOT_FOUND, "nope") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind font host");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn resolver(url: String, embedded: Option<&str>, reporter: &ErrorReporter) -> FontResolver {
        let cfg = FontConfig {
            url,
            family: "Inter".to_string(),
            embedded_base64: embedded.map(str::to_string),
        };
        FontResolver::new(Client::new(), &cfg, reporter.clone())
    }

    #[tokio::test]
    async fn remote_font_is_preferred() {
        let base = start_font_host().await;
        let reporter = ErrorReporter::log_only();
        let font = resolver(format!("{base}/ok.ttf"), None, &reporter)
            .resolve("c")
            .await
            .expect("font");
        assert_eq!(font.source, FontSource::Remote);
        assert_eq!(&font.data[..], b"\x00\x01\x00\x00font");
        assert_eq!(reporter.submitted(), 0);
    }

    #[tokio::test]
    async fn non_success_status_falls_back_to_embedded() {
        let base = start_font_host().await;
        let reporter = ErrorReporter::log_only();
        let font = resolver(format!("{base}/missing.ttf"), Some("AAEAAA=="), &reporter)
            .resolve("c")
            .await
            .expect("embedded font");
        assert_eq!(font.source, FontSource::Embedded);
        assert_eq!(&font.data[..], &[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(reporter.submitted(), 1);
    }

    #[tokio::test]
    async fn empty_remote_body_counts_as_failure() {
        let base = start_font_host().await;
        let reporter = ErrorReporter::log_only();
        let font = resolver(format!("{base}/empty.ttf"), Some("AAEAAA=="), &reporter)
            .resolve("c")
            .await
            .expect("embedded font");
        assert_eq!(font.source, FontSource::Embedded);
    }

    #[tokio::test]
    async fn both_sources_failing_reports_twice() {
        let base = start_font_host().await;
        let reporter = ErrorReporter::log_only();
        // 默认内嵌字体为空
        let err = resolver(format!("{base}/missing.ttf"), None, &reporter)
            .resolve("c")
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, AppError::FontUnavailable(_)));
        assert_eq!(reporter.submitted(), 2);
    }

    #[tokio::test]
    async fn undecodable_embedded_payload_fails() {
        let base = start_font_host().await;
        let reporter = ErrorReporter::log_only();
        let err = resolver(format!("{base}/missing.ttf"), Some("!!not base64!!"), &reporter)
            .resolve("c")
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, AppError::FontUnavailable(_)));
        assert_eq!(reporter.submitted(), 2);
    }
}
