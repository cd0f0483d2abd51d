use std::sync::Arc;

use axum::http::HeaderMap;
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::error::AppError;

use super::engine::RasterEngine;
use super::font::FontResolver;
use super::layout;
use super::metadata::MetadataAggregator;
use super::metrics::OgMetrics;
use super::raster::{self, RasterOutcome};
use super::rate_limit::{self, Admission, RateLimiter};
use super::reporter::{ErrorReporter, Phase};
use super::response::RenderedImage;
use super::types::{CANVAS_WIDTH, ImageRequest};

/// 图片生成服务上下文：持有进程内共享的限流表、引擎、上报器与运行指标。
///
/// 每个实例相互独立，测试可以各自构造，互不干扰。
pub struct OgImageService {
    limiter: RateLimiter,
    engine: RasterEngine,
    fonts: FontResolver,
    metadata: MetadataAggregator,
    reporter: ErrorReporter,
    metrics: OgMetrics,
    render_permits: Semaphore,
    raster_width: u32,
    client_ip_headers: Vec<String>,
}

impl OgImageService {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AppError> {
        let reporter = ErrorReporter::from_config(cfg)?;
        let client = crate::http::upstream_client(&cfg.upstream)?;
        let permits = cfg.image.effective_parallelism();
        tracing::info!(
            render_permits = permits,
            window_secs = cfg.rate_limit.window_secs,
            max_requests = cfg.rate_limit.max_requests,
            reporting = cfg.reporting.endpoint.is_some(),
            "图片服务上下文已创建"
        );
        Ok(Self {
            limiter: RateLimiter::from_config(&cfg.rate_limit),
            engine: RasterEngine::resvg(&cfg.image),
            fonts: FontResolver::new(client.clone(), &cfg.font, reporter.clone()),
            metadata: MetadataAggregator::new(client, &cfg.upstream, reporter.clone()),
            reporter,
            metrics: OgMetrics::new(),
            render_permits: Semaphore::new(permits),
            raster_width: CANVAS_WIDTH,
            client_ip_headers: cfg.rate_limit.client_ip_headers.clone(),
        })
    }

    /// 替换栅格化引擎（测试注入失败后端或计数初始化）
    pub fn with_engine(mut self, engine: RasterEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub fn engine(&self) -> &RasterEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &OgMetrics {
        &self.metrics
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// 按配置的请求头顺序识别客户端
    pub fn client_id(&self, headers: &HeaderMap) -> String {
        rate_limit::client_id_from_headers(headers, &self.client_ip_headers)
    }

    /// 完整管线：限流 → 引擎就绪 → 字体 ∥ 元数据 → 版式 → 栅格化。
    ///
    /// 被限流的请求直接返回，不触达任何上游，也不上报。
    pub async fn generate(&self, req: &ImageRequest) -> Result<RenderedImage, AppError> {
        let client_id = req.client_id.as_str();
        let t_total = std::time::Instant::now();

        if let Admission::Denied { retry_after_secs } = self.limiter.admit(client_id) {
            self.metrics.record_admission(false);
            tracing::info!(retry_after_secs, "请求被限流");
            return Err(AppError::RateLimitExceeded { retry_after_secs });
        }
        self.metrics.record_admission(true);

        let backend = self.engine.ensure_ready().await;
        self.metrics.record_engine(backend.is_ok());
        let backend =
            backend.inspect_err(|e| self.reporter.report(Phase::EngineInit, e, client_id))?;

        // 字体与元数据并发获取。字体失败立即结束请求，未完成的元数据请求随之丢弃；
        // 元数据结果在字体成功后才落定
        let fetched = tokio::try_join!(self.fonts.resolve(client_id), async {
            Ok::<_, AppError>(self.metadata.try_fetch().await)
        });
        self.metrics
            .record_font(fetched.as_ref().ok().map(|(font, _)| font.source));
        let (font, metadata) = fetched?;
        let metadata = self.metadata.settle(metadata, client_id);
        self.metrics.record_metadata(metadata.is_placeholder());

        let doc = layout::render(req, &metadata, &font)
            .inspect_err(|e| self.reporter.report(Phase::Render, e, client_id))?;

        let outcome = raster::to_raster(
            backend,
            doc,
            &font,
            &self.render_permits,
            self.raster_width,
        )
        .await;
        if let RasterOutcome::VectorFallback { error, .. } = &outcome {
            self.reporter.report(Phase::Rasterize, error, client_id);
        }

        let image = RenderedImage::from(outcome);
        self.metrics.record_output(!image.is_fallback());
        tracing::info!(
            content_type = image.content_type(),
            font_source = ?font.source,
            metadata_degraded = metadata.is_placeholder(),
            total_ms = t_total.elapsed().as_millis() as u64,
            "图片生成完成"
        );
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::og::engine::{EngineInitFuture, RasterBackend};
    use crate::features::og::metrics::ComponentStatus;
    use crate::features::og::types::{FontAsset, RasterImage};
    use axum::body::Bytes;
    use futures_util::FutureExt;

    struct StubBackend;

    impl RasterBackend for StubBackend {
        fn rasterize(&self, _: &str, _: &FontAsset, w: u32) -> Result<RasterImage, AppError> {
            Ok(RasterImage {
                data: Bytes::from_static(b"png"),
                width: w,
                height: 630,
                mime: "image/png",
            })
        }
    }

    fn stub_init() -> EngineInitFuture {
        async { Ok(Arc::new(StubBackend) as Arc<dyn RasterBackend>) }.boxed()
    }

    fn offline_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        // 不可路由地址，确保测试不访问外网
        cfg.font.url = "http://127.0.0.1:9/font.ttf".into();
        cfg.upstream.crate_api_url = "http://127.0.0.1:9/crate".into();
        cfg.upstream.release_api_url = "http://127.0.0.1:9/release".into();
        cfg.rate_limit.max_requests = 2;
        cfg
    }

    #[tokio::test]
    async fn denied_request_skips_engine_initialization() {
        let svc = OgImageService::from_config(&offline_config())
            .expect("service")
            .with_engine(RasterEngine::with_initializer(stub_init));
        let req = ImageRequest::default();

        // 前两次因字体不可用而失败，但仍计入窗口
        for _ in 0..2 {
            let err = svc.generate(&req).await.err().expect("font should fail");
            assert!(matches!(err, AppError::FontUnavailable(_)));
        }
        let attempts = svc.engine().init_attempts();
        let reports = svc.reporter().submitted();

        let err = svc.generate(&req).await.err().expect("denied");
        assert!(matches!(err, AppError::RateLimitExceeded { .. }));
        assert_eq!(svc.engine().init_attempts(), attempts);
        assert_eq!(svc.reporter().submitted(), reports);

        let counts = svc.metrics().snapshot();
        assert_eq!((counts.requests_admitted, counts.requests_denied), (2, 1));
        assert_eq!(counts.fonts_unavailable, 2);
    }

    #[tokio::test]
    async fn engine_failure_is_fatal_and_reported_once() {
        let svc = OgImageService::from_config(&offline_config())
            .expect("service")
            .with_engine(RasterEngine::with_initializer(|| {
                async { Err(AppError::EngineInitFailed("no fonts".into())) }.boxed()
            }));
        let err = svc
            .generate(&ImageRequest::default())
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, AppError::EngineInitFailed(_)));
        assert_eq!(svc.reporter().submitted(), 1);
        assert_eq!(svc.metrics().snapshot().engine_init_failures, 1);
        assert_eq!(svc.metrics().components()[0].status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn font_failure_reports_each_source_and_no_metadata() {
        let svc = OgImageService::from_config(&offline_config())
            .expect("service")
            .with_engine(RasterEngine::with_initializer(stub_init));
        let err = svc
            .generate(&ImageRequest::default())
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, AppError::FontUnavailable(_)));
        assert_eq!(svc.reporter().submitted(), 2);
    }
}
