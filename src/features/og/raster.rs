use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::AppError;

use super::engine::RasterBackend;
use super::layout::VectorDocument;
use super::types::{FontAsset, RasterImage};

/// 栅格化结果：成功得到位图，或退回矢量原文
#[derive(Debug)]
pub enum RasterOutcome {
    Raster(RasterImage),
    /// `svg` 与版式阶段的输出逐字节一致
    VectorFallback { svg: String, error: AppError },
}

/// 把矢量文档转换为 PNG。
///
/// 永不向调用方返回错误：任何失败都变成 [`RasterOutcome::VectorFallback`]。
/// CPU 密集部分受 `permits` 限流，并在阻塞线程池中执行。
pub async fn to_raster(
    backend: Arc<dyn RasterBackend>,
    doc: VectorDocument,
    font: &FontAsset,
    permits: &Semaphore,
    target_width: u32,
) -> RasterOutcome {
    let svg = doc.into_svg();

    let _permit = match permits.acquire().await {
        Ok(p) => p,
        Err(e) => {
            return RasterOutcome::VectorFallback {
                svg,
                error: AppError::RasterizationFailure(format!("渲染并发闸门已关闭: {e}")),
            };
        }
    };

    let font = font.clone();
    let job_svg = svg.clone();
    let joined = tokio::task::spawn_blocking(move || {
        backend.rasterize(&job_svg, &font, target_width)
    })
    .await;

    match joined {
        Ok(Ok(image)) => RasterOutcome::Raster(image),
        Ok(Err(error)) => RasterOutcome::VectorFallback { svg, error },
        Err(e) => RasterOutcome::VectorFallback {
            svg,
            error: AppError::RasterizationFailure(format!("栅格化任务执行失败: {e}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::og::layout;
    use crate::features::og::types::{FontSource, ImageRequest, MetadataSnapshot};
    use axum::body::Bytes;

    struct FailingBackend;

    impl RasterBackend for FailingBackend {
        fn rasterize(&self, _: &str, _: &FontAsset, _: u32) -> Result<RasterImage, AppError> {
            Err(AppError::RasterizationFailure("wasm trap".into()))
        }
    }

    struct PanickingBackend;

    impl RasterBackend for PanickingBackend {
        fn rasterize(&self, _: &str, _: &FontAsset, _: u32) -> Result<RasterImage, AppError> {
            panic!("rasterizer crashed")
        }
    }

    struct EchoBackend;

    impl RasterBackend for EchoBackend {
        fn rasterize(&self, svg: &str, _: &FontAsset, w: u32) -> Result<RasterImage, AppError> {
            Ok(RasterImage {
                data: Bytes::copy_from_slice(svg.as_bytes()),
                width: w,
                height: 630,
                mime: "image/png",
            })
        }
    }

    fn font() -> FontAsset {
        FontAsset {
            data: Bytes::from_static(b"font"),
            family: "Inter".into(),
            source: FontSource::Remote,
        }
    }

    fn doc() -> VectorDocument {
        let req = ImageRequest {
            title: "Fallback".into(),
            ..ImageRequest::default()
        };
        layout::render(&req, &MetadataSnapshot::placeholder(), &font()).expect("layout")
    }

    #[tokio::test]
    async fn backend_error_returns_untouched_svg() {
        let expected = doc().svg().to_string();
        let permits = Semaphore::new(1);
        match to_raster(Arc::new(FailingBackend), doc(), &font(), &permits, 1200).await {
            RasterOutcome::VectorFallback { svg, error } => {
                assert_eq!(svg, expected);
                assert!(matches!(error, AppError::RasterizationFailure(_)));
            }
            RasterOutcome::Raster(_) => panic!("expected fallback"),
        }
    }

    #[tokio::test]
    async fn backend_panic_is_contained() {
        let permits = Semaphore::new(1);
        let outcome = to_raster(Arc::new(PanickingBackend), doc(), &font(), &permits, 1200).await;
        assert!(matches!(outcome, RasterOutcome::VectorFallback { .. }));
        // 许可已归还
        assert_eq!(permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn success_passes_the_document_to_the_backend() {
        let expected = doc().svg().to_string();
        let permits = Semaphore::new(2);
        match to_raster(Arc::new(EchoBackend), doc(), &font(), &permits, 1200).await {
            RasterOutcome::Raster(img) => {
                assert_eq!(&img.data[..], expected.as_bytes());
                assert_eq!(img.width, 1200);
            }
            RasterOutcome::VectorFallback { error, .. } => panic!("unexpected fallback: {error}"),
        }
    }

    #[tokio::test]
    async fn closed_semaphore_falls_back() {
        let permits = Semaphore::new(1);
        permits.close();
        let outcome = to_raster(Arc::new(EchoBackend), doc(), &font(), &permits, 1200).await;
        assert!(matches!(outcome, RasterOutcome::VectorFallback { .. }));
    }
}
