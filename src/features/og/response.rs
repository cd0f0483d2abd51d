use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use super::raster::RasterOutcome;
use super::types::RasterImage;

/// 成功栅格化的 PNG 允许公共缓存一小时
pub const CACHE_CONTROL_PNG: &str = "public, max-age=3600";
pub const CONTENT_TYPE_SVG: &str = "image/svg+xml";

/// 管线的成功终态
#[derive(Debug)]
pub enum RenderedImage {
    Png(RasterImage),
    /// 栅格化失败后的矢量降级（不缓存）
    Svg(String),
}

impl RenderedImage {
    pub fn content_type(&self) -> &'static str {
        match self {
            RenderedImage::Png(img) => img.mime,
            RenderedImage::Svg(_) => CONTENT_TYPE_SVG,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, RenderedImage::Svg(_))
    }
}

impl From<RasterOutcome> for RenderedImage {
    fn from(outcome: RasterOutcome) -> Self {
        match outcome {
            RasterOutcome::Raster(img) => RenderedImage::Png(img),
            RasterOutcome::VectorFallback { svg, .. } => RenderedImage::Svg(svg),
        }
    }
}

impl IntoResponse for RenderedImage {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type()),
        );
        match self {
            RenderedImage::Png(img) => {
                headers.insert(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static(CACHE_CONTROL_PNG),
                );
                (StatusCode::OK, headers, img.data).into_response()
            }
            RenderedImage::Svg(svg) => (StatusCode::OK, headers, svg).into_response(),
        }
    }
}
