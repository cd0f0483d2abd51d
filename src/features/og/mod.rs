//! Open Graph 预览图生成：限流、引擎生命周期、字体、元数据、版式、栅格化、错误上报与运行指标。

pub mod engine;
pub mod font;
pub mod handler;
pub mod layout;
pub mod metadata;
pub mod metrics;
pub mod raster;
pub mod rate_limit;
pub mod reporter;
pub mod response;
pub mod service;
pub mod types;

pub use engine::{RasterBackend, RasterEngine};
pub use handler::create_og_router;
pub use metrics::{ComponentHealth, ComponentStatus, OgMetrics};
pub use reporter::{ErrorReporter, Phase};
pub use response::RenderedImage;
pub use service::OgImageService;
pub use types::{ImageRequest, MetadataSnapshot, OgQuery};
