use std::sync::Arc;

use crate::features::og::OgImageService;

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 图片生成服务上下文（限流表、引擎、上报器）
    pub og: Arc<OgImageService>,
}

impl AppState {
    pub fn new(og: OgImageService) -> Self {
        Self { og: Arc::new(og) }
    }
}
