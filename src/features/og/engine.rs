//! 栅格化引擎及其生命周期。
//!
//! 引擎初始化（字体库引导）是昂贵的一次性操作，由 [`RasterEngine`] 以 single-flight
//! 方式执行：并发的首批请求共享同一次初始化，并且都会等到初始化真正完成后才继续。

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use lru::LruCache;
use resvg::usvg::{self, Options as UsvgOptions, fontdb};
use resvg::{
    render,
    tiny_skia::{Pixmap, Transform},
};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::config::ImageRenderConfig;
use crate::error::AppError;

use super::types::{FontAsset, RasterImage};

/// SVG → 位图的转换后端
pub trait RasterBackend: Send + Sync {
    /// 将 SVG 栅格化为 `target_width` 宽（等比缩放）的 PNG。
    fn rasterize(
        &self,
        svg: &str,
        font: &FontAsset,
        target_width: u32,
    ) -> Result<RasterImage, AppError>;
}

pub type EngineInitFuture = BoxFuture<'static, Result<Arc<dyn RasterBackend>, AppError>>;

/// 引擎生命周期：惰性、幂等、single-flight 的初始化。
///
/// 初始化失败不会被缓存：触发它的请求以 500 结束，后续请求会重新尝试。
pub struct RasterEngine {
    cell: OnceCell<Arc<dyn RasterBackend>>,
    initializer: Box<dyn Fn() -> EngineInitFuture + Send + Sync>,
    attempts: AtomicUsize,
}

impl RasterEngine {
    /// 基于 resvg 的默认引擎
    pub fn resvg(cfg: &ImageRenderConfig) -> Self {
        let cfg = cfg.clone();
        Self::with_initializer(move || {
            let cfg = cfg.clone();
            async move {
                let backend = ResvgBackend::initialize(&cfg).await?;
                Ok::<Arc<dyn RasterBackend>, AppError>(Arc::new(backend))
            }
            .boxed()
        })
    }

    /// 自定义初始化过程（测试中用于计数或注入失败）
    pub fn with_initializer<F>(initializer: F) -> Self
    where
        F: Fn() -> EngineInitFuture + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            initializer: Box::new(initializer),
            attempts: AtomicUsize::new(0),
        }
    }

    /// 确保引擎可用；已就绪时为无开销的读取。
    pub async fn ensure_ready(&self) -> Result<Arc<dyn RasterBackend>, AppError> {
        self.cell
            .get_or_try_init(|| {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                (self.initializer)()
            })
            .await
            .map(Arc::clone)
    }

    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }

    /// 初始化过程被实际执行的次数
    pub fn init_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// 同时缓存的请求字体数量（通常只有远程与内嵌两份）
const FONT_CACHE_CAPACITY: usize = 4;

/// 基础字体库加载请求字体后的结果
struct FontContext {
    fonts: Arc<fontdb::Database>,
    family: String,
}

/// resvg 后端：持有引导好的基础字体库。
///
/// 请求字体加载到基础库的副本上，结果按字体内容缓存，
/// 同一份字体只复制并解析一次。
pub struct ResvgBackend {
    base_fonts: Arc<fontdb::Database>,
    optimize_speed: bool,
    font_cache: Mutex<LruCache<[u8; 32], Arc<FontContext>>>,
    font_db_builds: AtomicUsize,
}

impl ResvgBackend {
    /// 在阻塞线程池中引导字体库（扫描系统字体会触发大量文件 IO）。
    pub async fn initialize(cfg: &ImageRenderConfig) -> Result<Self, AppError> {
        let load_system_fonts = cfg.load_system_fonts;
        let t0 = std::time::Instant::now();
        let db = tokio::task::spawn_blocking(move || {
            let mut db = fontdb::Database::new();
            if load_system_fonts {
                db.load_system_fonts();
            }
            db
        })
        .await
        .map_err(|e| AppError::EngineInitFailed(format!("字体库引导任务执行失败: {e}")))?;

        tracing::info!(
            faces = db.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "栅格化引擎初始化完成"
        );
        let capacity = NonZeroUsize::new(FONT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            base_fonts: Arc::new(db),
            optimize_speed: cfg.optimize_speed,
            font_cache: Mutex::new(LruCache::new(capacity)),
            font_db_builds: AtomicUsize::new(0),
        })
    }

    /// 实际构建字体库副本的次数
    pub fn font_db_builds(&self) -> usize {
        self.font_db_builds.load(Ordering::SeqCst)
    }

    fn font_context(&self, font: &FontAsset) -> Arc<FontContext> {
        let key: [u8; 32] = Sha256::new()
            .chain_update(font.family.as_bytes())
            .chain_update([0u8])
            .chain_update(&font.data)
            .finalize()
            .into();
        if let Ok(mut cache) = self.font_cache.lock()
            && let Some(hit) = cache.get(&key)
        {
            return Arc::clone(hit);
        }

        // 构建过程不持锁；并发未命中时可能各自构建，结果等价
        let ctx = Arc::new(self.build_font_context(font));
        if let Ok(mut cache) = self.font_cache.lock() {
            cache.put(key, Arc::clone(&ctx));
        }
        ctx
    }

    fn build_font_context(&self, font: &FontAsset) -> FontContext {
        self.font_db_builds.fetch_add(1, Ordering::SeqCst);
        let mut db = (*self.base_fonts).clone();
        let ids = db.load_font_source(fontdb::Source::Binary(Arc::new(font.data.clone())));
        let family = ids
            .first()
            .and_then(|id| db.face(*id))
            .and_then(|face| face.families.first())
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| font.family.clone());
        if ids.is_empty() {
            tracing::warn!(family = %font.family, "请求字体无法解析，回退到系统字体");
        }
        db.set_sans_serif_family(family.clone());
        FontContext {
            fonts: Arc::new(db),
            family,
        }
    }

    fn options_for(&self, font: &FontAsset) -> UsvgOptions<'static> {
        let ctx = self.font_context(font);
        let speed = self.optimize_speed;
        UsvgOptions {
            fontdb: Arc::clone(&ctx.fonts),
            font_family: ctx.family.clone(),
            font_size: 16.0,
            languages: vec!["en".to_string()],
            shape_rendering: if speed {
                usvg::ShapeRendering::OptimizeSpeed
            } else {
                usvg::ShapeRendering::GeometricPrecision
            },
            text_rendering: if speed {
                usvg::TextRendering::OptimizeSpeed
            } else {
                usvg::TextRendering::OptimizeLegibility
            },
            ..Default::default()
        }
    }
}

impl RasterBackend for ResvgBackend {
    fn rasterize(
        &self,
        svg: &str,
        font: &FontAsset,
        target_width: u32,
    ) -> Result<RasterImage, AppError> {
        // 分段计时，定位瓶颈
        let t0 = std::time::Instant::now();
        let opts = self.options_for(font);

        let tree = usvg::Tree::from_data(svg.as_bytes(), &opts)
            .map_err(|e| AppError::RasterizationFailure(format!("Failed to parse SVG: {e}")))?;
        let t_parse = t0.elapsed();

        let src = tree.size().to_int_size();
        let scale = if target_width > 0 {
            target_width as f32 / src.width() as f32
        } else {
            1.0
        };
        let dst_w = (src.width() as f32 * scale).round() as u32;
        let dst_h = (src.height() as f32 * scale).round() as u32;
        let mut pixmap = Pixmap::new(dst_w, dst_h).ok_or_else(|| {
            AppError::RasterizationFailure(format!("Failed to create pixmap {dst_w}x{dst_h}"))
        })?;
        render(
            &tree,
            Transform::from_scale(scale, scale),
            &mut pixmap.as_mut(),
        );
        let t_raster = t0.elapsed();

        let mut out = Vec::with_capacity((dst_w * dst_h) as usize);
        {
            let mut encoder = png::Encoder::new(&mut out, dst_w, dst_h);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            if self.optimize_speed {
                encoder.set_compression(png::Compression::Fast);
                encoder.set_filter(png::FilterType::NoFilter);
            } else {
                encoder.set_compression(png::Compression::Default);
                encoder.set_filter(png::FilterType::Paeth);
            }
            let mut writer = encoder.write_header().map_err(|e| {
                AppError::RasterizationFailure(format!("PNG write_header error: {e}"))
            })?;
            writer.write_image_data(pixmap.data()).map_err(|e| {
                AppError::RasterizationFailure(format!("PNG write_image_data error: {e}"))
            })?;
            writer
                .finish()
                .map_err(|e| AppError::RasterizationFailure(format!("PNG finish error: {e}")))?;
        }
        let t_encode = t0.elapsed();

        tracing::info!(
            "PNG渲染内部分段: 解析={:?}, 栅格化={:?}, 编码={:?}, 总计={:?}",
            t_parse,
            t_raster - t_parse,
            t_encode - t_raster,
            t_encode
        );

        Ok(RasterImage {
            data: Bytes::from(out),
            width: dst_w,
            height: dst_h,
            mime: "image/png",
        })
    }
}
