//! 图片管线的运行指标与组件健康状态。
//!
//! 计数器均为原子量，记录不加锁；`/metrics` 以 Prometheus 文本格式导出，
//! `/health` 附带各组件最近一次观测到的状态。

use std::fmt::Write;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use serde::Serialize;

use super::types::FontSource;

/// 组件状态（取自最近一次请求的观测结果）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// 尚无请求触达该组件
    Unknown,
    Healthy,
    /// 可用但走了降级路径
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Healthy,
            2 => Self::Degraded,
            3 => Self::Unhealthy,
            _ => Self::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Healthy => 1,
            Self::Degraded => 2,
            Self::Unhealthy => 3,
        }
    }
}

/// 单个组件的健康信息
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ComponentHealth {
    #[schema(example = "font")]
    pub name: String,
    pub status: ComponentStatus,
}

#[derive(Debug, Default)]
struct StatusCell(AtomicU8);

impl StatusCell {
    fn set(&self, status: ComponentStatus) {
        self.0.store(status.as_u8(), Ordering::Relaxed);
    }

    fn get(&self) -> ComponentStatus {
        ComponentStatus::from_u8(self.0.load(Ordering::Relaxed))
    }
}

/// 管线计数器
#[derive(Debug, Default)]
pub struct OgMetrics {
    requests_admitted: AtomicU64,
    requests_denied: AtomicU64,
    engine_init_failures: AtomicU64,
    fonts_remote: AtomicU64,
    fonts_embedded: AtomicU64,
    fonts_unavailable: AtomicU64,
    metadata_degraded: AtomicU64,
    images_png: AtomicU64,
    images_svg_fallback: AtomicU64,

    engine: StatusCell,
    font: StatusCell,
    metadata: StatusCell,
    rasterizer: StatusCell,
}

/// 某一时刻的计数快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub requests_admitted: u64,
    pub requests_denied: u64,
    pub engine_init_failures: u64,
    pub fonts_remote: u64,
    pub fonts_embedded: u64,
    pub fonts_unavailable: u64,
    pub metadata_degraded: u64,
    pub images_png: u64,
    pub images_svg_fallback: u64,
}

impl OgMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admission(&self, admitted: bool) {
        let counter = if admitted {
            &self.requests_admitted
        } else {
            &self.requests_denied
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_engine(&self, ready: bool) {
        if ready {
            self.engine.set(ComponentStatus::Healthy);
        } else {
            self.engine_init_failures.fetch_add(1, Ordering::Relaxed);
            self.engine.set(ComponentStatus::Unhealthy);
        }
    }

    /// `None` 表示远程与内嵌字体均不可用
    pub fn record_font(&self, source: Option<FontSource>) {
        let (counter, status) = match source {
            Some(FontSource::Remote) => (&self.fonts_remote, ComponentStatus::Healthy),
            // 走到内嵌字体说明远程字体已失败
            Some(FontSource::Embedded) => (&self.fonts_embedded, ComponentStatus::Degraded),
            None => (&self.fonts_unavailable, ComponentStatus::Unhealthy),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.font.set(status);
    }

    pub fn record_metadata(&self, degraded: bool) {
        if degraded {
            self.metadata_degraded.fetch_add(1, Ordering::Relaxed);
            self.metadata.set(ComponentStatus::Degraded);
        } else {
            self.metadata.set(ComponentStatus::Healthy);
        }
    }

    pub fn record_output(&self, png: bool) {
        if png {
            self.images_png.fetch_add(1, Ordering::Relaxed);
            self.rasterizer.set(ComponentStatus::Healthy);
        } else {
            self.images_svg_fallback.fetch_add(1, Ordering::Relaxed);
            self.rasterizer.set(ComponentStatus::Degraded);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_admitted: load(&self.requests_admitted),
            requests_denied: load(&self.requests_denied),
            engine_init_failures: load(&self.engine_init_failures),
            fonts_remote: load(&self.fonts_remote),
            fonts_embedded: load(&self.fonts_embedded),
            fonts_unavailable: load(&self.fonts_unavailable),
            metadata_degraded: load(&self.metadata_degraded),
            images_png: load(&self.images_png),
            images_svg_fallback: load(&self.images_svg_fallback),
        }
    }

    /// 各组件最近一次观测到的状态，顺序固定
    pub fn components(&self) -> Vec<ComponentHealth> {
        [
            ("engine", &self.engine),
            ("font", &self.font),
            ("metadata", &self.metadata),
            ("rasterizer", &self.rasterizer),
        ]
        .into_iter()
        .map(|(name, cell)| ComponentHealth {
            name: name.to_string(),
            status: cell.get(),
        })
        .collect()
    }

    /// 导出 Prometheus 文本格式。
    ///
    /// `reports_submitted` 由错误上报器提供，计数不在此处重复维护。
    pub fn to_prometheus_format(&self, reports_submitted: u64) -> String {
        let s = self.snapshot();
        let mut out = String::with_capacity(2048);
        // 写入 String 不会失败
        let _ = write_prometheus(&mut out, &s, reports_submitted, &self.components());
        out
    }
}

fn write_prometheus(
    out: &mut String,
    s: &MetricsSnapshot,
    reports_submitted: u64,
    components: &[ComponentHealth],
) -> std::fmt::Result {
    writeln!(out, "# HELP apex_og_requests_total Image requests by admission outcome")?;
    writeln!(out, "# TYPE apex_og_requests_total counter")?;
    writeln!(out, "apex_og_requests_total{{outcome=\"admitted\"}} {}", s.requests_admitted)?;
    writeln!(out, "apex_og_requests_total{{outcome=\"denied\"}} {}", s.requests_denied)?;
    out.push('\n');

    writeln!(out, "# HELP apex_og_engine_init_failures_total Failed raster engine initializations")?;
    writeln!(out, "# TYPE apex_og_engine_init_failures_total counter")?;
    writeln!(out, "apex_og_engine_init_failures_total {}", s.engine_init_failures)?;
    out.push('\n');

    writeln!(out, "# HELP apex_og_font_loads_total Font resolutions by serving source")?;
    writeln!(out, "# TYPE apex_og_font_loads_total counter")?;
    writeln!(out, "apex_og_font_loads_total{{source=\"remote\"}} {}", s.fonts_remote)?;
    writeln!(out, "apex_og_font_loads_total{{source=\"embedded\"}} {}", s.fonts_embedded)?;
    writeln!(out, "apex_og_font_loads_total{{source=\"none\"}} {}", s.fonts_unavailable)?;
    out.push('\n');

    writeln!(out, "# HELP apex_og_metadata_degraded_total Renders that used placeholder metadata")?;
    writeln!(out, "# TYPE apex_og_metadata_degraded_total counter")?;
    writeln!(out, "apex_og_metadata_degraded_total {}", s.metadata_degraded)?;
    out.push('\n');

    writeln!(out, "# HELP apex_og_images_total Images served by output format")?;
    writeln!(out, "# TYPE apex_og_images_total counter")?;
    writeln!(out, "apex_og_images_total{{format=\"png\"}} {}", s.images_png)?;
    writeln!(out, "apex_og_images_total{{format=\"svg\"}} {}", s.images_svg_fallback)?;
    out.push('\n');

    writeln!(out, "# HELP apex_og_error_reports_total Error reports submitted to the sink")?;
    writeln!(out, "# TYPE apex_og_error_reports_total counter")?;
    writeln!(out, "apex_og_error_reports_total {reports_submitted}")?;
    out.push('\n');

    writeln!(out, "# HELP apex_og_component_status Last observed status (0 unknown, 1 healthy, 2 degraded, 3 unhealthy)")?;
    writeln!(out, "# TYPE apex_og_component_status gauge")?;
    for c in components {
        writeln!(
            out,
            "apex_og_component_status{{component=\"{}\"}} {}",
            c.name,
            c.status.as_u8()
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(m: &OgMetrics, name: &str) -> ComponentStatus {
        m.components()
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| c.status)
            .expect("component")
    }

    #[test]
    fn components_start_unknown() {
        let m = OgMetrics::new();
        let components = m.components();
        let names: Vec<&str> = components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["engine", "font", "metadata", "rasterizer"]);
        assert!(components.iter().all(|c| c.status == ComponentStatus::Unknown));
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn font_status_follows_serving_source() {
        let m = OgMetrics::new();
        m.record_font(Some(FontSource::Remote));
        assert_eq!(status_of(&m, "font"), ComponentStatus::Healthy);
        m.record_font(Some(FontSource::Embedded));
        assert_eq!(status_of(&m, "font"), ComponentStatus::Degraded);
        m.record_font(None);
        assert_eq!(status_of(&m, "font"), ComponentStatus::Unhealthy);

        let s = m.snapshot();
        assert_eq!((s.fonts_remote, s.fonts_embedded, s.fonts_unavailable), (1, 1, 1));
    }

    #[test]
    fn engine_recovers_after_failed_init() {
        let m = OgMetrics::new();
        m.record_engine(false);
        assert_eq!(status_of(&m, "engine"), ComponentStatus::Unhealthy);
        m.record_engine(true);
        assert_eq!(status_of(&m, "engine"), ComponentStatus::Healthy);
        assert_eq!(m.snapshot().engine_init_failures, 1);
    }

    #[test]
    fn prometheus_text_carries_counters_and_component_gauges() {
        let m = OgMetrics::new();
        m.record_admission(true);
        m.record_admission(true);
        m.record_admission(false);
        m.record_metadata(true);
        m.record_output(false);

        let text = m.to_prometheus_format(3);
        assert!(text.contains("# TYPE apex_og_requests_total counter\n"));
        assert!(text.contains("apex_og_requests_total{outcome=\"admitted\"} 2\n"));
        assert!(text.contains("apex_og_requests_total{outcome=\"denied\"} 1\n"));
        assert!(text.contains("apex_og_metadata_degraded_total 1\n"));
        assert!(text.contains("apex_og_images_total{format=\"svg\"} 1\n"));
        assert!(text.contains("apex_og_error_reports_total 3\n"));
        assert!(text.contains("apex_og_component_status{component=\"metadata\"} 2\n"));
        assert!(text.contains("apex_og_component_status{component=\"engine\"} 0\n"));
    }
}
