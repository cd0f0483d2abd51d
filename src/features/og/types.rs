use axum::body::Bytes;
use serde::{Deserialize, Serialize};

/// 未提供 title 时的默认标题
pub const DEFAULT_TITLE: &str = "Apex SDK";
/// 画布尺寸（Open Graph 推荐 1200x630）
pub const CANVAS_WIDTH: u32 = 1200;
pub const CANVAS_HEIGHT: u32 = 630;
/// 无法确定客户端地址时的标识
pub const UNKNOWN_CLIENT: &str = "unknown";

/// `GET /` 的原始查询参数
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct OgQuery {
    /// 主标题（默认 "Apex SDK"）
    #[serde(default)]
    pub title: Option<String>,
    /// 副标题（默认不显示）
    #[serde(default)]
    pub subtitle: Option<String>,
    /// 是否显示 crates.io 版本徽章（"false" 关闭，默认显示）
    #[serde(default)]
    pub show_crate: Option<String>,
    /// 是否显示 GitHub release 徽章（"false" 关闭，默认显示）
    #[serde(default)]
    pub show_github: Option<String>,
}

/// 解析后的图片请求（不可变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub title: String,
    pub subtitle: String,
    pub show_crate: bool,
    pub show_github: bool,
    pub client_id: String,
}

impl ImageRequest {
    pub fn from_query(q: &OgQuery, client_id: impl Into<String>) -> Self {
        // 清洗后为空的标题同样回退到默认值
        let title = q
            .title
            .as_deref()
            .map(strip_non_xml)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        Self {
            title,
            subtitle: q.subtitle.as_deref().map(strip_non_xml).unwrap_or_default(),
            show_crate: parse_flag(q.show_crate.as_deref()),
            show_github: parse_flag(q.show_github.as_deref()),
            client_id: client_id.into(),
        }
    }
}

impl Default for ImageRequest {
    fn default() -> Self {
        Self::from_query(&OgQuery::default(), UNKNOWN_CLIENT)
    }
}

/// XML 1.0 `Char` 产生式允许的字符
pub(crate) fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r'
            | '\u{20}'..='\u{D7FF}'
            | '\u{E000}'..='\u{FFFD}'
            | '\u{10000}'..='\u{10FFFF}'
    )
}

fn strip_non_xml(s: &str) -> String {
    s.chars().filter(|c| is_xml_char(*c)).collect()
}

/// 只有字面量 "false" 关闭开关，其余取值（含缺省）均视为 true
fn parse_flag(raw: Option<&str>) -> bool {
    raw.map(|v| !v.trim().eq_ignore_ascii_case("false"))
        .unwrap_or(true)
}

/// 两项动态元数据；任一获取失败时两项都为占位符
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSnapshot {
    pub crate_version: String,
    pub github_tag: String,
}

impl MetadataSnapshot {
    pub const PLACEHOLDER: &'static str = "?";

    pub fn placeholder() -> Self {
        Self {
            crate_version: Self::PLACEHOLDER.to_string(),
            github_tag: Self::PLACEHOLDER.to_string(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.crate_version == Self::PLACEHOLDER && self.github_tag == Self::PLACEHOLDER
    }
}

/// 字体来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontSource {
    Remote,
    Embedded,
}

/// 版式/栅格化所需的字体字节
#[derive(Debug, Clone)]
pub struct FontAsset {
    pub data: Bytes,
    /// SVG 中引用的字体族名
    pub family: String,
    pub source: FontSource,
}

/// 栅格化结果
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub mime: &'static str,
}

/// 提交到错误接收端的事件
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub message: String,
    pub context: serde_json::Map<String, serde_json::Value>,
    /// RFC 3339
    pub timestamp: String,
}
