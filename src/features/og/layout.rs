//! 版式构建：把请求与元数据组装成显式的布局树，再序列化为 SVG。
//!
//! 纯函数、无 IO，相同输入总是得到逐字节相同的输出。文字宽度按
//! `unicode-width` 的列宽估算，不依赖字体度量。

use std::fmt::Write;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::error::AppError;

use super::types::{
    CANVAS_HEIGHT, CANVAS_WIDTH, FontAsset, ImageRequest, MetadataSnapshot, is_xml_char,
};

// 版式常量
const MARGIN_X: f32 = 96.0;
const MARGIN_Y: f32 = 72.0;
const COLUMN_GAP: f32 = 28.0;
const BADGE_GAP: f32 = 20.0;
/// 每个列宽单位对应的字号比例（粗体无衬线字体的平均字宽）
const ADVANCE_RATIO: f32 = 0.55;
const LINE_HEIGHT: f32 = 1.2;
const BASELINE_RATIO: f32 = 0.95;

const TITLE_SIZE: f32 = 72.0;
const TITLE_MIN_SIZE: f32 = 40.0;
const SUBTITLE_SIZE: f32 = 34.0;
const BADGE_TEXT_SIZE: f32 = 24.0;
const ELLIPSIS: char = '…';

const BG_FROM: &str = "#0b1120";
const BG_TO: &str = "#1e293b";
const ACCENT: &str = "#f97316";
const TEXT_PRIMARY: &str = "#f8fafc";
const TEXT_MUTED: &str = "#94a3b8";
const BADGE_BG: &str = "#111827";
const BADGE_BORDER: &str = "#334155";

/// 盒子样式
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoxStyle {
    pub padding_x: f32,
    pub padding_y: f32,
    pub gap: f32,
    pub background: Option<&'static str>,
    /// (颜色, 线宽)
    pub border: Option<(&'static str, f32)>,
    pub radius: f32,
}

/// 文字样式
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub size: f32,
    pub weight: u16,
    pub color: &'static str,
}

/// 布局树节点
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutNode {
    /// 纵向排列，子节点左对齐
    Column {
        style: BoxStyle,
        children: Vec<LayoutNode>,
    },
    /// 横向排列，子节点垂直居中
    Row {
        style: BoxStyle,
        children: Vec<LayoutNode>,
    },
    Text {
        /// 语义标识，序列化为 SVG 元素 id
        id: &'static str,
        content: String,
        style: TextStyle,
    },
}

impl LayoutNode {
    /// 测量节点尺寸 (宽, 高)
    fn measure(&self) -> (f32, f32) {
        match self {
            LayoutNode::Text { content, style, .. } => {
                (text_width(content, style.size), style.size * LINE_HEIGHT)
            }
            LayoutNode::Column { style, children } => {
                let w = children.iter().map(|c| c.measure().0).fold(0.0, f32::max);
                let h = children.iter().map(|c| c.measure().1).sum::<f32>()
                    + gaps(style.gap, children.len());
                (w + style.padding_x * 2.0, h + style.padding_y * 2.0)
            }
            LayoutNode::Row { style, children } => {
                let w = children.iter().map(|c| c.measure().0).sum::<f32>()
                    + gaps(style.gap, children.len());
                let h = children.iter().map(|c| c.measure().1).fold(0.0, f32::max);
                (w + style.padding_x * 2.0, h + style.padding_y * 2.0)
            }
        }
    }

    /// 在 (x, y) 处放置节点并追加 SVG 片段
    fn emit(&self, x: f32, y: f32, out: &mut String) -> std::fmt::Result {
        let (w, h) = self.measure();
        match self {
            LayoutNode::Text { id, content, style } => write!(
                out,
                r#"<text id="{id}" x="{x:.1}" y="{:.1}" font-size="{:.1}" font-weight="{}" fill="{}">{}</text>"#,
                y + style.size * BASELINE_RATIO,
                style.size,
                style.weight,
                style.color,
                escape_xml(content)
            ),
            LayoutNode::Column { style, children } => {
                emit_box(style, x, y, w, h, out)?;
                let mut cy = y + style.padding_y;
                for child in children {
                    child.emit(x + style.padding_x, cy, out)?;
                    cy += child.measure().1 + style.gap;
                }
                Ok(())
            }
            LayoutNode::Row { style, children } => {
                emit_box(style, x, y, w, h, out)?;
                let inner_h = h - style.padding_y * 2.0;
                let mut cx = x + style.padding_x;
                for child in children {
                    let (cw, ch) = child.measure();
                    child.emit(cx, y + style.padding_y + (inner_h - ch) / 2.0, out)?;
                    cx += cw + style.gap;
                }
                Ok(())
            }
        }
    }

    fn collect_text<'a>(&'a self, out: &mut Vec<(&'static str, &'a str)>) {
        match self {
            LayoutNode::Text { id, content, .. } => out.push((*id, content.as_str())),
            LayoutNode::Column { children, .. } | LayoutNode::Row { children, .. } => {
                for child in children {
                    child.collect_text(out);
                }
            }
        }
    }
}

fn gaps(gap: f32, count: usize) -> f32 {
    gap * count.saturating_sub(1) as f32
}

fn emit_box(style: &BoxStyle, x: f32, y: f32, w: f32, h: f32, out: &mut String) -> std::fmt::Result {
    if style.background.is_none() && style.border.is_none() {
        return Ok(());
    }
    write!(
        out,
        r#"<rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" rx="{:.1}" fill="{}""#,
        style.radius,
        style.background.unwrap_or("none")
    )?;
    if let Some((color, width)) = style.border {
        write!(out, r#" stroke="{color}" stroke-width="{width:.1}""#)?;
    }
    out.push_str("/>");
    Ok(())
}

/// 版式构建结果：布局树与其 SVG 序列化
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDocument {
    pub width: u32,
    pub height: u32,
    pub root: LayoutNode,
    svg: String,
}

impl VectorDocument {
    pub fn svg(&self) -> &str {
        &self.svg
    }

    pub fn into_svg(self) -> String {
        self.svg
    }

    /// 按文档顺序列出 (id, 文本)
    pub fn text_nodes(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        self.root.collect_text(&mut out);
        out
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.text_nodes().iter().any(|(node_id, _)| *node_id == id)
    }
}

/// 构建 Open Graph 图片的版式（纯函数、确定性）。
pub fn render(
    req: &ImageRequest,
    meta: &MetadataSnapshot,
    font: &FontAsset,
) -> Result<VectorDocument, AppError> {
    if font.family.trim().is_empty() {
        return Err(AppError::RenderFailure("字体族名为空".to_string()));
    }

    let content_width = CANVAS_WIDTH as f32 - MARGIN_X * 2.0;
    let root = build_tree(req, meta, content_width);

    let (w, h) = root.measure();
    let max_h = CANVAS_HEIGHT as f32 - MARGIN_Y * 2.0;
    if w > content_width + 0.5 || h > max_h + 0.5 {
        return Err(AppError::RenderFailure(format!(
            "版式溢出画布: {w:.0}x{h:.0} > {content_width:.0}x{max_h:.0}"
        )));
    }

    let svg = serialize(&root, &font.family, h)
        .map_err(|e| AppError::RenderFailure(format!("SVG formatting error: {e}")))?;
    Ok(VectorDocument {
        width: CANVAS_WIDTH,
        height: CANVAS_HEIGHT,
        root,
        svg,
    })
}

fn build_tree(req: &ImageRequest, meta: &MetadataSnapshot, content_width: f32) -> LayoutNode {
    let mut children = Vec::with_capacity(3);

    let title_size = fit_font_size(&req.title, TITLE_SIZE, TITLE_MIN_SIZE, content_width);
    children.push(LayoutNode::Text {
        id: "title",
        content: truncate_to_width(&req.title, title_size, content_width),
        style: TextStyle {
            size: title_size,
            weight: 800,
            color: TEXT_PRIMARY,
        },
    });

    if !req.subtitle.is_empty() {
        children.push(LayoutNode::Text {
            id: "subtitle",
            content: truncate_to_width(&req.subtitle, SUBTITLE_SIZE, content_width),
            style: TextStyle {
                size: SUBTITLE_SIZE,
                weight: 500,
                color: TEXT_MUTED,
            },
        });
    }

    let mut badges = Vec::with_capacity(2);
    if req.show_crate {
        badges.push(badge("crate-label", "crates.io", "crate-version", &meta.crate_version));
    }
    if req.show_github {
        badges.push(badge("release-label", "release", "release-tag", &meta.github_tag));
    }
    if !badges.is_empty() {
        children.push(LayoutNode::Row {
            style: BoxStyle {
                gap: BADGE_GAP,
                ..BoxStyle::default()
            },
            children: badges,
        });
    }

    LayoutNode::Column {
        style: BoxStyle {
            gap: COLUMN_GAP,
            ..BoxStyle::default()
        },
        children,
    }
}

fn badge(label_id: &'static str, label: &str, value_id: &'static str, value: &str) -> LayoutNode {
    LayoutNode::Row {
        style: BoxStyle {
            padding_x: 22.0,
            padding_y: 12.0,
            gap: 12.0,
            background: Some(BADGE_BG),
            border: Some((BADGE_BORDER, 2.0)),
            radius: 12.0,
        },
        children: vec![
            LayoutNode::Text {
                id: label_id,
                content: label.to_string(),
                style: TextStyle {
                    size: BADGE_TEXT_SIZE,
                    weight: 500,
                    color: TEXT_MUTED,
                },
            },
            LayoutNode::Text {
                id: value_id,
                // 版本号来自上游，限制长度避免撑破徽章行
                content: truncate_to_width(value, BADGE_TEXT_SIZE, 320.0),
                style: TextStyle {
                    size: BADGE_TEXT_SIZE,
                    weight: 700,
                    color: TEXT_PRIMARY,
                },
            },
        ],
    }
}

fn serialize(root: &LayoutNode, family: &str, content_height: f32) -> Result<String, std::fmt::Error> {
    let mut svg = String::with_capacity(2048);
    write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{CANVAS_WIDTH}" height="{CANVAS_HEIGHT}" viewBox="0 0 {CANVAS_WIDTH} {CANVAS_HEIGHT}" font-family="{}, sans-serif">"#,
        escape_xml(family)
    )?;
    write!(
        svg,
        r#"<defs><linearGradient id="bg" x1="0" y1="0" x2="1" y2="1"><stop offset="0" stop-color="{BG_FROM}"/><stop offset="1" stop-color="{BG_TO}"/></linearGradient></defs>"#
    )?;
    write!(
        svg,
        r#"<rect width="{CANVAS_WIDTH}" height="{CANVAS_HEIGHT}" fill="url(#bg)"/><rect width="12" height="{CANVAS_HEIGHT}" fill="{ACCENT}"/>"#
    )?;

    // 内容块整体垂直居中
    let y = ((CANVAS_HEIGHT as f32 - content_height) / 2.0).max(MARGIN_Y);
    root.emit(MARGIN_X, y, &mut svg)?;
    svg.push_str("</svg>");
    Ok(svg)
}

fn text_width(s: &str, size: f32) -> f32 {
    UnicodeWidthStr::width(s) as f32 * size * ADVANCE_RATIO
}

/// 从 `max` 开始按整数字号收缩，直到放得下或触及 `min`
fn fit_font_size(text: &str, max: f32, min: f32, width: f32) -> f32 {
    let columns = UnicodeWidthStr::width(text) as f32;
    if columns == 0.0 {
        return max;
    }
    (width / (columns * ADVANCE_RATIO)).floor().clamp(min, max)
}

/// 超出宽度时按字符截断并追加省略号
fn truncate_to_width(text: &str, size: f32, width: f32) -> String {
    if text_width(text, size) <= width {
        return text.to_string();
    }
    let budget = width - text_width("…", size);
    let mut used = 0.0;
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0) as f32 * size * ADVANCE_RATIO;
        if used + w > budget {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.truncate(out.trim_end().len());
    out.push(ELLIPSIS);
    out
}

/// 转义五个 XML 实体，并丢弃 XML 1.0 不允许出现的字符（如 C0 控制符、U+FFFE）。
fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars().filter(|c| is_xml_char(*c)) {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
