/// 健康检查
pub mod health;

/// Open Graph 预览图生成
pub mod og;
