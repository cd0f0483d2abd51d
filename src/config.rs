use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 全局配置单例（仅供 main 使用；服务上下文显式接收 `&AppConfig`）
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 未设置 RUST_LOG 时使用的过滤指令
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "apex_og_image=info,tower_http=info".to_string(),
        }
    }
}

/// 固定窗口限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 窗口长度（秒）
    #[serde(default = "RateLimitConfig::default_window_secs")]
    pub window_secs: u64,
    /// 单窗口内允许的请求数
    #[serde(default = "RateLimitConfig::default_max_requests")]
    pub max_requests: u32,
    /// 依次尝试的客户端地址请求头（`x-forwarded-for` 取第一个逗号分隔项）
    #[serde(default = "RateLimitConfig::default_client_ip_headers")]
    pub client_ip_headers: Vec<String>,
}

impl RateLimitConfig {
    fn default_window_secs() -> u64 {
        60
    }
    fn default_max_requests() -> u32 {
        30
    }
    fn default_client_ip_headers() -> Vec<String> {
        vec![
            "cf-connecting-ip".to_string(),
            "x-forwarded-for".to_string(),
            "x-real-ip".to_string(),
        ]
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: Self::default_window_secs(),
            max_requests: Self::default_max_requests(),
            client_ip_headers: Self::default_client_ip_headers(),
        }
    }
}

/// 元数据上游配置（crates.io / GitHub）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// crates.io 单个 crate 的 API 地址
    #[serde(default = "UpstreamConfig::default_crate_api_url")]
    pub crate_api_url: String,
    /// GitHub 最新 release 的 API 地址
    #[serde(default = "UpstreamConfig::default_release_api_url")]
    pub release_api_url: String,
    /// 出站请求的 User-Agent（GitHub/crates.io 均要求提供）
    #[serde(default = "UpstreamConfig::default_user_agent")]
    pub user_agent: String,
    /// 出站请求超时（秒）
    #[serde(default = "UpstreamConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    fn default_crate_api_url() -> String {
        "https://crates.io/api/v1/crates/apex-sdk".to_string()
    }
    fn default_release_api_url() -> String {
        "https://api.github.com/repos/apex-sdk/apex-sdk/releases/latest".to_string()
    }
    fn default_user_agent() -> String {
        format!("apex-og-image/{}", env!("CARGO_PKG_VERSION"))
    }
    fn default_timeout_secs() -> u64 {
        10
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            crate_api_url: Self::default_crate_api_url(),
            release_api_url: Self::default_release_api_url(),
            user_agent: Self::default_user_agent(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

/// 字体资源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontConfig {
    /// 远程字体地址（TTF/OTF）
    #[serde(default = "FontConfig::default_url")]
    pub url: String,
    /// 版式中引用的字体族名，需与远程字体一致
    #[serde(default = "FontConfig::default_family")]
    pub family: String,
    /// 内嵌兜底字体（base64）。缺省时使用随服务打包的常量
    #[serde(default)]
    pub embedded_base64: Option<String>,
}

impl FontConfig {
    fn default_url() -> String {
        "https://cdn.jsdelivr.net/fontsource/fonts/inter@latest/latin-700-normal.ttf".to_string()
    }
    fn default_family() -> String {
        "Inter".to_string()
    }
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            family: Self::default_family(),
            embedded_base64: None,
        }
    }
}

/// 错误上报配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// 错误接收端点（为空则只写日志）
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 上报请求超时（秒）
    #[serde(default = "ReportingConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// 客户端标识哈希盐（为空则上报内容不包含客户端信息）
    #[serde(default, alias = "client-hash-salt", alias = "clientHashSalt")]
    pub client_hash_salt: Option<String>,
}

impl ReportingConfig {
    fn default_timeout_secs() -> u64 {
        5
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: Self::default_timeout_secs(),
            client_hash_salt: None,
        }
    }
}

/// 图片渲染配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRenderConfig {
    /// 是否优先速度渲染（OptimizeSpeed），提升栅格化性能，可能略降画质
    #[serde(default)]
    pub optimize_speed: bool,
    /// 并发渲染许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
    /// 引擎初始化时是否加载系统字体（作为远程字体缺字时的回退）
    #[serde(default = "ImageRenderConfig::default_load_system_fonts")]
    pub load_system_fonts: bool,
}

impl ImageRenderConfig {
    fn default_load_system_fonts() -> bool {
        true
    }

    /// 实际生效的并发渲染许可数
    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallel == 0 {
            num_cpus::get()
        } else {
            self.max_parallel as usize
        }
    }
}

impl Default for ImageRenderConfig {
    fn default() -> Self {
        Self {
            optimize_speed: false,
            max_parallel: 0,
            load_system_fonts: Self::default_load_system_fonts(),
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒），同时约束未完成的错误上报
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        10
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 限流配置
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// 元数据上游
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// 字体资源
    #[serde(default)]
    pub font: FontConfig,
    /// 错误上报
    #[serde(default)]
    pub reporting: ReportingConfig,
    /// 图片渲染
    #[serde(default)]
    pub image: ImageRenderConfig,
    /// 优雅退出
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let builder = ConfigBuilder::builder()
            // 配置文件可缺省，全部字段都有默认值
            .add_source(File::from(config_path).required(false))
            // 环境变量覆盖，例如：APP_SERVER__PORT、APP_RATE_LIMIT__MAX_REQUESTS
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = builder.try_deserialize()?;

        tracing::debug!(
            "配置加载完成: reporting.endpoint = {:?}, rate_limit = {}/{}s",
            config.reporting.endpoint,
            config.rate_limit.max_requests,
            config.rate_limit.window_secs
        );

        Ok(config)
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<&'static AppConfig, ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(Self::global())
    }

    /// 获取配置文件路径（可用 APP_CONFIG_PATH 覆盖）
    fn get_config_path() -> PathBuf {
        std::env::var("APP_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn defaults_match_documented_limits() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.rate_limit.window_secs, 60);
        assert_eq!(cfg.rate_limit.max_requests, 30);
        assert_eq!(cfg.rate_limit.client_ip_headers[0], "cf-connecting-ip");
        assert!(cfg.reporting.endpoint.is_none());
        assert!(cfg.upstream.timeout_secs > 0);
    }

    #[test]
    fn partial_toml_keeps_section_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[rate_limit]\nmax_requests = 5\n[font]\nfamily = \"Roboto\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .expect("build config")
            .try_deserialize()
            .expect("deserialize config");
        assert_eq!(cfg.rate_limit.max_requests, 5);
        assert_eq!(cfg.rate_limit.window_secs, 60);
        assert_eq!(cfg.font.family, "Roboto");
        assert!(!cfg.font.url.is_empty());
        assert_eq!(cfg.server.port, 8787);
    }
}
