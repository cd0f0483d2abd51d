use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value, json};
use tokio::sync::Notify;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::identity_hash;
use crate::request_id;

use super::types::ErrorEvent;

/// 失败发生的阶段（上报上下文中的 `phase` 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    EngineInit,
    /// 远程字体
    Remote,
    /// 内嵌兜底字体
    Embedded,
    DataFetch,
    Render,
    Rasterize,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::EngineInit => "engine-init",
            Phase::Remote => "remote",
            Phase::Embedded => "embedded",
            Phase::DataFetch => "data-fetch",
            Phase::Render => "render",
            Phase::Rasterize => "rasterize",
        }
    }
}

/// 错误上报器：即发即弃，提交失败一律吞掉，不影响已经在组装的响应。
///
/// 至多一次投递：不重试、不排队。`Clone` 共享同一份计数。
#[derive(Clone)]
pub struct ErrorReporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    sink: Option<(Client, String)>,
    client_hash_salt: Option<String>,
    instance: String,
    submitted: AtomicU64,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl ErrorReporter {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AppError> {
        let sink = match cfg.reporting.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => {
                let client =
                    crate::http::reporting_client(&cfg.reporting, &cfg.upstream.user_agent)?;
                Some((client, endpoint.to_string()))
            }
            None => None,
        };
        Ok(Self::with_sink(sink, cfg.reporting.client_hash_salt.clone()))
    }

    /// 不提交到外部端点，只写日志（仍然计数）
    pub fn log_only() -> Self {
        Self::with_sink(None, None)
    }

    fn with_sink(sink: Option<(Client, String)>, client_hash_salt: Option<String>) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                sink,
                client_hash_salt,
                instance: gethostname::gethostname().to_string_lossy().to_string(),
                submitted: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// 上报一次失败。立即返回；实际提交在独立任务中进行。
    pub fn report(&self, phase: Phase, error: &AppError, client_id: &str) {
        self.inner.submitted.fetch_add(1, Ordering::SeqCst);
        let event = self.build_event(phase, error, client_id);
        tracing::warn!(phase = phase.as_str(), fatal = error.is_fatal(), "{}", event.message);

        let Some((client, endpoint)) = self.inner.sink.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("无可用运行时，丢弃错误上报");
            return;
        };

        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        runtime.spawn(async move {
            match client.post(&endpoint).json(&event).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    let err = AppError::ReportingFailure(format!("status {}", resp.status()));
                    tracing::debug!("{err}");
                }
                Ok(_) => {}
                Err(e) => {
                    let err = AppError::ReportingFailure(e.to_string());
                    tracing::debug!("{err}");
                }
            }
            if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.idle.notify_waiters();
            }
        });
    }

    fn build_event(&self, phase: Phase, error: &AppError, client_id: &str) -> ErrorEvent {
        let mut context = Map::new();
        context.insert("phase".into(), json!(phase.as_str()));
        context.insert("fatal".into(), json!(error.is_fatal()));
        context.insert("instance".into(), json!(self.inner.instance));
        if let Some(id) = request_id::current_request_id() {
            context.insert("requestId".into(), Value::String(id));
        }
        if let Some(hash) =
            identity_hash::client_hash(self.inner.client_hash_salt.as_deref(), client_id)
        {
            context.insert("clientHash".into(), Value::String(hash));
        }
        ErrorEvent {
            message: error.to_string(),
            context,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// 已调用 `report` 的次数
    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::SeqCst)
    }

    /// 仍在提交中的上报数量
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// 等待在途上报完成（优雅退出时使用）；超时返回 false。
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }
}
