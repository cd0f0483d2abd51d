use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;

use crate::config::RateLimitConfig;

use super::types::UNKNOWN_CLIENT;

/// 单个客户端的窗口计数
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRecord {
    pub count: u32,
    pub window_start: Instant,
}

/// 准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// 被拒绝；`retry_after_secs` 为当前窗口剩余时间（至少 1 秒）
    Denied { retry_after_secs: u64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// 固定窗口限流器（进程内）。
///
/// 注意：多实例部署时每个实例各自计数，全局有效上限约为 `实例数 × capacity`。
/// 记录在进程生命周期内常驻，不做过期清理，窗口比较即是唯一的重置条件。
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    capacity: u32,
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl RateLimiter {
    pub fn new(window: Duration, capacity: u32) -> Self {
        Self {
            window,
            capacity,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(cfg.window(), cfg.max_requests)
    }

    pub fn admit(&self, client_id: &str) -> Admission {
        self.admit_at(client_id, Instant::now())
    }

    /// 以给定时刻判定准入；`window_start` 只在距上次推进超过窗口长度时才前移。
    pub fn admit_at(&self, client_id: &str, now: Instant) -> Admission {
        // 临界区内没有 panic 路径，中毒时直接沿用内部数据
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let record = records
            .entry(client_id.to_string())
            .or_insert(RateLimitRecord {
                count: 0,
                window_start: now,
            });

        if now.saturating_duration_since(record.window_start) > self.window {
            record.count = 0;
            record.window_start = now;
        }

        record.count = record.count.saturating_add(1);
        if record.count > self.capacity {
            let elapsed = now.saturating_duration_since(record.window_start);
            let remaining = self.window.saturating_sub(elapsed);
            Admission::Denied {
                retry_after_secs: remaining.as_secs().max(1),
            }
        } else {
            Admission::Admitted
        }
    }

    /// 当前持有计数记录的客户端数量
    pub fn tracked_clients(&self) -> usize {
        match self.records.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// 按配置顺序从请求头中取客户端地址；`x-forwarded-for` 取第一个逗号分隔项。
pub fn client_id_from_headers(headers: &HeaderMap, header_names: &[String]) -> String {
    for name in header_names {
        let Some(raw) = headers.get(name.as_str()).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let candidate = raw.split(',').next().map(str::trim).unwrap_or_default();
        if !candidate.is_empty() {
            return candidate.to_string();
        }
    }
    UNKNOWN_CLIENT.to_string()
}
