//! 时间工具
//!
//! - 存储层：所有时间字段为 UTC 毫秒时间戳（INTEGER）
//! - 业务层：通过注入的 [`Clock`] 取当前时间，便于测试推进时间

use chrono::{NaiveDateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// 时钟抽象（毫秒时间戳）
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// 手动时钟，测试中用来模拟时间流逝
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(start_millis),
        })
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, duration: std::time::Duration) {
        self.now.fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// 解析后端 `created_at`（`yyyy-MM-ddTHH:mm:ss`，可带小数秒，按 UTC 处理）
///
/// 返回毫秒时间戳；格式不符返回 None，由调用方回退到拉取时间。
pub fn parse_backend_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    // 只取秒级部分，忽略小数秒与时区后缀
    let head = raw.get(..19)?;
    NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}
