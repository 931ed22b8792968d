//! 日志初始化与采集统计计数。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

/// 统计计数项。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    ReadSuccess,
    ReadError,
    Notification,
    NotificationDropped,
}

impl Counter {
    /// 计数项名称（与下游统计系统约定一致）。
    pub fn as_str(self) -> &'static str {
        match self {
            Counter::ReadSuccess => "read_success",
            Counter::ReadError => "read_error",
            Counter::Notification => "notification",
            Counter::NotificationDropped => "notification_dropped",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 统计 sink 抽象，由调用方注入采集客户端。
pub trait StatsSink: Send + Sync {
    fn incr(&self, counter: Counter);
}

/// 不做任何记录的 sink（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopStats;

impl StatsSink for NoopStats {
    fn incr(&self, _counter: Counter) {}
}

/// 采集指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub read_success: u64,
    pub read_error: u64,
    pub notification: u64,
    pub notification_dropped: u64,
}

/// 采集指标（原子计数）。
#[derive(Debug, Default)]
pub struct AcquisitionMetrics {
    read_success: AtomicU64,
    read_error: AtomicU64,
    notification: AtomicU64,
    notification_dropped: AtomicU64,
}

impl AcquisitionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            read_success: self.read_success.load(Ordering::Relaxed),
            read_error: self.read_error.load(Ordering::Relaxed),
            notification: self.notification.load(Ordering::Relaxed),
            notification_dropped: self.notification_dropped.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::ReadSuccess => &self.read_success,
            Counter::ReadError => &self.read_error,
            Counter::Notification => &self.notification,
            Counter::NotificationDropped => &self.notification_dropped,
        }
    }
}

impl StatsSink for AcquisitionMetrics {
    fn incr(&self, counter: Counter) {
        self.slot(counter).fetch_add(1, Ordering::Relaxed);
    }
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_fmt().with_env_filter(filter).try_init();
}
