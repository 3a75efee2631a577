//! 错误汇报模块
//!
//! 跨线程任务和绑定调用中未被捕获的故障（panic、脚本异常）不会中断事件循环，
//! 而是作为 [`ErrorRecord`] 交给一个 [`ErrorSink`]。
//!
//! - [`TracingErrorSink`]: 直接写入 tracing 日志
//! - [`ErrorAggregator`]: 线程安全的统计聚合，便于测试和诊断

use crate::core::error::CallError;
use crate::impl_default;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// 未捕获故障的接收端
///
/// 宿主线程和脚本线程都会调用它，所以必须是 `Send + Sync`。
pub trait ErrorSink: Send + Sync {
    fn report(&self, record: ErrorRecord);
}

/// 错误记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// 错误种类（如 `Panic`、`ScriptException`、`HostOperationError`）
    pub error_type: String,
    /// 错误来源（投递任务的源码位置或模块名）
    pub source: String,
    /// 错误消息
    pub message: String,
    /// 时间戳（秒）
    pub timestamp: u64,
    /// 错误详情（可选）
    pub details: Option<String>,
}

impl ErrorRecord {
    pub fn new(
        error_type: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            source: source.into(),
            message: message.into(),
            timestamp: crate::core::utils::current_timestamp(),
            details: None,
        }
    }

    /// 由调用错误构造记录
    pub fn from_call_error(error: &CallError, source: impl Into<String>) -> Self {
        Self::new(error.kind(), source, error.to_string())
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// 把故障写入日志的接收端
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, record: ErrorRecord) {
        tracing::error!(
            target: "exo::errors",
            kind = %record.error_type,
            source = %record.source,
            details = record.details.as_deref().unwrap_or(""),
            "{}",
            record.message
        );
    }
}

/// 错误统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStats {
    /// 错误总数
    pub total_count: u64,
    /// 按错误类型分组的计数
    pub by_type: HashMap<String, u64>,
    /// 按错误来源分组的计数
    pub by_source: HashMap<String, u64>,
    /// 最近发生的错误（最多保留N条）
    pub recent_errors: VecDeque<ErrorRecord>,
}

impl ErrorStats {
    /// 获取最常见的错误类型
    pub fn most_common_error_type(&self) -> Option<(&String, &u64)> {
        self.by_type.iter().max_by_key(|(_, count)| *count)
    }

    /// 获取某类错误的计数
    pub fn count_of(&self, error_type: &str) -> u64 {
        self.by_type.get(error_type).copied().unwrap_or(0)
    }
}

/// 错误聚合器
///
/// 收集并统计未捕获的故障，同时转发到日志。
/// 线程安全，可以在多个线程中并发使用。
#[derive(Clone)]
pub struct ErrorAggregator {
    stats: Arc<Mutex<ErrorStats>>,
    /// 最大保留的错误记录数
    max_recent_errors: usize,
}

impl_default!(ErrorAggregator {
    stats: Arc::new(Mutex::new(ErrorStats::default())),
    max_recent_errors: 256,
});

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_recent_errors: usize) -> Self {
        Self {
            stats: Arc::new(Mutex::new(ErrorStats::default())),
            max_recent_errors: max_recent_errors.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ErrorStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 获取错误统计快照
    pub fn get_stats(&self) -> ErrorStats {
        self.lock().clone()
    }

    pub fn total(&self) -> u64 {
        self.lock().total_count
    }

    /// 清除所有统计
    pub fn clear(&self) {
        *self.lock() = ErrorStats::default();
    }

    /// 导出错误报告（JSON格式）
    pub fn export_report(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.get_stats())
    }
}

impl ErrorSink for ErrorAggregator {
    fn report(&self, record: ErrorRecord) {
        TracingErrorSink.report(record.clone());

        let mut stats = self.lock();
        stats.total_count += 1;
        *stats.by_type.entry(record.error_type.clone()).or_insert(0) += 1;
        *stats.by_source.entry(record.source.clone()).or_insert(0) += 1;

        stats.recent_errors.push_back(record);
        while stats.recent_errors.len() > self.max_recent_errors {
            stats.recent_errors.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::protocol::BindingId;

    #[test]
    fn test_error_aggregator() {
        let aggregator = ErrorAggregator::new();

        aggregator.report(ErrorRecord::new("Panic", "src/host.rs:10:5", "boom"));
        aggregator.report(ErrorRecord::from_call_error(
            &CallError::BindingGone(BindingId(3)),
            "dispatch",
        ));

        let stats = aggregator.get_stats();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.count_of("Panic"), 1);
        assert_eq!(stats.count_of("BindingGone"), 1);
        assert_eq!(stats.by_source.get("dispatch"), Some(&1));
    }

    #[test]
    fn test_recent_errors_are_bounded() {
        let aggregator = ErrorAggregator::with_capacity(2);
        for i in 0..5 {
            aggregator.report(ErrorRecord::new("ScriptException", "eval", format!("e{}", i)));
        }

        let stats = aggregator.get_stats();
        assert_eq!(stats.total_count, 5);
        assert_eq!(stats.recent_errors.len(), 2);
        assert_eq!(stats.recent_errors[0].message, "e3");
        assert_eq!(stats.most_common_error_type(), Some((&"ScriptException".to_string(), &5)));
    }

    #[test]
    fn test_error_export() {
        let aggregator = ErrorAggregator::new();
        aggregator.report(ErrorRecord::new("Panic", "test_module", "Test message").with_details("d"));

        let report = aggregator.export_report().unwrap();
        assert!(report.contains("Panic"));
        assert!(report.contains("test_module"));
    }
}
