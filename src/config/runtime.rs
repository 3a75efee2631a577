use super::{ConfigError, ConfigResult};
use crate::impl_default;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 脚本运行时线程配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 运行时线程名
    pub thread_name: String,

    /// 空闲时单次阻塞等待的上限（毫秒）
    pub idle_wait_ms: u64,

    /// 每个 tick 最多执行的 QuickJS 待决作业数
    pub max_jobs_per_tick: usize,

    /// 每个 tick 最多执行的跨线程任务数
    pub max_tasks_per_tick: usize,

    /// QuickJS 内存上限（字节，0 表示不限）
    pub memory_limit_bytes: usize,

    /// QuickJS 栈上限（字节，0 表示使用默认值）
    pub max_stack_size_bytes: usize,

    /// 启动时执行的脚本
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<PathBuf>,

    /// 等待运行时就绪的超时（毫秒）
    pub start_timeout_ms: u64,

    /// 停机时留给正在运行的脚本的时间（毫秒），超过后中断执行
    pub shutdown_grace_ms: u64,
}

impl_default!(RuntimeConfig {
    thread_name: "exo-runtime".to_string(),
    idle_wait_ms: 50,
    max_jobs_per_tick: 64,
    max_tasks_per_tick: 256,
    memory_limit_bytes: 0,
    max_stack_size_bytes: 0,
    bootstrap: None,
    start_timeout_ms: 5000,
    shutdown_grace_ms: 1000,
});

impl RuntimeConfig {
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.idle_wait_ms == 0 || self.idle_wait_ms > 1000 {
            return Err(ConfigError::ValidationError(
                "runtime.idle_wait_ms must be within 1..=1000".to_string(),
            ));
        }
        if self.max_jobs_per_tick == 0 || self.max_tasks_per_tick == 0 {
            return Err(ConfigError::ValidationError(
                "runtime tick budgets must be non-zero".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "runtime.thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
