//! 日志初始化
//!
//! 基于 tracing-subscriber 的 fmt 层。`RUST_LOG` 优先，其次使用配置中的级别。

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::{LogLevel, LoggingConfig};
use crate::core::error::ShellResult;

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()))
}

/// 初始化日志系统
///
/// 重复调用是安全的：已安装的全局订阅者会被保留。
pub fn init_logging(config: &LoggingConfig) -> ShellResult<()> {
    if config.log_to_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file_path)?;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter(config))
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init();
    } else if config.log_to_console {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter(config))
            .try_init();
    }

    tracing::info!(target: "exo::shell", level = config.level.as_filter(), "logging initialized");
    Ok(())
}
