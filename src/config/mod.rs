/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和配置验证
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod dispatch;
pub mod runtime;

pub use dispatch::DispatchConfig;
pub use runtime::RuntimeConfig;

use crate::impl_default;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 外壳主配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// 脚本运行时配置
    pub runtime: RuntimeConfig,

    /// 调用分发配置
    pub dispatch: DispatchConfig,

    /// 日志配置
    pub logging: LoggingConfig,
}

impl ShellConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 按扩展名加载配置文件（`.json` 之外一律按 TOML 解析）
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_toml_file(path),
        }
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// 从任意键值来源覆盖配置，无法解析的值被忽略
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(wait) = lookup("EXO_RUNTIME_IDLE_WAIT_MS").and_then(|v| v.parse().ok()) {
            self.runtime.idle_wait_ms = wait;
        }
        if let Some(budget) = lookup("EXO_RUNTIME_MAX_TASKS_PER_TICK").and_then(|v| v.parse().ok())
        {
            self.runtime.max_tasks_per_tick = budget;
        }
        if let Some(path) = lookup("EXO_RUNTIME_BOOTSTRAP") {
            if !path.is_empty() {
                self.runtime.bootstrap = Some(PathBuf::from(path));
            }
        }
        if let Some(strict) = lookup("EXO_DISPATCH_STRICT_METHODS").and_then(|v| v.parse().ok()) {
            self.dispatch.strict_methods = strict;
        }
        if let Some(timeout) = lookup("EXO_DISPATCH_CALL_TIMEOUT_MS").and_then(|v| v.parse().ok())
        {
            self.dispatch.call_timeout_ms = timeout;
        }
        if let Some(level) = lookup("EXO_LOG_LEVEL").and_then(|v| LogLevel::parse(&v)) {
            self.logging.level = level;
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.runtime.validate()?;
        self.dispatch.validate()?;
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./exo_shell.toml
    /// 2. ./exo_shell.json
    /// 3. <用户配置目录>/exo_shell/config.toml
    /// 4. 使用默认配置
    pub fn load_or_default() -> Self {
        if let Ok(config) = Self::from_toml_file("exo_shell.toml") {
            tracing::debug!(target: "exo::config", "Loaded config from exo_shell.toml");
            return config;
        }

        if let Ok(config) = Self::from_json_file("exo_shell.json") {
            tracing::debug!(target: "exo::config", "Loaded config from exo_shell.json");
            return config;
        }

        if let Some(dir) = dirs::config_dir() {
            let config_path = dir.join("exo_shell").join("config.toml");
            if let Ok(config) = Self::from_toml_file(&config_path) {
                tracing::debug!(target: "exo::config", "Loaded config from {:?}", config_path);
                return config;
            }
        }

        tracing::debug!(target: "exo::config", "Using default configuration");
        Self::default()
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到文件
    pub log_to_file: bool,

    /// 日志文件路径
    pub log_file_path: String,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_file: false,
    log_file_path: "exo_shell.log".to_string(),
    log_to_console: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// 不区分大小写地解析级别名
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}
