//! 统一错误处理模块
//!
//! 提供宿主线程与脚本线程之间的统一错误类型定义
//!
//! ## 错误类型分层
//!
//! - **调用错误** (`CallError`): 通过回复消息的 `error` 字符串返回给脚本，
//!   永远不会以跨线程异常的形式出现
//! - **平台错误** (`PlatformError`): 窗口系统操作失败
//! - **外壳错误** (`ShellError`): 启动、配置和事件循环等基础设施层错误
//!
//! `ShellError` 可以同时承载上述所有错误。

use thiserror::Error;

use crate::bindings::protocol::BindingId;
use crate::config::ConfigError;

/// 外壳核心错误类型
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("InitError: {0}")]
    Init(String),

    #[error("Call error: {0}")]
    Call(#[from] CallError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Task queue closed: {0}")]
    QueueClosed(&'static str),

    #[error("Event loop error: {0}")]
    EventLoop(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 调用错误
///
/// `Display` 输出即为回复消息中的错误字符串：无详情时为错误种类名，
/// 有详情时为 `种类: 详情`。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("InitError: {0}")]
    Init(String),

    #[error("UnknownBinding")]
    UnknownBinding(BindingId),

    #[error("BindingGone")]
    BindingGone(BindingId),

    #[error("RuntimeShuttingDown")]
    RuntimeShuttingDown,

    #[error("HostOperationError: {0}")]
    HostOperation(String),

    /// 仅在 `dispatch.strict_methods` 打开时使用
    #[error("UnknownMethod: {0}")]
    UnknownMethod(String),

    /// 仅在配置了 `dispatch.call_timeout_ms` 时使用
    #[error("CallTimeout")]
    Timeout,
}

impl CallError {
    /// 错误种类名（不含详情）
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::Init(_) => "InitError",
            CallError::UnknownBinding(_) => "UnknownBinding",
            CallError::BindingGone(_) => "BindingGone",
            CallError::RuntimeShuttingDown => "RuntimeShuttingDown",
            CallError::HostOperation(_) => "HostOperationError",
            CallError::UnknownMethod(_) => "UnknownMethod",
            CallError::Timeout => "CallTimeout",
        }
    }
}

impl From<PlatformError> for CallError {
    fn from(err: PlatformError) -> Self {
        CallError::HostOperation(err.to_string())
    }
}

/// 平台层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(String),

    #[error("Window is closed")]
    WindowClosed,

    #[error("Event loop error: {0}")]
    EventLoop(String),

    #[error("Icon error: {0}")]
    Icon(String),

    #[error("Platform not supported: {0}")]
    NotSupported(String),

    #[error("Platform operation failed: {0}")]
    Operation(String),
}

/// 结果类型别名
pub type ShellResult<T> = Result<T, ShellError>;
pub type CallResult<T> = Result<T, CallError>;
pub type PlatformResult<T> = Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let platform_err = PlatformError::WindowClosed;
        let shell_err: ShellError = platform_err.into();
        assert!(matches!(shell_err, ShellError::Platform(_)));
    }

    #[test]
    fn test_reply_strings() {
        assert_eq!(
            CallError::RuntimeShuttingDown.to_string(),
            "RuntimeShuttingDown"
        );
        assert_eq!(
            CallError::UnknownBinding(BindingId(7)).to_string(),
            "UnknownBinding"
        );
        assert_eq!(CallError::BindingGone(BindingId(7)).to_string(), "BindingGone");
        assert_eq!(
            CallError::from(PlatformError::WindowClosed).to_string(),
            "HostOperationError: Window is closed"
        );
        assert_eq!(
            CallError::Init("unknown binding type: dialog".to_string()).to_string(),
            "InitError: unknown binding type: dialog"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(CallError::Timeout.kind(), "CallTimeout");
        assert_eq!(
            CallError::HostOperation("boom".to_string()).kind(),
            "HostOperationError"
        );
    }
}
