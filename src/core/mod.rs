//! 核心模块
//!
//! 包含外壳的基础设施：
//! - `error` - 错误类型定义
//! - `error_aggregator` - 未捕获故障的汇报与统计
//! - `logging` - 日志初始化
//! - `utils` - 工具函数

pub mod error;
pub mod error_aggregator;
pub mod logging;
pub mod utils;
#[macro_use]
pub mod macros;

// 重新导出错误类型
pub use error::{
    CallError, CallResult, PlatformError, PlatformResult, ShellError, ShellResult,
};

// 重新导出错误汇报
pub use error_aggregator::{ErrorAggregator, ErrorRecord, ErrorSink, ErrorStats, TracingErrorSink};

pub use logging::init_logging;
pub use utils::{current_timestamp, panic_message};
