//! 脚本运行时模块
//!
//! - `wake` - 运行时线程的唤醒信号
//! - `task_queue` - 跨线程任务队列
//! - `pending` - 调用关联表
//! - `timers` - `setTimeout` 定时器
//! - `js_api` - QuickJS 环境与 `exo` 全局对象
//! - `runtime_thread` - 运行时线程及其投递句柄

pub mod js_api;
pub mod pending;
pub mod runtime_thread;
pub mod task_queue;
pub mod timers;
pub mod wake;

pub use js_api::{ScriptEnv, ScriptFailure};
pub use pending::{NativeReply, PendingCall, PendingCalls};
pub use runtime_thread::{RuntimeHandle, RuntimeJob, RuntimeThread};
pub use task_queue::{Task, TaskQueue, TaskSender};
pub use timers::{TimerId, Timers};
pub use wake::{WakeSignal, Waker};
