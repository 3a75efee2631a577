//! 运行时侧的调用关联表
//!
//! 每个发往宿主的调用在这里登记，回复按 `call_id` 取回登记项并触发回调。
//! 登记项一经取出即从表中移除，所以同一个调用最多被解决一次。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::bindings::protocol::{BindingId, CallId, ReplyMessage};
use crate::core::CallError;

/// 原生回调
pub type NativeCallback = Box<dyn FnOnce(ReplyMessage) + Send>;

/// 由 Rust 代码发起的调用的回复处理器
///
/// 未触发就被丢弃时（例如任务因运行时已停止而无法投递）会以
/// `RuntimeShuttingDown` 触发，保证回调恰好执行一次。
pub struct NativeReply {
    callback: Option<NativeCallback>,
}

impl NativeReply {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(ReplyMessage) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn fire(mut self, reply: ReplyMessage) {
        if let Some(callback) = self.callback.take() {
            callback(reply);
        }
    }
}

impl Drop for NativeReply {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if let Some(callback) = self.callback.take() {
            callback(ReplyMessage::failure(
                CallId(0),
                &CallError::RuntimeShuttingDown,
            ));
        }
    }
}

/// 一个尚未收到回复的调用
#[derive(Debug)]
pub struct PendingCall<H> {
    /// 目标绑定，创建请求没有目标
    pub binding_id: Option<BindingId>,
    pub method: String,
    pub issued_at: Instant,
    pub handler: H,
}

/// 调用关联表
///
/// `H` 是回复处理器的类型，运行时使用脚本函数或原生回调。
#[derive(Debug)]
pub struct PendingCalls<H> {
    next_id: u64,
    calls: HashMap<CallId, PendingCall<H>>,
}

impl<H> Default for PendingCalls<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> PendingCalls<H> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            calls: HashMap::new(),
        }
    }

    /// 登记调用并分配单调递增的 `call_id`
    pub fn register(
        &mut self,
        binding_id: Option<BindingId>,
        method: impl Into<String>,
        handler: H,
    ) -> CallId {
        let call_id = CallId(self.next_id);
        self.next_id += 1;
        self.calls.insert(
            call_id,
            PendingCall {
                binding_id,
                method: method.into(),
                issued_at: Instant::now(),
                handler,
            },
        );
        call_id
    }

    /// 取出 `call_id` 对应的登记项
    pub fn resolve(&mut self, call_id: CallId) -> Option<PendingCall<H>> {
        self.calls.remove(&call_id)
    }

    /// 取出所有已超过 `timeout` 的调用，按 `call_id` 排序
    pub fn take_expired(&mut self, now: Instant, timeout: Duration) -> Vec<(CallId, PendingCall<H>)> {
        let mut expired: Vec<CallId> = self
            .calls
            .iter()
            .filter(|(_, call)| now.saturating_duration_since(call.issued_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();
        expired.sort();
        expired
            .into_iter()
            .filter_map(|id| self.calls.remove(&id).map(|call| (id, call)))
            .collect()
    }

    /// 取出全部登记项，按 `call_id` 排序
    pub fn drain(&mut self) -> Vec<(CallId, PendingCall<H>)> {
        let mut all: Vec<_> = self.calls.drain().collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub fn contains(&self, call_id: CallId) -> bool {
        self.calls.contains_key(&call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
