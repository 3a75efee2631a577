//! 跨线程唤醒信号
//!
//! 运行时线程在空闲时阻塞等待 [`WakeSignal`]，任何线程投递任务后调用 `set()`
//! 即可让等待提前返回。多次 `set()` 会合并为一次唤醒，等待方醒来后必须自行
//! 检查是否真的有工作可做。

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::time::Duration;

/// 可以被唤醒的对象
///
/// 宿主方向的任务队列由 winit 事件循环代理唤醒，运行时方向由 [`WakeSignal`] 唤醒。
pub trait Waker: Send + Sync {
    fn wake(&self);
}

/// 容量为一的令牌通道
///
/// 通道已满说明已有一次唤醒尚未被消费，此时 `set()` 直接返回。
#[derive(Clone)]
pub struct WakeSignal {
    token_tx: Sender<()>,
    token_rx: Receiver<()>,
}

impl WakeSignal {
    pub fn new() -> Self {
        let (token_tx, token_rx) = bounded(1);
        Self { token_tx, token_rx }
    }

    /// 请求唤醒，可在任意线程调用
    pub fn set(&self) {
        match self.token_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            // 接收端与发送端同属一个结构体，不会出现断开
            Err(TrySendError::Disconnected(())) => {}
        }
    }

    /// 阻塞等待唤醒，最多等待 `timeout`
    ///
    /// 返回 `true` 表示被唤醒，`false` 表示超时。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.token_rx.recv_timeout(timeout).is_ok()
    }

    /// 不阻塞地消费一次挂起的唤醒
    pub fn try_consume(&self) -> bool {
        self.token_rx.try_recv().is_ok()
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl Waker for WakeSignal {
    fn wake(&self) {
        self.set();
    }
}
