//! 跨线程任务队列
//!
//! 每个方向一条队列：宿主线程向运行时线程投递一条，运行时线程向宿主线程投递一条。
//! 投递不阻塞、同一投递方按 FIFO 执行，两个方向之间没有顺序保证。

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use super::wake::Waker;

/// 队列中的一个任务
///
/// `origin` 记录投递点的源码位置，任务失败时用于错误汇报。
pub struct Task<J> {
    origin: &'static Location<'static>,
    job: J,
}

impl<J> Task<J> {
    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    pub fn into_job(self) -> J {
        self.job
    }
}

impl<J> fmt::Debug for Task<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("origin", &self.origin).finish()
    }
}

/// 投递端，可以克隆并在任意线程使用
pub struct TaskSender<J> {
    name: &'static str,
    tx: Sender<Task<J>>,
    waker: Option<Arc<dyn Waker>>,
}

impl<J> Clone for TaskSender<J> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            waker: self.waker.clone(),
        }
    }
}

impl<J> TaskSender<J> {
    /// 投递任务并唤醒消费线程
    ///
    /// # 返回
    ///
    /// 消费端已经关闭时原样返回任务，由调用方决定如何处置。
    ///
    /// # 示例
    ///
    /// ```rust
    /// use exo_shell::scripting::task_queue::TaskQueue;
    ///
    /// let (sender, queue) = TaskQueue::<u32>::channel("demo", None);
    /// sender.post(7).unwrap();
    /// assert_eq!(queue.try_next().map(|task| task.into_job()), Some(7));
    /// ```
    #[track_caller]
    pub fn post(&self, job: J) -> Result<(), J> {
        let task = Task {
            origin: Location::caller(),
            job,
        };
        match self.tx.send(task) {
            Ok(()) => {
                if let Some(waker) = &self.waker {
                    waker.wake();
                }
                Ok(())
            }
            Err(err) => Err(err.into_inner().job),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// 消费端，归消费线程独占
pub struct TaskQueue<J> {
    name: &'static str,
    rx: Receiver<Task<J>>,
}

impl<J> TaskQueue<J> {
    /// 创建一对投递端和消费端
    ///
    /// # 参数
    ///
    /// * `name` - 队列名，用于日志
    /// * `waker` - 每次投递后调用的唤醒器，`None` 表示消费方自行阻塞等待
    pub fn channel(name: &'static str, waker: Option<Arc<dyn Waker>>) -> (TaskSender<J>, Self) {
        let (tx, rx) = unbounded();
        (TaskSender { name, tx, waker }, Self { name, rx })
    }

    /// 不阻塞地取出下一个任务
    pub fn try_next(&self) -> Option<Task<J>> {
        self.rx.try_recv().ok()
    }

    /// 最多等待 `timeout` 取出下一个任务
    pub fn next_timeout(&self, timeout: Duration) -> Option<Task<J>> {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => Some(task),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// 取出当前积压中的至多 `budget` 个任务
    ///
    /// 执行过程中新投递的任务留到下一轮，避免自我投递的任务饿死其他工作。
    pub fn drain(&self, budget: usize) -> impl Iterator<Item = Task<J>> + '_ {
        let backlog = self.rx.len().min(budget);
        self.rx.try_iter().take(backlog)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
