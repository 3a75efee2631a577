//! 脚本运行时线程
//!
//! 运行时线程独占 QuickJS，循环执行：
//!
//! 1. 到期的定时器
//! 2. QuickJS 待决作业（Promise 回调），每轮有上限
//! 3. 超时的调用（仅在配置了超时时）
//! 4. 其他线程投递的任务，每轮有上限
//!
//! 没有工作时在 [`WakeSignal`] 上阻塞，最长等到下一个定时器或 `idle_wait`。
//!
//! 停止时先执行积压任务，再以 `RuntimeShuttingDown` 失败所有挂起调用，
//! 最后释放脚本环境。仍在运行的脚本在 `shutdown_grace_ms` 之后被中断。

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};

use super::js_api::ScriptEnv;
use super::pending::NativeReply;
use super::task_queue::{Task, TaskQueue, TaskSender};
use super::wake::{WakeSignal, Waker};
use crate::bindings::{ArgMap, BindingId, ConfigMap, ReplyFn, ReplyMessage};
use crate::config::ShellConfig;
use crate::core::{panic_message, ErrorRecord, ErrorSink, ShellError, ShellResult};
use crate::host::{HostHandle, ScriptPort};

/// 在运行时线程上执行的任务
pub type RuntimeJob = Box<dyn FnOnce(&mut ScriptEnv) + Send>;

/// 停止请求，同时驱动 QuickJS 的中断回调
pub(crate) struct StopSignal {
    requested: AtomicBool,
    grace: Duration,
    deadline: Mutex<Option<Instant>>,
}

impl StopSignal {
    fn new(grace: Duration) -> Self {
        Self {
            requested: AtomicBool::new(false),
            grace,
            deadline: Mutex::new(None),
        }
    }

    fn request(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut deadline) = self.deadline.lock() {
            *deadline = Some(Instant::now() + self.grace);
        }
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// 停止请求发出且宽限期已过
    pub(crate) fn should_interrupt(&self) -> bool {
        if !self.requested.load(Ordering::Relaxed) {
            return false;
        }
        self.deadline
            .lock()
            .map(|deadline| deadline.map_or(true, |at| Instant::now() >= at))
            .unwrap_or(true)
    }
}

/// 运行时任务投递句柄，可在任意线程使用
#[derive(Clone)]
pub struct RuntimeHandle {
    tasks: TaskSender<RuntimeJob>,
}

impl RuntimeHandle {
    /// 投递一个在运行时线程上执行的闭包
    #[track_caller]
    pub fn post<F>(&self, job: F) -> ShellResult<()>
    where
        F: FnOnce(&mut ScriptEnv) + Send + 'static,
    {
        self.tasks
            .post(Box::new(job))
            .map_err(|_| ShellError::QueueClosed("runtime"))
    }

    /// 在运行时线程上执行一段脚本，异常汇报到错误汇报器
    #[track_caller]
    pub fn eval(&self, source: impl Into<String>) -> ShellResult<()> {
        let source = source.into();
        self.post(move |env| {
            if let Err(err) = env.eval(&source) {
                tracing::warn!(target: "exo::runtime", error = %err, "eval failed");
            }
        })
    }

    /// 从 Rust 调用一个绑定方法
    ///
    /// 回调恰好执行一次。运行时已经停止时返回错误，回调以
    /// `RuntimeShuttingDown` 执行。
    #[track_caller]
    pub fn call<F>(
        &self,
        binding_id: BindingId,
        method: impl Into<String>,
        args: ArgMap,
        callback: F,
    ) -> ShellResult<()>
    where
        F: FnOnce(ReplyMessage) + Send + 'static,
    {
        let method = method.into();
        let reply = NativeReply::new(callback);
        self.post(move |env| {
            env.call(binding_id, method, args, reply);
        })
    }

    /// 从 Rust 创建绑定，成功时回复结果为新绑定的 id
    #[track_caller]
    pub fn create<F>(&self, type_tag: impl Into<String>, config: ConfigMap, callback: F) -> ShellResult<()>
    where
        F: FnOnce(ReplyMessage) + Send + 'static,
    {
        let type_tag = type_tag.into();
        let reply = NativeReply::new(callback);
        self.post(move |env| {
            env.create(type_tag, config, reply);
        })
    }

    #[track_caller]
    pub fn dispose(&self, binding_id: BindingId) -> ShellResult<()> {
        self.post(move |env| env.dispose(binding_id))
    }

    /// 宿主侧使用的回复出口
    pub(crate) fn reply_fn(&self) -> ReplyFn {
        let port = self.clone();
        Box::new(move |reply| port.deliver(reply))
    }
}

impl ScriptPort for RuntimeHandle {
    fn deliver(&self, reply: ReplyMessage) {
        let call_id = reply.call_id;
        if self.post(move |env| env.deliver_reply(reply)).is_err() {
            tracing::debug!(target: "exo::runtime", call = %call_id, "runtime stopped, reply dropped");
        }
    }

    fn binding_released(&self, id: BindingId) {
        if self.post(move |env| env.binding_released(id)).is_err() {
            tracing::debug!(target: "exo::runtime", binding = %id, "runtime stopped, release notice dropped");
        }
    }
}

/// 线程内部持有的部分
struct RuntimeWorker {
    config: ShellConfig,
    host: HostHandle,
    port: RuntimeHandle,
    sink: Arc<dyn ErrorSink>,
    stop: Arc<StopSignal>,
    wake: WakeSignal,
    queue: TaskQueue<RuntimeJob>,
}

impl RuntimeWorker {
    fn run(self, ready: Sender<ShellResult<()>>) {
        let mut env = match ScriptEnv::new(
            &self.config,
            self.host.clone(),
            self.port.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.stop),
        ) {
            Ok(env) => env,
            Err(err) => {
                let _ = ready.send(Err(err));
                return;
            }
        };

        if let Err(err) = self.bootstrap(&mut env) {
            tracing::error!(target: "exo::runtime", error = %err, "bootstrap failed");
            self.shutdown(env);
            let _ = ready.send(Err(err));
            return;
        }

        tracing::info!(target: "exo::runtime", thread = %self.config.runtime.thread_name, "script runtime ready");
        let _ = ready.send(Ok(()));

        self.event_loop(&mut env);
        self.shutdown(env);
        tracing::info!(target: "exo::runtime", "script runtime stopped");
    }

    fn bootstrap(&self, env: &mut ScriptEnv) -> ShellResult<()> {
        let Some(path) = &self.config.runtime.bootstrap else {
            return Ok(());
        };
        let source = fs::read_to_string(path).map_err(|e| {
            ShellError::Init(format!("cannot read bootstrap script {}: {e}", path.display()))
        })?;
        env.eval(&source).map_err(|e| {
            ShellError::Init(format!("bootstrap script {} failed: {e}", path.display()))
        })
    }

    fn event_loop(&self, env: &mut ScriptEnv) {
        let runtime = &self.config.runtime;
        let idle_wait = runtime.idle_wait();

        while !self.stop.is_requested() {
            env.fire_due_timers();
            env.run_jobs(runtime.max_jobs_per_tick);
            env.expire_calls();
            self.run_tasks(env, runtime.max_tasks_per_tick);

            if env.has_pending_jobs() || !self.queue.is_empty() {
                continue;
            }
            let wait = env
                .next_timer_in()
                .map_or(idle_wait, |due| due.min(idle_wait));
            if !wait.is_zero() {
                self.wake.wait_timeout(wait);
            }
        }
    }

    fn run_tasks(&self, env: &mut ScriptEnv, budget: usize) -> usize {
        let mut ran = 0;
        for task in self.queue.drain(budget) {
            self.run_task(env, task);
            ran += 1;
        }
        ran
    }

    fn run_task(&self, env: &mut ScriptEnv, task: Task<RuntimeJob>) {
        let origin = task.origin();
        let job = task.into_job();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job(env))) {
            self.sink.report(ErrorRecord::new(
                "Panic",
                origin.to_string(),
                panic_message(payload.as_ref()),
            ));
        }
    }

    fn shutdown(&self, mut env: ScriptEnv) {
        env.begin_shutdown();

        // 积压任务照常执行，已到达的回复仍然送达
        let backlog = self.queue.len();
        self.run_tasks(&mut env, backlog);
        env.run_jobs(self.config.runtime.max_jobs_per_tick);

        let failed = env.fail_pending(self.config.runtime.max_jobs_per_tick);
        if failed > 0 {
            tracing::debug!(target: "exo::runtime", failed, "pending calls failed at shutdown");
        }
        drop(env);
        // 队列随 self 释放，未执行任务中的原生回调以 RuntimeShuttingDown 触发
    }
}

/// 运行时线程
///
/// 释放时自动停止并等待线程结束。
pub struct RuntimeThread {
    handle: RuntimeHandle,
    stop: Arc<StopSignal>,
    wake: WakeSignal,
    thread: Option<JoinHandle<()>>,
}

impl RuntimeThread {
    /// 启动运行时线程，等待它完成初始化和启动脚本
    ///
    /// # 参数
    ///
    /// * `config` - 外壳配置
    /// * `host` - 宿主任务投递句柄
    /// * `sink` - 未捕获故障的汇报目标
    pub fn start(config: &ShellConfig, host: HostHandle, sink: Arc<dyn ErrorSink>) -> ShellResult<Self> {
        let wake = WakeSignal::new();
        let waker: Arc<dyn Waker> = Arc::new(wake.clone());
        let (tasks, queue) = TaskQueue::channel("runtime", Some(waker));
        let handle = RuntimeHandle { tasks };
        let stop = Arc::new(StopSignal::new(config.runtime.shutdown_grace()));
        let (ready_tx, ready_rx) = bounded(1);

        let worker = RuntimeWorker {
            config: config.clone(),
            host,
            port: handle.clone(),
            sink,
            stop: Arc::clone(&stop),
            wake: wake.clone(),
            queue,
        };
        let thread = thread::Builder::new()
            .name(config.runtime.thread_name.clone())
            .spawn(move || worker.run(ready_tx))?;

        match ready_rx.recv_timeout(config.runtime.start_timeout()) {
            Ok(Ok(())) => Ok(Self {
                handle,
                stop,
                wake,
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                // 线程不再等待，让它在宽限期后自行结束
                stop.request();
                wake.set();
                Err(ShellError::Init(format!(
                    "script runtime not ready within {} ms",
                    config.runtime.start_timeout_ms
                )))
            }
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// 停止运行时线程并等待结束，可重复调用
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.request();
        self.wake.set();

        if thread.thread().id() == thread::current().id() {
            tracing::warn!(target: "exo::runtime", "stop called from the runtime thread, not joining");
            return;
        }
        if thread.join().is_err() {
            tracing::error!(target: "exo::runtime", "script runtime thread panicked");
        }
    }
}

impl Drop for RuntimeThread {
    fn drop(&mut self) {
        self.stop();
    }
}
