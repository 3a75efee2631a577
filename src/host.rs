//! 宿主线程上下文
//!
//! [`Host`] 独占绑定注册表、工厂和调用分发器，并消费宿主方向的任务队列。
//! 其他线程只能通过 [`HostHandle::post`] 投递闭包，闭包在宿主线程上拿到
//! `&mut Host` 后才能接触宿主状态。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::bindings::{
    BindingFactory, BindingId, BindingInstance, BindingRegistry, CallDispatcher, CallMessage,
    CreateRequest, ReplyFn, ReplyMessage,
};
use crate::config::DispatchConfig;
use crate::core::{
    panic_message, CallError, CallResult, ErrorRecord, ErrorSink, ShellError, ShellResult,
};
use crate::platform::{WindowKey, WindowSystem};
use crate::scripting::task_queue::{Task, TaskQueue, TaskSender};
use crate::scripting::wake::Waker;

/// 在宿主线程上执行的任务
pub type HostJob = Box<dyn FnOnce(&mut Host, &mut dyn WindowSystem) + Send>;

/// 宿主通知脚本侧的出口
pub trait ScriptPort {
    /// 把回复送回发起调用的一侧
    fn deliver(&self, reply: ReplyMessage);

    /// 绑定被宿主侧拆除（例如用户关闭了窗口）
    fn binding_released(&self, id: BindingId);
}

/// 宿主任务投递句柄，可在任意线程使用
#[derive(Clone)]
pub struct HostHandle {
    tasks: TaskSender<HostJob>,
}

impl HostHandle {
    /// 投递一个在宿主线程上执行的闭包
    ///
    /// 宿主已经销毁时返回 [`ShellError::QueueClosed`]，闭包被直接丢弃。
    #[track_caller]
    pub fn post<F>(&self, job: F) -> ShellResult<()>
    where
        F: FnOnce(&mut Host, &mut dyn WindowSystem) + Send + 'static,
    {
        self.tasks
            .post(Box::new(job))
            .map_err(|_| ShellError::QueueClosed("host"))
    }

    /// 请求宿主事件循环退出
    pub fn request_exit(&self) -> ShellResult<()> {
        self.post(|host, _| host.request_exit())
    }
}

/// 宿主线程上下文
pub struct Host {
    registry: BindingRegistry,
    factory: BindingFactory,
    dispatcher: CallDispatcher,
    queue: TaskQueue<HostJob>,
    handle: HostHandle,
    script: Option<Box<dyn ScriptPort>>,
    sink: Arc<dyn ErrorSink>,
    exit_requested: bool,
}

impl Host {
    /// 使用默认绑定工厂、不带唤醒器创建宿主
    pub fn new(config: &DispatchConfig, sink: Arc<dyn ErrorSink>) -> Self {
        Self::with_parts(config, BindingFactory::with_defaults(), sink, None)
    }

    /// 创建宿主
    ///
    /// # 参数
    ///
    /// * `factory` - 绑定工厂
    /// * `waker` - 每次投递宿主任务后调用，winit 事件循环用它唤醒自己
    pub fn with_parts(
        config: &DispatchConfig,
        factory: BindingFactory,
        sink: Arc<dyn ErrorSink>,
        waker: Option<Arc<dyn Waker>>,
    ) -> Self {
        let (tasks, queue) = TaskQueue::channel("host", waker);
        Self {
            registry: BindingRegistry::new(),
            factory,
            dispatcher: CallDispatcher::new(config, Arc::clone(&sink)),
            queue,
            handle: HostHandle { tasks },
            script: None,
            sink,
            exit_requested: false,
        }
    }

    pub fn handle(&self) -> HostHandle {
        self.handle.clone()
    }

    /// 连接脚本侧，用于绑定释放通知
    pub fn attach_script(&mut self, port: Box<dyn ScriptPort>) {
        self.script = Some(port);
    }

    pub fn registry(&self) -> &BindingRegistry {
        &self.registry
    }

    pub fn factory(&self) -> &BindingFactory {
        &self.factory
    }

    /// 执行当前积压的所有宿主任务，返回执行数量
    ///
    /// 执行期间新投递的任务留到下一轮。
    pub fn run_pending(&mut self, windows: &mut dyn WindowSystem) -> usize {
        let backlog = self.queue.len();
        let mut ran = 0;
        while ran < backlog {
            let Some(task) = self.queue.try_next() else {
                break;
            };
            self.run_task(task, windows);
            ran += 1;
        }
        ran
    }

    /// 最多等待 `timeout` 直到有任务到达，然后执行积压任务
    pub fn pump(&mut self, windows: &mut dyn WindowSystem, timeout: Duration) -> usize {
        match self.queue.next_timeout(timeout) {
            Some(task) => {
                self.run_task(task, windows);
                1 + self.run_pending(windows)
            }
            None => 0,
        }
    }

    fn run_task(&mut self, task: Task<HostJob>, windows: &mut dyn WindowSystem) {
        let origin = task.origin();
        let job = task.into_job();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job(self, windows))) {
            self.sink.report(ErrorRecord::new(
                "Panic",
                origin.to_string(),
                panic_message(payload.as_ref()),
            ));
        }
    }

    /// 分发一条调用消息
    pub fn dispatch(&mut self, message: CallMessage, reply: ReplyFn) {
        self.dispatcher
            .dispatch(&mut self.registry, &self.handle, message, reply);
    }

    /// 处理一条绑定创建请求
    pub fn create_binding(
        &mut self,
        request: CreateRequest,
        windows: &mut dyn WindowSystem,
        reply: ReplyFn,
    ) {
        self.dispatcher
            .create(&mut self.registry, &self.factory, windows, request, reply);
    }

    /// 脚本主动释放绑定，不回通知
    pub fn dispose_binding(&mut self, id: BindingId) -> bool {
        self.registry.dispose(id).is_some()
    }

    /// 用户关闭了窗口：拆除对应绑定并通知脚本
    pub fn window_closed(&mut self, key: WindowKey) -> Option<BindingId> {
        let id = self.registry.find_by_window(key)?;
        self.registry.dispose(id);
        tracing::info!(target: "exo::host", binding = %id, window = key.0, "window closed by user");
        if let Some(script) = &self.script {
            script.binding_released(id);
        }
        Some(id)
    }

    /// 以具体类型访问一个存活的绑定
    pub fn with_binding_mut<B, R, F>(&mut self, id: BindingId, f: F) -> CallResult<R>
    where
        B: BindingInstance,
        F: FnOnce(&mut B) -> CallResult<R>,
    {
        let instance = self.registry.lookup(id)?;
        let binding = instance.as_any_mut().downcast_mut::<B>().ok_or_else(|| {
            CallError::HostOperation(format!(
                "binding {id} is not a {}",
                std::any::type_name::<B>()
            ))
        })?;
        f(binding)
    }

    pub fn request_exit(&mut self) {
        tracing::info!(target: "exo::host", "exit requested");
        self.exit_requested = true;
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// 丢弃未执行的任务并释放全部绑定
    pub fn shutdown(&mut self) {
        let mut dropped = 0usize;
        while let Some(task) = self.queue.try_next() {
            drop(task);
            dropped += 1;
        }
        let disposed = self.registry.dispose_all();
        self.script = None;
        tracing::debug!(
            target: "exo::host",
            dropped_tasks = dropped,
            disposed_bindings = disposed.len(),
            "host shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{ArgMap, CallId, ResultValue};
    use crate::core::ErrorAggregator;
    use crate::platform::headless::HeadlessWindowSystem;
    use std::sync::mpsc;
    use std::sync::Mutex;

    fn host() -> (Host, ErrorAggregator) {
        let aggregator = ErrorAggregator::new();
        let host = Host::new(&DispatchConfig::default(), Arc::new(aggregator.clone()));
        (host, aggregator)
    }

    fn reply_channel() -> (ReplyFn, mpsc::Receiver<ReplyMessage>) {
        let (tx, rx) = mpsc::channel();
        (
            Box::new(move |reply| {
                let _ = tx.send(reply);
            }),
            rx,
        )
    }

    fn create_shell(host: &mut Host, windows: &mut HeadlessWindowSystem, config: ArgMap) -> BindingId {
        let (reply, rx) = reply_channel();
        host.create_binding(
            CreateRequest {
                call_id: CallId(100),
                type_tag: "shell".to_string(),
                config,
            },
            windows,
            reply,
        );
        let reply = rx.recv().unwrap();
        BindingId(reply.result.as_int().unwrap() as u64)
    }

    fn call(host: &mut Host, id: BindingId, method: &str, args: ArgMap) -> mpsc::Receiver<ReplyMessage> {
        let (reply, rx) = reply_channel();
        host.dispatch(
            CallMessage {
                call_id: CallId(1),
                binding_id: id,
                method: method.to_string(),
                args,
            },
            reply,
        );
        rx
    }

    #[derive(Default)]
    struct RecordingPort {
        released: Arc<Mutex<Vec<BindingId>>>,
    }

    impl ScriptPort for RecordingPort {
        fn deliver(&self, _reply: ReplyMessage) {}

        fn binding_released(&self, id: BindingId) {
            self.released.lock().unwrap().push(id);
        }
    }

    #[test]
    fn test_post_runs_in_order_on_host() {
        let (mut host, _) = host();
        let mut windows = HeadlessWindowSystem::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handle = host.handle();
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            handle
                .post(move |_, _| seen.lock().unwrap().push(i))
                .unwrap();
        }

        assert_eq!(host.run_pending(&mut windows), 5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_task_panic_is_reported_and_loop_continues() {
        let (mut host, aggregator) = host();
        let mut windows = HeadlessWindowSystem::new();
        let handle = host.handle();

        handle.post(|_, _| panic!("bad task")).unwrap();
        handle.post(|host, _| host.request_exit()).unwrap();

        assert_eq!(host.run_pending(&mut windows), 2);
        assert!(host.exit_requested());
        let stats = aggregator.get_stats();
        assert_eq!(stats.count_of("Panic"), 1);
        assert!(stats.recent_errors[0].source.contains("host.rs"));
    }

    #[test]
    fn test_size_and_title_round_trip() {
        let (mut host, _) = host();
        let mut windows = HeadlessWindowSystem::new();
        let id = create_shell(
            &mut host,
            &mut windows,
            ArgMap::new()
                .with("root_url", "https://example.com")
                .with("size.width", 1024)
                .with("size.height", 768)
                .with("title", "T"),
        );

        let size = call(&mut host, id, "size", ArgMap::new()).recv().unwrap();
        assert_eq!(
            size.result,
            ResultValue::map([("size.width", 1024), ("size.height", 768)])
        );

        let set = call(&mut host, id, "set_title", ArgMap::new().with("title", "X"))
            .recv()
            .unwrap();
        assert_eq!(set.error, "");
        assert_eq!(set.result, ResultValue::Null);

        let title = call(&mut host, id, "title", ArgMap::new()).recv().unwrap();
        assert_eq!(title.result, ResultValue::map([("title", "X")]));
        assert_eq!(windows.snapshot(windows.keys()[0]).unwrap().title, "X");
    }

    #[test]
    fn test_close_completes_on_next_turn() {
        let (mut host, _) = host();
        let mut windows = HeadlessWindowSystem::new();
        let id = create_shell(&mut host, &mut windows, ArgMap::new());

        let rx = call(&mut host, id, "close", ArgMap::new());
        assert!(rx.try_recv().is_err());

        host.run_pending(&mut windows);
        assert_eq!(rx.recv().unwrap().error, "");

        let closed = call(&mut host, id, "is_closed", ArgMap::new()).recv().unwrap();
        assert_eq!(closed.result, ResultValue::map([("is_closed", true)]));

        let shown = call(&mut host, id, "show", ArgMap::new()).recv().unwrap();
        assert_eq!(shown.error, "HostOperationError: Window is closed");
    }

    #[test]
    fn test_close_races_dispose() {
        let (mut host, _) = host();
        let mut windows = HeadlessWindowSystem::new();
        let id = create_shell(&mut host, &mut windows, ArgMap::new());

        let rx = call(&mut host, id, "close", ArgMap::new());
        assert!(host.dispose_binding(id));
        host.run_pending(&mut windows);

        assert_eq!(rx.recv().unwrap().error, "BindingGone");
        let later = call(&mut host, id, "show", ArgMap::new()).recv().unwrap();
        assert_eq!(later.error, "BindingGone");
    }

    #[test]
    fn test_window_closed_notifies_script() {
        let (mut host, _) = host();
        let mut windows = HeadlessWindowSystem::new();
        let port = RecordingPort::default();
        let released = Arc::clone(&port.released);
        host.attach_script(Box::new(port));

        let id = create_shell(&mut host, &mut windows, ArgMap::new());
        let key = windows.keys()[0];

        assert_eq!(host.window_closed(key), Some(id));
        assert_eq!(*released.lock().unwrap(), vec![id]);
        assert!(host.registry().is_empty());
        assert_eq!(host.window_closed(key), None);
    }

    #[test]
    fn test_unknown_binding() {
        let (mut host, _) = host();
        let reply = call(&mut host, BindingId(42), "show", ArgMap::new())
            .recv()
            .unwrap();
        assert_eq!(reply.error, "UnknownBinding");
    }

    #[test]
    fn test_pump_waits_for_work() {
        let (mut host, _) = host();
        let mut windows = HeadlessWindowSystem::new();
        assert_eq!(host.pump(&mut windows, Duration::from_millis(10)), 0);

        let handle = host.handle();
        let poster = std::thread::spawn(move || handle.request_exit().unwrap());
        let mut ran = 0;
        while ran == 0 {
            ran = host.pump(&mut windows, Duration::from_secs(5));
        }
        poster.join().unwrap();
        assert!(host.exit_requested());
    }
}
