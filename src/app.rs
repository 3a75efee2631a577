//! 外壳应用
//!
//! [`ShellApp`] 把宿主上下文和脚本运行时线程接在一起。宿主必须留在创建它的
//! 线程上，由调用方驱动：winit 事件循环（[`crate::platform::winit::run_event_loop`]）
//! 或 [`ShellApp::run_headless`]。

use std::sync::Arc;
use std::time::Duration;

use crate::bindings::BindingFactory;
use crate::config::ShellConfig;
use crate::core::{ErrorSink, ShellResult, TracingErrorSink};
use crate::host::Host;
use crate::platform::WindowSystem;
use crate::scripting::{RuntimeHandle, RuntimeThread, Waker};

/// [`ShellApp`] 构建器
pub struct ShellAppBuilder {
    config: ShellConfig,
    sink: Arc<dyn ErrorSink>,
    waker: Option<Arc<dyn Waker>>,
    factory: BindingFactory,
}

impl ShellAppBuilder {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config,
            sink: Arc::new(TracingErrorSink),
            waker: None,
            factory: BindingFactory::with_defaults(),
        }
    }

    /// 未捕获故障的汇报目标，默认写入日志
    pub fn sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// 宿主任务到达时的唤醒器
    pub fn waker(mut self, waker: Arc<dyn Waker>) -> Self {
        self.waker = Some(waker);
        self
    }

    /// 替换绑定工厂
    pub fn factory(mut self, factory: BindingFactory) -> Self {
        self.factory = factory;
        self
    }

    /// 验证配置、创建宿主并启动运行时线程
    pub fn start(self) -> ShellResult<ShellApp> {
        self.config.validate()?;

        let mut host = Host::with_parts(
            &self.config.dispatch,
            self.factory,
            Arc::clone(&self.sink),
            self.waker,
        );
        let runtime = RuntimeThread::start(&self.config, host.handle(), self.sink)?;
        host.attach_script(Box::new(runtime.handle()));

        tracing::info!(
            target: "exo::app",
            bindings = ?host.factory().type_tags().collect::<Vec<_>>(),
            "shell started"
        );
        Ok(ShellApp {
            config: self.config,
            host,
            runtime: Some(runtime),
        })
    }
}

/// 外壳应用
///
/// 释放时先停止运行时线程，再拆除宿主。
pub struct ShellApp {
    config: ShellConfig,
    host: Host,
    runtime: Option<RuntimeThread>,
}

impl ShellApp {
    pub fn builder(config: ShellConfig) -> ShellAppBuilder {
        ShellAppBuilder::new(config)
    }

    /// 使用默认汇报器和绑定工厂启动
    pub fn start(config: ShellConfig) -> ShellResult<Self> {
        Self::builder(config).start()
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut Host {
        &mut self.host
    }

    /// 运行时投递句柄，停机后为 `None`
    pub fn runtime(&self) -> Option<RuntimeHandle> {
        self.runtime.as_ref().map(RuntimeThread::handle)
    }

    /// 执行积压的宿主任务
    pub fn run_pending(&mut self, windows: &mut dyn WindowSystem) -> usize {
        self.host.run_pending(windows)
    }

    /// 在当前线程上驱动宿主，直到脚本请求退出
    pub fn run_headless(&mut self, windows: &mut dyn WindowSystem, poll: Duration) {
        while !self.host.exit_requested() {
            self.host.pump(windows, poll);
        }
        tracing::info!(target: "exo::app", "exit requested, leaving headless loop");
    }

    /// 停止运行时并拆除宿主，可重复调用
    pub fn shutdown(&mut self) {
        let Some(mut runtime) = self.runtime.take() else {
            return;
        };
        runtime.stop();
        self.host.shutdown();
        tracing::info!(target: "exo::app", "shell shut down");
    }
}

impl Drop for ShellApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorAggregator, ShellError};
    use crate::platform::headless::HeadlessWindowSystem;

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ShellConfig::default();
        config.runtime.max_tasks_per_tick = 0;
        assert!(matches!(
            ShellApp::start(config),
            Err(ShellError::Config(_))
        ));
    }

    #[test]
    fn test_headless_run_until_quit() {
        let aggregator = ErrorAggregator::new();
        let mut app = ShellApp::builder(ShellConfig::default())
            .sink(Arc::new(aggregator.clone()))
            .start()
            .unwrap();
        let mut windows = HeadlessWindowSystem::new();

        app.runtime()
            .unwrap()
            .eval(r#"exo.create("shell", {}, (err, id) => exo.call(id, "show", {}, () => exo.quit()));"#)
            .unwrap();
        app.run_headless(&mut windows, Duration::from_millis(10));

        let key = windows.keys()[0];
        assert!(windows.snapshot(key).unwrap().visible);
        assert_eq!(aggregator.total(), 0);

        app.shutdown();
        assert!(app.runtime().is_none());
        assert!(app.host().registry().is_empty());
        assert!(windows.snapshot(key).unwrap().closed);
    }
}
