//! QuickJS 脚本环境
//!
//! [`ScriptEnv`] 只存在于运行时线程上，持有 QuickJS 运行时和上下文，并安装
//! 全局 `exo` 对象：
//!
//! ```text
//! exo.call(id, method, args, cb)   -> call_id      cb(err, result)
//! exo.invoke(id, method, args)     -> Promise
//! exo.create(type, config, cb)     -> call_id      cb(err, binding_id)
//! exo.dispose(id)
//! exo.quit()
//! exo.ondispose = function (id) {}                 宿主侧拆除绑定时调用
//! ```
//!
//! 另外提供 `setTimeout` / `clearTimeout` 和输出到 tracing 的 `console`。
//! 参数以 JSON 形式离开脚本，非标量成员被丢弃。

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rquickjs::{Array, Context, Ctx, Function, IntoJs, Object, Persistent, Runtime, Value};

use super::pending::{NativeReply, PendingCalls};
use super::runtime_thread::{RuntimeHandle, StopSignal};
use super::timers::{Timers, MAX_DELAY};
use crate::bindings::{
    ArgMap, BindingId, CallId, CallMessage, ConfigMap, CreateRequest, ReplyMessage, ResultValue,
};
use crate::config::ShellConfig;
use crate::core::{panic_message, CallError, ErrorRecord, ErrorSink, ShellError, ShellResult};
use crate::host::{HostHandle, ScriptPort};

/// 停机时失败挂起调用的轮数上限
const SHUTDOWN_ROUNDS: usize = 16;

/// 在全局对象上安装 `exo`、`console` 和定时器
const PRELUDE: &str = r#"
(function (native) {
  const encode = (value) => {
    if (value === undefined || value === null) return "{}";
    try { return JSON.stringify(value); } catch (e) { return "{}"; }
  };
  const callback = (cb) => (typeof cb === "function" ? cb : function () {});
  const show = (value) => {
    if (typeof value === "string") return value;
    try { return JSON.stringify(value); } catch (e) { return String(value); }
  };
  const format = (args) => args.map(show).join(" ");

  globalThis.exo = {
    call(id, method, args, cb) {
      return native.call(Number(id), String(method), encode(args), callback(cb));
    },
    invoke(id, method, args) {
      return new Promise((resolve, reject) => {
        native.call(Number(id), String(method), encode(args), (err, result) => {
          if (err) reject(new Error(err)); else resolve(result);
        });
      });
    },
    create(type, config, cb) {
      return native.create(String(type), encode(config), callback(cb));
    },
    dispose(id) { native.dispose(Number(id)); },
    quit() { native.quit(); },
    ondispose: null,
  };

  globalThis.console = {
    log: (...args) => native.log("info", format(args)),
    info: (...args) => native.log("info", format(args)),
    debug: (...args) => native.log("debug", format(args)),
    warn: (...args) => native.log("warn", format(args)),
    error: (...args) => native.log("error", format(args)),
  };

  globalThis.setTimeout = (fn, ms, ...rest) => {
    if (typeof fn !== "function") throw new TypeError("setTimeout expects a function");
    return native.setTimer(() => fn(...rest), Number(ms) || 0);
  };
  globalThis.clearTimeout = (id) => {
    if (typeof id === "number") native.clearTimer(id);
  };
})(globalThis.__exo_native);
delete globalThis.__exo_native;
"#;

/// 回复到达时要通知的对象
pub(crate) enum ReplyHandler {
    Native(NativeReply),
    Script(Persistent<Function<'static>>),
}

/// 脚本线程内部状态，由原生函数和 [`ScriptEnv`] 共享
struct ScriptState {
    calls: PendingCalls<ReplyHandler>,
    timers: Timers<Persistent<Function<'static>>>,
    host: HostHandle,
    port: RuntimeHandle,
    shutting_down: bool,
    /// 停机清扫结束，不再登记新调用
    sealed: bool,
}

/// 脚本异常的描述
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFailure {
    pub message: String,
    pub stack: Option<String>,
}

impl ScriptFailure {
    fn from_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> Self {
        match err {
            rquickjs::Error::Exception => Self::caught(ctx),
            other => Self {
                message: other.to_string(),
                stack: None,
            },
        }
    }

    /// 取出上下文中挂起的异常
    fn caught(ctx: &Ctx<'_>) -> Self {
        let value = ctx.catch();
        if let Some(object) = value.as_object() {
            let message = object
                .get::<_, Option<String>>("message")
                .ok()
                .flatten()
                .unwrap_or_else(|| "uncaught exception".to_string());
            let stack = object
                .get::<_, Option<String>>("stack")
                .ok()
                .flatten()
                .filter(|s| !s.is_empty());
            return Self { message, stack };
        }
        let message = match value.as_string() {
            Some(text) => text.to_string().unwrap_or_default(),
            None => format!("{value:?}"),
        };
        Self {
            message,
            stack: None,
        }
    }
}

fn guard<T>(ctx: &Ctx<'_>, result: rquickjs::Result<T>) -> Result<T, ScriptFailure> {
    result.map_err(|err| ScriptFailure::from_error(ctx, err))
}

impl<'js> IntoJs<'js> for ResultValue {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        match self {
            ResultValue::Null => Ok(Value::new_null(ctx.clone())),
            ResultValue::Bool(b) => Ok(Value::new_bool(ctx.clone(), b)),
            ResultValue::Int(i) => Ok(match i32::try_from(i) {
                Ok(small) => Value::new_int(ctx.clone(), small),
                Err(_) => Value::new_float(ctx.clone(), i as f64),
            }),
            ResultValue::Double(d) => Ok(Value::new_float(ctx.clone(), d)),
            ResultValue::String(s) => s.into_js(ctx),
            ResultValue::List(items) => {
                let array = Array::new(ctx.clone())?;
                for (index, item) in items.into_iter().enumerate() {
                    array.set(index, item)?;
                }
                array.into_js(ctx)
            }
            ResultValue::Map(entries) => {
                let object = Object::new(ctx.clone())?;
                for (key, value) in entries {
                    object.set(key, value)?;
                }
                object.into_js(ctx)
            }
        }
    }
}

/// 脚本给出的数字 id；负数、小数和非有限值映射到一个从未分配过的 id
fn binding_id_from(raw: f64) -> BindingId {
    if raw.is_finite() && raw >= 0.0 && raw.fract() == 0.0 && raw < u64::MAX as f64 {
        BindingId(raw as u64)
    } else {
        BindingId(u64::MAX)
    }
}

/// 清扫结束后发起的调用不再登记；原生回调在释放时以 RuntimeShuttingDown 触发
fn admit(state: &RefCell<ScriptState>, method: &str, handler: ReplyHandler) -> Option<ReplyHandler> {
    if !state.borrow().sealed {
        return Some(handler);
    }
    if let ReplyHandler::Script(_) = handler {
        tracing::warn!(target: "exo::runtime", method, "runtime stopped, script call dropped without reply");
    }
    None
}

fn issue_call(
    state: &RefCell<ScriptState>,
    binding_id: BindingId,
    method: String,
    args: ArgMap,
    handler: ReplyHandler,
) -> CallId {
    let Some(handler) = admit(state, &method, handler) else {
        return CallId(0);
    };
    let mut state = state.borrow_mut();
    let call_id = state.calls.register(Some(binding_id), method.clone(), handler);
    if state.shutting_down {
        // 停机结束时统一以 RuntimeShuttingDown 失败
        return call_id;
    }

    let message = CallMessage {
        call_id,
        binding_id,
        method,
        args,
    };
    let reply = state.port.reply_fn();
    if state
        .host
        .post(move |host, _| host.dispatch(message, reply))
        .is_err()
    {
        state
            .port
            .deliver(ReplyMessage::failure(call_id, &CallError::RuntimeShuttingDown));
    }
    call_id
}

fn issue_create(
    state: &RefCell<ScriptState>,
    type_tag: String,
    config: ConfigMap,
    handler: ReplyHandler,
) -> CallId {
    let Some(handler) = admit(state, "create", handler) else {
        return CallId(0);
    };
    let mut state = state.borrow_mut();
    let call_id = state.calls.register(None, "create", handler);
    if state.shutting_down {
        return call_id;
    }

    let request = CreateRequest {
        call_id,
        type_tag,
        config,
    };
    let reply = state.port.reply_fn();
    if state
        .host
        .post(move |host, windows| host.create_binding(request, windows, reply))
        .is_err()
    {
        state
            .port
            .deliver(ReplyMessage::failure(call_id, &CallError::RuntimeShuttingDown));
    }
    call_id
}

fn issue_dispose(state: &RefCell<ScriptState>, binding_id: BindingId) {
    let state = state.borrow();
    if state
        .host
        .post(move |host, _| {
            host.dispose_binding(binding_id);
        })
        .is_err()
    {
        tracing::debug!(target: "exo::runtime", binding = %binding_id, "host closed, dispose dropped");
    }
}

fn install<'js>(ctx: &Ctx<'js>, state: &Rc<RefCell<ScriptState>>) -> rquickjs::Result<()> {
    let native = Object::new(ctx.clone())?;

    let shared = Rc::clone(state);
    native.set(
        "call",
        Function::new(
            ctx.clone(),
            move |binding: f64, method: String, args: String, cb: Function<'_>| -> f64 {
                let handler = ReplyHandler::Script(Persistent::save(&cb.ctx().clone(), cb));
                let args = ArgMap::from_json_str(&args);
                issue_call(&shared, binding_id_from(binding), method, args, handler).0 as f64
            },
        )?,
    )?;

    let shared = Rc::clone(state);
    native.set(
        "create",
        Function::new(
            ctx.clone(),
            move |type_tag: String, config: String, cb: Function<'_>| -> f64 {
                let handler = ReplyHandler::Script(Persistent::save(&cb.ctx().clone(), cb));
                let config = ConfigMap::from_json_str(&config);
                issue_create(&shared, type_tag, config, handler).0 as f64
            },
        )?,
    )?;

    let shared = Rc::clone(state);
    native.set(
        "dispose",
        Function::new(ctx.clone(), move |binding: f64| {
            issue_dispose(&shared, binding_id_from(binding));
        })?,
    )?;

    let shared = Rc::clone(state);
    native.set(
        "quit",
        Function::new(ctx.clone(), move || {
            if shared.borrow().host.request_exit().is_err() {
                tracing::debug!(target: "exo::runtime", "host closed, quit ignored");
            }
        })?,
    )?;

    let shared = Rc::clone(state);
    native.set(
        "setTimer",
        Function::new(ctx.clone(), move |cb: Function<'_>, delay_ms: f64| -> f64 {
            let delay = if delay_ms.is_finite() && delay_ms > 0.0 {
                Duration::try_from_secs_f64(delay_ms / 1000.0).map_or(MAX_DELAY, |d| d.min(MAX_DELAY))
            } else {
                Duration::ZERO
            };
            let saved = Persistent::save(&cb.ctx().clone(), cb);
            shared
                .borrow_mut()
                .timers
                .schedule(Instant::now(), delay, saved) as f64
        })?,
    )?;

    let shared = Rc::clone(state);
    native.set(
        "clearTimer",
        Function::new(ctx.clone(), move |id: f64| {
            if id.is_finite() && id >= 0.0 {
                // 取出的回调在借用结束后才释放
                let cancelled = shared.borrow_mut().timers.cancel(id as u64);
                drop(cancelled);
            }
        })?,
    )?;

    native.set(
        "log",
        Function::new(ctx.clone(), |level: String, message: String| {
            match level.as_str() {
                "error" => tracing::error!(target: "exo::script", "{}", message),
                "warn" => tracing::warn!(target: "exo::script", "{}", message),
                "debug" => tracing::debug!(target: "exo::script", "{}", message),
                _ => tracing::info!(target: "exo::script", "{}", message),
            }
        })?,
    )?;

    ctx.globals().set("__exo_native", native)?;
    ctx.eval::<(), _>(PRELUDE)
}

/// 运行时线程上的脚本环境
///
/// 字段顺序即释放顺序：共享状态先于上下文，上下文先于运行时。
pub struct ScriptEnv {
    state: Rc<RefCell<ScriptState>>,
    sink: Arc<dyn ErrorSink>,
    call_timeout: Option<Duration>,
    context: Context,
    runtime: Runtime,
}

impl ScriptEnv {
    pub(crate) fn new(
        config: &ShellConfig,
        host: HostHandle,
        port: RuntimeHandle,
        sink: Arc<dyn ErrorSink>,
        stop: Arc<StopSignal>,
    ) -> ShellResult<Self> {
        let runtime = Runtime::new()
            .map_err(|e| ShellError::Init(format!("failed to create script runtime: {e}")))?;
        if config.runtime.memory_limit_bytes > 0 {
            runtime.set_memory_limit(config.runtime.memory_limit_bytes);
        }
        if config.runtime.max_stack_size_bytes > 0 {
            runtime.set_max_stack_size(config.runtime.max_stack_size_bytes);
        }
        runtime.set_interrupt_handler(Some(Box::new(move || stop.should_interrupt())));

        let context = Context::full(&runtime)
            .map_err(|e| ShellError::Init(format!("failed to create script context: {e}")))?;

        let state = Rc::new(RefCell::new(ScriptState {
            calls: PendingCalls::new(),
            timers: Timers::new(),
            host,
            port,
            shutting_down: false,
            sealed: false,
        }));

        context
            .with(|ctx| guard(&ctx, install(&ctx, &state)))
            .map_err(|failure| {
                ShellError::Init(format!("failed to install script API: {}", failure.message))
            })?;

        Ok(Self {
            state,
            sink,
            call_timeout: config.dispatch.call_timeout(),
            context,
            runtime,
        })
    }

    /// 执行一段脚本
    pub fn eval(&mut self, source: &str) -> ShellResult<()> {
        self.context
            .with(|ctx| guard(&ctx, ctx.eval::<(), _>(source)))
            .map_err(|failure| {
                self.report_failure("eval", &failure);
                ShellError::Script(failure.message)
            })
    }

    /// 从 Rust 发起调用
    pub fn call(
        &mut self,
        binding_id: BindingId,
        method: impl Into<String>,
        args: ArgMap,
        reply: NativeReply,
    ) -> CallId {
        issue_call(
            &self.state,
            binding_id,
            method.into(),
            args,
            ReplyHandler::Native(reply),
        )
    }

    /// 从 Rust 请求创建绑定
    pub fn create(&mut self, type_tag: impl Into<String>, config: ConfigMap, reply: NativeReply) -> CallId {
        issue_create(&self.state, type_tag.into(), config, ReplyHandler::Native(reply))
    }

    pub fn dispose(&mut self, binding_id: BindingId) {
        issue_dispose(&self.state, binding_id);
    }

    /// 按 `call_id` 解决一个挂起的调用；未知或已过期的回复被丢弃
    pub fn deliver_reply(&mut self, reply: ReplyMessage) {
        let pending = self.state.borrow_mut().calls.resolve(reply.call_id);
        match pending {
            Some(call) => self.fire(call.handler, reply),
            None => {
                tracing::debug!(target: "exo::runtime", call = %reply.call_id, "dropping reply for unknown call");
            }
        }
    }

    /// 宿主拆除了绑定，调用脚本的 `exo.ondispose`
    pub fn binding_released(&mut self, binding_id: BindingId) {
        let outcome = self.context.with(|ctx| -> Result<(), ScriptFailure> {
            let exo: Object = guard(&ctx, ctx.globals().get("exo"))?;
            let hook: Option<Function> = guard(&ctx, exo.get("ondispose"))?;
            if let Some(hook) = hook {
                guard(&ctx, hook.call::<_, ()>((binding_id.0 as f64,)))?;
            }
            Ok(())
        });
        if let Err(failure) = outcome {
            self.report_failure("exo.ondispose", &failure);
        }
    }

    pub fn pending_calls(&self) -> usize {
        self.state.borrow().calls.len()
    }

    fn fire(&mut self, handler: ReplyHandler, reply: ReplyMessage) {
        match handler {
            ReplyHandler::Native(native) => {
                self.contain("reply callback", || native.fire(reply));
            }
            ReplyHandler::Script(callback) => {
                let outcome = self.contain("reply callback", || {
                    self.context.with(|ctx| -> Result<(), ScriptFailure> {
                        let function = guard(&ctx, callback.restore(&ctx))?;
                        let err = if reply.error.is_empty() {
                            Value::new_null(ctx.clone())
                        } else {
                            guard(&ctx, reply.error.into_js(&ctx))?
                        };
                        let result = guard(&ctx, reply.result.into_js(&ctx))?;
                        guard(&ctx, function.call::<_, ()>((err, result)))
                    })
                });
                if let Some(Err(failure)) = outcome {
                    self.report_failure("reply callback", &failure);
                }
            }
        }
    }

    /// 捕获原生代码的 panic 并汇报，运行时线程继续工作
    fn contain<R>(&self, source: &str, f: impl FnOnce() -> R) -> Option<R> {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Some(value),
            Err(payload) => {
                self.sink.report(ErrorRecord::new(
                    "Panic",
                    source,
                    panic_message(payload.as_ref()),
                ));
                None
            }
        }
    }

    fn report_failure(&self, source: &str, failure: &ScriptFailure) {
        let mut record = ErrorRecord::new("ScriptException", source, failure.message.clone());
        if let Some(stack) = &failure.stack {
            record = record.with_details(stack.clone());
        }
        self.sink.report(record);
    }

    /// 触发所有到期的定时器，返回触发数量
    pub(crate) fn fire_due_timers(&mut self) -> usize {
        let due = self.state.borrow_mut().timers.take_due(Instant::now());
        let fired = due.len();
        for (_, callback) in due {
            let outcome = self.contain("setTimeout", || {
                self.context.with(|ctx| -> Result<(), ScriptFailure> {
                    let function = guard(&ctx, callback.restore(&ctx))?;
                    guard(&ctx, function.call::<_, ()>(()))
                })
            });
            if let Some(Err(failure)) = outcome {
                self.report_failure("setTimeout", &failure);
            }
        }
        fired
    }

    /// 最多执行 `budget` 个 QuickJS 待决作业，返回是否仍有剩余
    pub(crate) fn run_jobs(&mut self, budget: usize) -> bool {
        for _ in 0..budget {
            match self.contain("pending job", || self.runtime.execute_pending_job()) {
                Some(Ok(true)) | None => {}
                Some(Ok(false)) => return false,
                Some(Err(_)) => {
                    let failure = self.context.with(|ctx| ScriptFailure::caught(&ctx));
                    self.report_failure("pending job", &failure);
                }
            }
        }
        self.runtime.is_job_pending()
    }

    pub(crate) fn has_pending_jobs(&self) -> bool {
        self.runtime.is_job_pending()
    }

    /// 距离下一个定时器到期的时间
    pub(crate) fn next_timer_in(&self) -> Option<Duration> {
        self.state.borrow().timers.next_due_in(Instant::now())
    }

    /// 以 `CallTimeout` 失败超时的调用（仅在配置了超时时）
    pub(crate) fn expire_calls(&mut self) -> usize {
        let Some(timeout) = self.call_timeout else {
            return 0;
        };
        let expired = self
            .state
            .borrow_mut()
            .calls
            .take_expired(Instant::now(), timeout);
        let count = expired.len();
        for (call_id, call) in expired {
            tracing::warn!(
                target: "exo::runtime",
                call = %call_id,
                method = %call.method,
                "call timed out"
            );
            self.fire(call.handler, ReplyMessage::failure(call_id, &CallError::Timeout));
        }
        count
    }

    /// 进入停机模式：之后发起的调用不再投递到宿主
    pub(crate) fn begin_shutdown(&mut self) {
        self.state.borrow_mut().shutting_down = true;
    }

    /// 以 `RuntimeShuttingDown` 失败全部挂起调用，返回失败数量
    ///
    /// 回调里再发起的调用也会在后续轮次中被失败。轮数用尽后不再登记新调用，
    /// 剩余的调用在最后一轮中失败。
    pub(crate) fn fail_pending(&mut self, job_budget: usize) -> usize {
        let mut failed = 0;
        for round in 0..=SHUTDOWN_ROUNDS {
            if round == SHUTDOWN_ROUNDS {
                self.state.borrow_mut().sealed = true;
            }
            let drained = self.state.borrow_mut().calls.drain();
            if drained.is_empty() {
                break;
            }
            if round == SHUTDOWN_ROUNDS {
                tracing::warn!(
                    target: "exo::runtime",
                    remaining = drained.len(),
                    "calls still issued after {} shutdown rounds",
                    SHUTDOWN_ROUNDS
                );
            }
            for (call_id, call) in drained {
                self.fire(
                    call.handler,
                    ReplyMessage::failure(call_id, &CallError::RuntimeShuttingDown),
                );
                failed += 1;
            }
            self.run_jobs(job_budget);
        }
        failed
    }

    /// 清空定时器和残留的挂起调用，释放其中持有的脚本函数
    pub(crate) fn release_handles(&mut self) {
        let Ok(mut state) = self.state.try_borrow_mut() else {
            return;
        };
        let timers = state.timers.clear();
        let calls = state.calls.drain();
        drop(state);
        drop(timers);
        drop(calls);
    }

    /// 安装一个调用即 panic 的全局函数
    #[cfg(test)]
    pub(crate) fn define_panicking(&self, name: &str) {
        self.context.with(|ctx| {
            let function = Function::new(ctx.clone(), || -> () { panic!("native failure") }).unwrap();
            ctx.globals().set(name, function).unwrap();
        });
    }
}

impl Drop for ScriptEnv {
    fn drop(&mut self) {
        // 持久化句柄必须在上下文和运行时之前释放
        self.release_handles();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_id_from_script_numbers() {
        assert_eq!(binding_id_from(3.0), BindingId(3));
        assert_eq!(binding_id_from(0.0), BindingId(0));
        assert_eq!(binding_id_from(-1.0), BindingId(u64::MAX));
        assert_eq!(binding_id_from(1.5), BindingId(u64::MAX));
        assert_eq!(binding_id_from(f64::NAN), BindingId(u64::MAX));
    }

    #[test]
    fn test_result_values_reach_script_intact() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let value = ResultValue::map([
                ("size.width", ResultValue::Int(1024)),
                ("big", ResultValue::Int(1 << 40)),
                ("ratio", ResultValue::Double(0.5)),
                (
                    "list",
                    ResultValue::List(vec![ResultValue::Null, ResultValue::from("x")]),
                ),
            ]);
            ctx.globals().set("value", value).unwrap();

            let json: String = ctx.eval("JSON.stringify(value)").unwrap();
            assert_eq!(
                json,
                r#"{"big":1099511627776,"list":[null,"x"],"ratio":0.5,"size.width":1024}"#
            );
        });
    }

    #[test]
    fn test_exception_description() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let err = ctx.eval::<(), _>("throw new Error('nope')").unwrap_err();
            let failure = ScriptFailure::from_error(&ctx, err);
            assert_eq!(failure.message, "nope");

            let err = ctx.eval::<(), _>("throw 'plain'").unwrap_err();
            assert_eq!(ScriptFailure::from_error(&ctx, err).message, "plain");
        });
    }
}
