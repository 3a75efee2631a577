//! Routes inbound call and create requests to bindings.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::factory::BindingFactory;
use super::instance::{CallContext, Responder};
use super::protocol::{CallMessage, CreateRequest, ReplyMessage};
use super::registry::BindingRegistry;
use super::value::ResultValue;
use crate::config::DispatchConfig;
use crate::core::{panic_message, CallError, ErrorRecord, ErrorSink};
use crate::host::HostHandle;
use crate::platform::WindowSystem;

/// Delivers a reply back towards the caller. Called exactly once.
pub type ReplyFn = Box<dyn FnOnce(ReplyMessage) + Send>;

/// Call router.
///
/// Replies carry the request's `call_id` and may complete in any order. The
/// dispatcher does not serialize calls to the same binding.
pub struct CallDispatcher {
    strict_methods: bool,
    sink: Arc<dyn ErrorSink>,
}

impl CallDispatcher {
    pub fn new(config: &DispatchConfig, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            strict_methods: config.strict_methods,
            sink,
        }
    }

    /// Handles one call message.
    ///
    /// Lookup failures answer immediately. A panic inside the binding is
    /// reported to the error sink and answers with `HostOperationError` unless
    /// the binding already answered.
    pub fn dispatch(
        &self,
        registry: &mut BindingRegistry,
        host: &HostHandle,
        message: CallMessage,
        reply: ReplyFn,
    ) {
        let CallMessage {
            call_id,
            binding_id,
            method,
            args,
        } = message;
        tracing::trace!(target: "exo::dispatch", call = %call_id, binding = %binding_id, method = %method, "dispatch");

        let instance = match registry.lookup(binding_id) {
            Ok(instance) => instance,
            Err(err) => {
                tracing::debug!(target: "exo::dispatch", call = %call_id, error = %err, "call rejected");
                reply(ReplyMessage::failure(call_id, &err));
                return;
            }
        };

        let responder = Responder::new(
            binding_id,
            Box::new(move |outcome| reply(ReplyMessage::from_result(call_id, outcome))),
        );
        let slot = responder.slot();
        let mut ctx = CallContext::new(binding_id, self.strict_methods, host.clone());

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            instance.call(&method, &args, &mut ctx, responder)
        }));
        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            self.sink.report(
                ErrorRecord::new(
                    "HostOperationError",
                    format!("binding {binding_id}"),
                    message.clone(),
                )
                .with_details(format!("method '{method}' panicked")),
            );
            slot.fire(Err(CallError::HostOperation(message)));
        }
    }

    /// Handles one create request. The reply result is the new binding id.
    pub fn create(
        &self,
        registry: &mut BindingRegistry,
        factory: &BindingFactory,
        windows: &mut dyn WindowSystem,
        request: CreateRequest,
        reply: ReplyFn,
    ) {
        let CreateRequest {
            call_id,
            type_tag,
            config,
        } = request;

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            registry.create(factory, &type_tag, &config, windows)
        }));
        let outcome = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.sink.report(ErrorRecord::new(
                    "InitError",
                    format!("factory '{type_tag}'"),
                    message.clone(),
                ));
                Err(CallError::Init(message))
            }
        };

        if let Err(err) = &outcome {
            tracing::warn!(target: "exo::dispatch", type_tag = %type_tag, error = %err, "binding construction failed");
        }
        reply(ReplyMessage::from_result(
            call_id,
            outcome.map(|id| ResultValue::Int(id.0 as i64)),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::instance::BindingInstance;
    use crate::bindings::protocol::{BindingId, CallId};
    use crate::bindings::value::ArgMap;
    use crate::core::ErrorAggregator;
    use crate::host::Host;
    use crate::platform::headless::HeadlessWindowSystem;
    use std::any::Any;
    use std::sync::mpsc;

    struct Panicky;

    impl BindingInstance for Panicky {
        fn type_tag(&self) -> &'static str {
            "panicky"
        }

        fn call(&mut self, method: &str, _args: &ArgMap, ctx: &mut CallContext, responder: Responder) {
            match method {
                "boom" => panic!("binding exploded"),
                "late_boom" => {
                    responder.ok(1);
                    panic!("after answering");
                }
                _ => responder.respond(ctx.unknown_method(method)),
            }
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn collect() -> (ReplyFn, mpsc::Receiver<ReplyMessage>) {
        let (tx, rx) = mpsc::channel();
        (
            Box::new(move |reply| {
                let _ = tx.send(reply);
            }),
            rx,
        )
    }

    fn call(id: u64, binding: BindingId, method: &str) -> CallMessage {
        CallMessage {
            call_id: CallId(id),
            binding_id: binding,
            method: method.to_string(),
            args: ArgMap::new(),
        }
    }

    #[test]
    fn test_panics_become_host_operation_errors() {
        let aggregator = ErrorAggregator::new();
        let dispatcher = CallDispatcher::new(&DispatchConfig::default(), Arc::new(aggregator.clone()));
        let host = Host::new(&DispatchConfig::default(), Arc::new(aggregator.clone()));
        let mut registry = BindingRegistry::new();
        let id = registry.insert(Box::new(Panicky));

        let (reply, rx) = collect();
        dispatcher.dispatch(&mut registry, &host.handle(), call(1, id, "boom"), reply);
        let reply = rx.recv().unwrap();
        assert_eq!(reply.error, "HostOperationError: binding exploded");
        assert_eq!(aggregator.total(), 1);

        // an answer given before the panic stands
        let (reply, rx) = collect();
        dispatcher.dispatch(&mut registry, &host.handle(), call(2, id, "late_boom"), reply);
        assert_eq!(rx.recv().unwrap().result, ResultValue::Int(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_method_modes() {
        let sink: Arc<dyn ErrorSink> = Arc::new(ErrorAggregator::new());
        let host = Host::new(&DispatchConfig::default(), Arc::clone(&sink));
        let mut registry = BindingRegistry::new();
        let id = registry.insert(Box::new(Panicky));

        let lenient = CallDispatcher::new(&DispatchConfig::default(), Arc::clone(&sink));
        let (reply, rx) = collect();
        lenient.dispatch(&mut registry, &host.handle(), call(1, id, "nope"), reply);
        let reply = rx.recv().unwrap();
        assert_eq!(reply.error, "");
        assert_eq!(reply.result, ResultValue::Null);

        let strict = CallDispatcher::new(
            &DispatchConfig {
                strict_methods: true,
                ..DispatchConfig::default()
            },
            sink,
        );
        let (reply, rx) = collect();
        strict.dispatch(&mut registry, &host.handle(), call(2, id, "nope"), reply);
        assert_eq!(rx.recv().unwrap().error, "UnknownMethod: nope");
    }

    #[test]
    fn test_create_replies_with_id_or_init_error() {
        let sink: Arc<dyn ErrorSink> = Arc::new(ErrorAggregator::new());
        let dispatcher = CallDispatcher::new(&DispatchConfig::default(), sink);
        let factory = BindingFactory::with_defaults();
        let mut registry = BindingRegistry::new();
        let mut windows = HeadlessWindowSystem::new();

        let (reply, rx) = collect();
        dispatcher.create(
            &mut registry,
            &factory,
            &mut windows,
            CreateRequest {
                call_id: CallId(1),
                type_tag: "shell".to_string(),
                config: ArgMap::new(),
            },
            reply,
        );
        assert_eq!(rx.recv().unwrap().result, ResultValue::Int(1));

        windows.fail_next_open("no display");
        let (reply, rx) = collect();
        dispatcher.create(
            &mut registry,
            &factory,
            &mut windows,
            CreateRequest {
                call_id: CallId(2),
                type_tag: "shell".to_string(),
                config: ArgMap::new(),
            },
            reply,
        );
        let reply = rx.recv().unwrap();
        assert_eq!(reply.error, "InitError: Window creation failed: no display");
        assert_eq!(reply.result, ResultValue::Null);
    }
}
