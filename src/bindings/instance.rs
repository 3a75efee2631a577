//! Binding instances and their per-call plumbing.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use super::protocol::BindingId;
use super::value::{ArgMap, ResultValue};
use crate::core::{CallError, CallResult};
use crate::host::{Host, HostHandle};
use crate::platform::{WindowKey, WindowSystem};

/// Completion callback for a single call.
pub type CallCallback = Box<dyn FnOnce(CallResult<ResultValue>) + Send>;

/// A host-owned capability object addressable from script by id.
///
/// Instances live on the host thread only and are never `Send`-bounded.
pub trait BindingInstance: Any {
    /// The type tag this instance was constructed from.
    fn type_tag(&self) -> &'static str;

    /// Handles one call.
    ///
    /// The responder must be completed exactly once, either before returning or
    /// later from a deferred host task. Unrecognized methods should answer with
    /// [`CallContext::unknown_method`].
    fn call(&mut self, method: &str, args: &ArgMap, ctx: &mut CallContext, responder: Responder);

    /// The window this binding owns, if any.
    fn window_key(&self) -> Option<WindowKey> {
        None
    }

    /// Releases host resources. Called once, when the registry drops the binding.
    fn dispose(&mut self) {}

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Clone)]
pub(crate) struct ResponderSlot(Arc<Mutex<Option<CallCallback>>>);

impl ResponderSlot {
    fn take(&self) -> Option<CallCallback> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Completes the call unless it was already completed. Returns whether it fired.
    pub(crate) fn fire(&self, outcome: CallResult<ResultValue>) -> bool {
        match self.take() {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }
}

/// Single-shot reply callback handed to [`BindingInstance::call`].
///
/// Dropping it without answering completes the call with `BindingGone`, which
/// is what happens when a binding is disposed with work still parked.
pub struct Responder {
    binding_id: BindingId,
    slot: ResponderSlot,
}

impl Responder {
    pub fn new(binding_id: BindingId, callback: CallCallback) -> Self {
        Self {
            binding_id,
            slot: ResponderSlot(Arc::new(Mutex::new(Some(callback)))),
        }
    }

    pub fn binding_id(&self) -> BindingId {
        self.binding_id
    }

    pub fn respond(self, outcome: CallResult<ResultValue>) {
        self.slot.fire(outcome);
    }

    pub fn ok(self, value: impl Into<ResultValue>) {
        self.respond(Ok(value.into()));
    }

    pub fn fail(self, error: CallError) {
        self.respond(Err(error));
    }

    pub(crate) fn slot(&self) -> ResponderSlot {
        self.slot.clone()
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("binding_id", &self.binding_id)
            .finish_non_exhaustive()
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if self.slot.fire(Err(CallError::BindingGone(self.binding_id))) {
            tracing::debug!(
                target: "exo::dispatch",
                binding = %self.binding_id,
                "responder dropped unanswered"
            );
        }
    }
}

/// Per-call context passed to bindings.
pub struct CallContext {
    binding_id: BindingId,
    strict_methods: bool,
    host: HostHandle,
}

impl CallContext {
    pub fn new(binding_id: BindingId, strict_methods: bool, host: HostHandle) -> Self {
        Self {
            binding_id,
            strict_methods,
            host,
        }
    }

    pub fn binding_id(&self) -> BindingId {
        self.binding_id
    }

    /// Runs `job` on a later host turn.
    ///
    /// If the host is already gone the job is dropped, and any responder it
    /// captured answers with `BindingGone`.
    #[track_caller]
    pub fn defer<F>(&self, job: F)
    where
        F: FnOnce(&mut Host, &mut dyn WindowSystem) + Send + 'static,
    {
        if self.host.post(job).is_err() {
            tracing::debug!(target: "exo::dispatch", binding = %self.binding_id, "host closed, deferred work dropped");
        }
    }

    /// The answer for a method the binding does not recognize.
    pub fn unknown_method(&self, method: &str) -> CallResult<ResultValue> {
        if self.strict_methods {
            Err(CallError::UnknownMethod(method.to_string()))
        } else {
            tracing::debug!(target: "exo::dispatch", binding = %self.binding_id, method, "ignoring unknown method");
            Ok(ResultValue::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn recording_responder() -> (Responder, mpsc::Receiver<CallResult<ResultValue>>) {
        let (tx, rx) = mpsc::channel();
        let responder = Responder::new(
            BindingId(3),
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );
        (responder, rx)
    }

    #[test]
    fn test_responder_fires_once() {
        let (responder, rx) = recording_responder();
        responder.ok(5);
        assert_eq!(rx.recv().unwrap(), Ok(ResultValue::Int(5)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_responder_reports_binding_gone() {
        let (responder, rx) = recording_responder();
        drop(responder);
        assert_eq!(rx.recv().unwrap(), Err(CallError::BindingGone(BindingId(3))));
    }

    #[test]
    fn test_slot_does_not_double_fire() {
        let (responder, rx) = recording_responder();
        let slot = responder.slot();
        responder.fail(CallError::HostOperation("boom".to_string()));
        assert!(!slot.fire(Ok(ResultValue::Null)));
        assert!(matches!(rx.recv().unwrap(), Err(CallError::HostOperation(_))));
        assert!(rx.try_recv().is_err());
    }
}
