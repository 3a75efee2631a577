//! Host bindings
//!
//! Host-owned capability objects that script addresses by integer id, and the
//! plumbing that routes calls to them.
//!
//! ```text
//!  runtime thread                          host thread
//! ┌──────────────────┐   CallMessage     ┌──────────────────────────────┐
//! │ exo.call(...)    │ ────────────────▶ │ CallDispatcher               │
//! │ PendingCalls     │                   │   └─ BindingRegistry         │
//! │   (by call_id)   │ ◀──────────────── │        └─ BindingInstance    │
//! └──────────────────┘   ReplyMessage    └──────────────────────────────┘
//! ```
//!
//! - [`value`]: the data that crosses the boundary
//! - [`protocol`]: the messages themselves
//! - [`instance`]: the binding trait, responders and call context
//! - [`factory`] / [`registry`]: construction and lookup by id
//! - [`dispatcher`]: routing and reply marshalling
//! - [`shell`]: the built-in window binding

pub mod dispatcher;
pub mod factory;
pub mod instance;
pub mod protocol;
pub mod registry;
pub mod shell;
pub mod value;

pub use dispatcher::{CallDispatcher, ReplyFn};
pub use factory::{BindingConstructor, BindingFactory};
pub use instance::{BindingInstance, CallCallback, CallContext, Responder};
pub use protocol::{BindingId, CallId, CallMessage, CreateRequest, ReplyMessage};
pub use registry::BindingRegistry;
pub use shell::ShellBinding;
pub use value::{ArgMap, ArgValue, ConfigMap, ResultValue};
