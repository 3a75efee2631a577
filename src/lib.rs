//! # Exo Shell
//!
//! A desktop shell that runs application logic in an embedded QuickJS runtime
//! on its own thread, next to the host thread that owns the windows.
//!
//! ## Architecture
//!
//! - **Host thread**: owns every binding and every window. It drains the host
//!   task queue and dispatches calls from script.
//! - **Runtime thread**: owns the QuickJS runtime. It runs timers, promise
//!   jobs and tasks posted from other threads, and sleeps on a wake signal
//!   when idle.
//! - The two threads only exchange closures through task queues. Script
//!   values never cross the boundary; arguments and results are plain data.
//!
//! ### Example
//!
//! ```ignore
//! use exo_shell::{platform::headless::HeadlessWindowSystem, ShellApp, ShellConfig};
//!
//! let mut app = ShellApp::start(ShellConfig::default())?;
//! app.runtime().unwrap().eval(r#"exo.create("shell", {}, (err, id) => exo.quit())"#)?;
//! app.run_headless(&mut HeadlessWindowSystem::new(), std::time::Duration::from_millis(10));
//! ```
//!
//! ## Modules
//!
//! - [`core`]: errors, error reporting and logging
//! - [`config`]: configuration loading and validation
//! - [`bindings`]: host capabilities exposed to script
//! - [`scripting`]: the runtime thread and its primitives
//! - [`host`]: the host thread context
//! - [`platform`]: window system abstraction
//! - [`app`]: wiring everything together

/// Core infrastructure: errors, error reporting and logging
pub mod core;
/// Configuration system
pub mod config;
/// Host bindings and call dispatch
pub mod bindings;
/// Script runtime thread
pub mod scripting;
/// Host thread context
pub mod host;
/// Window system abstraction
pub mod platform;
/// Application wiring
pub mod app;

pub use app::{ShellApp, ShellAppBuilder};
pub use config::ShellConfig;
pub use core::{CallError, ShellError, ShellResult};
pub use host::{Host, HostHandle};
pub use scripting::{RuntimeHandle, RuntimeThread};
