//! The `"shell"` window binding.

use std::any::Any;
use std::path::PathBuf;

use super::instance::{BindingInstance, CallContext, Responder};
use super::protocol::BindingId;
use super::value::{ArgMap, ConfigMap, ResultValue};
use crate::core::{CallError, CallResult};
use crate::platform::{ShellWindow, WindowKey, WindowParams, WindowSystem};

const DEFAULT_WIDTH: i64 = 800;
const DEFAULT_HEIGHT: i64 = 600;

/// Reads window parameters from a construction config.
///
/// Unknown keys are ignored; wrong types and non-positive sizes fall back to
/// the defaults.
pub fn window_params(config: &ConfigMap) -> WindowParams {
    let dimension = |key: &str, default: i64| -> u32 {
        match config.get_int_or(key, default) {
            v if v > 0 => u32::try_from(v).unwrap_or(u32::MAX),
            _ => default as u32,
        }
    };
    let icon_path = config.get_str_or("icon_path", "");

    WindowParams {
        title: config.get_str_or("title", ""),
        root_url: config.get_str_or("root_url", ""),
        width: dimension("size.width", DEFAULT_WIDTH),
        height: dimension("size.height", DEFAULT_HEIGHT),
        icon_path: (!icon_path.is_empty()).then(|| PathBuf::from(icon_path)),
        has_frame: config.get_bool_or("has_frame", true),
    }
}

/// A top-level window exposed to script.
pub struct ShellBinding {
    id: BindingId,
    root_url: String,
    title: String,
    window: Box<dyn ShellWindow>,
}

impl ShellBinding {
    pub const TYPE_TAG: &'static str = "shell";

    /// Constructor registered with the binding factory.
    pub fn create(
        id: BindingId,
        config: &ConfigMap,
        windows: &mut dyn WindowSystem,
    ) -> CallResult<Box<dyn BindingInstance>> {
        let params = window_params(config);
        let window = windows
            .open(&params)
            .map_err(|e| CallError::Init(e.to_string()))?;
        tracing::info!(
            target: "exo::shell",
            binding = %id,
            window = window.key().0,
            root_url = %params.root_url,
            "shell window opened"
        );

        Ok(Box::new(Self {
            id,
            root_url: params.root_url,
            title: params.title,
            window,
        }))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    /// Closes the window now. Used by the deferred half of `close`.
    pub fn close_window(&mut self) -> CallResult<ResultValue> {
        self.window.close()?;
        tracing::debug!(target: "exo::shell", binding = %self.id, "shell window closed");
        Ok(ResultValue::Null)
    }

    fn invoke(&mut self, method: &str, args: &ArgMap, ctx: &CallContext) -> CallResult<ResultValue> {
        match method {
            "show" => self.window.show()?,
            "focus" => self.window.focus(args.get_bool_or("focus", true))?,
            "maximize" => self.window.maximize()?,
            "unmaximize" => self.window.unmaximize()?,
            "minimize" => self.window.minimize()?,
            "restore" => self.window.restore()?,
            "set_title" => {
                let title = args.get_str_or("title", "");
                self.window.set_title(&title)?;
                self.title = title;
            }
            "move" => {
                let x = clamp_coordinate(args.get_int_or("x", 0));
                let y = clamp_coordinate(args.get_int_or("y", 0));
                self.window.move_to(x, y)?;
            }
            "title" => return Ok(ResultValue::map([("title", self.title.as_str())])),
            "root_url" => return Ok(ResultValue::map([("root_url", self.root_url.as_str())])),
            "is_closed" => return Ok(ResultValue::map([("is_closed", self.window.is_closed())])),
            "size" => {
                let (width, height) = self.window.size()?;
                return Ok(ResultValue::map([("size.width", width), ("size.height", height)]));
            }
            "position" => {
                let (x, y) = self.window.position()?;
                return Ok(ResultValue::map([("position.x", x), ("position.y", y)]));
            }
            _ => return ctx.unknown_method(method),
        }
        Ok(ResultValue::Null)
    }
}

fn clamp_coordinate(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

impl BindingInstance for ShellBinding {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn call(&mut self, method: &str, args: &ArgMap, ctx: &mut CallContext, responder: Responder) {
        if method == "close" {
            // completes on the next host turn
            let id = self.id;
            ctx.defer(move |host, _windows| {
                let outcome = host.with_binding_mut(id, |shell: &mut ShellBinding| shell.close_window());
                responder.respond(outcome);
            });
            return;
        }

        responder.respond(self.invoke(method, args, ctx));
    }

    fn window_key(&self) -> Option<WindowKey> {
        Some(self.window.key())
    }

    fn dispose(&mut self) {
        if !self.window.is_closed() {
            if let Err(err) = self.window.close() {
                tracing::warn!(target: "exo::shell", binding = %self.id, error = %err, "failed to close window on dispose");
            }
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
