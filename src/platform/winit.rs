//! winit 桌面窗口系统
//!
//! 宿主运行在 winit 事件循环所在的主线程上。其他线程投递宿主任务时，
//! [`ProxyWaker`] 向事件循环发送用户事件，事件循环随后执行积压任务。

use std::path::Path;
use std::sync::{Arc, Mutex};

use winit::dpi::{LogicalSize, PhysicalPosition};
use winit::event::{Event, StartCause, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder, EventLoopProxy, EventLoopWindowTarget};
use winit::window::{Icon, Window, WindowBuilder};

use super::{ShellWindow, WindowKey, WindowParams, WindowSystem};
use crate::app::ShellApp;
use crate::config::ShellConfig;
use crate::core::{PlatformError, PlatformResult, ShellError, ShellResult};
use crate::scripting::Waker;

/// 事件循环的用户事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostWake {
    /// 宿主任务队列有新任务
    Tasks,
}

/// 通过事件循环代理唤醒宿主
pub struct ProxyWaker {
    proxy: Mutex<EventLoopProxy<HostWake>>,
}

impl ProxyWaker {
    pub fn new(proxy: EventLoopProxy<HostWake>) -> Self {
        Self {
            proxy: Mutex::new(proxy),
        }
    }
}

impl Waker for ProxyWaker {
    fn wake(&self) {
        let Ok(proxy) = self.proxy.lock() else {
            return;
        };
        if proxy.send_event(HostWake::Tasks).is_err() {
            tracing::debug!(target: "exo::winit", "event loop closed, wake dropped");
        }
    }
}

/// 读取窗口图标
pub fn load_icon(path: &Path) -> PlatformResult<Icon> {
    let image = image::open(path)
        .map_err(|e| PlatformError::Icon(format!("{}: {e}", path.display())))?
        .into_rgba8();
    let (width, height) = image.dimensions();
    Icon::from_rgba(image.into_raw(), width, height).map_err(|e| PlatformError::Icon(e.to_string()))
}

/// 在事件循环回调内部打开窗口
pub struct WinitWindowSystem<'a> {
    target: &'a EventLoopWindowTarget<HostWake>,
}

impl<'a> WinitWindowSystem<'a> {
    pub fn new(target: &'a EventLoopWindowTarget<HostWake>) -> Self {
        Self { target }
    }
}

impl WindowSystem for WinitWindowSystem<'_> {
    fn open(&mut self, params: &WindowParams) -> PlatformResult<Box<dyn ShellWindow>> {
        let mut builder = WindowBuilder::new()
            .with_title(params.title.clone())
            .with_inner_size(LogicalSize::new(
                f64::from(params.width),
                f64::from(params.height),
            ))
            .with_decorations(params.has_frame)
            .with_visible(false);

        if let Some(path) = &params.icon_path {
            match load_icon(path) {
                Ok(icon) => builder = builder.with_window_icon(Some(icon)),
                // 图标只影响外观，失败时继续创建窗口
                Err(err) => tracing::warn!(target: "exo::winit", error = %err, "window icon not loaded"),
            }
        }

        let window = builder
            .build(self.target)
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;
        Ok(Box::new(WinitShellWindow {
            key: WindowKey(u64::from(window.id())),
            window: Some(window),
        }))
    }
}

/// winit 窗口，关闭即释放底层窗口
pub struct WinitShellWindow {
    key: WindowKey,
    window: Option<Window>,
}

impl WinitShellWindow {
    fn window(&self) -> PlatformResult<&Window> {
        self.window.as_ref().ok_or(PlatformError::WindowClosed)
    }
}

impl ShellWindow for WinitShellWindow {
    fn key(&self) -> WindowKey {
        self.key
    }

    fn show(&mut self) -> PlatformResult<()> {
        self.window()?.set_visible(true);
        Ok(())
    }

    fn focus(&mut self, focus: bool) -> PlatformResult<()> {
        let window = self.window()?;
        if focus {
            window.focus_window();
        }
        Ok(())
    }

    fn maximize(&mut self) -> PlatformResult<()> {
        self.window()?.set_maximized(true);
        Ok(())
    }

    fn unmaximize(&mut self) -> PlatformResult<()> {
        self.window()?.set_maximized(false);
        Ok(())
    }

    fn minimize(&mut self) -> PlatformResult<()> {
        self.window()?.set_minimized(true);
        Ok(())
    }

    fn restore(&mut self) -> PlatformResult<()> {
        let window = self.window()?;
        window.set_minimized(false);
        window.set_maximized(false);
        Ok(())
    }

    fn set_title(&mut self, title: &str) -> PlatformResult<()> {
        self.window()?.set_title(title);
        Ok(())
    }

    fn close(&mut self) -> PlatformResult<()> {
        self.window.take().map(drop).ok_or(PlatformError::WindowClosed)
    }

    fn is_closed(&self) -> bool {
        self.window.is_none()
    }

    fn size(&self) -> PlatformResult<(u32, u32)> {
        let size = self.window()?.inner_size();
        Ok((size.width, size.height))
    }

    fn position(&self) -> PlatformResult<(i32, i32)> {
        let position = self
            .window()?
            .outer_position()
            .map_err(|e| PlatformError::NotSupported(e.to_string()))?;
        Ok((position.x, position.y))
    }

    fn move_to(&mut self, x: i32, y: i32) -> PlatformResult<()> {
        self.window()?
            .set_outer_position(PhysicalPosition::new(x, y));
        Ok(())
    }
}

/// 在当前线程上运行 winit 事件循环直到脚本请求退出
///
/// 必须在主线程上调用。
pub fn run_event_loop(config: ShellConfig) -> ShellResult<()> {
    let event_loop = EventLoopBuilder::<HostWake>::with_user_event()
        .build()
        .map_err(|e| ShellError::EventLoop(e.to_string()))?;
    let waker: Arc<dyn Waker> = Arc::new(ProxyWaker::new(event_loop.create_proxy()));
    let mut app = Some(ShellApp::builder(config).waker(waker).start()?);

    let result = event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Wait);

        if let Event::LoopExiting = event {
            if let Some(mut shell) = app.take() {
                shell.shutdown();
            }
            return;
        }
        let Some(shell) = app.as_mut() else {
            return;
        };

        match event {
            Event::NewEvents(StartCause::Init) | Event::UserEvent(HostWake::Tasks) => {
                shell.run_pending(&mut WinitWindowSystem::new(elwt));
            }
            Event::WindowEvent {
                window_id,
                event: WindowEvent::CloseRequested,
            } => {
                shell
                    .host_mut()
                    .window_closed(WindowKey(u64::from(window_id)));
            }
            _ => {}
        }

        if shell.host().exit_requested() {
            elwt.exit();
        }
    });

    result.map_err(|e| ShellError::EventLoop(format!("Event loop error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_icon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icon.png");
        image::RgbaImage::new(4, 4).save(&path).unwrap();
        assert!(load_icon(&path).is_ok());

        let missing = dir.path().join("missing.png");
        assert!(matches!(load_icon(&missing), Err(PlatformError::Icon(_))));
    }
}
