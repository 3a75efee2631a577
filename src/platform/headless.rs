//! 无界面窗口系统
//!
//! 窗口状态保存在共享的内存表里，测试可以随时取快照检查，也可以注入失败。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ShellWindow, WindowKey, WindowParams, WindowSystem};
use crate::core::{PlatformError, PlatformResult};

/// 单个无界面窗口的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessWindowState {
    pub params: WindowParams,
    pub title: String,
    pub size: (u32, u32),
    pub position: (i32, i32),
    pub visible: bool,
    pub focused: bool,
    pub maximized: bool,
    pub minimized: bool,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_key: u64,
    windows: BTreeMap<WindowKey, HeadlessWindowState>,
    fail_next_open: Option<String>,
    failing: BTreeMap<WindowKey, String>,
}

/// 内存窗口系统，克隆后共享同一份状态
#[derive(Debug, Clone, Default)]
pub struct HeadlessWindowSystem {
    state: Arc<Mutex<HeadlessState>>,
}

fn lock(state: &Mutex<HeadlessState>) -> MutexGuard<'_, HeadlessState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HeadlessWindowSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// 窗口状态快照
    pub fn snapshot(&self, key: WindowKey) -> Option<HeadlessWindowState> {
        lock(&self.state).windows.get(&key).cloned()
    }

    /// 所有打开过的窗口（包括已关闭的）
    pub fn keys(&self) -> Vec<WindowKey> {
        lock(&self.state).windows.keys().copied().collect()
    }

    /// 让下一次 `open` 失败
    pub fn fail_next_open(&self, message: impl Into<String>) {
        lock(&self.state).fail_next_open = Some(message.into());
    }

    /// 让指定窗口之后的所有操作失败
    pub fn fail_operations(&self, key: WindowKey, message: impl Into<String>) {
        lock(&self.state).failing.insert(key, message.into());
    }
}

impl WindowSystem for HeadlessWindowSystem {
    fn open(&mut self, params: &WindowParams) -> PlatformResult<Box<dyn ShellWindow>> {
        let mut state = lock(&self.state);
        if let Some(message) = state.fail_next_open.take() {
            return Err(PlatformError::WindowCreation(message));
        }

        state.next_key += 1;
        let key = WindowKey(state.next_key);
        state.windows.insert(
            key,
            HeadlessWindowState {
                params: params.clone(),
                title: params.title.clone(),
                size: (params.width, params.height),
                position: (0, 0),
                visible: false,
                focused: false,
                maximized: false,
                minimized: false,
                closed: false,
            },
        );
        tracing::debug!(target: "exo::platform", key = key.0, "headless window opened");

        Ok(Box::new(HeadlessWindow {
            key,
            state: Arc::clone(&self.state),
        }))
    }
}

/// 无界面窗口句柄
#[derive(Debug)]
pub struct HeadlessWindow {
    key: WindowKey,
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessWindow {
    fn update<R>(&self, f: impl FnOnce(&mut HeadlessWindowState) -> R) -> PlatformResult<R> {
        let mut state = lock(&self.state);
        if let Some(message) = state.failing.get(&self.key) {
            return Err(PlatformError::Operation(message.clone()));
        }
        let window = state
            .windows
            .get_mut(&self.key)
            .ok_or(PlatformError::WindowClosed)?;
        if window.closed {
            return Err(PlatformError::WindowClosed);
        }
        Ok(f(window))
    }
}

impl ShellWindow for HeadlessWindow {
    fn key(&self) -> WindowKey {
        self.key
    }

    fn show(&mut self) -> PlatformResult<()> {
        self.update(|w| w.visible = true)
    }

    fn focus(&mut self, focus: bool) -> PlatformResult<()> {
        self.update(|w| w.focused = focus)
    }

    fn maximize(&mut self) -> PlatformResult<()> {
        self.update(|w| {
            w.maximized = true;
            w.minimized = false;
        })
    }

    fn unmaximize(&mut self) -> PlatformResult<()> {
        self.update(|w| w.maximized = false)
    }

    fn minimize(&mut self) -> PlatformResult<()> {
        self.update(|w| w.minimized = true)
    }

    fn restore(&mut self) -> PlatformResult<()> {
        self.update(|w| {
            w.minimized = false;
            w.maximized = false;
        })
    }

    fn set_title(&mut self, title: &str) -> PlatformResult<()> {
        self.update(|w| w.title = title.to_string())
    }

    fn close(&mut self) -> PlatformResult<()> {
        self.update(|w| {
            w.closed = true;
            w.visible = false;
            w.focused = false;
        })
    }

    fn is_closed(&self) -> bool {
        lock(&self.state)
            .windows
            .get(&self.key)
            .map_or(true, |w| w.closed)
    }

    fn size(&self) -> PlatformResult<(u32, u32)> {
        self.update(|w| w.size)
    }

    fn position(&self) -> PlatformResult<(i32, i32)> {
        self.update(|w| w.position)
    }

    fn move_to(&mut self, x: i32, y: i32) -> PlatformResult<()> {
        self.update(|w| w.position = (x, y))
    }
}

impl Drop for HeadlessWindow {
    fn drop(&mut self) {
        // 句柄释放等同于窗口销毁
        if let Some(window) = lock(&self.state).windows.get_mut(&self.key) {
            window.closed = true;
            window.visible = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WindowParams {
        WindowParams {
            title: "T".to_string(),
            width: 1024,
            height: 768,
            ..WindowParams::default()
        }
    }

    #[test]
    fn test_window_lifecycle() {
        let mut system = HeadlessWindowSystem::new();
        let mut window = system.open(&params()).unwrap();
        let key = window.key();

        window.show().unwrap();
        window.maximize().unwrap();
        window.move_to(10, -20).unwrap();
        assert_eq!(window.size().unwrap(), (1024, 768));
        assert_eq!(window.position().unwrap(), (10, -20));

        let snapshot = system.snapshot(key).unwrap();
        assert!(snapshot.visible);
        assert!(snapshot.maximized);
        assert_eq!(snapshot.title, "T");

        window.close().unwrap();
        assert!(window.is_closed());
        assert_eq!(window.show(), Err(PlatformError::WindowClosed));
    }

    #[test]
    fn test_failure_injection() {
        let mut system = HeadlessWindowSystem::new();
        system.fail_next_open("no display");
        assert!(matches!(
            system.open(&params()),
            Err(PlatformError::WindowCreation(_))
        ));

        let mut window = system.open(&params()).unwrap();
        system.fail_operations(window.key(), "denied");
        assert_eq!(
            window.minimize(),
            Err(PlatformError::Operation("denied".to_string()))
        );
    }

    #[test]
    fn test_drop_closes() {
        let mut system = HeadlessWindowSystem::new();
        let window = system.open(&params()).unwrap();
        let key = window.key();
        drop(window);
        assert!(system.snapshot(key).unwrap().closed);
    }
}
