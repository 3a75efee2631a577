//! 平台窗口抽象
//!
//! 窗口绑定只通过这里的两个 trait 接触窗口系统：
//! - [`WindowSystem`] 负责按参数打开窗口
//! - [`ShellWindow`] 是单个窗口的生命周期操作
//!
//! 实现：
//! - [`winit`] 桌面窗口（由 winit 事件循环驱动）
//! - [`headless`] 内存窗口，用于测试和无界面运行

pub mod headless;
pub mod winit;

use std::path::PathBuf;

use crate::core::PlatformResult;

/// 窗口在其窗口系统内的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowKey(pub u64);

/// 打开窗口所需的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowParams {
    /// 窗口标题
    pub title: String,
    /// 窗口内容的根地址，窗口系统只记录不加载
    pub root_url: String,
    /// 内容区宽度（逻辑像素）
    pub width: u32,
    /// 内容区高度（逻辑像素）
    pub height: u32,
    /// 窗口图标
    pub icon_path: Option<PathBuf>,
    /// 是否带系统边框
    pub has_frame: bool,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            title: String::new(),
            root_url: String::new(),
            width: 800,
            height: 600,
            icon_path: None,
            has_frame: true,
        }
    }
}

/// 单个窗口的生命周期操作
///
/// 只在宿主线程上使用，因此不要求 `Send`。窗口关闭后，除 `is_closed`
/// 之外的操作都返回 [`PlatformError::WindowClosed`](crate::core::PlatformError::WindowClosed)。
pub trait ShellWindow {
    fn key(&self) -> WindowKey;
    fn show(&mut self) -> PlatformResult<()>;
    /// `false` 表示放弃焦点，不支持的平台上忽略
    fn focus(&mut self, focus: bool) -> PlatformResult<()>;
    fn maximize(&mut self) -> PlatformResult<()>;
    fn unmaximize(&mut self) -> PlatformResult<()>;
    fn minimize(&mut self) -> PlatformResult<()>;
    fn restore(&mut self) -> PlatformResult<()>;
    fn set_title(&mut self, title: &str) -> PlatformResult<()>;
    fn close(&mut self) -> PlatformResult<()>;
    fn is_closed(&self) -> bool;
    /// 内容区尺寸 `(width, height)`
    fn size(&self) -> PlatformResult<(u32, u32)>;
    /// 窗口左上角位置 `(x, y)`
    fn position(&self) -> PlatformResult<(i32, i32)>;
    fn move_to(&mut self, x: i32, y: i32) -> PlatformResult<()>;
}

/// 窗口系统
pub trait WindowSystem {
    fn open(&mut self, params: &WindowParams) -> PlatformResult<Box<dyn ShellWindow>>;
}
