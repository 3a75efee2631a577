//! 核心工具函数

use std::any::Any;

/// 获取当前Unix时间戳（秒）
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// 从 panic 负载中提取可读消息
///
/// `panic!` 的负载通常是 `&'static str` 或 `String`，其余类型给出通用描述。
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
