use super::ConfigResult;
use crate::impl_default;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 调用分发配置
///
/// 两个选项默认都关闭，保持未知方法静默返回空结果、调用无超时的行为。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 未知方法名返回 `UnknownMethod` 错误，而不是空结果
    pub strict_methods: bool,

    /// 调用超时（毫秒，0 表示不超时）
    pub call_timeout_ms: u64,
}

impl_default!(DispatchConfig {
    strict_methods: false,
    call_timeout_ms: 0,
});

impl DispatchConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_disabled_by_default() {
        assert_eq!(DispatchConfig::default().call_timeout(), None);

        let config = DispatchConfig {
            call_timeout_ms: 250,
            ..DispatchConfig::default()
        };
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(250)));
    }
}
