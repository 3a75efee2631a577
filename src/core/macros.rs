//! 核心宏定义
//!
//! 提供统一的宏来减少代码重复

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// use exo_shell::impl_default;
///
/// struct MyStruct {
///     field1: u32,
///     field2: String,
/// }
///
/// impl_default!(MyStruct {
///     field1: 0,
///     field2: String::new(),
/// });
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    struct TestStruct {
        field1: u32,
        field2: String,
    }

    impl_default!(TestStruct {
        field1: 7,
        field2: "x".to_string(),
    });

    #[test]
    fn test_impl_default() {
        let s = TestStruct::default();
        assert_eq!(s.field1, 7);
        assert_eq!(s.field2, "x");
    }
}
