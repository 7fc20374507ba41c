//! 日志追踪（tracing）宏模块
//!
//! 本模块为 strand 提供了统一的日志基础设施。它对 `tracing` crate 的常用
//! 日志宏进行了条件包装，使得：
//!
//! 1. 当 `tracing` feature 启用时，宏会展开为实际的 `tracing::*` 调用
//! 2. 当 `tracing` feature 未启用时，宏展开为空操作（零成本抽象）
//!
//! 本模块通过 `#[macro_use]` 在 `lib.rs` 中最先被引入，使得整个 crate 内
//! 的代码都可以直接使用 `trace!`、`debug!`、`warn!` 等宏，而无需关心
//! `tracing` feature 是否启用。

// 为了完整性，即使某些宏当前未被使用，也提供对常用日志级别的封装。
#![allow(unused_macros)]

/// `trace!` —— 追踪级别日志宏
///
/// 最细粒度的日志级别，用于追踪连接生命周期的每一个步骤
/// （池命中/未命中、释放决策、回收与关闭）。
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::trace!($($arg)+);
        }
    }
}

/// `debug!` —— 调试级别日志宏
///
/// 用于记录有助于调试但在正常运行时不需要的信息，
/// 例如请求体写入失败、连接被 reaper 回收等。
macro_rules! debug {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!($($arg)+);
        }
    }
}

/// `warn!` —— 警告级别日志宏
macro_rules! warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::warn!($($arg)+);
        }
    }
}

/// `error!` —— 错误级别日志宏
macro_rules! error {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::error!($($arg)+);
        }
    }
}
