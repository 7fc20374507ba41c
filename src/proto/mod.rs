//! HTTP 消息编解码相关的核心组件模块。
//!
//! 本模块定义了消息体长度的统一表示 [`BodySize`]，并组织 HTTP/1.x 的
//! 编解码实现（`h1` 子模块）。传输层引擎只通过这里暴露的操作接触字节：
//! 请求头序列化、请求体封帧、响应头解析、响应体解帧，以及连接关闭
//! 意图（closing intent）的判定。

use std::fmt;

pub(crate) mod h1;

/// HTTP 消息体的长度分类。
///
/// 本类型使用一个 `u64` 值和哨兵值来编码四种状态：
/// - `0`：没有消息体
/// - `1..=(u64::MAX - 2)`：精确的字节长度（Content-Length）
/// - `u64::MAX - 1`：分块传输编码（CHUNKED），长度在传输前未知
/// - `u64::MAX`：读到连接关闭为止（UNBOUNDED），意味着连接不可复用
///
/// 这种设计利用 `u64` 的最大值范围来编码特殊状态，避免了使用枚举带来
/// 的额外内存开销。
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct BodySize(u64);

/// Content-Length 允许的最大值。
///
/// `u64::MAX` 和 `u64::MAX - 1` 被用作哨兵值，实际允许的最大精确长度
/// 为 `u64::MAX - 2`。对实际应用而言这个限制不会被触及。
const MAX_LEN: u64 = u64::MAX - 2;

impl BodySize {
    /// 没有消息体。
    pub(crate) const ZERO: BodySize = BodySize(0);
    /// 分块传输编码：长度在传输前未知。
    pub(crate) const CHUNKED: BodySize = BodySize(u64::MAX - 1);
    /// 读到连接关闭为止。隐含本次交换之后连接必须关闭。
    pub(crate) const UNBOUNDED: BodySize = BodySize(u64::MAX);

    /// 检查 `u64` 值是否在 content-length 允许的范围内并构造精确长度。
    pub(crate) fn checked_new(len: u64) -> Result<Self, crate::error::Parse> {
        if len <= MAX_LEN {
            Ok(BodySize(len))
        } else {
            warn!("content-length bigger than maximum: {} > {}", len, MAX_LEN);
            Err(crate::error::Parse::content_length_invalid())
        }
    }

    /// 将内部值直接作为 content-length 返回，不做额外检查。
    ///
    /// **注意**：仅应在已确认当前值不是 `CHUNKED` 或 `UNBOUNDED`
    /// 后才调用此方法。
    #[inline]
    pub(crate) fn danger_len(self) -> u64 {
        debug_assert!(self.0 < Self::CHUNKED.0);
        self.0
    }
}

/// 对于哨兵值显示可读的名称，对于精确长度显示具体数值。
impl fmt::Debug for BodySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BodySize::UNBOUNDED => f.write_str("UNBOUNDED"),
            BodySize::CHUNKED => f.write_str("CHUNKED"),
            BodySize(n) => f.debug_tuple("BodySize").field(&n).finish(),
        }
    }
}

impl fmt::Display for BodySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BodySize::UNBOUNDED => f.write_str("close-delimited"),
            BodySize::CHUNKED => f.write_str("chunked encoding"),
            BodySize::ZERO => f.write_str("empty"),
            BodySize(n) => write!(f, "content-length ({} bytes)", n),
        }
    }
}
