//! HTTP 头部解析与操作工具模块
//!
//! 本模块提供了一系列用于解析 HTTP 头部的工具函数，包括 `Connection`、
//! `Content-Length`、`Transfer-Encoding` 等关键头部的处理。它被 `proto`
//! 模块在判定消息体长度和连接是否可复用（closing intent）时使用。
//!
//! 所有函数都是 `pub(crate)` 可见性，仅供 crate 内部使用。

use http::header::{HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::HeaderMap;

/// 检查 `Connection` 头部值中是否包含 `keep-alive` 指令。
///
/// HTTP/1.0 中，`Connection: keep-alive` 表示对端希望保持连接复用。
pub(crate) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_has(value, "keep-alive")
}

/// 检查 `Connection` 头部值中是否包含 `close` 指令。
pub(crate) fn connection_close(value: &HeaderValue) -> bool {
    connection_has(value, "close")
}

/// 检查 `Connection` 头部值中是否包含指定的连接选项。
///
/// `Connection` 头部可以包含多个逗号分隔的值（如 `keep-alive, Upgrade`），
/// 逐一做大小写不敏感的比较；非 ASCII 的值直接判为不包含。
fn connection_has(value: &HeaderValue, needle: &str) -> bool {
    match value.to_str() {
        Ok(s) => s
            .split(',')
            .any(|option| option.trim().eq_ignore_ascii_case(needle)),
        Err(_) => false,
    }
}

/// 从 `HeaderMap` 中解析 `Content-Length` 头部值。
///
/// 根据 HTTP 规范（RFC 7230 Section 3.3.2），`Content-Length` 允许重复
/// 出现（包括单个值内的逗号分隔形式），但所有出现的值必须解析一致；
/// 任何一个值无法解析、或与其余值不一致，整组视为无效，返回 `None`。
///
/// 注意：头部完全缺失时同样返回 `None`；调用方需要先用
/// `contains_key(CONTENT_LENGTH)` 区分"缺失"和"无效"。
pub(crate) fn content_length_parse_all(headers: &HeaderMap) -> Option<u64> {
    let mut agreed: Option<u64> = None;

    for value in headers.get_all(CONTENT_LENGTH) {
        let line = value.to_str().ok()?;
        for candidate in line.split(',') {
            let n = from_digits(candidate.trim().as_bytes())?;
            match agreed {
                None => agreed = Some(n),
                Some(prev) if prev == n => {}
                // 同名头部的值互相矛盾
                Some(_) => return None,
            }
        }
    }

    agreed
}

/// 从字节切片中安全地解析无符号 64 位整数。
///
/// 不走 `str::parse::<u64>()`：标准库的实现接受 `+5` 这样的符号前缀，
/// 而 HTTP 的数字字段只允许纯数字。逐字节累加并用 checked 算术防止
/// 溢出。
fn from_digits(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }

    let mut value: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value
            .checked_mul(10)?
            .checked_add(u64::from(b - b'0'))?;
    }

    Some(value)
}

/// 检查 `Transfer-Encoding` 头部是否使用了 chunked 编码。
///
/// 规范要求 chunked 必须是编码链的最后一环，所以只需要看最后一个
/// 头部值的最后一个编码。
pub(crate) fn transfer_encoding_is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .into_iter()
        .next_back()
        .map_or(false, is_chunked_)
}

/// 检查单个 `Transfer-Encoding` 头部值中，最后一个编码是否为 chunked。
fn is_chunked_(value: &HeaderValue) -> bool {
    match value.to_str() {
        // rsplit 的第一项就是逗号分隔列表的最后一个编码
        Ok(s) => s
            .rsplit(',')
            .next()
            .map_or(false, |encoding| encoding.trim().eq_ignore_ascii_case("chunked")),
        Err(_) => false,
    }
}
