//! 响应体的解帧读取。
//!
//! [`Decoder`] 按照响应头判定的 [`BodySize`] 从连接的读半边还原出
//! 恰好一个消息体的字节，不多读一个字节（chunked 的终止序列除外，它
//! 属于消息体的封帧）。三种模式：
//!
//! - `Length(n)`：精确 n 字节；读满之前遇到 EOF 是 `IncompleteMessage`
//! - `Chunked`：分块编码，处理分块扩展与 trailer（trailer 被跳过）
//! - `Eof`：读到连接关闭为止（HTTP/1.0 风格的 close-delimited 响应）
//!
//! 解码器是 poll 形式的，由响应体流的 `poll_read` 驱动。

use std::io;
use std::task::{Context, Poll};

use futures_core::ready;
use tokio::io::ReadBuf;

use crate::common::io::Reader;
use crate::error::Parse;
use crate::proto::BodySize;
use crate::Error;

/// 响应体解码器。
#[derive(Debug)]
pub(crate) enum Decoder {
    /// 还剩多少字节没有读
    Length(u64),
    /// chunked 编码的状态机
    Chunked(ChunkedState),
    /// 读到 EOF 为止；`true` 表示已经见到 EOF
    Eof(bool),
}

/// chunked 解码状态。
#[derive(Debug, PartialEq)]
pub(crate) enum ChunkedState {
    /// 等待分块大小行
    Size,
    /// 正在读分块数据（剩余字节数）
    Data(u64),
    /// 等待分块数据之后的 CRLF
    DataCrlf,
    /// 终止分块之后：逐行跳过 trailer，直到空行
    Trailer,
    /// 消息体完整结束
    Done,
}

impl Decoder {
    pub(crate) fn new(size: BodySize) -> Decoder {
        if size == BodySize::CHUNKED {
            Decoder::Chunked(ChunkedState::Size)
        } else if size == BodySize::UNBOUNDED {
            Decoder::Eof(false)
        } else {
            Decoder::Length(size.danger_len())
        }
    }

    /// 消息体是否已经干净地读完。
    pub(crate) fn is_eof(&self) -> bool {
        matches!(
            self,
            Decoder::Length(0) | Decoder::Chunked(ChunkedState::Done) | Decoder::Eof(true)
        )
    }

    /// 把下一段消息体字节解码进 `dst`，返回写入的字节数。
    ///
    /// 返回 `Ok(0)`（且 `dst` 不为空）表示消息体已经结束。
    pub(crate) fn poll_decode(
        &mut self,
        cx: &mut Context<'_>,
        rd: &mut Reader,
        dst: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<usize>> {
        match self {
            Decoder::Length(ref mut remaining) => {
                if *remaining == 0 {
                    return Poll::Ready(Ok(0));
                }
                if rd.buffer().is_empty() {
                    let n = ready!(rd.poll_fill(cx))?;
                    if n == 0 {
                        return Poll::Ready(Err(incomplete_body()));
                    }
                }
                let n = copy_to(rd, dst, *remaining);
                *remaining -= n as u64;
                Poll::Ready(Ok(n))
            }

            Decoder::Chunked(ref mut state) => poll_chunked(state, cx, rd, dst),

            Decoder::Eof(ref mut seen) => {
                if *seen {
                    return Poll::Ready(Ok(0));
                }
                if rd.buffer().is_empty() {
                    let n = ready!(rd.poll_fill(cx))?;
                    if n == 0 {
                        *seen = true;
                        return Poll::Ready(Ok(0));
                    }
                }
                Poll::Ready(Ok(copy_to(rd, dst, u64::MAX)))
            }
        }
    }
}

/// 把缓冲区中最多 `limit` 个字节搬进 `dst`，返回搬运的字节数。
fn copy_to(rd: &mut Reader, dst: &mut ReadBuf<'_>, limit: u64) -> usize {
    let n = rd
        .buffer()
        .len()
        .min(dst.remaining())
        .min(usize::try_from(limit).unwrap_or(usize::MAX));
    dst.put_slice(&rd.buffer()[..n]);
    rd.consume(n);
    n
}

fn poll_chunked(
    state: &mut ChunkedState,
    cx: &mut Context<'_>,
    rd: &mut Reader,
    dst: &mut ReadBuf<'_>,
) -> Poll<io::Result<usize>> {
    loop {
        match state {
            ChunkedState::Size => {
                let line = ready!(poll_line(cx, rd))?;
                let size = parse_chunk_size(&line)?;
                *state = if size == 0 {
                    ChunkedState::Trailer
                } else {
                    ChunkedState::Data(size)
                };
            }

            ChunkedState::Data(ref mut remaining) => {
                if rd.buffer().is_empty() {
                    let n = ready!(rd.poll_fill(cx))?;
                    if n == 0 {
                        return Poll::Ready(Err(incomplete_body()));
                    }
                }
                let n = copy_to(rd, dst, *remaining);
                *remaining -= n as u64;
                if *remaining == 0 {
                    *state = ChunkedState::DataCrlf;
                }
                return Poll::Ready(Ok(n));
            }

            ChunkedState::DataCrlf => {
                while rd.buffer().len() < 2 {
                    let n = ready!(rd.poll_fill(cx))?;
                    if n == 0 {
                        return Poll::Ready(Err(incomplete_body()));
                    }
                }
                if &rd.buffer()[..2] != b"\r\n" {
                    return Poll::Ready(Err(invalid_chunk()));
                }
                rd.consume(2);
                *state = ChunkedState::Size;
            }

            ChunkedState::Trailer => {
                let line = ready!(poll_line(cx, rd))?;
                if line.is_empty() {
                    *state = ChunkedState::Done;
                    return Poll::Ready(Ok(0));
                }
                // 忽略 trailer 字段
            }

            ChunkedState::Done => return Poll::Ready(Ok(0)),
        }
    }
}

/// 从缓冲区里取出一行（不含 CRLF）。行无法放进缓冲区时报错。
fn poll_line(cx: &mut Context<'_>, rd: &mut Reader) -> Poll<io::Result<Vec<u8>>> {
    loop {
        if let Some(pos) = rd.buffer().windows(2).position(|w| w == b"\r\n") {
            let line = rd.buffer()[..pos].to_vec();
            rd.consume(pos + 2);
            return Poll::Ready(Ok(line));
        }
        if rd.is_full() {
            return Poll::Ready(Err(invalid_chunk()));
        }
        let n = ready!(rd.poll_fill(cx))?;
        if n == 0 {
            return Poll::Ready(Err(incomplete_body()));
        }
    }
}

/// 解析十六进制的分块大小行，分块扩展（`;` 之后）被忽略。
fn parse_chunk_size(line: &[u8]) -> io::Result<u64> {
    let digits = match line.iter().position(|&b| b == b';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let digits = trim_ascii(digits);
    if digits.is_empty() {
        return Err(invalid_chunk());
    }

    let mut size: u64 = 0;
    for &b in digits {
        let d = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(invalid_chunk()),
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(d as u64))
            .ok_or_else(invalid_chunk)?;
    }
    Ok(size)
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

fn incomplete_body() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        Error::new_incomplete_message(),
    )
}

fn invalid_chunk() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, Error::from(Parse::Chunk))
}
