//! HTTP 消息体类型。
//!
//! 本模块定义两个方向的消息体：
//!
//! - [`Outgoing`] —— 请求体的字节来源。任何 `AsyncRead` 都可以充当来源；
//!   它的"关闭钩子"就是 `Drop`，传输层保证无论往返结果如何都会丢弃它。
//! - [`Incoming`] —— 响应体的可读流。它把连接钉（pin）在自己身上，直到
//!   调用方读完并关闭；关闭动作触发连接的两阶段释放协议，决定连接是
//!   回到空闲池还是被关闭。
//!
//! ## Incoming 的错误语义
//!
//! - 除超时以外的读取错误是**粘滞**的：第一次出错之后，后续所有 `read`
//!   都返回同样的错误，连接在关闭时不会被复用。
//! - 命中读取截止时间产生 [`Error::is_body_timeout`] 错误，但**不**粘滞：
//!   调用方可以重设（或清除）截止时间后继续读。
//! - `close` 之后继续 `read` 得到 [`Error::is_read_after_close`] 错误。
//!   `close` 是幂等的；`Drop` 会代替调用方执行未完成的 `close`。

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep};

use crate::client::conn::ReaderPart;
use crate::proto::h1::Decoder;
use crate::Error;

/// 请求体的字节来源。
///
/// 封帧方式（identity 还是 chunked）由请求头决定，与来源无关；来源只
/// 负责产出字节。来源会在往返结束时被丢弃，无论成功与否。
pub struct Outgoing {
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
}

impl Outgoing {
    /// 用任意 `AsyncRead` 构造请求体来源。
    pub fn new<R>(reader: R) -> Outgoing
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        Outgoing {
            reader: Box::new(reader),
        }
    }
}

impl AsyncRead for Outgoing {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outgoing").finish()
    }
}

impl From<&'static str> for Outgoing {
    fn from(s: &'static str) -> Outgoing {
        Outgoing::new(s.as_bytes())
    }
}

impl From<&'static [u8]> for Outgoing {
    fn from(b: &'static [u8]) -> Outgoing {
        Outgoing::new(b)
    }
}

impl From<Vec<u8>> for Outgoing {
    fn from(v: Vec<u8>) -> Outgoing {
        Outgoing::new(io::Cursor::new(v))
    }
}

impl From<String> for Outgoing {
    fn from(s: String) -> Outgoing {
        Outgoing::new(io::Cursor::new(s.into_bytes()))
    }
}

/// 响应体的可读流。
///
/// 实现 `tokio::io::AsyncRead`，可以配合 `AsyncReadExt` 使用。持有体的
/// 期间对应的连接不可复用；读完（到 EOF）并 [`close`](Incoming::close)
/// 之后，连接视双方的 keep-alive 意图被回收或关闭。
#[must_use = "the connection stays pinned until the body is closed"]
pub struct Incoming {
    kind: Kind,
}

enum Kind {
    /// 没有消息体；对应的连接已经在响应返回之前被释放。
    Empty,
    /// 绑定在连接上的消息体。
    Conn {
        /// 连接的读半边；`close` 之后为 `None`
        conn: Option<ReaderPart>,
        decoder: Decoder,
        /// 读半边的复用资格（对端未要求关闭，且长度不是 close-delimited）
        reuse: bool,
        /// 是否已干净地读到消息体末尾
        reached_eof: bool,
        /// 粘滞错误；一旦设置，后续读取都返回它
        sticky: Option<Sticky>,
        /// 读取截止时间
        deadline: Option<Pin<Box<Sleep>>>,
    },
}

/// 粘滞错误的存储形态。`io::Error` 不可克隆，所以保留类别与描述，
/// 每次读取时重建。
enum Sticky {
    ReadAfterClose,
    Io(io::ErrorKind, String),
}

impl Sticky {
    fn to_io(&self) -> io::Error {
        match self {
            Sticky::ReadAfterClose => io::Error::new(
                io::ErrorKind::Other,
                Error::new_read_after_close(),
            ),
            Sticky::Io(kind, message) => io::Error::new(*kind, message.clone()),
        }
    }
}

impl Incoming {
    /// 没有消息体的响应使用的占位流：读取立即返回 EOF。
    pub(crate) fn empty() -> Incoming {
        Incoming { kind: Kind::Empty }
    }

    /// 把消息体绑定到连接的读半边上。
    pub(crate) fn new(conn: ReaderPart, decoder: Decoder, reuse: bool) -> Incoming {
        Incoming {
            kind: Kind::Conn {
                conn: Some(conn),
                decoder,
                reuse,
                reached_eof: false,
                sticky: None,
                deadline: None,
            },
        }
    }

    /// 设置（或清除）后续读取的截止时间。
    ///
    /// 截止时间一到，进行中的和后续的读取返回
    /// [`Error::is_body_timeout`] 类别的错误；该错误不粘滞，重新调用本
    /// 方法即可继续读取。粘滞错误已经出现时本方法是空操作，这样调用方
    /// 不会影响到一条已经被另一次交换复用的连接。
    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        if let Kind::Conn {
            sticky,
            deadline: slot,
            ..
        } = &mut self.kind
        {
            if sticky.is_some() {
                return;
            }
            *slot = deadline.map(|at| Box::pin(tokio::time::sleep_until(at)));
        }
    }

    /// 结束对消息体的读取，把连接交还给传输层。
    ///
    /// 连接只有在消息体被干净地读到 EOF、未出现粘滞错误、且双方都允许
    /// keep-alive 时才会被回收，否则被关闭。`close` 是幂等的；如果调用
    /// 方忘记调用，`Drop` 会代为执行。
    pub fn close(&mut self) {
        if let Kind::Conn {
            conn,
            reuse,
            reached_eof,
            sticky,
            ..
        } = &mut self.kind
        {
            let Some(part) = conn.take() else {
                return;
            };
            let clean = sticky.is_none() && *reached_eof;
            if sticky.is_none() {
                *sticky = Some(Sticky::ReadAfterClose);
            }
            part.finish(*reuse && clean);
        }
    }
}

impl AsyncRead for Incoming {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let Kind::Conn {
            conn,
            decoder,
            reached_eof,
            sticky,
            deadline,
            ..
        } = &mut self.get_mut().kind
        else {
            return Poll::Ready(Ok(()));
        };

        if let Some(s) = sticky {
            return Poll::Ready(Err(s.to_io()));
        }
        let part = match conn {
            Some(part) => part,
            None => return Poll::Ready(Err(Sticky::ReadAfterClose.to_io())),
        };
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        // 截止时间到期不粘滞，调用方可以重设后继续读
        if let Some(sleep) = deadline {
            if sleep.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    Error::new_body_timeout(),
                )));
            }
        }

        match decoder.poll_decode(cx, &mut part.rd, buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(_)) => {
                if decoder.is_eof() {
                    *reached_eof = true;
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                *sticky = Some(Sticky::Io(e.kind(), e.to_string()));
                Poll::Ready(Err(e))
            }
        }
    }
}

/// 调用方忘记 `close` 时兜底，保证连接不会泄漏。
impl Drop for Incoming {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Empty => f.debug_struct("Incoming").field("kind", &"empty").finish(),
            Kind::Conn { reuse, reached_eof, .. } => f
                .debug_struct("Incoming")
                .field("kind", &"conn")
                .field("reuse", &reuse)
                .field("reached_eof", &reached_eof)
                .finish(),
        }
    }
}
