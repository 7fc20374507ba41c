//! 带缓冲的连接读写半边。
//!
//! 一条连接的底层流被 `tokio::io::split` 拆成读半边与写半边，分别由
//! [`Reader`] 与 [`Writer`] 包装。两者各持有缓冲区池里同一对缓冲区的
//! 一半（见 [`crate::common::buf`]），从而可以被交换到不同任务中并发
//! 使用：请求体写入方持有 `Writer`，响应读取方持有 `Reader`。
//!
//! `Reader` 提供 poll 形式的 `poll_fill`（响应体解码器在 `poll_read`
//! 中使用）以及 async 形式的 `fill`（读响应头时使用）。`Writer` 只在
//! async 上下文中使用，提供 `write_all` 与 `flush`。
//!
//! 两个半边在 `Drop` 时把自己的缓冲区归还给池。归还因此不依赖释放
//! 协议的任何显式路径：半边无论是正常走完释放协议、被取消路径清掉、
//! 还是随着被中止的任务一起消亡，缓冲区都会回池，且因为所有权唯一，
//! 恰好回池一次。
//!
//! 缓冲区容量固定为 [`BUFFER_SIZE`]，永不增长：`Reader` 只向剩余空间
//! 填充，`Writer` 写满即冲刷。这意味着无法放进读缓冲区的响应头会被
//! 判定为过大。

use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use futures_core::ready;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::common::buf::BUFFER_SIZE;

/// 盒装的双向字节流。拨号函数返回的任何流都以这个形态进入连接。
pub(crate) type BoxIo = Box<dyn Io>;

/// 连接底层流需要满足的能力集合。
///
/// 任何 `AsyncRead + AsyncWrite + Send + Unpin` 的类型都自动实现本
/// trait；它只是为了让 `Box<dyn Io>` 写起来短一些。
pub(crate) trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// 连接的带缓冲读半边。
pub(crate) struct Reader {
    io: tokio::io::ReadHalf<BoxIo>,
    buf: BytesMut,
}

impl Reader {
    pub(crate) fn new(io: tokio::io::ReadHalf<BoxIo>, buf: BytesMut) -> Reader {
        Reader { io, buf }
    }

    /// 当前已缓冲、尚未被消费的字节。
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// 消费缓冲区头部的 `n` 个字节。
    pub(crate) fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }

    /// 缓冲区是否已满（无法再填充）。
    pub(crate) fn is_full(&self) -> bool {
        self.buf.len() >= BUFFER_SIZE
    }

    /// 从底层流读取更多字节追加到缓冲区，返回本次读到的字节数。
    ///
    /// 返回 `0` 表示底层流已到 EOF。调用方必须保证缓冲区未满。
    pub(crate) fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        debug_assert!(self.buf.len() < BUFFER_SIZE);

        // 已消费的前缀在这里被回收，缓冲区容量因此保持恒定。
        self.buf.reserve(BUFFER_SIZE - self.buf.len());

        let n = {
            let mut dst = ReadBuf::uninit(self.buf.spare_capacity_mut());
            ready!(Pin::new(&mut self.io).poll_read(cx, &mut dst))?;
            dst.filled().len()
        };

        // SAFETY: poll_read 刚刚初始化了 filled 部分的 n 个字节。
        unsafe { self.buf.set_len(self.buf.len() + n) };

        Poll::Ready(Ok(n))
    }

    /// [`Reader::poll_fill`] 的 async 包装。
    pub(crate) async fn fill(&mut self) -> io::Result<usize> {
        poll_fn(|cx| self.poll_fill(cx)).await
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        crate::common::buf::release(std::mem::take(&mut self.buf));
    }
}

/// 连接的带缓冲写半边。
pub(crate) struct Writer {
    io: tokio::io::WriteHalf<BoxIo>,
    buf: BytesMut,
}

impl Writer {
    pub(crate) fn new(io: tokio::io::WriteHalf<BoxIo>, buf: BytesMut) -> Writer {
        Writer { io, buf }
    }

    /// 把 `src` 全部写入缓冲区，缓冲区写满时先冲刷到底层流。
    pub(crate) async fn write_all(&mut self, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            if self.buf.len() == BUFFER_SIZE {
                self.flush_buf().await?;
            }
            let n = std::cmp::min(src.len(), BUFFER_SIZE - self.buf.len());
            self.buf.extend_from_slice(&src[..n]);
            src = &src[n..];
        }
        Ok(())
    }

    /// 把缓冲区中的字节写到底层流。
    async fn flush_buf(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.io.write_all(&self.buf).await?;
            self.buf.clear();
        }
        Ok(())
    }

    /// 冲刷缓冲区与底层流。
    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        self.flush_buf().await?;
        self.io.flush().await
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        // 未冲刷的字节随连接一起作废
        crate::common::buf::release(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::buf;

    fn pair() -> (Reader, Writer, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (r, w) = tokio::io::split(Box::new(local) as BoxIo);
        let bufs = buf::acquire();
        (Reader::new(r, bufs.read), Writer::new(w, bufs.write), remote)
    }

    /// 写半边缓冲到 flush 才落盘；读半边能跨多次 fill 累积。
    #[tokio::test]
    async fn buffered_round_trip() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut rd, mut wr, mut remote) = pair();

        wr.write_all(b"hello ").await.unwrap();
        wr.write_all(b"world").await.unwrap();
        wr.flush().await.unwrap();

        let mut echoed = [0u8; 11];
        remote.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello world");

        remote.write_all(b"response").await.unwrap();
        while rd.buffer().len() < 8 {
            assert!(rd.fill().await.unwrap() > 0);
        }
        assert_eq!(rd.buffer(), b"response");
        rd.consume(8);
        assert!(rd.buffer().is_empty());
    }

    /// 消费过的前缀必须被回收，缓冲区容量不随填充-消费循环增长。
    #[tokio::test]
    async fn fill_reclaims_consumed_prefix() {
        use tokio::io::AsyncWriteExt;

        let (mut rd, _wr, mut remote) = pair();

        for round in 0u8..8 {
            let chunk = vec![round; 4096];
            remote.write_all(&chunk).await.unwrap();
            while rd.buffer().len() < 4096 {
                rd.fill().await.unwrap();
            }
            assert!(rd.buffer().iter().all(|&b| b == round));
            rd.consume(4096);
        }
        assert!(!rd.is_full());
    }
}
