//! 连接对象与两阶段释放协议。
//!
//! 一条 [`Conn`] 把一条双向字节流、带缓冲的读写半边、身份（是否 TLS、
//! 规范化的 authority）和释放状态机绑在一起。交换（exchange）开始后，
//! 连接被拆成 [`ReaderPart`] 与 [`WriterPart`] 两个半边，分别由响应
//! 读取方和请求体写入任务持有。
//!
//! ## 两阶段释放
//!
//! 交换期间有两个独立的生产者会各自报告一次结果：写半边（请求头 +
//! 可选的请求体 + flush）和读半边（响应头 + 由调用方驱动的响应体
//! 读取）。每个半边恰好调用一次 `finish(reuse)`：先把自己的 I/O 存回
//! 共享停车位，再对连接的原子状态字执行一次 swap：
//!
//! 1. 计算 `next = reuse ? HALF_REUSE : HALF_CLOSE`，swap 得到 `prev`
//! 2. `prev == IDLE`：自己是先完成的一半，什么都不做，等另一半
//! 3. 否则双方都已报告。若 `prev` 与 `next` 都是 `HALF_REUSE`，把状态
//!    字清回 `IDLE` 后将重组的连接交给空闲池；任何一方要求关闭则关闭
//!
//! 该协议保证每条连接恰好发生一次终态动作（入池或关闭）。缓冲区的
//! 归还不走协议：每个半边在自己的 `Drop` 里归还自己那块缓冲区（见
//! [`crate::common::io`]），因此即使某个半边没有机会报告——比如随着
//! 被中止的交换任务一起消亡——它的缓冲区也照样回池。
//!
//! 取消路径通过 [`Shared::force_close`] 提前清空停车位并中止请求体
//! 写入任务；此后迟到的 `finish` 只会发现停车位是空的，不会产生第二
//! 次终态动作。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::task::AbortHandle;

use crate::client::Inner;
use crate::common::buf;
use crate::common::io::{BoxIo, Reader, Writer};

/// 释放状态字：交换开始时的初始值。
const IDLE: u8 = 0;
/// 一个半边已报告"可以复用"。
const HALF_REUSE: u8 = 1;
/// 一个半边已报告"必须关闭"。
const HALF_CLOSE: u8 = 2;

/// 一条客户端连接。
pub(crate) struct Conn {
    pub(crate) shared: Arc<Shared>,
    pub(crate) reader: Reader,
    pub(crate) writer: Writer,
}

/// 连接中被两个半边共享的部分。
pub(crate) struct Shared {
    /// 两阶段释放的状态字
    state: AtomicU8,
    /// 完成的半边把 I/O 存放在这里，等待终态决定
    parked: Mutex<Parked>,
    /// 拥有本连接的传输层；弱引用避免空闲连接延长传输层的生命周期
    transport: Weak<Inner>,
    /// 是否为 TLS 连接
    pub(crate) tls: bool,
    /// 规范化（带端口）的 authority
    pub(crate) addr: String,
}

#[derive(Default)]
struct Parked {
    reader: Option<Reader>,
    writer: Option<Writer>,
    /// 本次交换的请求体写入任务，供错误路径与取消路径提前中止
    writer_task: Option<AbortHandle>,
}

/// 交换期间由响应读取方持有的读半边。
pub(crate) struct ReaderPart {
    pub(crate) shared: Arc<Shared>,
    pub(crate) rd: Reader,
}

/// 交换期间由请求体写入任务持有的写半边。
pub(crate) struct WriterPart {
    pub(crate) shared: Arc<Shared>,
    pub(crate) wr: Writer,
}

impl Conn {
    /// 用拨号得到的流构造连接：从缓冲区池取一对缓冲区，把流拆成
    /// 读写两个半边，记录身份与属主。
    pub(crate) fn new(raw: BoxIo, transport: &Arc<Inner>, tls: bool, addr: String) -> Conn {
        let pair = buf::acquire();
        let (read_io, write_io) = tokio::io::split(raw);

        Conn {
            shared: Arc::new(Shared {
                state: AtomicU8::new(IDLE),
                parked: Mutex::new(Parked::default()),
                transport: Arc::downgrade(transport),
                tls,
                addr,
            }),
            reader: Reader::new(read_io, pair.read),
            writer: Writer::new(write_io, pair.write),
        }
    }

    /// 拆成交换期间的两个半边。
    pub(crate) fn split(self) -> (ReaderPart, WriterPart) {
        let Conn {
            shared,
            reader,
            writer,
        } = self;
        (
            ReaderPart {
                shared: Arc::clone(&shared),
                rd: reader,
            },
            WriterPart { shared, wr: writer },
        )
    }

    /// 立即关闭：丢弃两个半边，流随之关闭，缓冲区由半边的 `Drop`
    /// 归还。
    ///
    /// 仅用于交换尚未拆分半边时的错误路径；拆分之后的关闭全部经由
    /// 释放协议。
    pub(crate) fn close(self) {
        let Conn { reader, writer, .. } = self;
        drop(reader);
        drop(writer);
    }
}

impl ReaderPart {
    /// 读半边的释放信号。`reuse` 为真表示本半边认为连接可以复用。
    pub(crate) fn finish(self, reuse: bool) {
        let ReaderPart { shared, rd } = self;
        shared.lock_parked().reader = Some(rd);
        shared.maybe_close(reuse);
    }
}

impl WriterPart {
    /// 写半边的释放信号。`reuse` 为真表示本半边认为连接可以复用。
    pub(crate) fn finish(self, reuse: bool) {
        let WriterPart { shared, wr } = self;
        shared.lock_parked().writer = Some(wr);
        shared.maybe_close(reuse);
    }
}

impl Shared {
    fn lock_parked(&self) -> std::sync::MutexGuard<'_, Parked> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 登记本次交换的请求体写入任务。
    pub(crate) fn set_writer_task(&self, handle: AbortHandle) {
        self.lock_parked().writer_task = Some(handle);
    }

    /// 中止仍在进行的请求体写入任务（如果有）。
    pub(crate) fn abort_writer(&self) {
        if let Some(handle) = self.lock_parked().writer_task.take() {
            handle.abort();
        }
    }

    /// 两阶段释放协议的核心：见模块文档。
    fn maybe_close(self: &Arc<Self>, reuse: bool) {
        let next = if reuse { HALF_REUSE } else { HALF_CLOSE };

        // 原子 swap 保证终态动作只被后完成的一半执行一次
        let prev = self.state.swap(next, Ordering::AcqRel);
        if prev == IDLE {
            return;
        }

        let (reader, writer) = {
            let mut parked = self.lock_parked();
            parked.writer_task = None;
            (parked.reader.take(), parked.writer.take())
        };

        if reuse && prev == HALF_REUSE {
            if let (Some(reader), Some(writer)) = (reader, writer) {
                if let Some(transport) = self.transport.upgrade() {
                    // 入池前必须清回 IDLE：被复用的连接要以初始状态
                    // 进入下一次交换
                    self.state.store(IDLE, Ordering::Release);
                    trace!("recycling connection to {}", self.addr);
                    transport.put_idle(Conn {
                        shared: Arc::clone(self),
                        reader,
                        writer,
                    });
                    return;
                }
                trace!("transport gone, closing connection to {}", self.addr);
            }
            // 无法入池：停车位里的半边在此丢弃，流关闭，缓冲区回池
            return;
        }

        trace!("closing connection to {}", self.addr);
        // 停车位里有哪半边就丢哪半边；强制关闭路径下缺席的半边
        // 由它的属主任务丢弃，缓冲区照样经半边的 Drop 回池
        drop(reader);
        drop(writer);
    }

    /// 取消路径的强制关闭：中止写入任务、清空停车位。
    ///
    /// 与 `maybe_close` 不同，这里不关心双方的意见——连接的流位置已经
    /// 不可判定，只能关闭。
    pub(crate) fn force_close(&self) {
        let (reader, writer) = {
            let mut parked = self.lock_parked();
            if let Some(handle) = parked.writer_task.take() {
                handle.abort();
            }
            (parked.reader.take(), parked.writer.take())
        };
        // 锁外丢弃：停车位里的半边立即销毁；仍活在交换任务或写入
        // 任务里的半边随任务中止一起销毁
        drop(reader);
        drop(writer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Transport;

    fn conn() -> (Conn, tokio::io::DuplexStream, Transport) {
        let (local, remote) = tokio::io::duplex(1024);
        let transport = Transport::new();
        let conn = Conn::new(
            Box::new(local),
            transport.inner(),
            false,
            "example.com:80".to_owned(),
        );
        (conn, remote, transport)
    }

    /// 双方都同意复用：连接回到空闲池，状态字清回初始值。
    #[tokio::test]
    async fn both_halves_reuse_parks() {
        let (conn, _remote, _transport) = conn();
        let shared = Arc::clone(&conn.shared);
        let transport = shared.transport.upgrade().unwrap();

        let (reader, writer) = conn.split();
        writer.finish(true);
        assert_eq!(shared.state.load(Ordering::Acquire), HALF_REUSE);
        reader.finish(true);

        assert_eq!(shared.state.load(Ordering::Acquire), IDLE);
        assert!(transport.take_idle(false, "example.com:80").is_some());
    }

    /// 任何一方否决都会关闭连接，不入池。
    #[tokio::test]
    async fn either_half_close_wins() {
        let (conn, mut remote, _transport) = conn();
        let shared = Arc::clone(&conn.shared);
        let transport = shared.transport.upgrade().unwrap();

        let (reader, writer) = conn.split();
        writer.finish(true);
        reader.finish(false);

        assert!(transport.take_idle(false, "example.com:80").is_none());
        // 对端观察到 EOF，说明流确实被关闭了
        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 1];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }

    /// 报告顺序无关紧要：先关闭后复用同样导致关闭。
    #[tokio::test]
    async fn close_first_then_reuse_closes() {
        let (conn, mut remote, _transport) = conn();
        let shared = Arc::clone(&conn.shared);
        let transport = shared.transport.upgrade().unwrap();

        let (reader, writer) = conn.split();
        writer.finish(false);
        reader.finish(true);

        assert!(transport.take_idle(false, "example.com:80").is_none());
        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 1];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }

    /// 强制关闭之后，迟到的半边报告不会引发第二次终态动作。
    #[tokio::test]
    async fn late_finish_after_force_close() {
        let (conn, mut remote, _transport) = conn();
        let shared = Arc::clone(&conn.shared);
        let transport = shared.transport.upgrade().unwrap();

        let (reader, writer) = conn.split();
        writer.finish(true);
        shared.force_close();
        reader.finish(true);

        assert!(transport.take_idle(false, "example.com:80").is_none());
        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 1];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }
}
