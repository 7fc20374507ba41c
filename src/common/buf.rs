//! 连接缓冲区池模块。
//!
//! 每条连接需要一对固定大小的缓冲区：一块给带缓冲的读半边，一块给带
//! 缓冲的写半边。连接的建立与关闭可能非常频繁，为避免反复向分配器
//! 申请这两块 8 KiB 的内存，本模块维护一个进程级的回收池：连接建立时
//! [`acquire`] 按对取出（或新建）缓冲区；半边销毁时通过 [`release`]
//! 各自归还自己那一块。
//!
//! 归还动作不依赖任何关闭路径显式调用——它挂在读写半边
//! （[`Reader`](crate::common::io::Reader) /
//! [`Writer`](crate::common::io::Writer)）的 `Drop` 上。两个半边在
//! 交换期间可能活在不同任务里、在不同时刻消亡（取消会直接中止其中
//! 一个任务），所以池存放的是单块缓冲区而非缓冲区对。
//!
//! 不变量：每块缓冲区至多被放回池中一次。它被恰好一个半边持有，
//! 半边只在自己的 `Drop` 里归还，所有权保证了恰好一次。

use std::sync::{Mutex, PoisonError};

use bytes::BytesMut;

/// 每块缓冲区的大小。读半边与写半边各占一块。
pub(crate) const BUFFER_SIZE: usize = 8 * 1024;

/// 池中保留的缓冲区数量上限，超出的直接交还给分配器。
const POOL_LIMIT: usize = 128;

// 全局缓冲区池。
static BUFFERS: Mutex<Vec<BytesMut>> = Mutex::new(Vec::new());

/// 一条连接使用的读/写缓冲区对。
pub(crate) struct BufferPair {
    /// 读半边的缓冲区
    pub(crate) read: BytesMut,
    /// 写半边的缓冲区
    pub(crate) write: BytesMut,
}

/// 从池中取出一对缓冲区；池中不够时新建。
pub(crate) fn acquire() -> BufferPair {
    let mut pool = BUFFERS.lock().unwrap_or_else(PoisonError::into_inner);
    BufferPair {
        read: pool.pop().unwrap_or_else(new_buffer),
        write: pool.pop().unwrap_or_else(new_buffer),
    }
}

/// 清空并归还一块缓冲区。池已满时直接丢弃。
pub(crate) fn release(mut buf: BytesMut) {
    buf.clear();

    let mut pool = BUFFERS.lock().unwrap_or_else(PoisonError::into_inner);
    if pool.len() < POOL_LIMIT {
        pool.push(buf);
    }
}

fn new_buffer() -> BytesMut {
    BytesMut::with_capacity(BUFFER_SIZE)
}
