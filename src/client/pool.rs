//! 空闲连接池与回收器（reaper）。
//!
//! 池按 authority 分桶，明文 TCP 与 TLS 各一张表。每个桶是一个
//! 最近使用优先（MRU-first）的队列：入池与取用都发生在队头。这使得
//! 每个桶里的 `idle_since` 时间戳从队头到队尾单调不增——回收器看一眼
//! 队头就知道整个桶是否全部过期。
//!
//! 回收器是惰性的：第一条空闲连接入池、且 keep-alive 超时为正时才被
//! 启动；当两张表都空了它就退出，下次有连接入池时再被拉起。`cleaning`
//! 标志与两张表由同一把锁保护，启动/退出不会竞争。
//!
//! 锁纪律：池锁只在链表指针操作的时长内持有。`take_idle` / `put_idle`
//! 的热路径上不做任何 I/O；回收器在锁内完成的"关闭"只是同步的 drop。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;

use crate::client::conn::Conn;
use crate::client::Inner;

/// 回收器的巡检周期。
const REAP_INTERVAL: Duration = Duration::from_millis(250);

/// 空闲连接的两张表与回收器状态。整体被一把 `Mutex` 保护。
pub(crate) struct Pool {
    /// 明文 TCP 连接，按 authority 分桶
    idle_tcp: HashMap<String, VecDeque<Idle>>,
    /// TLS 连接，按 authority 分桶
    idle_tls: HashMap<String, VecDeque<Idle>>,
    /// 回收器是否正在运行
    cleaning: bool,
}

/// 池中的一条空闲连接。
struct Idle {
    conn: Conn,
    /// 入池时刻；仅在连接停在池里时有意义
    since: Instant,
}

impl Pool {
    pub(crate) fn new() -> Pool {
        Pool {
            idle_tcp: HashMap::new(),
            idle_tls: HashMap::new(),
            cleaning: false,
        }
    }

    /// 两张表合计的空闲连接数。仅用于测试观察。
    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.idle_tcp.values().map(VecDeque::len).sum::<usize>()
            + self.idle_tls.values().map(VecDeque::len).sum::<usize>()
    }
}

impl Inner {
    /// 从池中取出指定目标的最近使用连接；桶取空后删除键。
    pub(crate) fn take_idle(&self, tls: bool, addr: &str) -> Option<Conn> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let m = if tls {
            &mut pool.idle_tls
        } else {
            &mut pool.idle_tcp
        };

        let list = m.get_mut(addr)?;
        let idle = list.pop_front();
        if list.is_empty() {
            m.remove(addr);
        }
        idle.map(|idle| idle.conn)
    }

    /// 把连接放回池头，并在需要时启动回收器。
    pub(crate) fn put_idle(self: &Arc<Self>, conn: Conn) {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);

        let m = if conn.shared.tls {
            &mut pool.idle_tls
        } else {
            &mut pool.idle_tcp
        };
        m.entry(conn.shared.addr.clone()).or_default().push_front(Idle {
            conn,
            since: Instant::now(),
        });

        if !pool.cleaning && self.keep_alive_timeout > Duration::ZERO {
            // 回收器需要一个运行时来睡眠。没有运行时就先不启动——
            // 下一次在运行时内的入池会把它拉起来。
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                pool.cleaning = true;
                handle.spawn(clean(Arc::downgrade(self)));
            }
        }
    }
}

/// 回收器主循环：每个周期清掉闲置超时的连接，两张表都空了就退出。
async fn clean(transport: Weak<Inner>) {
    // 第一次巡检发生在一个完整周期之后
    let mut ticker = tokio::time::interval_at(Instant::now() + REAP_INTERVAL, REAP_INTERVAL);

    loop {
        ticker.tick().await;

        let Some(inner) = transport.upgrade() else {
            return;
        };
        let Some(cutoff) = Instant::now().checked_sub(inner.keep_alive_timeout) else {
            continue;
        };

        let mut pool = inner.pool.lock().unwrap_or_else(PoisonError::into_inner);
        drop_expired(&mut pool.idle_tcp, cutoff);
        drop_expired(&mut pool.idle_tls, cutoff);

        if pool.idle_tcp.is_empty() && pool.idle_tls.is_empty() {
            pool.cleaning = false;
            return;
        }
    }
}

/// 关闭桶里所有 `since < cutoff` 的连接。
///
/// 桶内时间戳从队头到队尾单调不增：队头过期则整桶过期；否则从队头
/// 向后找到第一个过期的位置，把它和它之后的全部关掉。
fn drop_expired(m: &mut HashMap<String, VecDeque<Idle>>, cutoff: Instant) {
    m.retain(|addr, list| {
        if list.front().map_or(true, |idle| idle.since < cutoff) {
            debug!("reaping {} idle connection(s) to {}", list.len(), addr);
            for idle in list.drain(..) {
                idle.conn.close();
            }
            return false;
        }

        let keep = list.iter().take_while(|idle| idle.since >= cutoff).count();
        if keep < list.len() {
            debug!("reaping {} idle connection(s) to {}", list.len() - keep, addr);
            for idle in list.drain(keep..) {
                idle.conn.close();
            }
        }
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Transport;
    use crate::common::io::BoxIo;

    fn idle_conn(transport: &Transport, addr: &str) -> (Conn, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(1024);
        (
            Conn::new(Box::new(local) as BoxIo, transport.inner(), false, addr.to_owned()),
            remote,
        )
    }

    fn lock(transport: &Transport) -> std::sync::MutexGuard<'_, Pool> {
        transport
            .inner()
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 桶是 LIFO 的：后入池的先被取用，且时间戳从头到尾单调不增。
    #[tokio::test]
    async fn bucket_is_mru_first() {
        let transport = Transport::builder()
            .keep_alive_timeout(Duration::ZERO)
            .build();

        let (first, _r1) = idle_conn(&transport, "a:80");
        let (second, _r2) = idle_conn(&transport, "a:80");
        let first_shared = Arc::clone(&first.shared);
        let second_shared = Arc::clone(&second.shared);

        transport.inner().put_idle(first);
        transport.inner().put_idle(second);

        {
            let pool = lock(&transport);
            let bucket = &pool.idle_tcp["a:80"];
            assert_eq!(bucket.len(), 2);
            assert!(bucket[0].since >= bucket[1].since);
        }

        let taken = transport.inner().take_idle(false, "a:80").unwrap();
        assert!(Arc::ptr_eq(&taken.shared, &second_shared));
        let taken = transport.inner().take_idle(false, "a:80").unwrap();
        assert!(Arc::ptr_eq(&taken.shared, &first_shared));

        // 桶取空后键被删除
        assert!(transport.inner().take_idle(false, "a:80").is_none());
        assert!(lock(&transport).idle_tcp.is_empty());
    }

    /// 超时后回收器关闭所有连接并退出。
    #[tokio::test]
    async fn reaper_evicts_and_exits() {
        let transport = Transport::builder()
            .keep_alive_timeout(Duration::from_millis(50))
            .build();

        let (c1, mut r1) = idle_conn(&transport, "a:80");
        let (c2, mut r2) = idle_conn(&transport, "b:80");
        transport.inner().put_idle(c1);
        transport.inner().put_idle(c2);
        assert!(lock(&transport).cleaning);
        assert_eq!(lock(&transport).idle_count(), 2);

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(lock(&transport).idle_count(), 0);
        assert!(!lock(&transport).cleaning);

        // 两条连接的流都被真正关闭
        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 1];
        assert_eq!(r1.read(&mut buf).await.unwrap(), 0);
        assert_eq!(r2.read(&mut buf).await.unwrap(), 0);
    }

    /// keep-alive 超时为零时不启动回收器，空闲连接一直留在池里。
    #[tokio::test]
    async fn zero_timeout_disables_reaper() {
        let transport = Transport::builder()
            .keep_alive_timeout(Duration::ZERO)
            .build();

        let (conn, _remote) = idle_conn(&transport, "a:80");
        transport.inner().put_idle(conn);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!lock(&transport).cleaning);
        assert_eq!(lock(&transport).idle_count(), 1);
    }
}
