//! HTTP/1.x 客户端传输层。
//!
//! 本模块实现往返引擎 [`Transport`]：给定一个已解析的请求，建立（或
//! 从空闲池复用）到远端的连接，写出请求，读回响应，并在之后安排连接
//! 的去向（回池复用或关闭）。
//!
//! ## 一次交换的数据流
//!
//! 1. 由请求头判定请求体的封帧方式（头部自相矛盾时快速失败）
//! 2. 规范化 authority（补默认端口），先查空闲池，未命中再调用对应
//!    scheme 的拨号函数
//! 3. 同步写出并冲刷请求头
//! 4. 有请求体时，派生一个并发任务写请求体——上传与响应头的读取重叠
//! 5. 同步读响应头，判定响应体长度与对端的 keep-alive 意图
//! 6. 没有响应体则立刻释放读半边；否则把响应体流绑定到连接上，
//!    由调用方关闭响应体时触发释放
//!
//! 连接的"回池还是关闭"由两阶段释放协议裁决，见 [`conn`] 模块。
//!
//! ## 可取消的往返
//!
//! [`Transport::round_trip_cancel`] 接受一个一次性的取消信号（任何
//! `Future<Output = Option<Box<dyn Error + Send + Sync>>>`）。拨号阶段
//! 被取消时，迟到拨成的连接会被放进空闲池而不是泄漏或浪费；交换阶段
//! 被取消时连接的流位置已不可判定，被立即关闭。取消信号不带错误值时
//! 返回 [`Error::is_nil_cancel`] 类别的错误——引擎永远不会同时返回
//! 空响应与空错误。

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use crate::body::{Incoming, Outgoing};
use crate::common::io::BoxIo;
use crate::error::Parse;
use crate::proto::h1::{role, Decoder};
use crate::proto::BodySize;
use crate::Error;

pub(crate) mod conn;
/// 中间件组合层：RoundTripper 契约与 `wrap`。
pub mod middleware;
mod pool;

use self::conn::Conn;
use self::middleware::{BoxFuture, RoundTripper};
use self::pool::Pool;

/// 传输层接收的请求类型。
///
/// scheme 与 authority 取自 URI；请求体来源是可选的
/// [`Outgoing`]，其"关闭钩子"是 `Drop`，无论往返结果如何都会被执行。
pub type Request = http::Request<Option<Outgoing>>;

/// 传输层返回的响应类型。
///
/// 响应体是 [`Incoming`]：没有消息体时它是一个空流，否则它把连接钉在
/// 自己身上，直到调用方读完并关闭。
pub type Response = http::Response<Incoming>;

/// 拨号函数返回的未来值。
type DialFuture = Pin<Box<dyn Future<Output = io::Result<BoxIo>> + Send>>;
/// 盒装的拨号函数：输入规范化（带端口）的 authority。
type DialFn = Box<dyn Fn(String) -> DialFuture + Send + Sync>;

/// 取消信号携带的错误值。
type CancelCause = Box<dyn StdError + Send + Sync>;

/// HTTP/1.x 往返引擎。
///
/// `Transport` 可以被廉价地克隆（内部是 `Arc`），并且是并发安全的：
/// 任意多个往返可以同时进行，空闲连接池在它们之间共享。
///
/// 通过 [`Transport::builder`] 配置拨号函数与 keep-alive 超时。
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    /// 明文 TCP 拨号函数
    dial: DialFn,
    /// TLS 拨号函数；未配置时 https 请求直接失败
    dial_tls: Option<DialFn>,
    /// 空闲连接允许停留的时长；零表示不回收
    pub(crate) keep_alive_timeout: Duration,
    /// 空闲连接池（含回收器状态）
    pub(crate) pool: Mutex<Pool>,
}

/// [`Transport`] 的配置构建器。
pub struct Builder {
    keep_alive_timeout: Duration,
    dial: Option<DialFn>,
    dial_tls: Option<DialFn>,
}

impl Builder {
    /// 使用默认配置创建构建器。
    ///
    /// 默认值：keep-alive 超时 90 秒；明文拨号使用
    /// `tokio::net::TcpStream::connect`；TLS 拨号未配置。
    pub fn new() -> Builder {
        Builder {
            keep_alive_timeout: Duration::from_secs(90),
            dial: None,
            dial_tls: None,
        }
    }

    /// 设置空闲连接允许停留的时长。
    ///
    /// 为零时禁用回收器：空闲连接会一直留在池里，直到被对端关闭后在
    /// 下次复用时失败，或随进程退出。
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Builder {
        self.keep_alive_timeout = timeout;
        self
    }

    /// 设置明文 TCP 的拨号函数。
    ///
    /// 函数收到的是规范化（带端口）的 authority，如 `"example.com:80"`。
    pub fn dial<F, Fut, T>(mut self, dial: F) -> Builder
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<T>> + Send + 'static,
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.dial = Some(box_dial(dial));
        self
    }

    /// 设置 TLS 的拨号函数。
    ///
    /// 返回的流应当已经完成握手。TLS 握手本身（以及证书校验策略）
    /// 完全由调用方决定。
    pub fn dial_tls<F, Fut, T>(mut self, dial: F) -> Builder
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<T>> + Send + 'static,
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.dial_tls = Some(box_dial(dial));
        self
    }

    /// 构建 [`Transport`]。
    pub fn build(self) -> Transport {
        Transport {
            inner: Arc::new(Inner {
                dial: self.dial.unwrap_or_else(default_dial),
                dial_tls: self.dial_tls,
                keep_alive_timeout: self.keep_alive_timeout,
                pool: Mutex::new(Pool::new()),
            }),
        }
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("keep_alive_timeout", &self.keep_alive_timeout)
            .field("dial", &self.dial.is_some())
            .field("dial_tls", &self.dial_tls.is_some())
            .finish()
    }
}

/// 把用户提供的拨号闭包适配成内部的盒装形态。
fn box_dial<F, Fut, T>(dial: F) -> DialFn
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<T>> + Send + 'static,
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    Box::new(move |addr| {
        let fut = dial(addr);
        Box::pin(async move { Ok(Box::new(fut.await?) as BoxIo) })
    })
}

fn default_dial() -> DialFn {
    Box::new(|addr| {
        Box::pin(async move {
            let stream = TcpStream::connect(&addr).await?;
            Ok(Box::new(stream) as BoxIo)
        })
    })
}

impl Transport {
    /// 使用默认配置创建传输层。等价于 `Transport::builder().build()`。
    pub fn new() -> Transport {
        Builder::new().build()
    }

    /// 创建配置构建器。
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }

    /// 执行一次 HTTP 往返。
    ///
    /// 返回的响应体是一个流；连接在响应体被读完并关闭之前一直被占用。
    /// 失败时连接绝不会被放回空闲池。
    pub async fn round_trip(&self, req: Request) -> crate::Result<Response> {
        let wsize = role::request_body_size(&req)?;
        let (tls, addr) = target(&req)?;

        let conn = self.inner.checkout(tls, addr).await?;
        exchange(conn, req, wsize).await
    }

    /// 执行一次可取消的 HTTP 往返。
    ///
    /// `cancel` 是一次性的取消信号：它完成时往返被中止，其携带的错误
    /// 值作为 [`Error::is_canceled`] 错误的 source 原样返回；不携带
    /// 错误值则返回 [`Error::is_nil_cancel`] 错误。
    ///
    /// 取消语义：
    ///
    /// - 拨号完成之前取消：不泄漏连接——如果拨号随后成功，连接被放进
    ///   空闲池供后续请求复用
    /// - 交换进行中取消：连接可能正处于读写中途，被立即关闭
    /// - 响应头返回之后的取消是调用方的事：对响应体调用
    ///   [`Incoming::set_read_deadline`] 或 [`Incoming::close`]
    pub async fn round_trip_cancel<F>(&self, req: Request, cancel: F) -> crate::Result<Response>
    where
        F: Future<Output = Option<CancelCause>>,
    {
        let wsize = role::request_body_size(&req)?;
        let (tls, addr) = target(&req)?;

        tokio::pin!(cancel);

        // 拨号阶段。单比特的认领位保证连接恰好被一方跨过边界接走：
        // 输掉竞争的一方负责把连接停进空闲池。
        let claimed = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = oneshot::channel::<crate::Result<Conn>>();
        {
            let inner = Arc::clone(&self.inner);
            let claimed = Arc::clone(&claimed);
            tokio::spawn(async move {
                let res = inner.checkout(tls, addr).await;
                if claimed
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let _ = tx.send(res);
                } else if let Ok(conn) = res {
                    // 取消方已经离开；别浪费这条刚拨成的连接
                    inner.put_idle(conn);
                }
            });
        }

        let conn = tokio::select! {
            cause = cancel.as_mut() => {
                if claimed
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // 拨号已经抢先完成，接力棒在通道里：收下并停进池
                    if let Ok(Ok(conn)) = (&mut rx).await {
                        self.inner.put_idle(conn);
                    }
                }
                return Err(cancel_error(cause));
            }
            res = &mut rx => match res {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::new_canceled()),
            },
        };

        // 交换阶段：在独立任务中执行同步交换，结果经单容量通道送回。
        let shared = Arc::clone(&conn.shared);
        let (tx, rx) = oneshot::channel();
        let exchange_task = tokio::spawn(async move {
            let _ = tx.send(exchange(conn, req, wsize).await);
        });

        tokio::select! {
            cause = cancel.as_mut() => {
                // 连接可能正处于读写中途，立即关闭
                exchange_task.abort();
                shared.force_close();
                Err(cancel_error(cause))
            }
            res = rx => match res {
                Ok(res) => res,
                Err(_) => Err(Error::new_canceled()),
            },
        }
    }
}

impl Default for Transport {
    fn default() -> Transport {
        Transport::new()
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("keep_alive_timeout", &self.inner.keep_alive_timeout)
            .finish()
    }
}

impl RoundTripper for Transport {
    fn round_trip(&self, req: Request) -> BoxFuture<'_, crate::Result<Response>> {
        Box::pin(Transport::round_trip(self, req))
    }
}

/// 取消信号的错误值到返回错误的映射：引擎不返回空错误。
fn cancel_error(cause: Option<CancelCause>) -> Error {
    match cause {
        Some(cause) => Error::new_canceled().with(cause),
        None => Error::new_nil_cancel(),
    }
}

/// 从请求 URI 解出 (是否 TLS, 规范化 authority)。
fn target(req: &Request) -> crate::Result<(bool, String)> {
    let uri = req.uri();
    let authority = uri
        .authority()
        .map(|a| a.as_str())
        .ok_or(Error::from(Parse::Uri))?;

    match uri.scheme_str() {
        Some("http") => Ok((false, default_port(authority, "80"))),
        Some("https") => Ok((true, default_port(authority, "443"))),
        _ => Err(Error::new_unsupported_scheme()),
    }
}

impl Inner {
    /// 获得一条到目标的连接：先查空闲池，未命中再拨号。
    pub(crate) async fn checkout(self: &Arc<Self>, tls: bool, addr: String) -> crate::Result<Conn> {
        if let Some(conn) = self.take_idle(tls, &addr) {
            trace!("reusing idle connection to {}", addr);
            return Ok(conn);
        }

        let dial = if tls {
            self.dial_tls
                .as_ref()
                .ok_or_else(|| Error::new_connect("no TLS dial function configured"))?
        } else {
            &self.dial
        };

        trace!("dialing {}", addr);
        let raw = dial(addr.clone()).await.map_err(Error::new_connect)?;
        Ok(Conn::new(raw, self, tls, addr))
    }
}

/// 在一条连接上执行一次交换：步骤 3–6（见模块文档）。
///
/// 错误路径上连接一律不会回池：半边拆分之前直接关闭，拆分之后通过
/// 释放协议以 `reuse = false` 收尾，并中止仍在写请求体的任务。
async fn exchange(mut conn: Conn, mut req: Request, wsize: BodySize) -> crate::Result<Response> {
    // TODO: support Expect: 100-continue by pausing here until the
    // interim response arrives.

    if let Err(e) = role::write_request_header(&mut conn.writer, &req).await {
        conn.close();
        return Err(e);
    }
    if let Err(e) = conn.writer.flush().await {
        conn.close();
        return Err(Error::new_io(e));
    }

    // 调用方是否已经为这个请求显式放弃了 keep-alive？
    let req_reuse = !role::closing(req.version(), req.headers());

    let body = req.body_mut().take();
    let (mut reader, writer) = conn.split();
    let shared = Arc::clone(&reader.shared);

    if wsize == BodySize::ZERO {
        // 没有请求体，写半边就此完工；请求体来源（如有）随 drop 关闭
        writer.finish(req_reuse);
    } else if let Some(mut src) = body {
        let mut writer = writer;
        let handle = tokio::spawn(async move {
            let res = match crate::proto::h1::encode::write_body(&mut writer.wr, &mut src, wsize)
                .await
            {
                Ok(()) => writer.wr.flush().await.map_err(Error::new_io),
                Err(e) => Err(e),
            };
            let ok = match res {
                Ok(()) => true,
                Err(e) => {
                    debug!("request body write failed: {}", e);
                    false
                }
            };
            writer.finish(ok && req_reuse);
        });
        shared.set_writer_task(handle.abort_handle());
    } else {
        // request_body_size 已经拦下了这种组合；兜底为不可复用
        debug_assert!(false, "non-zero body size without a body source");
        writer.finish(false);
    }

    let head = match role::read_response_header(&mut reader.rd).await {
        Ok(head) => head,
        Err(e) => {
            shared.abort_writer();
            reader.finish(false);
            return Err(e);
        }
    };

    let rsize = match role::response_body_size(req.method(), head.status(), head.headers()) {
        Ok(rsize) => rsize,
        Err(e) => {
            shared.abort_writer();
            reader.finish(false);
            return Err(e);
        }
    };

    // 对端是否允许我们之后复用这条连接？
    let resp_reuse = !role::closing(head.version(), head.headers());

    let (parts, ()) = head.into_parts();
    let body = if rsize == BodySize::ZERO {
        reader.finish(resp_reuse);
        Incoming::empty()
    } else {
        Incoming::new(
            reader,
            Decoder::new(rsize),
            resp_reuse && rsize != BodySize::UNBOUNDED,
        )
    };

    Ok(Response::from_parts(parts, body))
}

/// 给没有端口的 authority 补上默认端口。
///
/// 已带端口的 authority 原样返回，因此本函数是幂等的。裸 IPv6 地址在
/// 补端口时会被加上方括号。
fn default_port(addr: &str, port: &str) -> String {
    if has_port(addr) {
        addr.to_owned()
    } else if addr.contains(':') {
        format!("[{}]:{}", addr, port)
    } else {
        format!("{}:{}", addr, port)
    }
}

/// 判断 authority 是否带端口。
///
/// 零个冒号：没有端口；一个冒号：有端口；两个以上冒号只有在方括号
/// 形式（`[ipv6]:port`）下才算有端口。
fn has_port(addr: &str) -> bool {
    if addr.is_empty() {
        return false;
    }

    let bytes = addr.as_bytes();
    let mut colons = 0;
    let mut rbrack = false;

    for (i, &b) in bytes.iter().enumerate() {
        if b == b':' {
            colons += 1;
            rbrack = i > 0 && bytes[i - 1] == b']';
        }
    }

    match colons {
        0 => false,
        1 => true,
        _ => bytes[0] == b'[' && rbrack,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_appends_supplied_port() {
        assert_eq!(default_port("example.com", "80"), "example.com:80");
        assert_eq!(default_port("example.com", "443"), "example.com:443");
    }

    /// 已带端口的地址原样保留——`default_port` 是幂等的。
    #[test]
    fn default_port_is_idempotent() {
        for addr in ["example.com:8080", "[::1]:443", "127.0.0.1:80"] {
            assert_eq!(default_port(addr, "80"), addr);
            assert_eq!(default_port(&default_port(addr, "80"), "80"), addr);
        }
    }

    #[test]
    fn default_port_brackets_bare_ipv6() {
        assert_eq!(default_port("::1", "80"), "[::1]:80");
        assert_eq!(default_port("2001:db8::2", "443"), "[2001:db8::2]:443");
    }

    #[test]
    fn has_port_colon_rules() {
        assert!(!has_port(""));
        assert!(!has_port("example.com"));
        assert!(has_port("example.com:80"));
        assert!(!has_port("::1"));
        assert!(!has_port("[::1]"));
        assert!(has_port("[::1]:80"));
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme() {
        let transport = Transport::new();
        let req = http::Request::builder()
            .uri("ftp://example.com/file")
            .body(None)
            .unwrap();
        let err = transport.round_trip(req).await.unwrap_err();
        assert!(err.is_unsupported_scheme());
    }

    #[tokio::test]
    async fn rejects_missing_authority() {
        let transport = Transport::new();
        let req = http::Request::builder().uri("/relative").body(None).unwrap();
        let err = transport.round_trip(req).await.unwrap_err();
        assert!(err.is_parse());
    }

    #[tokio::test]
    async fn https_without_tls_dialer_fails() {
        let transport = Transport::new();
        let req = http::Request::builder()
            .uri("https://example.com/")
            .body(None)
            .unwrap();
        let err = transport.round_trip(req).await.unwrap_err();
        assert!(err.is_connect());
    }
}
