//! 中间件组合层。
//!
//! 往返器（round-tripper）契约：任何能执行 `round_trip(req) -> resp`
//! 的值。[`Transport`](crate::Transport) 是最内层的往返器；中间件
//! （[`Middleware`]）把一个往返器包装成另一个往返器，可以在调用下一
//! 层之前改写请求、调用零次或多次（重试）、或在响应返回后做后处理。
//!
//! [`wrap`] 把一列中间件右结合地叠在基础往返器外面：
//!
//! ```text
//! wrap(t, [a, b, c])  ==>  a → b → c → t
//! ```
//!
//! 组合律：`wrap(t, [m1, m2]) == wrap(wrap(t, [m2]), [m1])`；
//! `wrap(t, [])` 与 `t` 行为完全一致。
//!
//! 本层对中间件不做任何额外约束——重试、短路、改写请求体都是允许的。
//! 具体的中间件实现（重定向、Cookie、默认头部、并发限制……）不属于
//! 传输层。

use std::future::Future;
use std::pin::Pin;

use crate::client::{Request, Response};

/// 盒装的未来值，中间件契约中使用的统一返回形态。
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 能执行 HTTP 往返的对象。
///
/// [`Transport`](crate::Transport) 实现了本 trait；[`wrap`] 的返回值
/// 也实现了本 trait，因此中间件链可以继续被包装。
pub trait RoundTripper: Send + Sync {
    /// 发出请求并等待响应。
    fn round_trip(&self, req: Request) -> BoxFuture<'_, crate::Result<Response>>;
}

/// 中间件：对往返器的一层包装。
///
/// `handle` 收到请求和下一层往返器 `next`，可以读写请求、调用
/// `next.round_trip` 零次或多次、并对响应做后处理。
///
/// 闭包形式的中间件用 [`middleware_fn`] 构造。
pub trait Middleware: Send + Sync {
    /// 处理请求；`next` 是链中的下一层。
    fn handle<'a>(
        &'a self,
        req: Request,
        next: &'a dyn RoundTripper,
    ) -> BoxFuture<'a, crate::Result<Response>>;
}

/// 签名匹配的闭包（或函数）自动成为中间件。
impl<F> Middleware for F
where
    F: for<'a> Fn(Request, &'a dyn RoundTripper) -> BoxFuture<'a, crate::Result<Response>>,
    F: Send + Sync,
{
    fn handle<'a>(
        &'a self,
        req: Request,
        next: &'a dyn RoundTripper,
    ) -> BoxFuture<'a, crate::Result<Response>> {
        (self)(req, next)
    }
}

/// 帮助编译器把闭包推断成中间件需要的高阶签名。
///
/// ```
/// use strand::{middleware_fn, wrap, Request, RoundTripper, Transport};
///
/// let with_ua = middleware_fn(|mut req: Request, next: &dyn RoundTripper| {
///     req.headers_mut()
///         .entry(http::header::USER_AGENT)
///         .or_insert_with(|| http::HeaderValue::from_static("strand"));
///     next.round_trip(req)
/// });
///
/// let rt = wrap(Transport::new(), vec![Box::new(with_ua)]);
/// # drop(rt);
/// ```
pub fn middleware_fn<F>(f: F) -> F
where
    F: for<'a> Fn(Request, &'a dyn RoundTripper) -> BoxFuture<'a, crate::Result<Response>>,
    F: Send + Sync,
{
    f
}

/// 把一列中间件包装到往返器外面。
///
/// 组合是右结合的：列表里的第一个中间件在最外层，最先看到请求、
/// 最后看到响应。空列表返回与 `rt` 行为一致的往返器。
pub fn wrap<T>(rt: T, middleware: Vec<Box<dyn Middleware>>) -> Box<dyn RoundTripper>
where
    T: RoundTripper + 'static,
{
    let mut rt: Box<dyn RoundTripper> = Box::new(rt);
    for mw in middleware.into_iter().rev() {
        rt = Box::new(Wrapped { mw, next: rt });
    }
    rt
}

/// 链中的一环：一个中间件加上它的下一层。
struct Wrapped {
    mw: Box<dyn Middleware>,
    next: Box<dyn RoundTripper>,
}

impl RoundTripper for Wrapped {
    fn round_trip(&self, req: Request) -> BoxFuture<'_, crate::Result<Response>> {
        self.mw.handle(req, &*self.next)
    }
}

/// 盒装的往返器自身也是往返器，方便把 `wrap` 的结果继续传给 `wrap`。
impl RoundTripper for Box<dyn RoundTripper> {
    fn round_trip(&self, req: Request) -> BoxFuture<'_, crate::Result<Response>> {
        (**self).round_trip(req)
    }
}
