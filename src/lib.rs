#![deny(missing_docs)]                  // 所有公共 API 必须有文档注释
#![deny(missing_debug_implementations)] // 所有公共类型必须实现 Debug trait
#![cfg_attr(test, deny(rust_2018_idioms))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # strand
//!
//! strand is a minimal, extensible HTTP/1.x client **transport**: given a
//! parsed request it establishes (or reuses) a connection to the remote
//! host, writes the request, reads the response, and manages the
//! connection's fate afterwards — returning it to an idle pool for reuse,
//! or closing it.
//!
//! ## What it does
//!
//! - One request/response exchange per connection at a time, with the
//!   request body written concurrently with the response read.
//! - Cancellable round-trips that never leak connections.
//! - An idle connection pool keyed by scheme and authority, swept by a
//!   lazy, time-based reaper.
//! - A response body stream that pins the connection until the caller is
//!   done reading and that releases the connection on close.
//! - A middleware layer that composes request-transforming wrappers into a
//!   linear chain around the transport.
//!
//! ## What it does not do
//!
//! strand is a building block, not a convenience client. There is no
//! HTTP/2, no pipelining, no automatic retry, no redirect or cookie
//! handling — those belong in middleware layered on top. TCP and TLS
//! connection establishment are supplied by the caller as dial functions
//! (a plain TCP default is provided; TLS has no default).
//!
//! ## Example
//!
//! ```no_run
//! use strand::Transport;
//! use tokio::io::AsyncReadExt;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Transport::new();
//!
//! let req = http::Request::builder()
//!     .uri("http://example.com/")
//!     .header("host", "example.com")
//!     .body(None)?;
//!
//! let mut resp = transport.round_trip(req).await?;
//!
//! let mut body = Vec::new();
//! resp.body_mut().read_to_end(&mut body).await?;
//! # Ok(())
//! # }
//! ```

// 隐藏地重新导出 http crate，允许下游代码通过 `strand::http` 访问。
#[doc(hidden)]
pub use http;

// 从 `http` crate 重新导出核心 HTTP 类型，使用户无需单独添加 `http` 依赖。
#[doc(no_inline)]
pub use http::{header, HeaderMap, Method, StatusCode, Uri, Version};

pub use crate::body::{Incoming, Outgoing};
pub use crate::client::middleware::{middleware_fn, wrap, BoxFuture, Middleware, RoundTripper};
pub use crate::client::{Builder, Request, Response, Transport};
pub use crate::error::{Error, Result};

// `#[macro_use]` 使得 trace 模块中定义的日志宏（trace!、debug! 等）
// 在整个 crate 中可用。此模块必须最先声明。
#[macro_use]
mod trace;

/// HTTP 消息体（body）相关的类型：请求体来源与响应体流。
pub mod body;
/// HTTP 客户端传输层：Transport、连接池与中间件组合。
pub mod client;
// 内部通用工具模块：缓冲区池与带缓冲的连接读写半边。
mod common;
// 错误类型模块，通过上面的 `pub use` 导出公共 API。
mod error;
// HTTP 头部工具函数模块（非公共）。
mod headers;
// HTTP/1.x 编解码模块（非公共）。
mod proto;
