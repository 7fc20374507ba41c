//! HTTP/1.x 编解码实现。
//!
//! 子模块分工：
//! - `role`: 客户端视角的消息头处理——请求头序列化、响应头解析、
//!   消息体长度分类、连接关闭意图判定
//! - `encode`: 请求体的封帧写出（identity / chunked）
//! - `decode`: 响应体的解帧读取（Content-Length / chunked / 读到 EOF）

pub(crate) mod decode;
pub(crate) mod encode;
pub(crate) mod role;

pub(crate) use self::decode::Decoder;
