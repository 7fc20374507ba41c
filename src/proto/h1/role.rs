//! 客户端视角的 HTTP/1.x 消息头处理。
//!
//! 本模块实现传输层引擎依赖的六个编解码操作中与消息头有关的部分：
//!
//! - [`request_body_size`]：根据方法与头部判定请求体的封帧方式，
//!   头部自相矛盾时报错
//! - [`response_body_size`]：应用 HTTP/1.x 的响应封帧规则
//!   （HEAD、1xx/204/304 无消息体等）
//! - [`write_request_header`]：序列化请求行与头部字段
//! - [`read_response_header`]：解析状态行与头部（基于 httparse）
//! - [`closing`]：判定对端是否要求本次交换后关闭连接
//!
//! 消息体的封帧与解帧在同级的 `encode` / `decode` 模块中。
//!
//! 请求头按调用方给出的字段原样写出，不会隐式注入 `Host` 等头部；
//! 补全默认头部是中间件的职责。

use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH};
use http::{HeaderMap, Method, Response, StatusCode, Version};

use crate::common::io::{Reader, Writer};
use crate::error::Parse;
use crate::headers;
use crate::proto::BodySize;
use crate::Error;

/// 单个响应头中允许的最大头部字段数量。
const MAX_HEADERS: usize = 64;

/// 根据头部与请求体的有无，判定请求体的封帧方式。
///
/// 规则：
/// - `Transfer-Encoding` 以 chunked 结尾 ⇒ [`BodySize::CHUNKED`]；
///   与 `Content-Length` 并存视为自相矛盾，报错
/// - 合法的 `Content-Length` ⇒ 精确长度（无效或互相矛盾的重复值报错）
/// - 声明了非零长度或 chunked 却没有提供请求体，报错
/// - 提供了请求体却没有任何封帧头部，报错
/// - 其余情况 ⇒ [`BodySize::ZERO`]
pub(crate) fn request_body_size(req: &crate::client::Request) -> crate::Result<BodySize> {
    let fields = req.headers();
    let has_body = req.body().is_some();

    if headers::transfer_encoding_is_chunked(fields) {
        if fields.contains_key(CONTENT_LENGTH) {
            return Err(Parse::transfer_encoding_unexpected().into());
        }
        if !has_body {
            return Err(Error::new_body_write(
                "request marked chunked without a body source",
            ));
        }
        return Ok(BodySize::CHUNKED);
    }

    if fields.contains_key(CONTENT_LENGTH) {
        return match headers::content_length_parse_all(fields) {
            Some(0) => Ok(BodySize::ZERO),
            Some(n) if !has_body => Err(Error::new_body_write(format!(
                "content-length announces {} bytes without a body source",
                n
            ))),
            Some(n) => BodySize::checked_new(n).map_err(Into::into),
            None => Err(Parse::content_length_invalid().into()),
        };
    }

    if has_body {
        return Err(Error::new_body_write(
            "request body has neither content-length nor chunked transfer-encoding",
        ));
    }

    Ok(BodySize::ZERO)
}

/// 应用 HTTP/1.x 的响应封帧规则，判定响应体的长度分类。
///
/// - `HEAD` 请求的响应、1xx/204/304 状态 ⇒ [`BodySize::ZERO`]
/// - chunked 传输编码 ⇒ [`BodySize::CHUNKED`]
/// - 合法的 `Content-Length` ⇒ 精确长度
/// - 都没有 ⇒ [`BodySize::UNBOUNDED`]（读到连接关闭为止）
pub(crate) fn response_body_size(
    method: &Method,
    status: StatusCode,
    fields: &HeaderMap,
) -> crate::Result<BodySize> {
    if *method == Method::HEAD {
        return Ok(BodySize::ZERO);
    }
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodySize::ZERO);
    }

    if headers::transfer_encoding_is_chunked(fields) {
        return Ok(BodySize::CHUNKED);
    }

    if fields.contains_key(CONTENT_LENGTH) {
        return match headers::content_length_parse_all(fields) {
            Some(n) => BodySize::checked_new(n).map_err(Into::into),
            None => Err(Parse::content_length_invalid().into()),
        };
    }

    Ok(BodySize::UNBOUNDED)
}

/// 判定对端（或调用方自己）是否表明本次交换后连接必须关闭。
///
/// `Connection: close` 一票否决；HTTP/1.0 及更早的版本除非显式给出
/// `Connection: keep-alive`，否则视为关闭。
pub(crate) fn closing(version: Version, fields: &HeaderMap) -> bool {
    for value in fields.get_all(CONNECTION) {
        if headers::connection_close(value) {
            return true;
        }
    }

    if version >= Version::HTTP_11 {
        return false;
    }

    !fields
        .get_all(CONNECTION)
        .into_iter()
        .any(headers::connection_keep_alive)
}

/// 序列化请求行与头部字段到连接的写半边。
///
/// 只写入缓冲区，不负责冲刷；调用方在写完后显式 `flush`。
pub(crate) async fn write_request_header(
    wr: &mut Writer,
    req: &crate::client::Request,
) -> crate::Result<()> {
    let version = match req.version() {
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_10 => "HTTP/1.0",
        _ => return Err(Parse::Version.into()),
    };
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    wr.write_all(req.method().as_str().as_bytes())
        .await
        .map_err(Error::new_io)?;
    wr.write_all(b" ").await.map_err(Error::new_io)?;
    wr.write_all(target.as_bytes()).await.map_err(Error::new_io)?;
    wr.write_all(b" ").await.map_err(Error::new_io)?;
    wr.write_all(version.as_bytes()).await.map_err(Error::new_io)?;
    wr.write_all(b"\r\n").await.map_err(Error::new_io)?;

    // HeaderMap 的迭代器对重复头部会逐值产出同名项
    for (name, value) in req.headers().iter() {
        wr.write_all(name.as_str().as_bytes())
            .await
            .map_err(Error::new_io)?;
        wr.write_all(b": ").await.map_err(Error::new_io)?;
        wr.write_all(value.as_bytes()).await.map_err(Error::new_io)?;
        wr.write_all(b"\r\n").await.map_err(Error::new_io)?;
    }

    wr.write_all(b"\r\n").await.map_err(Error::new_io)
}

/// 从连接的读半边解析响应状态行与头部。
///
/// 解析成功后，已解析的字节被消费，消息体的首字节（如有）留在缓冲区
/// 中。无法放进读缓冲区的响应头报 `TooLarge`；头部读到一半遇到 EOF
/// 报 `IncompleteMessage`。
pub(crate) async fn read_response_header(rd: &mut Reader) -> crate::Result<Response<()>> {
    loop {
        // httparse 解析出的头部借用了读缓冲区，必须在消费缓冲区之前
        // 把需要的内容拷贝成自有数据。
        let head = {
            let mut parsed_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut parsed = httparse::Response::new(&mut parsed_headers);
            match parsed.parse(rd.buffer()) {
                Ok(httparse::Status::Complete(len)) => {
                    let version = match parsed.version {
                        Some(0) => Version::HTTP_10,
                        Some(1) => Version::HTTP_11,
                        _ => return Err(Parse::Version.into()),
                    };
                    let status = StatusCode::from_u16(parsed.code.unwrap_or(0))
                        .map_err(|_| Error::from(Parse::Status))?;

                    let mut fields = HeaderMap::with_capacity(parsed.headers.len());
                    for h in parsed.headers.iter() {
                        let name = HeaderName::from_bytes(h.name.as_bytes())
                            .map_err(|_| Error::from(Parse::Header(crate::error::Header::Token)))?;
                        let value = HeaderValue::from_bytes(h.value)
                            .map_err(|_| Error::from(Parse::Header(crate::error::Header::Token)))?;
                        fields.append(name, value);
                    }

                    Some((len, version, status, fields))
                }
                Ok(httparse::Status::Partial) => None,
                Err(e) => return Err(Parse::from(e).into()),
            }
        };

        match head {
            Some((len, version, status, fields)) => {
                rd.consume(len);
                let mut resp = Response::new(());
                *resp.status_mut() = status;
                *resp.version_mut() = version;
                *resp.headers_mut() = fields;
                return Ok(resp);
            }
            None => {
                if rd.is_full() {
                    return Err(Parse::TooLarge.into());
                }
                match rd.fill().await {
                    Ok(0) => return Err(Error::new_incomplete_message()),
                    Ok(_) => {}
                    Err(e) => return Err(Error::new_io(e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Outgoing;
    use crate::common::buf;
    use crate::common::io::BoxIo;

    fn request(
        method: Method,
        headers: &[(&str, &str)],
        body: Option<Outgoing>,
    ) -> crate::client::Request {
        let mut builder = http::Request::builder()
            .method(method)
            .uri("http://example.com/index?x=1");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(body).unwrap()
    }

    #[test]
    fn request_size_from_content_length() {
        let req = request(
            Method::POST,
            &[("content-length", "3")],
            Some(Outgoing::from("abc")),
        );
        assert_eq!(request_body_size(&req).unwrap().danger_len(), 3);
    }

    #[test]
    fn request_size_conflicting_framing() {
        let req = request(
            Method::POST,
            &[("content-length", "3"), ("transfer-encoding", "chunked")],
            Some(Outgoing::from("abc")),
        );
        assert!(request_body_size(&req).unwrap_err().is_parse());
    }

    #[test]
    fn request_size_missing_body_source() {
        let req = request(Method::POST, &[("content-length", "3")], None);
        assert!(request_body_size(&req).unwrap_err().is_body_write());
    }

    #[test]
    fn request_size_body_without_framing() {
        let req = request(Method::POST, &[], Some(Outgoing::from("abc")));
        assert!(request_body_size(&req).unwrap_err().is_body_write());
    }

    #[test]
    fn request_size_no_body() {
        let req = request(Method::GET, &[], None);
        assert_eq!(request_body_size(&req).unwrap(), BodySize::ZERO);
    }

    #[test]
    fn response_size_rules() {
        let empty = HeaderMap::new();
        let mut with_len = HeaderMap::new();
        with_len.insert(CONTENT_LENGTH, HeaderValue::from_static("5"));
        let mut chunked = HeaderMap::new();
        chunked.insert(
            http::header::TRANSFER_ENCODING,
            HeaderValue::from_static("chunked"),
        );

        // HEAD 响应即使带 Content-Length 也没有消息体
        assert_eq!(
            response_body_size(&Method::HEAD, StatusCode::OK, &with_len).unwrap(),
            BodySize::ZERO
        );
        assert_eq!(
            response_body_size(&Method::GET, StatusCode::NO_CONTENT, &with_len).unwrap(),
            BodySize::ZERO
        );
        assert_eq!(
            response_body_size(&Method::GET, StatusCode::NOT_MODIFIED, &empty).unwrap(),
            BodySize::ZERO
        );
        assert_eq!(
            response_body_size(&Method::GET, StatusCode::CONTINUE, &empty).unwrap(),
            BodySize::ZERO
        );
        assert_eq!(
            response_body_size(&Method::GET, StatusCode::OK, &chunked).unwrap(),
            BodySize::CHUNKED
        );
        assert_eq!(
            response_body_size(&Method::GET, StatusCode::OK, &with_len)
                .unwrap()
                .danger_len(),
            5
        );
        assert_eq!(
            response_body_size(&Method::GET, StatusCode::OK, &empty).unwrap(),
            BodySize::UNBOUNDED
        );
    }

    #[test]
    fn closing_rules() {
        let mut close = HeaderMap::new();
        close.insert(CONNECTION, HeaderValue::from_static("close"));
        let mut keep = HeaderMap::new();
        keep.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        let empty = HeaderMap::new();

        assert!(closing(Version::HTTP_11, &close));
        assert!(!closing(Version::HTTP_11, &empty));
        assert!(closing(Version::HTTP_10, &empty));
        assert!(!closing(Version::HTTP_10, &keep));
        assert!(closing(Version::HTTP_10, &close));
    }

    #[tokio::test]
    async fn write_request_header_wire_format() {
        use tokio::io::AsyncReadExt;

        let (local, mut remote) = tokio::io::duplex(16 * 1024);
        let (_r, w) = tokio::io::split(Box::new(local) as BoxIo);
        let pair = buf::acquire();
        let mut wr = Writer::new(w, pair.write);

        let req = request(
            Method::GET,
            &[("host", "example.com"), ("accept", "*/*")],
            None,
        );
        write_request_header(&mut wr, &req).await.unwrap();
        wr.flush().await.unwrap();

        let mut out = vec![0u8; 256];
        let n = remote.read(&mut out).await.unwrap();
        assert_eq!(
            &out[..n],
            &b"GET /index?x=1 HTTP/1.1\r\nhost: example.com\r\naccept: */*\r\n\r\n"[..]
        );
    }

    #[tokio::test]
    async fn read_response_header_across_fills() {
        use tokio::io::AsyncWriteExt;

        let (local, mut remote) = tokio::io::duplex(16 * 1024);
        let (r, _w) = tokio::io::split(Box::new(local) as BoxIo);
        let pair = buf::acquire();
        let mut rd = Reader::new(r, pair.read);

        // 分两段写出响应头，迫使解析器经历一次 Partial
        remote.write_all(b"HTTP/1.1 200 OK\r\nContent-").await.unwrap();
        let server = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            remote
                .write_all(b"Length: 2\r\nConnection: close\r\n\r\nok")
                .await
                .unwrap();
            remote
        });

        let resp = read_response_header(&mut rd).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.version(), Version::HTTP_11);
        assert_eq!(resp.headers()["content-length"], "2");
        // 消息体的首字节必须留在缓冲区里
        assert_eq!(rd.buffer(), b"ok");

        drop(server);
    }

    #[tokio::test]
    async fn read_response_header_eof_is_incomplete() {
        let (local, remote) = tokio::io::duplex(1024);
        let (r, _w) = tokio::io::split(Box::new(local) as BoxIo);
        let pair = buf::acquire();
        let mut rd = Reader::new(r, pair.read);
        drop(remote);

        let err = read_response_header(&mut rd).await.unwrap_err();
        assert!(err.is_incomplete_message());
    }
}
