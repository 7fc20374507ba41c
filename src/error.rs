//! strand 错误与结果类型模块
//!
//! 本模块定义了 strand 的核心错误类型 [`Error`] 及其相关的辅助类型。
//! 传输层中所有可能发生的错误——HTTP 解析错误、连接建立错误、I/O 错误、
//! 取消、响应体超时等——都被统一封装在 `Error` 类型中。
//!
//! ## 设计理念
//!
//! - **不透明错误**：`Error` 使用 `Box<ErrorImpl>` 包装内部实现，既减小了
//!   栈上的大小（仅一个指针宽度），又隐藏了内部结构细节。
//! - **错误链**：通过 `std::error::Error::source()` 支持错误链。拨号函数和
//!   底层流产生的错误、以及调用方提供的取消错误，都作为 cause 原样携带。
//! - **类别判断**：用户代码通过 `Error` 上的各种 `is_*` 方法来判断错误
//!   类别；内部的错误分类（`Kind`、`Parse` 等枚举）仅供 crate 内部使用。

// 引入标准库的 Error trait，重命名为 StdError 以避免与自身的 Error 类型冲突
use std::error::Error as StdError;
use std::fmt;

/// strand 方法常用的 `Result` 类型别名。
pub type Result<T> = std::result::Result<T, Error>;

/// 错误原因的类型别名。
///
/// 使用 `Box<dyn StdError + Send + Sync>` 作为类型擦除的错误原因，
/// `Send + Sync` 约束确保错误可以安全地跨线程传递。
pub(crate) type Cause = Box<dyn StdError + Send + Sync>;

/// 表示执行 HTTP 往返（round-trip）时可能发生的错误。
///
/// # 格式化
///
/// 此类型的 `Display` 实现只会打印当前层级的错误详情，即使它可能是由
/// 另一个错误引起的。要打印所有相关信息（包括 source 链），请使用
/// `std::error::Report` 或等效的第三方类型。
///
/// # Source
///
/// `strand::Error` 可能由另一个错误引起——底层拨号函数或字节流的 I/O
/// 错误、调用方传入的取消错误等。这些错误通过 `Error::source()` 以类型
/// 擦除的方式暴露，可以检查但不应依赖其确切类型。
pub struct Error {
    // 使用 Box 进行堆分配，使 Error 的栈大小仅为一个指针宽度。
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

/// 错误分类枚举，仅供 crate 内部使用。
#[derive(Debug)]
pub(crate) enum Kind {
    /// HTTP 解析错误，包含具体的解析错误子类型
    Parse(Parse),
    /// 消息在完成之前遇到了 EOF（连接关闭）
    IncompleteMessage,
    /// 请求的 scheme 既不是 "http" 也不是 "https"
    UnsupportedScheme,
    /// 往返被调用方的取消信号中止
    Canceled,
    /// 取消信号触发时没有携带错误值
    NilCancel,
    /// 在响应体已关闭之后继续调用了 `read`
    ReadAfterClose,
    /// 响应体读取命中了设置的截止时间；非粘滞，可重设截止时间后重试
    BodyTimeout,
    /// 拨号函数建立连接失败
    Connect,
    /// 在尝试读写底层流时发生的 `io::Error`
    Io,
    /// 向连接写入请求体时发生的错误
    BodyWrite,
}

/// HTTP 解析错误的子分类枚举。
#[derive(Debug)]
pub(crate) enum Parse {
    /// 解析到无效的 HTTP 版本号，或请求使用了无法序列化的版本
    Version,
    /// 请求的 URI 缺少或含有无效的 authority
    Uri,
    /// 解析到无效的 HTTP 状态码
    Status,
    /// HTTP 头部解析错误，包含具体的头部错误子类型
    Header(Header),
    /// 消息头部超出了连接的读缓冲区容量
    TooLarge,
    /// chunked 传输编码中出现无效的分块
    Chunk,
}

/// HTTP 头部解析错误的子分类枚举。
#[derive(Debug)]
pub(crate) enum Header {
    /// 头部包含无效的 token 字符
    Token,
    /// Content-Length 头部值无效或多个值互相矛盾
    ContentLengthInvalid,
    /// 出现了与 Content-Length 冲突的 Transfer-Encoding 头部
    TransferEncodingUnexpected,
}

impl Error {
    /// 如果这是一个 HTTP 解析错误，返回 `true`。
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// 如果连接在消息完成之前就关闭了，返回 `true`。
    ///
    /// 这意味着底层连接报告了 EOF，而 HTTP 状态表明消息还需要传输更多
    /// 数据。典型场景：响应头只收到一半、`Content-Length` 宣告的字节数
    /// 没有全部到达。
    pub fn is_incomplete_message(&self) -> bool {
        matches!(self.inner.kind, Kind::IncompleteMessage)
    }

    /// 如果请求的 scheme 不受支持（既非 "http" 也非 "https"），返回 `true`。
    pub fn is_unsupported_scheme(&self) -> bool {
        matches!(self.inner.kind, Kind::UnsupportedScheme)
    }

    /// 如果往返被调用方的取消信号中止，返回 `true`。
    ///
    /// 取消信号携带的错误值（如果有）通过 [`Error::source()`]
    /// (std::error::Error::source) 原样暴露。
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// 如果取消信号触发时没有携带错误值，返回 `true`。
    pub fn is_nil_cancel(&self) -> bool {
        matches!(self.inner.kind, Kind::NilCancel)
    }

    /// 如果在响应体关闭之后继续读取，返回 `true`。
    pub fn is_read_after_close(&self) -> bool {
        matches!(self.inner.kind, Kind::ReadAfterClose)
    }

    /// 如果响应体读取命中了设置的截止时间，返回 `true`。
    ///
    /// 这类错误不会粘滞在响应体上：调用方可以重新设置（或清除）截止
    /// 时间后继续读取。
    pub fn is_body_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::BodyTimeout)
    }

    /// 如果错误来自拨号函数，返回 `true`。
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// 如果错误来自底层流的读写，返回 `true`。
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// 如果错误发生在写入请求体时，返回 `true`。
    pub fn is_body_write(&self) -> bool {
        matches!(self.inner.kind, Kind::BodyWrite)
    }

    /// 创建一个新的 `Error`，仅指定错误类别，不带原因。
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    /// 为已有的 `Error` 附加一个错误原因。
    ///
    /// 采用 builder 模式，返回 `self` 以支持链式调用：
    /// `Error::new(kind).with(cause)`
    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    /// 创建一个"消息不完整"错误。
    pub(crate) fn new_incomplete_message() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    /// 创建一个"不支持的 scheme"错误。
    pub(crate) fn new_unsupported_scheme() -> Error {
        Error::new(Kind::UnsupportedScheme)
    }

    /// 创建一个"已取消"错误，调用方的取消错误作为原因附加。
    pub(crate) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    /// 创建一个"空取消"错误。
    pub(crate) fn new_nil_cancel() -> Error {
        Error::new(Kind::NilCancel)
    }

    /// 创建一个"关闭后读取"错误。
    pub(crate) fn new_read_after_close() -> Error {
        Error::new(Kind::ReadAfterClose)
    }

    /// 创建一个"响应体超时"错误。
    pub(crate) fn new_body_timeout() -> Error {
        Error::new(Kind::BodyTimeout)
    }

    /// 创建一个拨号错误，将底层错误作为原因附加。
    pub(crate) fn new_connect<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Connect).with(cause)
    }

    /// 创建一个 I/O 错误，将 `std::io::Error` 作为原因附加。
    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    /// 创建一个"写入请求体错误"，将底层错误作为原因附加。
    pub(crate) fn new_body_write<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::BodyWrite).with(cause)
    }

    /// 获取当前错误的人类可读描述字符串。
    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::Version) => "invalid HTTP version",
            Kind::Parse(Parse::Uri) => "request has no usable authority",
            Kind::Parse(Parse::Status) => "invalid HTTP status-code parsed",
            Kind::Parse(Parse::Header(Header::Token)) => "invalid HTTP header parsed",
            Kind::Parse(Parse::Header(Header::ContentLengthInvalid)) => {
                "invalid content-length parsed"
            }
            Kind::Parse(Parse::Header(Header::TransferEncodingUnexpected)) => {
                "unexpected transfer-encoding parsed"
            }
            Kind::Parse(Parse::TooLarge) => "message head is too large",
            Kind::Parse(Parse::Chunk) => "invalid chunk in chunked transfer-encoding",
            Kind::IncompleteMessage => "connection closed before message completed",
            Kind::UnsupportedScheme => "unsupported scheme in request",
            Kind::Canceled => "round-trip was canceled",
            Kind::NilCancel => "round-trip cancelled with nil error",
            Kind::ReadAfterClose => "read after close on response body",
            Kind::BodyTimeout => "response body timed out",
            Kind::Connect => "error connecting to remote host",
            Kind::Io => "connection error",
            Kind::BodyWrite => "error writing a body to connection",
        }
    }
}

/// 输出格式为 `strand::Error(Kind, Cause)`，既显示错误类别，
/// 也在存在原因时显示原因。
impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("strand::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

/// 仅显示当前层级的错误描述，不包含 source 链。
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

/// 允许使用 `?` 操作符直接将 `Parse` 错误转换为 `Error`。
impl From<Parse> for Error {
    fn from(err: Parse) -> Error {
        Error::new(Kind::Parse(err))
    }
}

impl Parse {
    /// 创建一个"Content-Length 无效"解析错误。
    pub(crate) fn content_length_invalid() -> Self {
        Parse::Header(Header::ContentLengthInvalid)
    }

    /// 创建一个"意外的 Transfer-Encoding"解析错误。
    pub(crate) fn transfer_encoding_unexpected() -> Self {
        Parse::Header(Header::TransferEncodingUnexpected)
    }
}

/// 将 httparse 的错误类型映射到内部的 `Parse` 枚举，
/// 使得解析错误可以无缝地融入 strand 的错误体系。
impl From<httparse::Error> for Parse {
    fn from(err: httparse::Error) -> Parse {
        match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::NewLine
            | httparse::Error::Token => Parse::Header(Header::Token),
            httparse::Error::Status => Parse::Status,
            httparse::Error::TooManyHeaders => Parse::TooLarge,
            httparse::Error::Version => Parse::Version,
        }
    }
}
