//! 请求体的封帧写出。
//!
//! [`write_body`] 按照 [`request_body_size`](super::role::request_body_size)
//! 判定的封帧方式，把请求体来源的字节写入连接的写半边：
//!
//! - 精确长度：写出恰好 n 字节；来源提前耗尽是错误
//! - chunked：每读到一段就写出一个分块，来源耗尽时写出终止分块
//!
//! 写出只进入写半边的缓冲区；最终的 `flush` 由调用方（请求体写入任务）
//! 负责。

use tokio::io::AsyncReadExt;

use crate::body::Outgoing;
use crate::common::buf::BUFFER_SIZE;
use crate::common::io::Writer;
use crate::proto::BodySize;
use crate::Error;

/// 把请求体按 `size` 规定的封帧方式全部写入 `wr`。
pub(crate) async fn write_body(
    wr: &mut Writer,
    body: &mut Outgoing,
    size: BodySize,
) -> crate::Result<()> {
    debug_assert!(size != BodySize::ZERO && size != BodySize::UNBOUNDED);

    if size == BodySize::CHUNKED {
        write_chunked(wr, body).await
    } else {
        write_exact(wr, body, size.danger_len()).await
    }
}

async fn write_exact(wr: &mut Writer, body: &mut Outgoing, len: u64) -> crate::Result<()> {
    let mut scratch = vec![0u8; BUFFER_SIZE.min(usize::try_from(len).unwrap_or(usize::MAX))];
    let mut remaining = len;

    while remaining > 0 {
        let want = scratch.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let got = body
            .read(&mut scratch[..want])
            .await
            .map_err(Error::new_body_write)?;
        if got == 0 {
            return Err(Error::new_body_write(
                "request body ended before content-length",
            ));
        }
        wr.write_all(&scratch[..got]).await.map_err(Error::new_io)?;
        remaining -= got as u64;
    }

    Ok(())
}

async fn write_chunked(wr: &mut Writer, body: &mut Outgoing) -> crate::Result<()> {
    let mut scratch = vec![0u8; BUFFER_SIZE];

    loop {
        let got = body
            .read(&mut scratch)
            .await
            .map_err(Error::new_body_write)?;
        if got == 0 {
            // 终止分块；本实现不发送 trailer
            return wr.write_all(b"0\r\n\r\n").await.map_err(Error::new_io);
        }

        let size_line = format!("{:x}\r\n", got);
        wr.write_all(size_line.as_bytes())
            .await
            .map_err(Error::new_io)?;
        wr.write_all(&scratch[..got]).await.map_err(Error::new_io)?;
        wr.write_all(b"\r\n").await.map_err(Error::new_io)?;
    }
}
