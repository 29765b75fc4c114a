/// 单向数据泵
///
/// 从源端读出的每个字节原样写入目的端，不做过滤或解析
use crate::error::{BridgeError, BridgeOp};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// 数据泵的结束方式
#[derive(Debug)]
pub enum BridgeOutcome {
    /// 源端正常结束
    Eof { bytes: u64 },
    /// 读或写出错
    Failed(BridgeError),
    /// 观察到取消信号
    Cancelled { bytes: u64 },
}

impl BridgeOutcome {
    /// 已转发的字节数
    pub fn bytes(&self) -> u64 {
        match self {
            BridgeOutcome::Eof { bytes } | BridgeOutcome::Cancelled { bytes } => *bytes,
            BridgeOutcome::Failed(err) => err.bytes,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, BridgeOutcome::Eof { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeOutcome::Cancelled { .. })
    }

    pub fn error(&self) -> Option<&BridgeError> {
        match self {
            BridgeOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for BridgeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeOutcome::Eof { bytes } => write!(f, "eof after {} bytes", bytes),
            BridgeOutcome::Failed(err) => write!(f, "{}", err),
            BridgeOutcome::Cancelled { bytes } => write!(f, "cancelled after {} bytes", bytes),
        }
    }
}

/// 将 `source` 的数据搬运到 `destination`，直到 EOF、出错或被取消
///
/// 只持有一个 `buffer_size` 大小的缓冲区；两端的关闭由调用方负责
pub async fn bridge<R, W>(
    source: &mut R,
    destination: &mut W,
    cancel: &CancellationToken,
    buffer_size: usize,
) -> BridgeOutcome
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut bytes: u64 = 0;

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return BridgeOutcome::Cancelled { bytes },
            result = source.read(&mut buf) => match result {
                Ok(0) => return BridgeOutcome::Eof { bytes },
                Ok(n) => n,
                Err(e) => {
                    return BridgeOutcome::Failed(BridgeError {
                        op: BridgeOp::Read,
                        bytes,
                        source: e,
                    })
                }
            },
        };

        let write = async {
            destination.write_all(&buf[..n]).await?;
            destination.flush().await
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return BridgeOutcome::Cancelled { bytes },
            result = write => {
                if let Err(e) = result {
                    return BridgeOutcome::Failed(BridgeError {
                        op: BridgeOp::Write,
                        bytes,
                        source: e,
                    });
                }
            }
        }

        bytes += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    /// 写入总是失败的目的端
    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_bridge_preserves_every_byte() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        let mut source: &[u8] = &payload;
        let mut destination = Vec::new();
        let cancel = CancellationToken::new();

        // 小缓冲区强制多次读写
        let outcome = bridge(&mut source, &mut destination, &cancel, 1000).await;

        assert!(outcome.is_eof());
        assert_eq!(outcome.bytes(), payload.len() as u64);
        assert_eq!(destination, payload);
    }

    #[tokio::test]
    async fn test_bridge_keeps_zero_bytes() {
        let payload = [0u8, 0, 1, 0, 255, 0];
        let mut source: &[u8] = &payload;
        let mut destination = Vec::new();

        let outcome = bridge(&mut source, &mut destination, &CancellationToken::new(), 1).await;

        assert!(outcome.is_eof());
        assert_eq!(destination, payload);
    }

    #[tokio::test]
    async fn test_bridge_empty_source() {
        let mut source: &[u8] = &[];
        let mut destination = Vec::new();

        let outcome = bridge(&mut source, &mut destination, &CancellationToken::new(), 64).await;

        assert!(outcome.is_eof());
        assert_eq!(outcome.bytes(), 0);
        assert!(destination.is_empty());
    }

    #[tokio::test]
    async fn test_bridge_write_error() {
        let mut source: &[u8] = b"data";
        let mut destination = BrokenWriter;

        let outcome = bridge(&mut source, &mut destination, &CancellationToken::new(), 64).await;

        let err = outcome.error().expect("write should fail");
        assert_eq!(err.op, BridgeOp::Write);
        assert_eq!(err.bytes, 0);
        assert_eq!(err.source.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_bridge_stops_on_cancel() {
        // 对端保持打开但不发送数据，数据泵阻塞在读上
        let (_peer, mut source) = tokio::io::duplex(64);
        let mut destination = Vec::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            bridge(&mut source, &mut destination, &cancel, 64),
        )
        .await
        .expect("bridge should observe cancellation");

        assert!(outcome.is_cancelled());
        assert_eq!(outcome.bytes(), 0);
    }

    #[tokio::test]
    async fn test_bridge_streams_incrementally() {
        let (mut writer, mut source) = tokio::io::duplex(16);
        let (mut destination, mut reader) = tokio::io::duplex(16);
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(async move {
            bridge(&mut source, &mut destination, &cancel, 4).await
        });

        writer.write_all(b"first").await.unwrap();
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"first");

        writer.write_all(b"second").await.unwrap();
        drop(writer);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"second");

        let outcome = pump.await.unwrap();
        assert!(outcome.is_eof());
        assert_eq!(outcome.bytes(), 11);
    }
}
