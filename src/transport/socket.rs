//! Platform-specific connection to the service's consumer socket.
//!
//! - Unix: Unix Domain Socket
//! - Windows: Named Pipe
//!
//! # Example
//!
//! ```ignore
//! use perfetto_consumer::transport::{default_consumer_socket, dial};
//!
//! let stream = dial(&default_consumer_socket()).await?;
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Result;

/// Environment variable overriding the consumer socket location.
pub const CONSUMER_SOCKET_ENV: &str = "PERFETTO_CONSUMER_SOCK_NAME";

#[cfg(target_os = "android")]
const DEFAULT_CONSUMER_SOCKET: &str = "/dev/socket/traced_consumer";

#[cfg(all(unix, not(target_os = "android")))]
const DEFAULT_CONSUMER_SOCKET: &str = "/tmp/perfetto-consumer";

#[cfg(windows)]
const DEFAULT_CONSUMER_SOCKET: &str = r"\\.\pipe\perfetto-consumer";

/// Location of the consumer socket: `$PERFETTO_CONSUMER_SOCK_NAME` if set
/// and non-empty, otherwise the platform default.
pub fn default_consumer_socket() -> String {
    match std::env::var(CONSUMER_SOCKET_ENV) {
        Ok(path) if !path.is_empty() => path,
        _ => DEFAULT_CONSUMER_SOCKET.to_string(),
    }
}

/// Connect to the service socket at `path`.
pub async fn dial(path: &str) -> Result<ConsumerStream> {
    let stream = ConsumerStream::connect(path).await?;
    tracing::debug!(path, "connected to consumer socket");
    Ok(stream)
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use tokio::net::UnixStream;

    /// Connected Unix Domain Socket.
    #[derive(Debug)]
    pub struct ConsumerStream {
        stream: UnixStream,
    }

    impl ConsumerStream {
        pub(super) async fn connect(path: &str) -> std::io::Result<Self> {
            Ok(Self {
                stream: UnixStream::connect(path).await?,
            })
        }
    }

    impl AsyncRead for ConsumerStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for ConsumerStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.stream).poll_write(cx, buf)
        }

        fn poll_write_vectored(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            bufs: &[std::io::IoSlice<'_>],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
        }

        fn is_write_vectored(&self) -> bool {
            self.stream.is_write_vectored()
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.stream).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.stream).poll_shutdown(cx)
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient};

    /// Connected Windows Named Pipe.
    #[derive(Debug)]
    pub struct ConsumerStream {
        pipe: NamedPipeClient,
    }

    impl ConsumerStream {
        pub(super) async fn connect(path: &str) -> std::io::Result<Self> {
            Ok(Self {
                pipe: ClientOptions::new().open(path)?,
            })
        }
    }

    impl AsyncRead for ConsumerStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.pipe).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for ConsumerStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.pipe).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.pipe).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.pipe).poll_shutdown(cx)
        }
    }
}

#[cfg(unix)]
pub use unix_impl::ConsumerStream;

#[cfg(windows)]
pub use windows_impl::ConsumerStream;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socket_path() {
        let path = default_consumer_socket();
        assert!(!path.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dial_unix_socket() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::UnixListener;

        let path = format!("/tmp/perfetto-consumer-test-{}.sock", std::process::id());
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = dial(&path).await.unwrap();
        stream.write_all(b"ping").await.unwrap();

        assert_eq!(&accept.await.unwrap(), b"ping");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_dial_missing_socket() {
        let result = dial("/nonexistent/perfetto-consumer.sock").await;
        assert!(matches!(result, Err(crate::error::ConsumerError::Io(_))));
    }
}
