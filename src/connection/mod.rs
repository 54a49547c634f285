//! Multiplexed connection to the tracing service.
//!
//! A [`Connection`] owns one byte stream and runs two tasks over it:
//!
//! - a writer task (see [`crate::writer`]) that serializes outbound frames
//! - a read loop that parses reply frames and routes them by request ID
//!
//! Callers register a handler per request ([`BindHandler`] for binds,
//! [`InvokeHandler`] for invocations). Replies reach the handler on the read
//! loop, in the order the service sent them.
//!
//! ```text
//! bind / invoke ──► Inflight (request_id -> handler)
//!                       ▲
//! socket ──► read loop ─┘──► handler.on_bind / handler.on_event
//! ```
//!
//! When the stream ends or either direction fails, every pending handler
//! receives [`ConsumerError::ConnectionLost`] and later calls fail
//! immediately.

mod cleanup;
mod handler;
mod inflight;
mod method;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::{AbortHandle, JoinHandle};

use crate::codec::MsgPackCodec;
use crate::error::{ConsumerError, Result};
use crate::protocol::{
    BindServiceReply, BindServiceRequest, Frame, FrameBuffer, RemoteError,
    ABSOLUTE_MAX_PAYLOAD_SIZE, BIND_METHOD_ID, DEFAULT_MAX_PAYLOAD_SIZE,
};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

pub use cleanup::Cleanup;
pub use handler::{BindHandler, InvokeEvent, InvokeHandler};
pub use method::{Method, MethodTable};

use inflight::{Inflight, Pending};

/// Default limit of binds and invocations waiting for replies.
pub const DEFAULT_MAX_PENDING_CALLS: usize = 256;

/// Read buffer size of the read loop.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// How long `close` waits for queued frames to be flushed.
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest payload accepted in either direction.
    pub max_payload_size: u32,
    /// Limit of requests waiting for replies.
    pub max_pending_calls: usize,
    /// Writer task settings.
    pub writer: WriterConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_pending_calls: DEFAULT_MAX_PENDING_CALLS,
            writer: WriterConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size == 0 || self.max_payload_size > ABSOLUTE_MAX_PAYLOAD_SIZE {
            return Err(ConsumerError::InvalidConfig(format!(
                "max_payload_size must be in 1..={}, got {}",
                ABSOLUTE_MAX_PAYLOAD_SIZE, self.max_payload_size
            )));
        }
        if self.max_pending_calls == 0 {
            return Err(ConsumerError::InvalidConfig(
                "max_pending_calls must be at least 1".into(),
            ));
        }
        if self.writer.channel_capacity == 0 {
            return Err(ConsumerError::InvalidConfig(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if self.writer.max_pending_frames == 0 {
            return Err(ConsumerError::InvalidConfig(
                "max_pending_frames must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Background task, aborted when dropped.
struct TaskGuard<T>(JoinHandle<T>);

impl<T> TaskGuard<T> {
    async fn stop(&mut self) {
        self.0.abort();
        let _ = (&mut self.0).await;
    }
}

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// An open session with the service.
///
/// Safe to share between tasks: `bind`, `invoke` and `abort` take `&self`.
pub struct Connection {
    inflight: Arc<Inflight>,
    writer: WriterHandle,
    reader: TaskGuard<()>,
    writer_task: JoinHandle<Result<()>>,
    cleanup: Cleanup,
    max_payload_size: u32,
}

impl Connection {
    /// Start a session over `stream`.
    ///
    /// Takes ownership of `stream` and `cleanup` even on failure: if the
    /// configuration is rejected the stream is dropped and `cleanup` runs
    /// before the error is returned.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open<S>(stream: S, config: ConnectionConfig, mut cleanup: Cleanup) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if let Err(e) = config.validate() {
            drop(stream);
            cleanup.invoke();
            return Err(e);
        }

        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, write_task) = spawn_writer_task(write_half, config.writer.clone());
        let inflight = Arc::new(Inflight::new(config.max_pending_calls));

        let reader = TaskGuard(tokio::spawn(read_loop(
            read_half,
            inflight.clone(),
            writer.clone(),
            config.max_payload_size,
        )));
        let writer_task = tokio::spawn(watch_writer(
            write_task,
            inflight.clone(),
            reader.0.abort_handle(),
        ));

        tracing::debug!(
            max_pending_calls = config.max_pending_calls,
            max_payload_size = config.max_payload_size,
            "connection opened"
        );

        Ok(Self {
            inflight,
            writer,
            reader,
            writer_task,
            cleanup,
            max_payload_size: config.max_payload_size,
        })
    }

    /// Send a bind request for `service_name`.
    ///
    /// The outcome is delivered once to `handler`: the method table, a
    /// remote error, or connection loss.
    pub async fn bind(&self, service_name: &str, handler: Arc<dyn BindHandler>) -> Result<u32> {
        let payload = MsgPackCodec::encode(&BindServiceRequest {
            service_name: service_name.to_string(),
        })?;

        let guard = PendingGuard::new(self, Pending::Bind(handler))?;
        self.send_request(BIND_METHOD_ID, guard.request_id, payload)
            .await?;

        tracing::debug!(service = service_name, request_id = guard.request_id, "bind sent");
        Ok(guard.disarm())
    }

    /// Invoke `method` with `request`.
    ///
    /// `handler` receives zero or more `Message` events followed by exactly
    /// one `End` or `Failed`. Returns the request ID, which can be passed
    /// to [`Connection::abort`].
    pub async fn invoke<Req>(
        &self,
        method: &Method,
        request: &Req,
        handler: Arc<dyn InvokeHandler>,
    ) -> Result<u32>
    where
        Req: Serialize,
    {
        let payload = MsgPackCodec::encode(request)?;
        if payload.len() > self.max_payload_size as usize {
            return Err(ConsumerError::Protocol(format!(
                "Request payload of {} bytes exceeds limit of {}",
                payload.len(),
                self.max_payload_size
            )));
        }

        let mut guard = PendingGuard::new(
            self,
            Pending::Invoke {
                method_id: method.id(),
                handler,
            },
        )?;
        guard.queued = true;
        self.send_request(method.id(), guard.request_id, payload)
            .await?;

        tracing::trace!(
            method = method.name(),
            request_id = guard.request_id,
            "invoke sent"
        );
        Ok(guard.disarm())
    }

    /// Stop an invocation: its handler gets no further events and the
    /// service is asked to stop sending.
    ///
    /// Does nothing if the invocation already finished.
    pub fn abort(&self, request_id: u32) {
        if self.inflight.remove(request_id).is_none() {
            return;
        }
        self.send_abort(request_id);
    }

    fn send_abort(&self, request_id: u32) {
        match self.writer.try_send(OutboundFrame::abort(request_id)) {
            Ok(()) => tracing::debug!(request_id, "abort sent"),
            Err(e) => tracing::debug!(request_id, error = %e, "abort not sent"),
        }
    }

    async fn send_request(&self, method_id: u16, request_id: u32, payload: Vec<u8>) -> Result<()> {
        self.writer
            .send(OutboundFrame::request(method_id, request_id, Bytes::from(payload)))
            .await
    }

    /// True once the stream ended, failed, or `close` was called.
    pub fn is_closed(&self) -> bool {
        self.inflight.lost_reason().is_some()
    }

    /// Number of requests waiting for replies.
    pub fn pending_requests(&self) -> usize {
        self.inflight.len()
    }

    /// Close the session and release the stream.
    ///
    /// Pending requests fail with `ConnectionLost`, queued frames are
    /// flushed, and the cleanup action runs.
    pub async fn close(self) {
        let Connection {
            inflight,
            writer,
            mut reader,
            mut writer_task,
            mut cleanup,
            ..
        } = self;

        inflight.fail_all("connection closed by client");
        reader.stop().await;
        drop(writer);

        match tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, &mut writer_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::debug!(error = %e, "writer task ended with error"),
            Ok(Err(e)) => tracing::debug!(error = %e, "writer task panicked"),
            Err(_) => {
                tracing::warn!("writer task did not finish in time");
                writer_task.abort();
            }
        }

        cleanup.invoke();
        tracing::debug!("connection closed");
    }
}

/// Removes a registered request unless disarmed.
///
/// Covers send failures and callers dropping the `bind`/`invoke` future.
/// Once `queued` is set the request may have reached the service, so an
/// ABORT follows the removal.
struct PendingGuard<'a> {
    conn: &'a Connection,
    request_id: u32,
    queued: bool,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    fn new(conn: &'a Connection, pending: Pending) -> Result<Self> {
        let request_id = conn.inflight.register(pending)?;
        Ok(Self {
            conn,
            request_id,
            queued: false,
            armed: true,
        })
    }

    fn disarm(mut self) -> u32 {
        self.armed = false;
        self.request_id
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.conn.inflight.remove(self.request_id).is_some() && self.queued {
            self.conn.send_abort(self.request_id);
        }
    }
}

/// Wait for the writer task; if it fails, the connection is lost.
async fn watch_writer(
    task: JoinHandle<Result<()>>,
    inflight: Arc<Inflight>,
    reader: AbortHandle,
) -> Result<()> {
    let mut task = TaskGuard(task);
    let result = match (&mut task.0).await {
        Ok(result) => result,
        Err(e) => Err(ConsumerError::ConnectionLost(format!(
            "writer task failed: {e}"
        ))),
    };
    if let Err(e) = &result {
        reader.abort();
        inflight.fail_all(&format!("write failed: {e}"));
    }
    result
}

async fn read_loop<R>(reader: R, inflight: Arc<Inflight>, writer: WriterHandle, max_payload: u32)
where
    R: AsyncRead + Unpin,
{
    let reason = match read_frames(reader, &inflight, &writer, max_payload).await {
        Ok(()) => "service closed the connection".to_string(),
        Err(e) => {
            tracing::error!(error = %e, "read loop failed");
            e.to_string()
        }
    };
    inflight.fail_all(&reason);
}

async fn read_frames<R>(
    mut reader: R,
    inflight: &Inflight,
    writer: &WriterHandle,
    max_payload: u32,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::with_max_payload(max_payload);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for frame in frame_buffer.push(&buf[..n])? {
            dispatch_frame(frame, inflight, writer).await;
        }
    }
}

/// Route one inbound frame to the handler waiting for it.
async fn dispatch_frame(frame: Frame, inflight: &Inflight, writer: &WriterHandle) {
    let request_id = frame.request_id();

    if !frame.header.is_from_service() {
        tracing::warn!(request_id, "ignoring frame not marked as from service");
        return;
    }

    if frame.is_abort() {
        tracing::debug!(request_id, "service aborted request");
        match inflight.remove(request_id) {
            Some(Pending::Bind(handler)) => {
                handler.on_bind(Err(ConsumerError::Remote("bind aborted by service".into())))
            }
            Some(Pending::Invoke { handler, .. }) => {
                let _ = handler.on_event(InvokeEvent::Failed(ConsumerError::Remote(
                    "request aborted by service".into(),
                )));
            }
            None => {}
        }
        return;
    }

    if !frame.is_response() {
        tracing::warn!(
            request_id,
            method_id = frame.method_id(),
            "ignoring unexpected request frame"
        );
        return;
    }

    if frame.is_bind() {
        match inflight.take_bind(request_id) {
            Some(handler) => handler.on_bind(bind_outcome(&frame)),
            None => tracing::debug!(request_id, "bind reply for unknown request"),
        }
        return;
    }

    let Some((method_id, handler)) = inflight.invoke_handler(request_id) else {
        tracing::debug!(request_id, "reply for unknown or finished request");
        return;
    };

    if method_id != frame.method_id() {
        inflight.remove(request_id);
        let _ = handler.on_event(InvokeEvent::Failed(ConsumerError::Protocol(format!(
            "Reply for request {} carries method {}, expected {}",
            request_id,
            frame.method_id(),
            method_id
        ))));
        return;
    }

    if frame.is_error() {
        inflight.remove(request_id);
        let _ = handler.on_event(InvokeEvent::Failed(remote_error(frame.payload())));
        return;
    }

    if frame.is_stream() && !frame.is_stream_end() {
        let flow = handler.on_event(InvokeEvent::Message(frame.payload.clone()));
        if flow.is_break() && inflight.remove(request_id).is_some() {
            if let Err(e) = writer.send(OutboundFrame::abort(request_id)).await {
                tracing::debug!(request_id, error = %e, "abort not sent");
            } else {
                tracing::debug!(request_id, "stream aborted by handler");
            }
        }
        return;
    }

    // Single reply, or the last frame of a stream.
    inflight.remove(request_id);
    if !frame.is_stream() || !frame.payload.is_empty() {
        if let ControlFlow::Break(()) = handler.on_event(InvokeEvent::Message(frame.payload.clone()))
        {
            return;
        }
    }
    let _ = handler.on_event(InvokeEvent::End);
}

fn bind_outcome(frame: &Frame) -> Result<MethodTable> {
    if frame.is_error() {
        return Err(remote_error(frame.payload()));
    }
    let reply: BindServiceReply = MsgPackCodec::decode(frame.payload())?;
    MethodTable::from_reply(reply)
}

fn remote_error(payload: &[u8]) -> ConsumerError {
    if payload.is_empty() {
        return ConsumerError::Remote("service reported an error".into());
    }
    match MsgPackCodec::decode::<RemoteError>(payload) {
        Ok(err) => ConsumerError::Remote(err.message),
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, flags, BindServiceReply, Header, RemoteMethod, HEADER_SIZE};
    use parking_lot::Mutex;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadBuf};
    use tokio::sync::mpsc;

    /// Stream that never yields data and rejects every write.
    struct BrokenWrites;

    impl AsyncRead for BrokenWrites {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for BrokenWrites {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct BindRecorder(mpsc::UnboundedSender<Result<MethodTable>>);

    impl BindHandler for BindRecorder {
        fn on_bind(&self, outcome: Result<MethodTable>) {
            let _ = self.0.send(outcome);
        }
    }

    #[derive(Default)]
    struct InvokeRecorder {
        events: Mutex<Vec<String>>,
        stop_after: Option<usize>,
    }

    impl InvokeHandler for InvokeRecorder {
        fn on_event(&self, event: InvokeEvent) -> ControlFlow<()> {
            let mut events = self.events.lock();
            events.push(match event {
                InvokeEvent::Message(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                InvokeEvent::End => "<end>".into(),
                InvokeEvent::Failed(e) => format!("<failed: {e}>"),
            });
            match self.stop_after {
                Some(n) if events.len() >= n => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        }
    }

    async fn read_frame(server: &mut DuplexStream) -> (Header, Vec<u8>) {
        let mut header = [0u8; HEADER_SIZE];
        server.read_exact(&mut header).await.unwrap();
        let header = Header::decode(&header).unwrap();
        let mut payload = vec![0u8; header.payload_length as usize];
        server.read_exact(&mut payload).await.unwrap();
        (header, payload)
    }

    async fn wait_closed(conn: &Connection) {
        while !conn.is_closed() {
            tokio::task::yield_now().await;
        }
    }

    fn open(config: ConnectionConfig) -> (Connection, DuplexStream) {
        let (client, server) = duplex(64 * 1024);
        (Connection::open(client, config, Cleanup::noop()).unwrap(), server)
    }

    #[test]
    fn test_config_validation() {
        assert!(ConnectionConfig::default().validate().is_ok());

        let mut config = ConnectionConfig::default();
        config.max_pending_calls = 0;
        assert!(matches!(config.validate(), Err(ConsumerError::InvalidConfig(_))));

        let mut config = ConnectionConfig::default();
        config.max_payload_size = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_open_invalid_config_runs_cleanup() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let (client, _server) = duplex(1024);
        let mut config = ConnectionConfig::default();
        config.writer.channel_capacity = 0;

        let result = Connection::open(
            client,
            config,
            Cleanup::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(matches!(result, Err(ConsumerError::InvalidConfig(_))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bind_round_trip() {
        let (conn, mut server) = open(ConnectionConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        conn.bind("ConsumerPort", Arc::new(BindRecorder(tx))).await.unwrap();

        let (header, payload) = read_frame(&mut server).await;
        assert!(header.is_bind());
        let request: BindServiceRequest = MsgPackCodec::decode(&payload).unwrap();
        assert_eq!(request.service_name, "ConsumerPort");

        let reply = MsgPackCodec::encode(&BindServiceReply {
            service_id: 3,
            methods: vec![RemoteMethod {
                id: 5,
                name: "QueryServiceState".into(),
            }],
        })
        .unwrap();
        server
            .write_all(&build_frame(BIND_METHOD_ID, flags::RESPONSE, header.request_id, &reply))
            .await
            .unwrap();

        let table = rx.recv().await.unwrap().unwrap();
        assert_eq!(table.get("QueryServiceState").map(Method::id), Some(5));
        assert_eq!(conn.pending_requests(), 0);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_stream_chunks_in_order() {
        let (conn, mut server) = open(ConnectionConfig::default());
        let rec = Arc::new(InvokeRecorder::default());
        let method = Method::new("Echo", 7);

        let id = conn.invoke(&method, &(), rec.clone()).await.unwrap();
        let (header, _) = read_frame(&mut server).await;
        assert_eq!((header.method_id, header.request_id), (7, id));

        for chunk in [&b"a"[..], &b"b"[..], &b"c"[..]] {
            server
                .write_all(&build_frame(7, flags::STREAM_CHUNK, id, chunk))
                .await
                .unwrap();
        }
        server
            .write_all(&build_frame(7, flags::STREAM_END_RESPONSE, id, &[]))
            .await
            .unwrap();

        drop(server);
        wait_closed(&conn).await;
        assert_eq!(*rec.events.lock(), vec!["a", "b", "c", "<end>"]);
    }

    #[tokio::test]
    async fn test_handler_break_sends_abort() {
        let (conn, mut server) = open(ConnectionConfig::default());
        let rec = Arc::new(InvokeRecorder {
            stop_after: Some(1),
            ..Default::default()
        });

        let id = conn
            .invoke(&Method::new("Echo", 7), &(), rec.clone())
            .await
            .unwrap();
        read_frame(&mut server).await;

        for chunk in [&b"a"[..], &b"b"[..]] {
            server
                .write_all(&build_frame(7, flags::STREAM_CHUNK, id, chunk))
                .await
                .unwrap();
        }

        let (header, payload) = read_frame(&mut server).await;
        assert!(header.is_abort());
        assert_eq!(header.request_id, id);
        assert!(payload.is_empty());
        assert_eq!(*rec.events.lock(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_error_reply_is_remote_error() {
        let (conn, mut server) = open(ConnectionConfig::default());
        let rec = Arc::new(InvokeRecorder::default());

        let id = conn
            .invoke(&Method::new("Echo", 7), &(), rec.clone())
            .await
            .unwrap();
        read_frame(&mut server).await;

        let err = MsgPackCodec::encode(&RemoteError {
            message: "boom".into(),
        })
        .unwrap();
        server
            .write_all(&build_frame(7, flags::ERROR_RESPONSE, id, &err))
            .await
            .unwrap();

        drop(server);
        wait_closed(&conn).await;
        assert_eq!(*rec.events.lock(), vec!["<failed: Remote error: boom>"]);
    }

    #[tokio::test]
    async fn test_eof_fails_pending_and_later_calls() {
        let (conn, server) = open(ConnectionConfig::default());
        let rec = Arc::new(InvokeRecorder::default());
        conn.invoke(&Method::new("Echo", 7), &(), rec.clone())
            .await
            .unwrap();

        drop(server);
        wait_closed(&conn).await;

        assert_eq!(
            *rec.events.lock(),
            vec!["<failed: Connection lost: service closed the connection>"]
        );
        let err = conn
            .invoke(&Method::new("Echo", 7), &(), rec.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerError::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn test_write_failure_fails_pending_and_later_calls() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let conn = Connection::open(
            BrokenWrites,
            ConnectionConfig::default(),
            Cleanup::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        conn.bind("ConsumerPort", Arc::new(BindRecorder(tx))).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("bind outcome after write failure")
            .unwrap();
        assert!(matches!(outcome, Err(ConsumerError::ConnectionLost(_))));
        assert!(conn.is_closed());
        assert_eq!(conn.pending_requests(), 0);

        let rec = Arc::new(InvokeRecorder::default());
        let err = conn
            .invoke(&Method::new("Echo", 7), &(), rec.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerError::ConnectionLost(_)));
        assert!(rec.events.lock().is_empty());

        conn.close().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let (conn, mut server) = open(ConnectionConfig::default());
        let rec = Arc::new(InvokeRecorder::default());
        let id = conn
            .invoke(&Method::new("Echo", 7), &(), rec.clone())
            .await
            .unwrap();
        read_frame(&mut server).await;

        conn.abort(id);
        conn.abort(id);

        let (header, _) = read_frame(&mut server).await;
        assert!(header.is_abort());
        assert_eq!(conn.pending_requests(), 0);

        conn.close().await;
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(rec.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_close_runs_cleanup_once_and_fails_pending() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let (client, _server) = duplex(1024);
        let conn = Connection::open(
            client,
            ConnectionConfig::default(),
            Cleanup::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.bind("ConsumerPort", Arc::new(BindRecorder(tx))).await.unwrap();

        conn.close().await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            Err(ConsumerError::ConnectionLost(_))
        ));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
