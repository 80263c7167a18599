use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::provider::{PollEntry, SendJob, Transport};

/// Number of chunks that may sit between the scheduler and the HTTP connection.
pub const SOCKET_QUEUE_DEPTH: usize = 2;

/// The sending half of a response body, the "socket" the scheduler writes to.
pub type BodySender = mpsc::Sender<Bytes>;

/// Creates a connected body sender and response body streaming `length` bytes.
pub fn body_channel(length: u64) -> (BodySender, SessionBody) {
    let (tx, rx) = mpsc::channel(SOCKET_QUEUE_DEPTH);
    (tx, SessionBody::new(rx, length))
}

/// [`Transport`] over tokio channels feeding hyper response bodies.
///
/// A socket is writable while its channel has room, and sends are spawned on
/// the runtime, so they complete outside of the scheduler tick. Regular
/// files never block, so every file reports readable.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    runtime: Handle,
}

impl ChannelTransport {
    pub fn new(runtime: Handle) -> Self {
        ChannelTransport { runtime }
    }

    /// Uses the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        ChannelTransport::new(Handle::current())
    }
}

impl Transport for ChannelTransport {
    type Socket = BodySender;

    fn poll(&self, entries: &mut [PollEntry<'_, BodySender>]) -> io::Result<usize> {
        let mut ready = 0;
        for entry in entries.iter_mut() {
            entry.readable = entry.read_interest;
            // a closed body is "writable" so that the next send finds out
            entry.writable =
                entry.write_interest && (entry.socket.capacity() > 0 || entry.socket.is_closed());
            if entry.is_ready() {
                ready += 1;
            }
        }
        Ok(ready)
    }

    fn send_nonblocking(&self, socket: &BodySender, payload: Bytes) -> io::Result<usize> {
        if payload.is_empty() {
            return Ok(0);
        }
        let len = payload.len();
        match socket.try_send(payload) {
            Ok(()) => Ok(len),
            Err(TrySendError::Full(_)) => Ok(0),
            Err(TrySendError::Closed(_)) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "response body was dropped"))
            }
        }
    }

    fn enqueue_async_send(&self, job: SendJob<BodySender>) -> io::Result<()> {
        let transport = self.clone();
        self.runtime.spawn(async move { job.run(&transport) });
        Ok(())
    }
}

/// Response body stream. Implements [`Stream`], [`Body`], and [`IntoResponse`].
///
/// Ends once every sender is gone. Ending before `length` bytes arrived
/// yields an error, so the connection is torn down instead of looking complete.
#[pin_project]
#[derive(Debug)]
pub struct SessionBody {
    rx: mpsc::Receiver<Bytes>,
    remaining: u64,
    length: u64,
    done: bool,
}

impl SessionBody {
    pub(crate) fn new(rx: mpsc::Receiver<Bytes>, length: u64) -> Self {
        SessionBody { rx, remaining: length, length, done: false }
    }
}

impl IntoResponse for SessionBody {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl Body for SessionBody {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.length)
    }

    fn is_end_stream(&self) -> bool {
        self.done || self.length == 0
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl Stream for SessionBody {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(chunk)) => {
                let len = chunk.len() as u64;
                if len > *this.remaining {
                    *this.done = true;
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "more bytes than announced",
                    ))));
                }
                *this.remaining -= len;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                *this.done = true;
                if *this.remaining > 0 {
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("download ended {} bytes short", this.remaining),
                    ))))
                } else {
                    Poll::Ready(None)
                }
            }
        }
    }
}
