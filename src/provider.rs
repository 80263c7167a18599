//! Capabilities the streaming engine needs from the device: a storage
//! provider that opens and reads files, and a transport that reports socket
//! readiness and performs sends off the scheduler's call stack.

use std::io;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

/// Identifier of an open file, as reported to the readiness poll.
pub type Descriptor = u64;

/// Identifier of a download session within one scheduler.
pub type SessionId = u64;

/// A file opened for reading. Closed when dropped.
pub trait StorageFile: Send {
    fn descriptor(&self) -> Descriptor;

    /// Size of the file when it was opened.
    fn byte_size(&self) -> u64;

    /// Reads up to `buf.len()` bytes. `Ok(0)` means end of file and
    /// [`io::ErrorKind::WouldBlock`] means "try again on a later tick".
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Positions the file at `offset` bytes from its start.
    fn seek(&mut self, offset: u64) -> io::Result<()>;
}

pub trait Storage {
    type File: StorageFile;

    /// Opens the file at an absolute storage path for reading.
    fn open(&self, path: &str) -> io::Result<Self::File>;

    fn size(&self, path: &str) -> io::Result<u64>;

    fn is_directory(&self, path: &str) -> bool;
}

/// One (file, socket) pair handed to [`Transport::poll`].
#[derive(Debug)]
pub struct PollEntry<'a, S> {
    pub file: Descriptor,
    pub socket: &'a S,
    pub read_interest: bool,
    pub write_interest: bool,
    /// Set by the transport.
    pub readable: bool,
    /// Set by the transport.
    pub writable: bool,
}

impl<'a, S> PollEntry<'a, S> {
    pub fn new(file: Descriptor, socket: &'a S, read_interest: bool, write_interest: bool) -> Self {
        PollEntry {
            file,
            socket,
            read_interest,
            write_interest,
            readable: false,
            writable: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.readable || self.writable
    }
}

pub trait Transport {
    /// Non-owning handle to the response side of a request.
    type Socket: Clone + Send + 'static;

    /// Fills in readiness for every entry without blocking and returns the
    /// number of entries that are ready for anything.
    fn poll(&self, entries: &mut [PollEntry<'_, Self::Socket>]) -> io::Result<usize>;

    /// Sends as much of `payload` as the socket accepts right now.
    fn send_nonblocking(&self, socket: &Self::Socket, payload: Bytes) -> io::Result<usize>;

    /// Queues `job` to run on the I/O runtime. The job reports back to the
    /// scheduler by itself, including when it is dropped without running.
    fn enqueue_async_send(&self, job: SendJob<Self::Socket>) -> io::Result<()>;
}

/// Outcome of one asynchronous send, routed back into the scheduler tick.
#[derive(Debug)]
pub struct SendCompletion {
    pub session: SessionId,
    pub result: io::Result<usize>,
}

/// A unit of send work for exactly one session.
///
/// The payload is a copy of the bytes at the session buffer's read cursor;
/// the cursor itself only moves once the completion is applied by the tick.
#[derive(Debug)]
pub struct SendJob<S> {
    session: SessionId,
    socket: S,
    payload: Bytes,
    completions: Option<UnboundedSender<SendCompletion>>,
}

impl<S> SendJob<S> {
    pub(crate) fn new(
        session: SessionId,
        socket: S,
        payload: Bytes,
        completions: UnboundedSender<SendCompletion>,
    ) -> Self {
        SendJob {
            session,
            socket,
            payload,
            completions: Some(completions),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Performs the send through `transport` and reports the result.
    pub fn run<T: Transport<Socket = S>>(self, transport: &T) {
        let result = transport.send_nonblocking(&self.socket, self.payload.clone());
        self.complete(result);
    }

    pub fn complete(mut self, result: io::Result<usize>) {
        self.report(result);
    }

    fn report(&mut self, result: io::Result<usize>) {
        if let Some(completions) = self.completions.take() {
            // the scheduler is gone, nobody is waiting for this send
            let _ = completions.send(SendCompletion { session: self.session, result });
        }
    }
}

impl<S> Drop for SendJob<S> {
    fn drop(&mut self) {
        self.report(Err(io::Error::new(io::ErrorKind::Interrupted, "send job dropped before running")));
    }
}
