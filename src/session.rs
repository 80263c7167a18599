use std::io;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

use crate::buffer::CyclicBuffer;
use crate::provider::{SendCompletion, SendJob, SessionId, StorageFile};
use crate::range::ByteRange;

/// Where a session stands, derived from its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for readiness, possibly mid transfer.
    Idle,
    /// A send is in flight.
    Scheduled,
    Completed,
    Failed,
}

/// One file transfer: an owned file, a borrowed socket and the buffer between them.
///
/// The file is closed when the session is dropped. The socket is only a
/// handle, its lifetime belongs to the HTTP layer.
#[derive(Debug)]
pub struct DownloadSession<F, S> {
    id: SessionId,
    path: String,
    file: F,
    socket: S,
    buffer: CyclicBuffer,
    bytes_to_send: u64,
    remaining_to_read: u64,
    bytes_sent: u64,
    in_flight: usize,
    last_progress: Instant,
    pub(crate) scheduled: bool,
    pub(crate) read_done: bool,
    pub(crate) completed: bool,
    pub(crate) failed: bool,
}

impl<F: StorageFile, S: Clone> DownloadSession<F, S> {
    /// Binds `file` to `socket`, positioned at the start of `range` (or the
    /// whole file when there is none).
    pub fn new(
        id: SessionId,
        path: impl Into<String>,
        mut file: F,
        socket: S,
        range: Option<ByteRange>,
        buffer_size: usize,
    ) -> io::Result<Self> {
        let range = range.unwrap_or_else(|| ByteRange::new(0, file.byte_size()));
        if range.start > 0 {
            file.seek(range.start)?;
        }
        let bytes_to_send = range.len();

        Ok(DownloadSession {
            id,
            path: path.into(),
            file,
            socket,
            buffer: CyclicBuffer::new(buffer_size),
            bytes_to_send,
            remaining_to_read: bytes_to_send,
            bytes_sent: 0,
            in_flight: 0,
            last_progress: Instant::now(),
            scheduled: false,
            read_done: bytes_to_send == 0,
            completed: false,
            failed: false,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn descriptor(&self) -> u64 {
        self.file.descriptor()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_to_send(&self) -> u64 {
        self.bytes_to_send
    }

    pub fn buffer(&self) -> &CyclicBuffer {
        &self.buffer
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn last_progress(&self) -> Instant {
        self.last_progress
    }

    pub fn state(&self) -> SessionState {
        if self.failed {
            SessionState::Failed
        } else if self.completed {
            SessionState::Completed
        } else if self.scheduled {
            SessionState::Scheduled
        } else {
            SessionState::Idle
        }
    }

    pub fn finished(&self) -> bool {
        self.completed || self.failed
    }

    /// Finished and with no send left that could still touch the session.
    pub fn reapable(&self) -> bool {
        self.finished() && !self.scheduled
    }

    pub fn wants_read(&self) -> bool {
        !self.scheduled && !self.finished() && !self.read_done && !self.buffer.full()
    }

    pub fn wants_write(&self) -> bool {
        !self.scheduled && !self.finished()
    }

    /// True when a write step would make progress: there are buffered bytes,
    /// or the read side is done and the final (possibly empty) send is due.
    pub fn can_write(&self) -> bool {
        self.wants_write() && (self.read_done || !self.buffer.empty())
    }

    /// Reads at most `chunk_limit` bytes from the file into the buffer.
    pub fn read_step(&mut self, chunk_limit: usize) {
        if !self.wants_read() {
            return;
        }

        let quota = usize::try_from(self.remaining_to_read).unwrap_or(usize::MAX);
        let span = self.buffer.writable();
        let len = span.len().min(quota).min(chunk_limit);
        if len == 0 {
            return;
        }

        match self.file.read(&mut span[..len]) {
            Ok(0) => {
                if self.remaining_to_read > 0 {
                    warn!(
                        session = self.id,
                        path = %self.path,
                        missing = self.remaining_to_read,
                        "file ended before the requested range"
                    );
                }
                self.read_done = true;
            }
            Ok(n) => {
                self.buffer.submit_write(n);
                // n <= len <= remaining_to_read
                self.remaining_to_read -= n as u64;
                if self.remaining_to_read == 0 {
                    self.read_done = true;
                }
                self.last_progress = Instant::now();
                trace!(session = self.id, n, buffered = self.buffer.bytes_to_read(), "read");
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                warn!(session = self.id, path = %self.path, error = %e, "read failed");
                self.failed = true;
            }
        }
    }

    /// Marks the session as scheduled and builds the send job for the bytes
    /// at the read cursor, at most `chunk_limit` of them.
    pub fn write_step(
        &mut self,
        chunk_limit: usize,
        completions: &UnboundedSender<SendCompletion>,
    ) -> Option<SendJob<S>> {
        if !self.can_write() {
            return None;
        }
        debug_assert!(!self.scheduled, "session {} already has a send in flight", self.id);

        let span = self.buffer.readable();
        let len = span.len().min(chunk_limit);
        let payload = Bytes::copy_from_slice(&span[..len]);

        self.scheduled = true;
        self.in_flight = len;
        trace!(session = self.id, len, "send scheduled");
        Some(SendJob::new(self.id, self.socket.clone(), payload, completions.clone()))
    }

    /// Applies the outcome of the send issued by the last write step.
    pub fn on_send_complete(&mut self, result: io::Result<usize>) {
        if !self.scheduled {
            warn!(session = self.id, "completion for a session with no send in flight");
            return;
        }

        match result {
            Ok(n) if n <= self.in_flight => {
                self.buffer.submit_read(n);
                self.bytes_sent += n as u64;
                if n > 0 {
                    self.last_progress = Instant::now();
                }
            }
            Ok(n) => {
                warn!(session = self.id, n, in_flight = self.in_flight, "transport reported more bytes than were queued");
                self.failed = true;
            }
            Err(e) => {
                debug!(session = self.id, error = %e, "send failed");
                self.failed = true;
            }
        }

        if !self.failed && self.read_done && self.buffer.empty() {
            self.completed = true;
        }
        self.in_flight = 0;
        self.scheduled = false;
    }

    /// Fails the session from outside, e.g. when it stalled for too long.
    /// A send in flight still has to come back before the session is reaped.
    pub fn fail(&mut self) {
        if !self.completed {
            self.failed = true;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io;

    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    /// In-memory file whose reads can be capped or made to fail.
    #[derive(Debug)]
    pub(crate) struct MemFile {
        pub data: Vec<u8>,
        pub pos: usize,
        pub max_read: usize,
        pub fail_reads: bool,
    }

    impl MemFile {
        pub fn new(data: Vec<u8>) -> Self {
            MemFile { data, pos: 0, max_read: usize::MAX, fail_reads: false }
        }
    }

    impl StorageFile for MemFile {
        fn descriptor(&self) -> u64 {
            3
        }

        fn byte_size(&self) -> u64 {
            self.data.len() as u64
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_reads {
                return Err(io::Error::other("card removed"));
            }
            let n = buf.len().min(self.max_read).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn seek(&mut self, offset: u64) -> io::Result<()> {
            self.pos = offset as usize;
            Ok(())
        }
    }

    fn session(data: &[u8], range: Option<ByteRange>) -> DownloadSession<MemFile, ()> {
        DownloadSession::new(1, "/test.bin", MemFile::new(data.to_vec()), (), range, 8).unwrap()
    }

    #[test]
    fn streams_whole_file_in_order() {
        let data: Vec<u8> = (0..50).collect();
        let mut session = session(&data, None);
        let (tx, _rx) = unbounded_channel();
        let mut received = Vec::new();

        while !session.finished() {
            session.read_step(3);
            if let Some(job) = session.write_step(2, &tx) {
                assert!(session.is_scheduled());
                assert!(session.write_step(2, &tx).is_none(), "second send while one is in flight");
                received.extend_from_slice(job.payload());
                let n = job.payload().len();
                job.complete(Ok(n));
                session.on_send_complete(Ok(n));
            }
        }

        assert_eq!(SessionState::Completed, session.state());
        assert_eq!(data, received);
        assert_eq!(50, session.bytes_sent());
    }

    #[test]
    fn range_seeks_and_limits_the_quota() {
        let data: Vec<u8> = (0..100).collect();
        let mut session = session(&data, Some(ByteRange::new(10, 15)));
        assert_eq!(5, session.bytes_to_send());

        session.read_step(64);
        assert!(session.read_done);
        assert_eq!(5, session.buffer().bytes_to_read());

        let (tx, _rx) = unbounded_channel();
        let job = session.write_step(64, &tx).unwrap();
        assert_eq!(&[10, 11, 12, 13, 14], job.payload().as_ref());
        session.on_send_complete(Ok(5));
        assert_eq!(SessionState::Completed, session.state());
    }

    #[test]
    fn partial_send_resends_the_remainder() {
        let mut session = session(b"abcdef", None);
        let (tx, _rx) = unbounded_channel();
        session.read_step(64);

        let job = session.write_step(64, &tx).unwrap();
        assert_eq!(b"abcdef", job.payload().as_ref());
        session.on_send_complete(Ok(4));
        assert_eq!(SessionState::Idle, session.state());

        let job = session.write_step(64, &tx).unwrap();
        assert_eq!(b"ef", job.payload().as_ref());
        session.on_send_complete(Ok(2));
        assert_eq!(SessionState::Completed, session.state());
    }

    #[test]
    fn read_error_fails_the_session() {
        let mut session = session(b"abc", None);
        session.file.fail_reads = true;
        session.read_step(64);
        assert_eq!(SessionState::Failed, session.state());
        assert!(session.reapable());
    }

    #[test]
    fn send_error_fails_the_session() {
        let mut session = session(b"abc", None);
        let (tx, _rx) = unbounded_channel();
        session.read_step(64);
        let _job = session.write_step(64, &tx).unwrap();
        assert!(!session.reapable());

        session.on_send_complete(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        assert_eq!(SessionState::Failed, session.state());
        assert!(session.reapable());
        assert_eq!(0, session.bytes_sent());
    }

    #[test]
    fn overlong_completion_fails_the_session() {
        let mut session = session(b"abc", None);
        let (tx, _rx) = unbounded_channel();
        session.read_step(64);
        let _job = session.write_step(2, &tx).unwrap();
        session.on_send_complete(Ok(3));
        assert_eq!(SessionState::Failed, session.state());
    }

    #[test]
    fn empty_file_completes_with_an_empty_send() {
        let mut session = session(b"", None);
        let (tx, _rx) = unbounded_channel();
        assert!(!session.wants_read());

        let job = session.write_step(64, &tx).unwrap();
        assert!(job.payload().is_empty());
        session.on_send_complete(Ok(0));
        assert_eq!(SessionState::Completed, session.state());
    }

    #[test]
    fn short_file_ends_the_read_side() {
        let mut session = session(b"abc", Some(ByteRange::new(0, 10)));
        session.read_step(64);
        session.read_step(64);
        assert!(session.read_done);
        assert!(!session.failed);
    }
}
