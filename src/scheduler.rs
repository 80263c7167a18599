//! The cooperative driver for all download sessions.
//!
//! [`SessionScheduler::tick`] never blocks: it polls readiness with a zero
//! timeout and performs at most one bounded read and one send hand-off per
//! session. Sends run on the transport's runtime and come back as
//! [`SendCompletion`] messages that the next tick applies, so every state
//! transition of a session happens here.

use std::io;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::provider::{PollEntry, SendCompletion, SessionId, Storage, StorageFile, Transport};
use crate::range::{parse_range_header, ByteRange};
use crate::session::{DownloadSession, SessionState};
use crate::path;
use crate::units::format_size;

/// Per-session I/O bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    /// Largest single read from a file.
    pub max_read: usize,
    /// Largest single send hand-off.
    pub max_send: usize,
    /// Capacity of each session's cyclic buffer.
    pub buffer_size: usize,
    pub max_sessions: usize,
    /// Sessions without progress for this long are failed.
    pub idle_timeout: Option<Duration>,
}

impl Default for StreamLimits {
    fn default() -> Self {
        StreamLimits {
            max_read: 1024,
            max_send: 1024,
            buffer_size: 4 * 1024,
            max_sessions: 4,
            idle_timeout: None,
        }
    }
}

/// An opened file and the part of it a response will carry.
#[derive(Debug)]
pub struct Download<F> {
    path: String,
    file: F,
    range: Option<ByteRange>,
}

impl<F: StorageFile> Download<F> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The partial range, `None` for a full-content response.
    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }

    pub fn total(&self) -> u64 {
        self.file.byte_size()
    }

    pub fn content_length(&self) -> u64 {
        self.range.map_or_else(|| self.total(), |range| range.len())
    }
}

/// What a single tick did, mostly for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub completions: usize,
    pub reaped: usize,
    pub ready: usize,
    pub reads: usize,
    pub sends: usize,
}

pub struct SessionScheduler<St: Storage, T: Transport> {
    storage: St,
    transport: T,
    limits: StreamLimits,
    sessions: Vec<DownloadSession<St::File, T::Socket>>,
    next_id: SessionId,
    completions_tx: UnboundedSender<SendCompletion>,
    completions_rx: UnboundedReceiver<SendCompletion>,
}

impl<St: Storage, T: Transport> SessionScheduler<St, T> {
    pub fn new(storage: St, transport: T, limits: StreamLimits) -> Self {
        let (completions_tx, completions_rx) = unbounded_channel();
        SessionScheduler {
            storage,
            transport,
            limits,
            sessions: Vec::with_capacity(limits.max_sessions),
            next_id: 1,
            completions_tx,
            completions_rx,
        }
    }

    pub fn limits(&self) -> &StreamLimits {
        &self.limits
    }

    pub fn storage(&self) -> &St {
        &self.storage
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions still holding a slot; finished ones waiting to be reaped do not.
    pub fn active(&self) -> usize {
        self.sessions.iter().filter(|session| !session.reapable()).count()
    }

    fn ensure_capacity(&self) -> Result<(), Error> {
        if self.active() >= self.limits.max_sessions {
            return Err(Error::TooManySessions(self.limits.max_sessions));
        }
        Ok(())
    }

    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.session(id).map(|session| session.state())
    }

    pub fn session(&self, id: SessionId) -> Option<&DownloadSession<St::File, T::Socket>> {
        self.sessions.iter().find(|session| session.id() == id)
    }

    /// Opens `path` and resolves the optional raw `Range` header against it.
    ///
    /// Range errors are reported here, before any session exists.
    pub fn open(&self, path: &str, range: Option<&str>) -> Result<Download<St::File>, Error> {
        self.ensure_capacity()?;
        if self.storage.is_directory(path) {
            return Err(Error::NotFound(path.to_string()));
        }

        let file = self.storage.open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.to_string()),
            _ => Error::Io(e),
        })?;

        let range = match range {
            Some(header) => parse_range_header(header, file.byte_size())?,
            None => None,
        };

        Ok(Download { path: path.to_string(), file, range })
    }

    /// Starts streaming `download` to `socket`.
    pub fn start(&mut self, download: Download<St::File>, socket: T::Socket) -> Result<SessionId, Error> {
        self.ensure_capacity()?;

        let id = self.next_id;
        self.next_id += 1;

        let Download { path, file, range } = download;
        let session = DownloadSession::new(id, path, file, socket, range, self.limits.buffer_size)?;
        info!(
            session = id,
            path = %session.path(),
            kind = %path::file_type(session.path()),
            size = %format_size(session.bytes_to_send()),
            "download started"
        );
        self.sessions.push(session);
        Ok(id)
    }

    /// Services every session once.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport {
            completions: self.apply_completions(),
            ..TickReport::default()
        };

        if let Some(timeout) = self.limits.idle_timeout {
            self.expire_idle(Instant::now(), timeout);
        }
        report.reaped = self.reap();

        let mut entries: Vec<PollEntry<'_, T::Socket>> = self
            .sessions
            .iter()
            .map(|session| {
                PollEntry::new(
                    session.descriptor(),
                    session.socket(),
                    session.wants_read(),
                    session.wants_write(),
                )
            })
            .collect();

        if !entries.iter().any(|entry| entry.read_interest || entry.write_interest) {
            return report;
        }

        match self.transport.poll(&mut entries) {
            Ok(0) => return report,
            Ok(ready) => report.ready = ready,
            Err(e) => {
                warn!(error = %e, "readiness poll failed");
                return report;
            }
        }

        let readiness: Vec<(bool, bool)> = entries
            .iter()
            .map(|entry| (entry.read_interest && entry.readable, entry.write_interest && entry.writable))
            .collect();
        drop(entries);

        for (session, &(readable, _)) in self.sessions.iter_mut().zip(&readiness) {
            if readable && session.wants_read() {
                session.read_step(self.limits.max_read);
                report.reads += 1;
            }
        }

        for (session, &(_, writable)) in self.sessions.iter_mut().zip(&readiness) {
            if !writable {
                continue;
            }
            let Some(job) = session.write_step(self.limits.max_send, &self.completions_tx) else {
                continue;
            };
            report.sends += 1;
            if let Err(e) = self.transport.enqueue_async_send(job) {
                // the dropped job reports the failure on the next tick
                warn!(session = session.id(), error = %e, "could not queue send");
            }
        }

        trace!(?report, "tick");
        report
    }

    /// Removes every session that is finished and has no send in flight.
    /// Returns how many were removed.
    pub fn reap(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|session| {
            if !session.reapable() {
                return true;
            }
            match session.state() {
                SessionState::Completed => info!(
                    session = session.id(),
                    path = %session.path(),
                    sent = %format_size(session.bytes_sent()),
                    "download completed"
                ),
                _ => warn!(
                    session = session.id(),
                    path = %session.path(),
                    sent = session.bytes_sent(),
                    expected = session.bytes_to_send(),
                    "download failed"
                ),
            }
            false
        });
        before - self.sessions.len()
    }

    /// Fails sessions that made no progress since `now - timeout`.
    pub fn expire_idle(&mut self, now: Instant, timeout: Duration) {
        for session in self.sessions.iter_mut() {
            if session.finished() {
                continue;
            }
            if now.saturating_duration_since(session.last_progress()) >= timeout {
                debug!(session = session.id(), ?timeout, "download stalled");
                session.fail();
            }
        }
    }

    /// Fails every session, e.g. on shutdown. They are reaped as soon as
    /// their sends in flight come back.
    pub fn cancel_all(&mut self) {
        for session in self.sessions.iter_mut() {
            session.fail();
        }
    }

    fn apply_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(SendCompletion { session, result }) = self.completions_rx.try_recv() {
            match self.sessions.iter_mut().find(|s| s.id() == session) {
                Some(target) => {
                    target.on_send_complete(result);
                    applied += 1;
                }
                None => debug!(session, "completion for an unknown session"),
            }
        }
        applied
    }
}
