//! Drives the scheduler against scripted storage and transport doubles whose
//! readiness, read sizes and send sizes vary from tick to tick.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use proptest::prelude::*;

use sd_file_server::{
    PollEntry, SendJob, SessionScheduler, SessionState, Storage, StorageFile, StreamLimits, Transport,
};

struct ScriptedFile {
    data: Arc<Vec<u8>>,
    pos: usize,
    read_cap: Arc<AtomicUsize>,
}

impl StorageFile for ScriptedFile {
    fn descriptor(&self) -> u64 {
        10
    }

    fn byte_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let cap = self.read_cap.load(Ordering::Relaxed);
        if cap == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(cap).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.pos = offset as usize;
        Ok(())
    }
}

struct ScriptedStorage {
    files: HashMap<&'static str, Arc<Vec<u8>>>,
    read_cap: Arc<AtomicUsize>,
}

impl Storage for ScriptedStorage {
    type File = ScriptedFile;

    fn open(&self, path: &str) -> io::Result<ScriptedFile> {
        let data = self.files.get(path).ok_or(io::ErrorKind::NotFound)?;
        Ok(ScriptedFile { data: Arc::clone(data), pos: 0, read_cap: Arc::clone(&self.read_cap) })
    }

    fn size(&self, path: &str) -> io::Result<u64> {
        Ok(self.files.get(path).ok_or(io::ErrorKind::NotFound)?.len() as u64)
    }

    fn is_directory(&self, _path: &str) -> bool {
        false
    }
}

#[derive(Default)]
struct WireState {
    readable: Cell<bool>,
    writable: Cell<bool>,
    send_cap: Cell<usize>,
    queued: RefCell<Vec<SendJob<u32>>>,
    received: RefCell<HashMap<u32, Vec<u8>>>,
    max_in_flight: Cell<usize>,
}

#[derive(Clone, Default)]
struct Wire(Rc<WireState>);

impl Wire {
    fn run_queued(&self) {
        let jobs: Vec<_> = self.0.queued.borrow_mut().drain(..).collect();
        for job in jobs {
            job.run(self);
        }
    }
}

impl Transport for Wire {
    type Socket = u32;

    fn poll(&self, entries: &mut [PollEntry<'_, u32>]) -> io::Result<usize> {
        let mut ready = 0;
        for entry in entries.iter_mut() {
            entry.readable = entry.read_interest && self.0.readable.get();
            entry.writable = entry.write_interest && self.0.writable.get();
            ready += usize::from(entry.is_ready());
        }
        Ok(ready)
    }

    fn send_nonblocking(&self, socket: &u32, payload: Bytes) -> io::Result<usize> {
        let n = payload.len().min(self.0.send_cap.get());
        self.0.received.borrow_mut().entry(*socket).or_default().extend_from_slice(&payload[..n]);
        Ok(n)
    }

    fn enqueue_async_send(&self, job: SendJob<u32>) -> io::Result<()> {
        let mut queued = self.0.queued.borrow_mut();
        assert!(queued.iter().all(|other| other.session() != job.session()));
        queued.push(job);
        let in_flight = queued.len().max(self.0.max_in_flight.get());
        self.0.max_in_flight.set(in_flight);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Step {
    readable: bool,
    writable: bool,
    read_cap: usize,
    send_cap: usize,
    run_sends: bool,
}

fn step() -> impl Strategy<Value = Step> {
    (any::<bool>(), any::<bool>(), 0usize..40, 0usize..40, any::<bool>()).prop_map(
        |(readable, writable, read_cap, send_cap, run_sends)| Step { readable, writable, read_cap, send_cap, run_sends },
    )
}

fn file(len: usize, seed: u8) -> Arc<Vec<u8>> {
    Arc::new((0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_schedule_delivers_the_exact_bytes(
        a_len in 0usize..600,
        b_len in 0usize..600,
        buffer_size in 2usize..64,
        max_read in 1usize..32,
        max_send in 1usize..32,
        steps in proptest::collection::vec(step(), 1..64),
    ) {
        let a = file(a_len, 1);
        let b = file(b_len, 2);
        let read_cap = Arc::new(AtomicUsize::new(0));
        let storage = ScriptedStorage {
            files: HashMap::from([("/a", Arc::clone(&a)), ("/b", Arc::clone(&b))]),
            read_cap: Arc::clone(&read_cap),
        };
        let wire = Wire::default();
        let limits = StreamLimits { max_read, max_send, buffer_size, max_sessions: 2, idle_timeout: None };
        let mut scheduler = SessionScheduler::new(storage, wire.clone(), limits);

        let first = scheduler.start(scheduler.open("/a", None).unwrap(), 1).unwrap();
        let second = scheduler.start(scheduler.open("/b", None).unwrap(), 2).unwrap();

        // the scripted prefix, then a steady tail that lets everything finish
        let tail = Step { readable: true, writable: true, read_cap: 7, send_cap: 5, run_sends: true };
        let mut ticks = 0;
        for step in steps.iter().chain(std::iter::repeat(&tail)) {
            if scheduler.is_empty() {
                break;
            }
            wire.0.readable.set(step.readable);
            wire.0.writable.set(step.writable);
            wire.0.send_cap.set(step.send_cap);
            read_cap.store(step.read_cap, Ordering::Relaxed);

            scheduler.tick();
            for id in [first, second] {
                if let Some(session) = scheduler.session(id) {
                    let buffer = session.buffer();
                    prop_assert_eq!(buffer.capacity() - 1, buffer.bytes_to_read() + buffer.bytes_to_write());
                    prop_assert!(session.bytes_sent() <= session.bytes_to_send());
                }
            }
            if step.run_sends {
                wire.run_queued();
            }

            ticks += 1;
            prop_assert!(ticks < 100_000, "transfer stalled");
        }

        prop_assert!(wire.0.max_in_flight.get() <= 2);
        let received = wire.0.received.borrow();
        prop_assert_eq!(a.as_slice(), received.get(&1).map_or(&[][..], |v| v.as_slice()));
        prop_assert_eq!(b.as_slice(), received.get(&2).map_or(&[][..], |v| v.as_slice()));
    }
}

#[test]
fn ranged_session_over_tiny_quotas() {
    let data = file(5000, 9);
    let read_cap = Arc::new(AtomicUsize::new(3));
    let storage = ScriptedStorage { files: HashMap::from([("/v.mp4", Arc::clone(&data))]), read_cap };
    let wire = Wire::default();
    wire.0.readable.set(true);
    wire.0.writable.set(true);
    wire.0.send_cap.set(2);
    let limits = StreamLimits { max_read: 4, max_send: 3, buffer_size: 16, max_sessions: 1, idle_timeout: None };
    let mut scheduler = SessionScheduler::new(storage, wire.clone(), limits);

    let download = scheduler.open("/v.mp4", Some("bytes=-1200")).unwrap();
    assert_eq!(1200, download.content_length());
    let id = scheduler.start(download, 5).unwrap();

    let mut saw_scheduled = false;
    while !scheduler.is_empty() {
        scheduler.tick();
        saw_scheduled |= scheduler.state(id) == Some(SessionState::Scheduled);
        wire.run_queued();
    }

    assert!(saw_scheduled);
    assert_eq!(&data[3800..], wire.0.received.borrow()[&5].as_slice());
}
