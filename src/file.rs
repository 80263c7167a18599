use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::provider::{Descriptor, Storage, StorageFile};

/// [`Storage`] over a directory of the host file system that stands in for
/// the mount point of the card.
///
/// Storage paths are absolute (`/dcim/0001.jpg`) and are looked up below `mount`.
#[derive(Debug, Clone)]
pub struct StdStorage {
    mount: PathBuf,
    next_descriptor: Arc<AtomicU64>,
}

impl StdStorage {
    pub fn new(mount: impl Into<PathBuf>) -> Self {
        StdStorage {
            mount: mount.into(),
            // 0, 1 and 2 read like stdio in logs
            next_descriptor: Arc::new(AtomicU64::new(3)),
        }
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }

    fn host_path(&self, path: &str) -> PathBuf {
        self.mount.join(path.trim_start_matches('/'))
    }
}

impl Storage for StdStorage {
    type File = KnownSize;

    fn open(&self, path: &str) -> io::Result<KnownSize> {
        let file = fs::File::open(self.host_path(path))?;
        let descriptor = self.next_descriptor.fetch_add(1, Ordering::Relaxed);
        trace!(path, descriptor, "opened");
        KnownSize::file(file, descriptor)
    }

    fn size(&self, path: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.host_path(path))?.len())
    }

    fn is_directory(&self, path: &str) -> bool {
        fs::metadata(self.host_path(path)).map(|meta| meta.is_dir()).unwrap_or(false)
    }
}

/// An open file together with the size it had when opened.
#[derive(Debug)]
pub struct KnownSize {
    descriptor: Descriptor,
    byte_size: u64,
    file: fs::File,
}

impl KnownSize {
    /// Calls [`fs::File::metadata`] to determine file size.
    pub fn file(file: fs::File, descriptor: Descriptor) -> io::Result<KnownSize> {
        let byte_size = file.metadata()?.len();
        Ok(KnownSize { descriptor, byte_size, file })
    }
}

impl StorageFile for KnownSize {
    fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    fn byte_size(&self) -> u64 {
        self.byte_size
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.file.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset)).map(|_| ())
    }
}
