// In-process store for downloaded result bodies.
//
// Every finished job turns its result bodies into `BlobHandle`s issued
// by a `BlobStore`. A handle keeps its bytes alive in the store until it
// is dropped, at which point the entry is released. The job client drops
// superseded handles before it creates new ones, so a long interactive
// session holds at most one set of results per flow.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Default)]
struct Registry {
    next_id: u64,
    blobs: HashMap<u64, Arc<[u8]>>,
}

/// Shared registry of live result bodies. Cloning yields another view of
/// the same registry.
#[derive(Clone, Default)]
pub struct BlobStore {
    inner: Arc<Mutex<Registry>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `bytes` and return the handle that owns them.
    pub fn create(&self, bytes: Vec<u8>) -> BlobHandle {
        let len = bytes.len();
        let mut reg = self.registry();
        reg.next_id += 1;
        let id = reg.next_id;
        reg.blobs.insert(id, Arc::from(bytes));
        debug!("blob {} created ({} bytes)", id, len);
        BlobHandle {
            id,
            len,
            store: self.clone(),
        }
    }

    /// Number of handles that have not been released yet.
    pub fn live(&self) -> usize {
        self.registry().blobs.len()
    }

    fn get(&self, id: u64) -> Option<Arc<[u8]>> {
        self.registry().blobs.get(&id).cloned()
    }

    fn release(&self, id: u64) {
        if self.registry().blobs.remove(&id).is_some() {
            debug!("blob {} released", id);
        }
    }
}

/// Owner of one result body. Dropping it releases the body.
pub struct BlobHandle {
    id: u64,
    len: usize,
    store: BlobStore,
}

impl BlobHandle {
    /// Local address of the blob, stable for the handle's lifetime.
    pub fn url(&self) -> String {
        format!("blob:copyrem/{}", self.id)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> Arc<[u8]> {
        self.store.get(self.id).unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Write the body to `path`, replacing any existing file.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, self.bytes())
    }
}

impl Drop for BlobHandle {
    fn drop(&mut self) {
        self.store.release(self.id);
    }
}

impl std::fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobHandle")
            .field("url", &self.url())
            .field("len", &self.len)
            .finish()
    }
}
