use std::mem::size_of;

use shared_memory::{Shmem, ShmemConf, ShmemError};
use thiserror::Error;
use tracing::debug;

use crate::control_block::SharedControlBlock;

/// Errors surfaced while creating or attaching to a named shared-memory segment.
#[derive(Debug, Error)]
pub enum ShmemIpcError {
    /// The underlying OS mapping call failed.
    #[error("failed to map shared memory segment {key}: {source}")]
    Map {
        /// The segment key that failed to map.
        key: String,
        /// The underlying OS error.
        #[source]
        source: ShmemError,
    },
}

/// Owns the OS mapping for one named segment and exposes it as raw bytes.
/// This is the Rust analogue of Mallob's `SharedMemory::create`/`access`
/// pair: the worker creates segments, the solver child opens the same key
/// read-write.
pub struct SharedSegment {
    key: String,
    shmem: Shmem,
}

// SAFETY: `Shmem` owns its mapping exclusively (no internal aliasing beyond
// the mapped memory itself, which callers only ever touch through the
// atomics on `SharedControlBlock` or other synchronized access); the
// `shared_memory` crate simply doesn't assert this, so we do. The struct is
// moved wholesale between threads, never aliased by two owners at once.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create a brand new segment of `size` bytes, owned by the caller.
    /// Dropped (and unlinked) when the returned value is dropped, unless
    /// another process has also opened it by key.
    pub fn create(key: &str, size: usize) -> Result<Self, ShmemIpcError> {
        let shmem = ShmemConf::new()
            .size(size)
            .flink(key)
            .create()
            .map_err(|source| ShmemIpcError::Map {
                key: key.to_string(),
                source,
            })?;
        debug!(key, size, "created shared memory segment");
        Ok(Self {
            key: key.to_string(),
            shmem,
        })
    }

    /// Attach to a segment a peer process already created under `key`.
    pub fn open(key: &str) -> Result<Self, ShmemIpcError> {
        let shmem = ShmemConf::new()
            .flink(key)
            .open()
            .map_err(|source| ShmemIpcError::Map {
                key: key.to_string(),
                source,
            })?;
        debug!(key, "opened shared memory segment");
        Ok(Self {
            key: key.to_string(),
            shmem,
        })
    }

    /// The flink key this segment was created or opened under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw mutable pointer to the start of the mapped region.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.shmem.as_ptr()
    }

    /// Size in bytes of the mapped region.
    pub fn len(&self) -> usize {
        self.shmem.len()
    }

    /// Whether the mapped region is empty (always `false` once created with
    /// a positive size; present for API completeness).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A segment sized and laid out to hold exactly one `SharedControlBlock`.
pub struct ControlBlockSegment {
    segment: SharedSegment,
}

impl ControlBlockSegment {
    /// Create the control-block segment for a freshly committed job.
    pub fn create(key: &str) -> Result<Self, ShmemIpcError> {
        let mut segment = SharedSegment::create(key, size_of::<SharedControlBlock>())?;
        // SAFETY: the segment was just created with exactly this size and is
        // not yet visible to any other process.
        unsafe {
            std::ptr::write(
                segment.as_mut_ptr() as *mut SharedControlBlock,
                SharedControlBlock::new(),
            );
        }
        Ok(Self { segment })
    }

    /// Attach to a control-block segment a worker already created.
    pub fn open(key: &str) -> Result<Self, ShmemIpcError> {
        Ok(Self {
            segment: SharedSegment::open(key)?,
        })
    }

    /// Borrow the typed control block.
    pub fn block(&mut self) -> &SharedControlBlock {
        // SAFETY: the segment is exactly `size_of::<SharedControlBlock>()`
        // bytes, was either freshly initialized by `create` or already
        // initialized by the peer that created it, and all cross-process
        // access to its fields goes through atomics.
        unsafe { SharedControlBlock::from_raw(self.segment.as_mut_ptr()) }
    }
}

/// A segment holding an opaque byte payload: a formula, an assumption list,
/// a clause export/import buffer, or a per-revision solution, all of which
/// are just bytes the worker stages and the child reads (or vice versa).
/// Unlike `ControlBlockSegment` this has no fixed layout; `write`/`read` copy
/// raw bytes in and out of whatever prefix of the mapped region is in use.
pub struct PayloadSegment {
    segment: SharedSegment,
}

impl PayloadSegment {
    /// Create a fresh segment at least `capacity` bytes long.
    pub fn create(key: &str, capacity: usize) -> Result<Self, ShmemIpcError> {
        Ok(Self {
            segment: SharedSegment::create(key, capacity)?,
        })
    }

    /// Attach to a segment a peer process already created under `key`.
    pub fn open(key: &str, capacity: usize) -> Result<Self, ShmemIpcError> {
        let segment = SharedSegment::open(key)?;
        debug_assert!(segment.len() >= capacity, "opened segment shorter than expected");
        Ok(Self { segment })
    }

    /// Copy `bytes` into the start of the mapped region. Panics if `bytes`
    /// is longer than the segment: callers size segments from the same
    /// worst-case constant they bound `bytes` by, so this should never fire
    /// outside a programming error.
    ///
    /// # Safety
    /// The caller must ensure no other process is concurrently reading or
    /// writing the same byte range; the control-block handshake flags are
    /// what actually serialize writer and reader in practice.
    pub fn write(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.segment.len(),
            "payload of {} bytes does not fit a {}-byte segment",
            bytes.len(),
            self.segment.len()
        );
        // SAFETY: `bytes.len() <= self.segment.len()` was just asserted, and
        // the handshake flags in `SharedControlBlock` serialize writer and
        // reader so this copy never races a concurrent read.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.segment.as_mut_ptr(), bytes.len());
        }
    }

    /// Copy the first `len` bytes of the mapped region out into an owned
    /// buffer. Panics if `len` exceeds the segment's capacity.
    ///
    /// # Safety
    /// Same caveat as `write`: the caller must ensure the writer has
    /// finished before calling this.
    pub fn read(&mut self, len: usize) -> Vec<u8> {
        assert!(
            len <= self.segment.len(),
            "requested {len} bytes from a {}-byte segment",
            self.segment.len()
        );
        let mut out = vec![0u8; len];
        // SAFETY: `len <= self.segment.len()` was just asserted, and the
        // handshake flags serialize writer and reader.
        unsafe {
            std::ptr::copy_nonoverlapping(self.segment.as_mut_ptr(), out.as_mut_ptr(), len);
        }
        out
    }
}
