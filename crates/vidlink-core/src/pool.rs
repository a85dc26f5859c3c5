//! Host-memory frame pool with hot/cold recycling and one-tick deferred release.
//!
//! Entries are addressed by [`EntryId`], an index that stays stable for the
//! life of the pool. Asynchronous readback completions only carry the raw
//! address of the destination buffer, so the pool also supports looking a
//! hot entry up by that address ([`BufferIdentity`]).
//!
//! The "marked" slot holds an entry whose pixels the transport may still be
//! reading. It is freed by the *next* [`FramePool::free_marked`] call, which
//! the send pipeline issues right after its next send.

use std::ffi::{c_char, CString};

use crate::format::frame_element_count;

/// Raw address of an entry's image buffer. Unique among hot entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferIdentity(pub usize);

/// Stable handle to a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

/// One packed-pixel buffer plus the frame description the transport needs.
#[derive(Debug, Default)]
pub struct FrameEntry {
    image: Option<Vec<u8>>,
    metadata: Option<CString>,
    width: u32,
    height: u32,
    alpha: bool,
}

impl FrameEntry {
    fn open(&mut self, width: u32, height: u32, alpha: bool, metadata: Option<&str>) {
        let size = frame_element_count(width, height, alpha) * 4;
        assert!(size > 0, "zero-sized frame entry ({}x{})", width, height);

        self.image = Some(vec![0u8; size]);
        self.metadata = metadata.filter(|m| !m.is_empty()).map(to_c_string);
        self.width = width;
        self.height = height;
        self.alpha = alpha;
    }

    fn close(&mut self) {
        self.image = None;
        self.metadata = None;
        self.width = 0;
        self.height = 0;
        self.alpha = false;
    }

    /// Whether backing storage is allocated (the entry is hot).
    pub fn is_allocated(&self) -> bool {
        self.image.is_some()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn alpha(&self) -> bool {
        self.alpha
    }

    /// Packed image bytes. Empty for a cold entry.
    pub fn image(&self) -> &[u8] {
        self.image.as_deref().unwrap_or(&[])
    }

    /// Mutable packed image bytes. Empty for a cold entry.
    pub fn image_mut(&mut self) -> &mut [u8] {
        self.image.as_deref_mut().unwrap_or(&mut [])
    }

    /// Address of the image buffer, or None for a cold entry.
    pub fn identity(&self) -> Option<BufferIdentity> {
        self.image
            .as_ref()
            .map(|buf| BufferIdentity(buf.as_ptr() as usize))
    }

    /// Pointer to the image bytes for the wire frame (null when cold).
    pub fn image_ptr(&self) -> *const u8 {
        self.image
            .as_ref()
            .map_or(std::ptr::null(), |buf| buf.as_ptr())
    }

    /// Pointer to the NUL-terminated metadata string (null when absent).
    pub fn metadata_ptr(&self) -> *const c_char {
        self.metadata
            .as_ref()
            .map_or(std::ptr::null(), |m| m.as_ptr())
    }

    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.to_str().ok())
    }
}

fn to_c_string(text: &str) -> CString {
    let bytes = text.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    // Interior NUL was cut above, so this cannot fail.
    CString::new(&bytes[..end]).unwrap_or_default()
}

/// Allocation counters, mainly for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Entry objects constructed because the cold stack was empty.
    pub constructed: usize,
    /// Successful `allocate` calls.
    pub allocations: usize,
    /// Successful `free` calls.
    pub frees: usize,
}

/// Recycling pool of [`FrameEntry`] objects.
#[derive(Debug, Default)]
pub struct FramePool {
    slots: Vec<FrameEntry>,
    hot: Vec<usize>,
    cold: Vec<usize>,
    marked: Option<usize>,
    stats: PoolStats,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an entry from the cold stack (or construct one) and give it
    /// storage for a `width`x`height` packed frame.
    pub fn allocate(
        &mut self,
        width: u32,
        height: u32,
        alpha: bool,
        metadata: Option<&str>,
    ) -> EntryId {
        let index = match self.cold.pop() {
            Some(index) => index,
            None => {
                self.slots.push(FrameEntry::default());
                self.stats.constructed += 1;
                self.slots.len() - 1
            }
        };
        self.slots[index].open(width, height, alpha, metadata);
        self.hot.push(index);
        self.stats.allocations += 1;
        tracing::trace!(index, width, height, alpha, "frame entry allocated");
        EntryId(index)
    }

    /// Release an entry's storage and return it to the cold stack.
    ///
    /// # Panics
    /// When the entry is not hot. Freeing twice is a caller bug.
    pub fn free(&mut self, id: EntryId) {
        let position = self.hot.iter().position(|&i| i == id.0);
        let Some(position) = position else {
            panic!("frame entry {} freed while not in use", id.0);
        };
        self.hot.swap_remove(position);
        if self.marked == Some(id.0) {
            self.marked = None;
        }
        self.slots[id.0].close();
        self.cold.push(id.0);
        self.stats.frees += 1;
        tracing::trace!(index = id.0, "frame entry freed");
    }

    /// Find the hot entry whose image buffer lives at `identity`.
    pub fn find_by_identity(&self, identity: BufferIdentity) -> Option<EntryId> {
        self.hot
            .iter()
            .copied()
            .find(|&i| self.slots[i].identity() == Some(identity))
            .map(EntryId)
    }

    /// Hold `id` for release by the next [`free_marked`](Self::free_marked).
    ///
    /// # Panics
    /// When another entry is already marked, or `id` is not hot.
    pub fn mark(&mut self, id: EntryId) {
        assert!(self.marked.is_none(), "frame pool marked twice");
        assert!(self.is_hot(id), "marked frame entry {} is not in use", id.0);
        self.marked = Some(id.0);
    }

    /// Free the marked entry, if any.
    pub fn free_marked(&mut self) {
        if let Some(index) = self.marked.take() {
            self.free(EntryId(index));
        }
    }

    pub fn marked(&self) -> Option<EntryId> {
        self.marked.map(EntryId)
    }

    pub fn entry(&self, id: EntryId) -> Option<&FrameEntry> {
        self.slots.get(id.0)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut FrameEntry> {
        self.slots.get_mut(id.0)
    }

    pub fn is_hot(&self, id: EntryId) -> bool {
        self.hot.contains(&id.0)
    }

    pub fn hot_count(&self) -> usize {
        self.hot.len()
    }

    pub fn cold_count(&self) -> usize {
        self.cold.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Free every entry, hot, cold and marked.
    pub fn dispose(&mut self) {
        if !self.hot.is_empty() {
            tracing::debug!(hot = self.hot.len(), "disposing frame pool with entries in use");
        }
        for entry in &mut self.slots {
            entry.close();
        }
        self.slots.clear();
        self.hot.clear();
        self.cold.clear();
        self.marked = None;
    }
}
