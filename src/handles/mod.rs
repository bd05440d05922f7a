//! Ownership handles - generation-tagged arena of host references
//!
//! Design: Foreign memory cannot hold an `Arc`, so it holds a word-sized
//! handle into a process-global table instead. A handle packs the slot
//! index and the slot's generation; freeing a slot bumps its generation,
//! so a stale handle resolves to nothing instead of to a recycled entry.
//! Entries are strong or weak, and carry the tag of the bridge that made
//! them so teardown can release everything it created.

#[cfg(test)]
mod tests;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Host value a handle can point at
pub type Target = Arc<dyn Any + Send + Sync>;

/// Opaque token stored in foreign memory
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnershipHandle(NonZeroU64);

impl OwnershipHandle {
    fn new(index: usize, generation: u32) -> Self {
        let packed = ((index as u64 + 1) << 32) | generation as u64;
        match NonZeroU64::new(packed) {
            Some(raw) => OwnershipHandle(raw),
            None => unreachable!("index is offset by one"),
        }
    }

    fn index(self) -> usize {
        ((self.0.get() >> 32) - 1) as usize
    }

    fn generation(self) -> u32 {
        self.0.get() as u32
    }

    /// Word written into foreign memory
    pub fn to_raw(self) -> usize {
        self.0.get() as usize
    }

    /// Read a handle back from foreign memory (0 means none)
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroU64::new(raw as u64).map(OwnershipHandle)
    }
}

impl fmt::Debug for OwnershipHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnershipHandle({}@{})", self.index(), self.generation())
    }
}

impl fmt::Display for OwnershipHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index(), self.generation())
    }
}

/// Tag naming the bridge that created an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerTag(pub u64);

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

impl OwnerTag {
    /// Fresh tag, unique within the process
    pub fn next() -> Self {
        OwnerTag(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("ownership handle {0} is stale or already freed")]
    Stale(OwnershipHandle),
    #[error("target of weak handle {0} is gone")]
    Collected(OwnershipHandle),
}

enum Link {
    Strong(Target),
    Weak(Weak<dyn Any + Send + Sync>),
}

struct Entry {
    generation: u32,
    link: Option<(Link, OwnerTag)>,
}

#[derive(Default)]
struct HandleTable {
    entries: Vec<Entry>,
    free: Vec<usize>,
    live: usize,
}

impl HandleTable {
    fn insert(&mut self, link: Link, owner: OwnerTag) -> OwnershipHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index];
            entry.link = Some((link, owner));
            return OwnershipHandle::new(index, entry.generation);
        }
        self.entries.push(Entry {
            generation: 1,
            link: Some((link, owner)),
        });
        OwnershipHandle::new(self.entries.len() - 1, 1)
    }

    fn entry(&mut self, handle: OwnershipHandle) -> Result<&mut Entry, HandleError> {
        match self.entries.get_mut(handle.index()) {
            Some(e) if e.generation == handle.generation() && e.link.is_some() => Ok(e),
            _ => Err(HandleError::Stale(handle)),
        }
    }

    fn remove(&mut self, index: usize) -> Option<Link> {
        let entry = &mut self.entries[index];
        let (link, _) = entry.link.take()?;
        entry.generation = entry.generation.wrapping_add(1).max(1);
        self.free.push(index);
        self.live -= 1;
        Some(link)
    }
}

static TABLE: Lazy<Mutex<HandleTable>> = Lazy::new(|| Mutex::new(HandleTable::default()));

/// Keep `target` alive until the handle is freed
pub fn alloc_strong(owner: OwnerTag, target: Target) -> OwnershipHandle {
    TABLE.lock().insert(Link::Strong(target), owner)
}

/// Track `target` without keeping it alive
pub fn alloc_weak(owner: OwnerTag, target: &Target) -> OwnershipHandle {
    TABLE.lock().insert(Link::Weak(Arc::downgrade(target)), owner)
}

/// Resolve a handle (`None` if stale or the weak target is gone)
pub fn get(handle: OwnershipHandle) -> Option<Target> {
    let mut table = TABLE.lock();
    let entry = table.entry(handle).ok()?;
    match entry.link.as_ref()? {
        (Link::Strong(target), _) => Some(Arc::clone(target)),
        (Link::Weak(weak), _) => weak.upgrade(),
    }
}

/// Resolve a handle to a concrete type
pub fn get_as<T: Any + Send + Sync>(handle: OwnershipHandle) -> Option<Arc<T>> {
    get(handle)?.downcast::<T>().ok()
}

/// Is the handle still allocated?
pub fn is_live(handle: OwnershipHandle) -> bool {
    TABLE.lock().entry(handle).is_ok()
}

/// Is the handle allocated and strong?
pub fn is_strong(handle: OwnershipHandle) -> bool {
    let mut table = TABLE.lock();
    matches!(
        table.entry(handle).map(|e| e.link.as_ref().map(|(l, _)| matches!(l, Link::Strong(_)))),
        Ok(Some(true))
    )
}

/// Release a handle
///
/// Freeing twice reports [`HandleError::Stale`] and changes nothing.
pub fn free(handle: OwnershipHandle) -> Result<(), HandleError> {
    let released = {
        let mut table = TABLE.lock();
        table.entry(handle)?;
        table.remove(handle.index())
    };
    // Drop outside the lock: the target's destructor may allocate handles
    drop(released);
    Ok(())
}

/// Turn a strong entry weak
pub fn make_weak(handle: OwnershipHandle) -> Result<(), HandleError> {
    let released = {
        let mut table = TABLE.lock();
        let entry = table.entry(handle)?;
        match entry.link.take() {
            Some((Link::Strong(target), owner)) => {
                entry.link = Some((Link::Weak(Arc::downgrade(&target)), owner));
                Some(target)
            }
            other => {
                entry.link = other;
                None
            }
        }
    };
    drop(released);
    Ok(())
}

/// Turn a weak entry strong again
pub fn make_strong(handle: OwnershipHandle) -> Result<(), HandleError> {
    let mut table = TABLE.lock();
    let entry = table.entry(handle)?;
    let upgraded = match &entry.link {
        Some((Link::Weak(weak), owner)) => match weak.upgrade() {
            Some(target) => Some((target, *owner)),
            None => return Err(HandleError::Collected(handle)),
        },
        _ => None,
    };
    if let Some((target, owner)) = upgraded {
        entry.link = Some((Link::Strong(target), owner));
    }
    Ok(())
}

/// Point an existing handle at a new strong target
pub fn replace(handle: OwnershipHandle, target: Target) -> Result<(), HandleError> {
    let previous = {
        let mut table = TABLE.lock();
        let entry = table.entry(handle)?;
        let owner = entry.link.as_ref().map(|(_, o)| *o).unwrap_or(OwnerTag(0));
        entry.link.replace((Link::Strong(target), owner))
    };
    drop(previous);
    Ok(())
}

/// Release every entry created by `owner`; returns how many
pub fn free_owned_by(owner: OwnerTag) -> usize {
    let released: Vec<Link> = {
        let mut table = TABLE.lock();
        let indices: Vec<usize> = table
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(&e.link, Some((_, o)) if *o == owner))
            .map(|(i, _)| i)
            .collect();
        indices
            .into_iter()
            .filter_map(|i| table.remove(i))
            .collect()
    };
    released.len()
}

/// Number of allocated handles in the process
pub fn live_count() -> usize {
    TABLE.lock().live
}

/// Number of allocated handles created by `owner`
pub fn live_count_for(owner: OwnerTag) -> usize {
    TABLE
        .lock()
        .entries
        .iter()
        .filter(|e| matches!(&e.link, Some((_, o)) if *o == owner))
        .count()
}
