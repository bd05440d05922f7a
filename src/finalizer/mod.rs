//! Deferred release of foreign objects
//!
//! Design: Host finalization happens on arbitrary threads that usually do
//! not hold the global lock. Those threads only push onto lock-free
//! queues; a drain takes the lock and performs the releases.
//! - Three queues: plain objects, derived peers, exported buffers
//! - Each queue drains FIFO; buffers always go last
//! - The foreign error indicator is saved before and restored after
//! - A drain never re-enters itself on the same thread
//! - Entries from an earlier runtime generation are reported, never freed

#[cfg(test)]
mod tests;

use crate::config::FinalizerConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::logging::{self, debug, trace};
use crate::wrappers::SendBuffer;
use crossbeam::queue::SegQueue;
use hostbridge_runtime::object::{self, SharedPtr};
use hostbridge_runtime::{errors, gil, protocol};
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A release waiting for the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFinalization {
    pub ptr: SharedPtr,
    pub generation: u64,
}

/// An exported buffer waiting for the lock
pub struct PendingBuffer {
    pub buffer: SendBuffer,
    pub generation: u64,
}

/// Decides whether a lifecycle error was dealt with (`true`) or is fatal
pub type ErrorHandler = Arc<dyn Fn(&BridgeError) -> bool + Send + Sync>;

/// Receives reference-count violations; `true` means resolved
pub type RefCountResolver = Arc<dyn Fn(&BridgeError) -> bool + Send + Sync>;

/// Called with the number of pending plain objects before each drain
pub type BeforeCollect = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Default, Clone)]
struct Hooks {
    error_handler: Option<ErrorHandler>,
    refcount_resolver: Option<RefCountResolver>,
    before_collect: Option<BeforeCollect>,
}

/// Counters over the finalizer's lifetime
#[derive(Debug, Default)]
pub struct FinalizerStats {
    pub drains: AtomicUsize,
    pub released: AtomicUsize,
    pub stale: AtomicUsize,
    pub violations: AtomicUsize,
    pub failures: AtomicUsize,
}

/// Point-in-time copy of [`FinalizerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub drains: usize,
    pub released: usize,
    pub stale: usize,
    pub violations: usize,
    pub failures: usize,
}

thread_local! {
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

struct DrainGuard;

impl DrainGuard {
    fn enter() -> Option<Self> {
        if DRAINING.with(|d| d.replace(true)) {
            None
        } else {
            Some(DrainGuard)
        }
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|d| d.set(false));
    }
}

pub struct Finalizer {
    objects: SegQueue<PendingFinalization>,
    derived: SegQueue<PendingFinalization>,
    buffers: SegQueue<PendingBuffer>,
    /// Entries left over by a drain that stopped early; they go first
    carry: Mutex<VecDeque<PendingFinalization>>,
    threshold: AtomicUsize,
    enabled: AtomicBool,
    validation: AtomicBool,
    throw_on_unhandled: AtomicBool,
    counter: AtomicUsize,
    started: AtomicBool,
    hooks: RwLock<Hooks>,
    stats: FinalizerStats,
}

impl fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finalizer")
            .field("pending", &self.pending())
            .field("threshold", &self.threshold.load(Ordering::Relaxed))
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Default for Finalizer {
    fn default() -> Self {
        Self::new(&FinalizerConfig::default())
    }
}

impl Finalizer {
    pub fn new(config: &FinalizerConfig) -> Self {
        Self {
            objects: SegQueue::new(),
            derived: SegQueue::new(),
            buffers: SegQueue::new(),
            carry: Mutex::new(VecDeque::new()),
            threshold: AtomicUsize::new(config.threshold.max(1)),
            enabled: AtomicBool::new(config.enable),
            validation: AtomicBool::new(config.refcount_validation),
            throw_on_unhandled: AtomicBool::new(config.throw_on_unhandled_refcount),
            counter: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            hooks: RwLock::new(Hooks::default()),
            stats: FinalizerStats::default(),
        }
    }

    // ------------------------------------------------------------------
    // Configuration and hooks
    // ------------------------------------------------------------------

    pub fn set_threshold(&self, threshold: usize) {
        self.threshold.store(threshold.max(1), Ordering::Relaxed);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_refcount_validation(&self, on: bool) {
        self.validation.store(on, Ordering::Relaxed);
    }

    pub fn set_throw_on_unhandled_refcount(&self, on: bool) {
        self.throw_on_unhandled.store(on, Ordering::Relaxed);
    }

    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        self.hooks.write().error_handler = handler;
    }

    pub fn set_refcount_resolver(&self, resolver: Option<RefCountResolver>) {
        self.hooks.write().refcount_resolver = resolver;
    }

    pub fn set_before_collect(&self, hook: Option<BeforeCollect>) {
        self.hooks.write().before_collect = hook;
    }

    pub(crate) fn start(&self) {
        self.counter.store(0, Ordering::Relaxed);
        self.started.store(true, Ordering::Release);
    }

    pub(crate) fn stop(&self) {
        self.started.store(false, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    /// Queue a plain release (no-op while disabled)
    pub fn enqueue(&self, ptr: SharedPtr, generation: u64) {
        if ptr.is_null() || !self.is_enabled() {
            return;
        }
        trace!(event = "finalizer_enqueue", address = ptr.addr(), generation);
        self.objects.push(PendingFinalization { ptr, generation });
    }

    /// Queue the teardown of a resurrected derived peer
    pub fn enqueue_derived(&self, ptr: SharedPtr, generation: u64) {
        if ptr.is_null() || !self.is_enabled() {
            return;
        }
        trace!(event = "finalizer_enqueue_derived", address = ptr.addr(), generation);
        self.derived.push(PendingFinalization { ptr, generation });
    }

    /// Queue the release of an exported buffer
    pub fn enqueue_buffer(&self, buffer: SendBuffer, generation: u64) {
        if !self.is_enabled() {
            return;
        }
        self.buffers.push(PendingBuffer { buffer, generation });
    }

    /// Pending entries per queue: (objects, derived, buffers)
    pub fn pending(&self) -> (usize, usize, usize) {
        (
            self.objects.len() + self.carry.lock().len(),
            self.derived.len(),
            self.buffers.len(),
        )
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            drains: self.stats.drains.load(Ordering::Relaxed),
            released: self.stats.released.load(Ordering::Relaxed),
            stale: self.stats.stale.load(Ordering::Relaxed),
            violations: self.stats.violations.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Drain
    // ------------------------------------------------------------------

    /// Count one release request; drain once the threshold is passed
    pub fn throttled_collect(&self) -> BridgeResult<usize> {
        if !self.is_started() {
            return Err(BridgeError::NotRunning);
        }
        let previous = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_add(1)))
            .unwrap_or(usize::MAX);
        if previous.saturating_add(1) < self.threshold.load(Ordering::Relaxed) {
            return Ok(0);
        }
        self.counter.store(0, Ordering::Release);
        self.collect()
    }

    /// Drain every queue under the global lock; returns entries released
    ///
    /// A drain already running on this thread is not re-entered.
    pub fn collect(&self) -> BridgeResult<usize> {
        let Some(_reentry) = DrainGuard::enter() else {
            trace!(event = "finalizer_reentry", "Nested drain skipped");
            return Ok(0);
        };
        let _gil = gil::acquire();
        let saved = errors::fetch();
        let result = self.drain();
        errors::restore(saved);
        result
    }

    fn drain(&self) -> BridgeResult<usize> {
        let started = Instant::now();
        let hooks = self.hooks.read().clone();

        let mut batch: Vec<PendingFinalization> = self.carry.lock().drain(..).collect();
        for _ in 0..self.objects.len() {
            match self.objects.pop() {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }
        if let Some(hook) = &hooks.before_collect {
            hook(batch.len());
        }

        let batch = self.drop_stale(batch, &hooks);
        let batch = if self.validation.load(Ordering::Relaxed) {
            self.validate(batch, &hooks)?
        } else {
            batch
        };

        let mut released = 0usize;
        let mut objects = 0usize;
        for (i, entry) in batch.iter().enumerate() {
            match unsafe { release_object(entry) } {
                Ok(()) => objects += 1,
                Err(err) => {
                    if let Err(fatal) = self.route_failure(err, entry, &hooks) {
                        self.carry.lock().extend(batch[i + 1..].iter().copied());
                        self.stats.released.fetch_add(objects, Ordering::Relaxed);
                        return Err(fatal);
                    }
                }
            }
        }
        released += objects;

        let mut derived = 0usize;
        for _ in 0..self.derived.len() {
            let Some(entry) = self.derived.pop() else { break };
            if self.is_stale(&entry) {
                self.report_stale(entry.ptr.addr(), entry.generation, &hooks);
                continue;
            }
            match unsafe { crate::descriptors::derived::finalize_peer(entry.ptr.get()) } {
                Ok(()) => derived += 1,
                Err(err) => {
                    if let Err(fatal) = self.route_failure(err, &entry, &hooks) {
                        self.stats.released.fetch_add(released + derived, Ordering::Relaxed);
                        return Err(fatal);
                    }
                }
            }
        }
        released += derived;

        let mut buffers = 0usize;
        for _ in 0..self.buffers.len() {
            let Some(pending) = self.buffers.pop() else { break };
            let current = hostbridge_runtime::is_initialized()
                && pending.generation == hostbridge_runtime::generation();
            if !current {
                // Memory of a finished runtime: the view is dropped unreleased
                self.report_stale(pending.buffer.0.obj as usize, pending.generation, &hooks);
                std::mem::forget(pending.buffer);
                continue;
            }
            unsafe { protocol::release_buffer(pending.buffer.0) };
            buffers += 1;
        }
        released += buffers;

        self.stats.drains.fetch_add(1, Ordering::Relaxed);
        self.stats.released.fetch_add(released, Ordering::Relaxed);
        logging::log_drain(objects, derived, buffers, started.elapsed());
        Ok(released)
    }

    fn is_stale(&self, entry: &PendingFinalization) -> bool {
        !hostbridge_runtime::is_initialized() || entry.generation != hostbridge_runtime::generation()
    }

    fn report_stale(&self, address: usize, enqueued: u64, hooks: &Hooks) {
        self.stats.stale.fetch_add(1, Ordering::Relaxed);
        let err = BridgeError::StaleGeneration {
            address,
            enqueued,
            current: hostbridge_runtime::generation(),
        };
        let handled = hooks.error_handler.as_ref().map(|h| h(&err)).unwrap_or(false);
        logging::log_lifecycle_error(&err.to_string(), handled);
    }

    fn drop_stale(&self, batch: Vec<PendingFinalization>, hooks: &Hooks) -> Vec<PendingFinalization> {
        batch
            .into_iter()
            .filter(|entry| {
                if self.is_stale(entry) {
                    self.report_stale(entry.ptr.addr(), entry.generation, hooks);
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    /// Compare per-pointer enqueue counts with live refcounts
    ///
    /// Surplus entries of a violating pointer are always discarded.
    fn validate(
        &self,
        batch: Vec<PendingFinalization>,
        hooks: &Hooks,
    ) -> BridgeResult<Vec<PendingFinalization>> {
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for entry in &batch {
            *counts.entry(entry.ptr.addr()).or_default() += 1;
        }

        let mut allowed: HashMap<usize, usize> = HashMap::new();
        let mut fatal: Option<BridgeError> = None;
        // Visit pointers in first-seen order so reports are deterministic
        for entry in &batch {
            let addr = entry.ptr.addr();
            if allowed.contains_key(&addr) {
                continue;
            }
            let enqueued = counts[&addr];
            let refcount = unsafe { object::refcount(entry.ptr.get()) };
            if enqueued as isize > refcount {
                self.stats.violations.fetch_add(1, Ordering::Relaxed);
                let err = BridgeError::IncorrectRefCount {
                    address: addr,
                    enqueued,
                    refcount,
                };
                let handled = hooks.refcount_resolver.as_ref().map(|r| r(&err)).unwrap_or(false);
                logging::log_lifecycle_error(&err.to_string(), handled);
                if !handled && self.throw_on_unhandled.load(Ordering::Relaxed) && fatal.is_none() {
                    fatal = Some(err);
                }
                allowed.insert(addr, refcount.max(0) as usize);
            } else {
                allowed.insert(addr, enqueued);
            }
        }

        let kept: Vec<PendingFinalization> = batch
            .into_iter()
            .filter(|entry| {
                let left = allowed.entry(entry.ptr.addr()).or_default();
                if *left == 0 {
                    false
                } else {
                    *left -= 1;
                    true
                }
            })
            .collect();

        match fatal {
            Some(err) => {
                self.carry.lock().extend(kept);
                Err(err)
            }
            None => Ok(kept),
        }
    }

    /// Offer a release failure to the error handler
    ///
    /// Returns the terminal error when nobody handled it.
    fn route_failure(
        &self,
        err: BridgeError,
        entry: &PendingFinalization,
        hooks: &Hooks,
    ) -> BridgeResult<()> {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        let err = BridgeError::Finalization {
            address: entry.ptr.addr(),
            source: Box::new(err),
        };
        let handled = hooks.error_handler.as_ref().map(|h| h(&err)).unwrap_or(false);
        logging::log_lifecycle_error(&err.to_string(), handled);
        if handled {
            return Ok(());
        }
        debug!(
            event = "finalizer_stopped",
            address = entry.ptr.addr(),
            "Drain stopped on an unhandled failure"
        );
        Err(err)
    }
}

/// Drop one reference; a failing deallocator surfaces through the indicator
unsafe fn release_object(entry: &PendingFinalization) -> BridgeResult<()> {
    object::decref(entry.ptr.get());
    if errors::occurred() {
        return Err(BridgeError::fetch_foreign());
    }
    Ok(())
}
