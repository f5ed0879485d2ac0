//! Bounded cache of decoded frames with background refill.
//!
//! The cache is owned by one context (the one serving [`FrameCache::request`]).
//! Decodes run on a dedicated worker thread and come back over a channel; only
//! the owner ever inserts into or evicts from the resident map.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::decoder::{Bitmap, FrameSource};
use crate::sequence::SequenceDescriptor;
use crate::Result;

pub const FRAME_CACHE_SIZE_LOW_MEMORY: usize = 1;
pub const FRAME_CACHE_SIZE_GROW_AFTER_MEMORY_WARNING: usize = 2;
pub const FRAME_CACHE_SIZE_DEFAULT: usize = 5;

const MEGABYTE: usize = 1024 * 1024;
/// Sequences whose decoded frames fit in this many megabytes are cached whole.
const DATA_SIZE_CATEGORY_ALL_MB: usize = 10;
const DATA_SIZE_CATEGORY_DEFAULT_MB: usize = 75;
/// Warnings after which relief no longer lifts the pressure ceiling.
const MAX_MEMORY_WARNINGS_BEFORE_PINNING: u32 = 3;

/// Memory pressure reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryPressure {
    Normal,
    Warning,
    Critical,
}

/// Intrinsic cache size for a sequence of `frame_count` frames occupying
/// `decoded_bytes` once fully decoded.
pub fn optimal_cache_size(frame_count: usize, decoded_bytes: usize) -> usize {
    let megabytes = decoded_bytes / MEGABYTE;
    if megabytes <= DATA_SIZE_CATEGORY_ALL_MB {
        frame_count
    } else if megabytes <= DATA_SIZE_CATEGORY_DEFAULT_MB {
        FRAME_CACHE_SIZE_DEFAULT
    } else {
        FRAME_CACHE_SIZE_LOW_MEMORY
    }
}

/// Frame indices the cache commits to keeping resident.
///
/// With enough capacity this is every frame. Otherwise it is a contiguous
/// run of `capacity` frames starting at `cursor` that wraps to frame 0, plus
/// the poster frame.
pub fn prefetch_window(
    cursor: usize,
    capacity: usize,
    frame_count: usize,
    poster_index: usize,
) -> BTreeSet<usize> {
    if capacity >= frame_count {
        return (0..frame_count).collect();
    }

    let mut window = BTreeSet::new();
    let first_length = capacity.min(frame_count.saturating_sub(cursor));
    window.extend(cursor..cursor + first_length);

    let second_length = capacity - first_length;
    if second_length > 0 {
        window.extend(0..second_length);
    }

    window.insert(poster_index);
    window
}

struct DecodedFrame {
    index: usize,
    result: Result<Bitmap>,
}

/// Handle to the background decode thread. Dropping it closes the job
/// channel; the thread exits once it notices the closed channels.
struct DecodeWorker {
    jobs: Sender<usize>,
    completed: Receiver<DecodedFrame>,
}

impl DecodeWorker {
    fn spawn(source: Arc<dyn FrameSource>) -> Result<Self> {
        let (jobs, job_rx) = crossbeam_channel::unbounded::<usize>();
        let (done_tx, completed) = crossbeam_channel::unbounded();

        thread::Builder::new()
            .name("gif-frame-decode".into())
            .spawn(move || {
                let mut reader = source.reader();
                for index in job_rx.iter() {
                    let result = reader.read_frame(index);
                    if done_tx.send(DecodedFrame { index, result }).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self { jobs, completed })
    }
}

pub struct FrameCache {
    descriptor: Arc<SequenceDescriptor>,
    resident: HashMap<usize, Bitmap>,
    in_flight: BTreeSet<usize>,
    failed: BTreeSet<usize>,
    optimal_size: usize,
    external_ceiling: Option<usize>,
    pressure_ceiling: Option<usize>,
    memory_warnings: u32,
    cursor: usize,
    worker: DecodeWorker,
}

impl FrameCache {
    /// Creates the cache for `descriptor`, seeded with its poster frame.
    pub fn new(descriptor: Arc<SequenceDescriptor>, config: &CacheConfig) -> Result<Self> {
        let optimal_size = config.optimal_frame_cache_size.unwrap_or_else(|| {
            optimal_cache_size(descriptor.frame_count(), descriptor.decoded_size_bytes())
        });
        let worker = DecodeWorker::spawn(Arc::clone(descriptor.source()))?;

        let mut resident = HashMap::new();
        resident.insert(descriptor.poster_index(), Arc::clone(descriptor.poster()));

        tracing::debug!(
            frame_count = descriptor.frame_count(),
            optimal_size,
            "created frame cache"
        );

        Ok(Self {
            descriptor,
            resident,
            in_flight: BTreeSet::new(),
            failed: BTreeSet::new(),
            optimal_size: optimal_size.max(1),
            external_ceiling: normalize_ceiling(config.max_frame_cache_size),
            pressure_ceiling: None,
            memory_warnings: 0,
            cursor: 0,
            worker,
        })
    }

    pub fn descriptor(&self) -> &Arc<SequenceDescriptor> {
        &self.descriptor
    }

    /// Returns the resident bitmap for `index` without ever blocking.
    ///
    /// Moves the cursor to `index`, schedules decodes for any part of the new
    /// prefetch window that is missing and evicts whatever fell out of it.
    pub fn request(&mut self, index: usize) -> Option<Bitmap> {
        if index >= self.descriptor.frame_count() {
            return None;
        }

        self.apply_completed();
        self.cursor = index;

        if self.resident.len() < self.descriptor.frame_count() {
            self.schedule_missing();
        }

        let bitmap = self.resident.get(&index).cloned();
        self.purge();
        bitmap
    }

    /// Applies decodes that finished since the last call. Returns how many
    /// frames became resident.
    pub fn poll(&mut self) -> usize {
        let applied = self.apply_completed();
        if applied > 0 {
            self.purge();
        }
        applied
    }

    /// Blocks until every scheduled decode has been handed back or `timeout`
    /// elapses. Returns whether nothing is left in flight.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.in_flight.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.worker.completed.recv_timeout(remaining) {
                Ok(done) => {
                    self.accept(done);
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!(
                        pending = self.in_flight.len(),
                        "decode worker exited with frames in flight"
                    );
                    self.in_flight.clear();
                    break;
                }
            }
        }
        self.purge();
        self.in_flight.is_empty()
    }

    /// Sets the caller's ceiling. `None` or `Some(0)` removes it.
    pub fn set_ceiling(&mut self, ceiling: Option<usize>) {
        let ceiling = normalize_ceiling(ceiling);
        if ceiling == self.external_ceiling {
            return;
        }
        self.external_ceiling = ceiling;
        self.capacity_changed();
    }

    pub(crate) fn set_pressure_ceiling(&mut self, ceiling: Option<usize>) {
        let ceiling = normalize_ceiling(ceiling);
        if ceiling == self.pressure_ceiling {
            return;
        }
        self.pressure_ceiling = ceiling;
        self.capacity_changed();
    }

    pub fn on_memory_pressure(&mut self, level: MemoryPressure) {
        match level {
            MemoryPressure::Warning => {
                self.memory_warnings = self.memory_warnings.saturating_add(1);
                self.set_pressure_ceiling(Some(FRAME_CACHE_SIZE_GROW_AFTER_MEMORY_WARNING));
            }
            MemoryPressure::Critical => {
                self.set_pressure_ceiling(Some(FRAME_CACHE_SIZE_LOW_MEMORY));
            }
            MemoryPressure::Normal => {
                if self.memory_warnings >= MAX_MEMORY_WARNINGS_BEFORE_PINNING {
                    self.set_pressure_ceiling(Some(FRAME_CACHE_SIZE_GROW_AFTER_MEMORY_WARNING));
                } else {
                    self.set_pressure_ceiling(None);
                }
            }
        }
        tracing::debug!(
            ?level,
            warnings = self.memory_warnings,
            capacity = self.effective_capacity(),
            "memory pressure handled"
        );
    }

    pub fn effective_capacity(&self) -> usize {
        let mut capacity = self.optimal_size;
        if let Some(ceiling) = self.external_ceiling {
            capacity = capacity.min(ceiling);
        }
        if let Some(ceiling) = self.pressure_ceiling {
            capacity = capacity.min(ceiling);
        }
        capacity
    }

    pub fn optimal_size(&self) -> usize {
        self.optimal_size
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn memory_warnings(&self) -> u32 {
        self.memory_warnings
    }

    pub fn is_resident(&self, index: usize) -> bool {
        self.resident.contains_key(&index)
    }

    pub fn resident_len(&self) -> usize {
        self.resident.len()
    }

    pub fn resident_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.resident.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether `index` is known never to become resident.
    pub fn is_undecodable(&self, index: usize) -> bool {
        !self.descriptor.is_decodable(index) || self.failed.contains(&index)
    }

    pub fn window(&self) -> BTreeSet<usize> {
        prefetch_window(
            self.cursor,
            self.effective_capacity(),
            self.descriptor.frame_count(),
            self.descriptor.poster_index(),
        )
    }

    fn schedule_missing(&mut self) {
        let frame_count = self.descriptor.frame_count();
        let cursor = self.cursor;
        let mut missing: Vec<usize> = self
            .window()
            .into_iter()
            .filter(|index| {
                !self.resident.contains_key(index)
                    && !self.in_flight.contains(index)
                    && !self.is_undecodable(*index)
            })
            .collect();
        if missing.is_empty() {
            return;
        }

        // Upcoming frames first, wrapping past the end of the sequence.
        missing.sort_by_key(|index| (index + frame_count - cursor) % frame_count);

        for index in missing {
            if self.worker.jobs.send(index).is_err() {
                tracing::warn!(index, "decode worker is gone; frame not scheduled");
                return;
            }
            self.in_flight.insert(index);
        }
        tracing::trace!(cursor, in_flight = self.in_flight.len(), "scheduled decodes");
    }

    fn apply_completed(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(done) = self.worker.completed.try_recv() {
            if self.accept(done) {
                applied += 1;
            }
        }
        applied
    }

    fn accept(&mut self, done: DecodedFrame) -> bool {
        self.in_flight.remove(&done.index);
        match done.result {
            Ok(bitmap) => {
                self.resident.insert(done.index, bitmap);
                true
            }
            Err(err) => {
                tracing::warn!(index = done.index, error = %err, "dropping failed frame decode");
                self.failed.insert(done.index);
                false
            }
        }
    }

    fn capacity_changed(&mut self) {
        let capacity = self.effective_capacity();
        if capacity < self.resident.len() {
            self.purge();
        }
    }

    fn purge(&mut self) {
        let window = self.window();
        let before = self.resident.len();
        self.resident.retain(|index, _| window.contains(index));
        let evicted = before - self.resident.len();
        if evicted > 0 {
            tracing::trace!(evicted, resident = self.resident.len(), "purged frame cache");
        }
    }
}

impl std::fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCache")
            .field("resident", &self.resident_indices())
            .field("in_flight", &self.in_flight)
            .field("capacity", &self.effective_capacity())
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Zero has always meant "no limit" for cache ceilings.
fn normalize_ceiling(ceiling: Option<usize>) -> Option<usize> {
    ceiling.filter(|value| *value > 0)
}
