//! Core library for the GIF player.
//!
//! Decoding, caching and timing are split into independent subsystems: a
//! [`SequenceDescriptor`] describes a decoded container, a [`FrameCache`]
//! keeps a bounded window of decoded frames resident and refills it on a
//! background thread, and a [`PlaybackClock`] turns refresh ticks into frame
//! advances. [`Player`] wires the three together for a single viewer.

pub mod cache;
pub mod config;
pub mod decoder;
pub mod error;
pub mod player;
pub mod refresh;
pub mod sequence;
pub mod timeline;

pub use cache::{optimal_cache_size, prefetch_window, FrameCache, MemoryPressure};
pub use config::{CacheConfig, PlayerConfig};
pub use decoder::{Bitmap, FrameDelays, FrameReader, FrameSource, GifFrameReader, GifSource};
pub use error::{PlayerError, Result};
pub use player::{Player, Visibility};
pub use refresh::{
    ListenerStatus, RefreshListener, RefreshSignalAdapter, RefreshTarget, RefreshTick,
    SoftwareRefreshSource,
};
pub use sequence::{
    resolve_duration, SequenceDescriptor, SequenceSummary, DEFAULT_FRAME_DELAY, MIN_FRAME_DELAY,
};
pub use timeline::{frame_interval, gcd, refresh_divisor, PlaybackClock, PlaybackEvent};
