//! Host-facing player tying one sequence's cache and clock together.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{FrameCache, MemoryPressure};
use crate::config::PlayerConfig;
use crate::decoder::{Bitmap, FrameSource, GifSource};
use crate::refresh::{RefreshTarget, RefreshTick};
use crate::sequence::SequenceDescriptor;
use crate::timeline::{frame_interval, PlaybackClock, PlaybackEvent};
use crate::Result;

/// Inputs the host derives visibility from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Visibility {
    /// Attached to a window and a parent view.
    pub attached: bool,
    pub hidden: bool,
    pub alpha: f32,
}

impl Visibility {
    pub fn visible() -> Self {
        Self {
            attached: true,
            hidden: false,
            alpha: 1.0,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.attached && !self.hidden && self.alpha > 0.0
    }
}

#[derive(Debug)]
struct Session {
    cache: FrameCache,
    clock: PlaybackClock,
    frame_interval: u32,
}

/// One viewer's playback state. Every mutation happens through `&mut self`,
/// on whichever context owns the player.
#[derive(Debug)]
pub struct Player {
    config: PlayerConfig,
    session: Option<Session>,
    wants_animation: bool,
    capacity_ceiling: Option<usize>,
    events: Vec<PlaybackEvent>,
}

impl Player {
    pub fn new(config: PlayerConfig) -> Self {
        let capacity_ceiling = config.cache.max_frame_cache_size;
        Self {
            config,
            session: None,
            wants_animation: false,
            capacity_ceiling,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Decodes GIF bytes into a sequence that can be assigned to any player.
    pub fn load_gif(&self, bytes: impl Into<Arc<[u8]>>) -> Result<Arc<SequenceDescriptor>> {
        let source = GifSource::new(bytes, self.config.cache.predraw)?;
        self.load_source(Arc::new(source))
    }

    pub fn load_source(&self, source: Arc<dyn FrameSource>) -> Result<Arc<SequenceDescriptor>> {
        Ok(Arc::new(SequenceDescriptor::from_source(source)?))
    }

    /// Assigns a sequence, resetting playback to its poster frame and giving
    /// it a fresh cache. Assigning the sequence that is already playing keeps
    /// the current state.
    pub fn set_sequence(&mut self, sequence: Option<Arc<SequenceDescriptor>>) -> Result<()> {
        let Some(sequence) = sequence else {
            if self.session.take().is_some() {
                tracing::debug!("sequence cleared");
            }
            return Ok(());
        };

        if let Some(session) = &self.session {
            if Arc::ptr_eq(session.cache.descriptor(), &sequence) {
                tracing::trace!("same sequence assigned; keeping playback state");
                return Ok(());
            }
        }

        let mut cache = FrameCache::new(Arc::clone(&sequence), &self.config.cache)?;
        cache.set_ceiling(self.capacity_ceiling);
        let mut clock = PlaybackClock::new(&sequence);
        clock.set_should_animate(self.wants_animation);
        let frame_interval = frame_interval(clock.refresh_divisor(), self.config.display_refresh_rate);

        tracing::debug!(
            frames = sequence.frame_count(),
            refresh_divisor = clock.refresh_divisor(),
            frame_interval,
            "sequence assigned"
        );

        self.session = Some(Session {
            cache,
            clock,
            frame_interval,
        });
        self.events.push(PlaybackEvent::Redisplay);
        Ok(())
    }

    pub fn sequence(&self) -> Option<&Arc<SequenceDescriptor>> {
        self.session.as_ref().map(|session| session.cache.descriptor())
    }

    pub fn cache(&self) -> Option<&FrameCache> {
        self.session.as_ref().map(|session| &session.cache)
    }

    pub fn clock(&self) -> Option<&PlaybackClock> {
        self.session.as_ref().map(|session| &session.clock)
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.set_should_animate(visibility.is_visible());
    }

    /// Starts or pauses playback without touching the clock's position.
    pub fn set_should_animate(&mut self, should_animate: bool) {
        self.wants_animation = should_animate;
        if let Some(session) = &mut self.session {
            session.clock.set_should_animate(should_animate);
        }
    }

    /// Whether the host should keep delivering refresh ticks.
    pub fn is_animating(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.clock.is_animating())
    }

    pub fn set_capacity_ceiling(&mut self, ceiling: Option<usize>) {
        self.capacity_ceiling = ceiling;
        if let Some(session) = &mut self.session {
            session.cache.set_ceiling(ceiling);
        }
    }

    pub fn on_memory_pressure(&mut self, level: MemoryPressure) {
        if let Some(session) = &mut self.session {
            session.cache.on_memory_pressure(level);
        }
    }

    /// Display refreshes the host should fold into one tick.
    pub fn frame_interval(&self) -> Option<u32> {
        self.session.as_ref().map(|session| session.frame_interval)
    }

    pub fn tick(&mut self, tick: RefreshTick) {
        let Some(session) = &mut self.session else {
            return;
        };
        session
            .clock
            .tick(tick.elapsed(), &mut session.cache, &mut self.events);
    }

    /// Applies finished background decodes without advancing playback.
    pub fn poll(&mut self) -> usize {
        self.session
            .as_mut()
            .map_or(0, |session| session.cache.poll())
    }

    /// Waits for in-flight decodes, for hosts that prefer completeness over
    /// latency.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        self.session
            .as_mut()
            .map_or(true, |session| session.cache.settle(timeout))
    }

    pub fn current_frame(&self) -> Option<&Bitmap> {
        self.session
            .as_ref()
            .and_then(|session| session.clock.current_frame())
    }

    pub fn current_frame_index(&self) -> Option<usize> {
        self.session
            .as_ref()
            .map(|session| session.clock.current_frame_index())
    }

    /// Drains queued notifications in the order they happened.
    pub fn take_events(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.events)
    }
}

impl RefreshTarget for Player {
    fn on_refresh(&mut self, tick: RefreshTick) {
        self.tick(tick);
    }
}
