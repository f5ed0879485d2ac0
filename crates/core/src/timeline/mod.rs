use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::FrameCache;
use crate::decoder::Bitmap;
use crate::sequence::{SequenceDescriptor, MIN_FRAME_DELAY};

/// Scale applied to durations before taking their GCD, so every legal delay
/// maps to an integer.
pub const GCD_PRECISION: f64 = 2.0 / MIN_FRAME_DELAY;

/// Notification produced by the clock for the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackEvent {
    /// A newly available frame should be presented.
    Redisplay,
    /// One full pass finished; `remaining` loops are left.
    LoopCompleted { remaining: usize },
    /// The last loop finished and the clock stopped on the final frame.
    Finished,
}

/// Greatest common divisor by repeated remainder.
pub fn gcd(a: u64, b: u64) -> u64 {
    if a < b {
        return gcd(b, a);
    }
    if b == 0 {
        return a;
    }
    match a % b {
        0 => b,
        remainder => gcd(b, remainder),
    }
}

/// Coarsest time quantum, in seconds, that lands on every frame boundary.
pub fn refresh_divisor(durations: &[f64]) -> f64 {
    let quantize = |duration: &f64| (duration * GCD_PRECISION).round() as u64;
    let Some(first) = durations.first().map(quantize) else {
        return 0.0;
    };
    let scaled = durations.iter().map(quantize).fold(first, gcd);
    scaled as f64 / GCD_PRECISION
}

/// Display refreshes to fold into one tick for a given refresh divisor.
pub fn frame_interval(refresh_divisor: f64, display_refresh_rate: f64) -> u32 {
    let interval = (refresh_divisor * display_refresh_rate).round();
    if interval.is_finite() && interval >= 1.0 {
        interval as u32
    } else {
        1
    }
}

/// Per-viewer playback state: which frame is showing, how much elapsed time
/// has not been spent yet and how many loops remain.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    current_frame_index: usize,
    current_frame: Option<Bitmap>,
    accumulator: f64,
    loop_countdown: usize,
    should_animate: bool,
    finished: bool,
    needs_display_when_available: bool,
    refresh_divisor: f64,
}

impl PlaybackClock {
    pub fn new(descriptor: &SequenceDescriptor) -> Self {
        let mut clock = Self {
            current_frame_index: 0,
            current_frame: None,
            accumulator: 0.0,
            loop_countdown: 0,
            should_animate: false,
            finished: false,
            needs_display_when_available: false,
            refresh_divisor: 0.0,
        };
        clock.reset(descriptor);
        clock
    }

    /// Returns to the start of `descriptor`, showing its poster frame.
    /// `should_animate` is left untouched.
    pub fn reset(&mut self, descriptor: &SequenceDescriptor) {
        self.current_frame_index = 0;
        self.current_frame = Some(Arc::clone(descriptor.poster()));
        self.accumulator = 0.0;
        self.loop_countdown = match descriptor.loop_count() {
            0 => usize::MAX,
            count => count,
        };
        self.finished = false;
        self.needs_display_when_available = false;
        self.refresh_divisor = refresh_divisor(descriptor.durations());
    }

    pub fn set_should_animate(&mut self, should_animate: bool) {
        self.should_animate = should_animate;
    }

    pub fn should_animate(&self) -> bool {
        self.should_animate
    }

    pub fn is_animating(&self) -> bool {
        self.should_animate && !self.finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn current_frame_index(&self) -> usize {
        self.current_frame_index
    }

    pub fn current_frame(&self) -> Option<&Bitmap> {
        self.current_frame.as_ref()
    }

    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Loops left to play; `usize::MAX` when looping forever.
    pub fn loop_countdown(&self) -> usize {
        self.loop_countdown
    }

    pub fn refresh_divisor(&self) -> f64 {
        self.refresh_divisor
    }

    /// Advances by `elapsed` seconds, catching up over as many frames as the
    /// time covers. Holds the current frame when the cache has not decoded
    /// the frame due next.
    pub fn tick(&mut self, elapsed: f64, cache: &mut FrameCache, events: &mut Vec<PlaybackEvent>) {
        if !self.is_animating() {
            return;
        }
        if !elapsed.is_finite() {
            tracing::warn!(elapsed, "ignoring tick with non-finite elapsed time");
            return;
        }

        let descriptor = Arc::clone(cache.descriptor());
        let index = self.current_frame_index;
        if descriptor.duration(index).is_none() {
            tracing::warn!(index, "no duration for current frame; ignoring tick");
            return;
        }

        match cache.request(index) {
            Some(frame) => {
                self.current_frame = Some(frame);
                if self.needs_display_when_available {
                    events.push(PlaybackEvent::Redisplay);
                    self.needs_display_when_available = false;
                }
            }
            None if cache.is_undecodable(index) => {
                tracing::trace!(index, "holding previous frame over undecodable frame");
            }
            None => {
                tracing::trace!(index, "frame not decoded yet; holding previous frame");
                self.needs_display_when_available = true;
                return;
            }
        }

        self.accumulator += elapsed.max(0.0);

        let total = descriptor.total_duration();
        if descriptor.loop_count() == 0 && total > 0.0 && self.accumulator >= 2.0 * total {
            // Endless loop: whole passes beyond the first land on the same frame.
            self.accumulator = total + self.accumulator % total;
        }

        let frame_count = descriptor.frame_count();
        while let Some(duration) = descriptor.duration(self.current_frame_index) {
            if self.accumulator < duration {
                break;
            }
            self.accumulator -= duration;
            self.current_frame_index += 1;

            if self.current_frame_index >= frame_count {
                self.loop_countdown = self.loop_countdown.saturating_sub(1);
                events.push(PlaybackEvent::LoopCompleted {
                    remaining: self.loop_countdown,
                });

                if self.loop_countdown == 0 {
                    self.current_frame_index = frame_count - 1;
                    self.finished = true;
                    events.push(PlaybackEvent::Finished);
                    tracing::debug!(frame_count, "final loop completed");
                    return;
                }

                self.current_frame_index = 0;
            }

            self.needs_display_when_available = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::CacheConfig;
    use crate::decoder::testing::ScriptedSource;

    fn warm_cache(source: ScriptedSource) -> FrameCache {
        let descriptor = Arc::new(SequenceDescriptor::from_source(source.shared()).unwrap());
        let mut cache = FrameCache::new(descriptor, &CacheConfig::default()).unwrap();
        cache.request(0);
        assert!(cache.settle(Duration::from_secs(5)));
        cache
    }

    fn animating_clock(cache: &FrameCache) -> PlaybackClock {
        let mut clock = PlaybackClock::new(cache.descriptor());
        clock.set_should_animate(true);
        clock
    }

    #[test]
    fn gcd_handles_either_argument_order() {
        assert_eq!(gcd(10, 20), 10);
        assert_eq!(gcd(20, 10), 10);
        assert_eq!(gcd(21, 14), 7);
        assert_eq!(gcd(7, 7), 7);
        assert_eq!(gcd(9, 0), 9);
    }

    #[test]
    fn divisor_reduces_quantized_durations() {
        assert_eq!(refresh_divisor(&[0.1, 0.2, 0.1]), 0.1);
        assert_eq!(refresh_divisor(&[0.07]), 0.07);
        assert_eq!(refresh_divisor(&[0.06, 0.04]), 0.02);
        assert_eq!(refresh_divisor(&[]), 0.0);
    }

    #[test]
    fn frame_interval_is_at_least_one() {
        assert_eq!(frame_interval(0.1, 60.0), 6);
        assert_eq!(frame_interval(0.02, 60.0), 1);
        assert_eq!(frame_interval(0.001, 60.0), 1);
        assert_eq!(frame_interval(0.0, 60.0), 1);
    }

    #[test]
    fn plays_exactly_the_declared_number_of_loops() {
        let mut cache = warm_cache(ScriptedSource::with_durations(&[0.1; 3]).looping(2));
        let mut clock = animating_clock(&cache);
        let mut events = Vec::new();

        let mut visited = Vec::new();
        for _ in 0..20 {
            clock.tick(0.1, &mut cache, &mut events);
            visited.push(clock.current_frame_index());
        }

        let loops: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                PlaybackEvent::LoopCompleted { remaining } => Some(*remaining),
                _ => None,
            })
            .collect();
        assert_eq!(loops, vec![1, 0]);
        assert!(events.contains(&PlaybackEvent::Finished));
        assert!(clock.is_finished());
        assert!(!clock.is_animating());
        assert_eq!(visited[..6], [1, 2, 0, 1, 2, 2]);
        assert_eq!(clock.current_frame_index(), 2);
    }

    #[test]
    fn large_ticks_catch_up_over_several_frames() {
        let mut cache = warm_cache(ScriptedSource::with_durations(&[0.1, 0.2, 0.1, 0.1]));
        let mut clock = animating_clock(&cache);
        let mut events = Vec::new();

        clock.tick(0.35, &mut cache, &mut events);

        assert_eq!(clock.current_frame_index(), 2);
        assert!((clock.accumulator() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn infinite_sequences_keep_wrapping() {
        let mut cache = warm_cache(ScriptedSource::with_durations(&[0.1; 2]));
        let mut clock = animating_clock(&cache);
        let mut events = Vec::new();

        for _ in 0..10 {
            clock.tick(0.1, &mut cache, &mut events);
        }

        assert!(clock.is_animating());
        assert_eq!(
            events
                .iter()
                .filter(|event| matches!(event, PlaybackEvent::LoopCompleted { .. }))
                .count(),
            5
        );
    }

    #[test]
    fn non_finite_ticks_are_ignored() {
        let mut cache = warm_cache(ScriptedSource::with_durations(&[0.1; 3]));
        let mut clock = animating_clock(&cache);
        let mut events = Vec::new();

        clock.tick(f64::INFINITY, &mut cache, &mut events);
        clock.tick(f64::NAN, &mut cache, &mut events);

        assert_eq!(clock.current_frame_index(), 0);
        assert_eq!(clock.accumulator(), 0.0);
        assert!(events.is_empty());
    }

    #[test]
    fn huge_ticks_on_endless_loops_finish_in_one_pass() {
        let mut cache = warm_cache(ScriptedSource::with_durations(&[0.1, 0.2]));
        let mut clock = animating_clock(&cache);
        let mut events = Vec::new();

        clock.tick(f64::MAX, &mut cache, &mut events);

        assert!(clock.is_animating());
        assert!(clock.accumulator() < 0.2);
        assert_eq!(
            events
                .iter()
                .filter(|event| matches!(event, PlaybackEvent::LoopCompleted { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn paused_clock_keeps_its_state() {
        let mut cache = warm_cache(ScriptedSource::with_durations(&[0.1; 4]));
        let mut clock = animating_clock(&cache);
        let mut events = Vec::new();

        clock.tick(0.15, &mut cache, &mut events);
        clock.set_should_animate(false);
        clock.tick(1.0, &mut cache, &mut events);

        assert_eq!(clock.current_frame_index(), 1);
        assert!((clock.accumulator() - 0.05).abs() < 1e-9);

        clock.set_should_animate(true);
        clock.tick(0.06, &mut cache, &mut events);
        assert_eq!(clock.current_frame_index(), 2);
    }

    #[test]
    fn missing_frame_holds_and_redisplays_once_available() {
        let source = ScriptedSource::with_durations(&[0.1; 6]);
        let descriptor = Arc::new(SequenceDescriptor::from_source(source.shared()).unwrap());
        let config = CacheConfig {
            optimal_frame_cache_size: Some(1),
            ..CacheConfig::default()
        };
        let mut cache = FrameCache::new(descriptor, &config).unwrap();
        let mut clock = animating_clock(&cache);
        let mut events = Vec::new();

        clock.tick(0.1, &mut cache, &mut events);
        assert_eq!(clock.current_frame_index(), 1);

        // Frame 1 has not been decoded: the tick is not spent.
        clock.tick(0.1, &mut cache, &mut events);
        assert_eq!(clock.current_frame_index(), 1);
        assert_eq!(clock.accumulator(), 0.0);
        assert!(events.is_empty());

        assert!(cache.settle(Duration::from_secs(5)));
        clock.tick(0.05, &mut cache, &mut events);

        assert_eq!(events, vec![PlaybackEvent::Redisplay]);
        assert_eq!(clock.current_frame().unwrap().get_pixel(0, 0).0[0], 1);
    }

    #[test]
    fn undecodable_frames_are_played_through() {
        let mut cache = warm_cache(ScriptedSource::with_durations(&[0.1; 3]).failing(&[1]));
        let mut clock = animating_clock(&cache);
        let mut events = Vec::new();

        clock.tick(0.1, &mut cache, &mut events);
        assert_eq!(clock.current_frame_index(), 1);
        clock.tick(0.1, &mut cache, &mut events);
        assert_eq!(clock.current_frame_index(), 2);
        assert_eq!(clock.current_frame().unwrap().get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn reset_restores_the_poster_and_countdown() {
        let mut cache = warm_cache(ScriptedSource::with_durations(&[0.1; 2]).looping(1));
        let mut clock = animating_clock(&cache);
        let mut events = Vec::new();
        for _ in 0..3 {
            clock.tick(0.1, &mut cache, &mut events);
        }
        assert!(clock.is_finished());

        clock.reset(cache.descriptor());

        assert!(clock.is_animating());
        assert_eq!(clock.current_frame_index(), 0);
        assert_eq!(clock.loop_countdown(), 1);
        assert!(Arc::ptr_eq(
            clock.current_frame().unwrap(),
            cache.descriptor().poster()
        ));
    }
}
