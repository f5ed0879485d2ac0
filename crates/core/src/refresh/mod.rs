//! Periodic refresh signal plumbing.
//!
//! [`SoftwareRefreshSource`] stands in for a platform display link: it owns
//! its listeners and delivers a [`RefreshTick`] every `frame_interval` display
//! refreshes. Targets are attached through [`RefreshSignalAdapter`], which only
//! holds a weak reference, so a source never keeps its target alive.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// One delivery from the refresh signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshTick {
    /// Seconds between two display refreshes.
    pub frame_duration: f64,
    /// Display refreshes folded into this tick.
    pub frame_interval: u32,
}

impl RefreshTick {
    pub fn new(frame_duration: f64, frame_interval: u32) -> Self {
        Self {
            frame_duration,
            frame_interval: frame_interval.max(1),
        }
    }

    /// Seconds of playback this tick represents.
    pub fn elapsed(&self) -> f64 {
        self.frame_duration * f64::from(self.frame_interval)
    }
}

/// Consumer of refresh ticks.
pub trait RefreshTarget {
    fn on_refresh(&mut self, tick: RefreshTick);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    Attached,
    /// The listener's target is gone; the source should forget it.
    Detached,
}

pub trait RefreshListener {
    fn deliver(&self, tick: RefreshTick) -> ListenerStatus;
}

/// Forwards ticks to a target it does not own.
pub struct RefreshSignalAdapter<T> {
    target: Weak<RefCell<T>>,
}

impl<T: RefreshTarget> RefreshSignalAdapter<T> {
    pub fn new(target: &Rc<RefCell<T>>) -> Self {
        Self {
            target: Rc::downgrade(target),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.target.strong_count() > 0
    }
}

impl<T: RefreshTarget> RefreshListener for RefreshSignalAdapter<T> {
    fn deliver(&self, tick: RefreshTick) -> ListenerStatus {
        let Some(target) = self.target.upgrade() else {
            return ListenerStatus::Detached;
        };
        match target.try_borrow_mut() {
            Ok(mut target) => target.on_refresh(tick),
            Err(_) => tracing::warn!("refresh target busy; dropping re-entrant tick"),
        }
        ListenerStatus::Attached
    }
}

impl<T> fmt::Debug for RefreshSignalAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshSignalAdapter")
            .field("attached", &(self.target.strong_count() > 0))
            .finish()
    }
}

/// Software display link driven by explicit [`refresh`](Self::refresh) calls.
pub struct SoftwareRefreshSource {
    display_refresh_rate: f64,
    frame_interval: u32,
    paused: bool,
    refreshes: u64,
    listeners: Vec<Box<dyn RefreshListener>>,
}

impl SoftwareRefreshSource {
    pub fn new(display_refresh_rate: f64) -> Self {
        Self {
            display_refresh_rate,
            frame_interval: 1,
            paused: false,
            refreshes: 0,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn RefreshListener>) {
        self.listeners.push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn set_frame_interval(&mut self, frame_interval: u32) {
        self.frame_interval = frame_interval.max(1);
    }

    pub fn frame_interval(&self) -> u32 {
        self.frame_interval
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn display_refresh_rate(&self) -> f64 {
        self.display_refresh_rate
    }

    /// Signals one display refresh. Returns whether a tick was delivered.
    pub fn refresh(&mut self) -> bool {
        if self.paused {
            return false;
        }
        self.refreshes += 1;
        if self.refreshes % u64::from(self.frame_interval) != 0 {
            return false;
        }

        let tick = RefreshTick::new(1.0 / self.display_refresh_rate, self.frame_interval);
        self.listeners
            .retain(|listener| listener.deliver(tick) == ListenerStatus::Attached);
        true
    }
}

impl fmt::Debug for SoftwareRefreshSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareRefreshSource")
            .field("display_refresh_rate", &self.display_refresh_rate)
            .field("frame_interval", &self.frame_interval)
            .field("paused", &self.paused)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
