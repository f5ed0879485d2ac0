//! Immutable description of an animated sequence, built from one scan of a
//! [`FrameSource`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::decoder::{Bitmap, FrameDelays, FrameSource};
use crate::{PlayerError, Result};

/// Shortest frame delay honoured as-is, in seconds.
pub const MIN_FRAME_DELAY: f64 = 0.02;
/// Delay used when metadata is missing on the first frame or resolves below
/// [`MIN_FRAME_DELAY`].
pub const DEFAULT_FRAME_DELAY: f64 = 0.1;

/// Serializable view of a sequence for hosts and tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSummary {
    pub frame_count: usize,
    pub durations: Vec<f64>,
    pub loop_count: usize,
    pub poster_frame_index: usize,
    pub width: u32,
    pub height: u32,
    pub undecodable_frames: Vec<usize>,
}

pub struct SequenceDescriptor {
    frame_count: usize,
    durations: Vec<f64>,
    loop_count: usize,
    poster_index: usize,
    poster: Bitmap,
    undecodable: BTreeSet<usize>,
    source: Arc<dyn FrameSource>,
}

impl SequenceDescriptor {
    /// Scans `source` once, resolving every frame's duration and decoding
    /// frames in order until the poster frame is found.
    ///
    /// Frames that fail to decode are recorded and skipped; the sequence is
    /// accepted as long as one frame decodes.
    pub fn from_source(source: Arc<dyn FrameSource>) -> Result<Self> {
        let frame_count = source.frame_count();
        if frame_count == 0 {
            return Err(PlayerError::EmptySequence);
        }

        let mut durations: Vec<f64> = Vec::with_capacity(frame_count);
        let mut undecodable = BTreeSet::new();
        let mut poster: Option<(usize, Bitmap)> = None;

        for index in 0..frame_count {
            let decodable = if poster.is_none() {
                match source.decode_frame(index) {
                    Ok(bitmap) => {
                        poster = Some((index, bitmap));
                        true
                    }
                    Err(err) => {
                        tracing::warn!(index, error = %err, "skipping undecodable frame");
                        false
                    }
                }
            } else if source.probe_frame(index) {
                true
            } else {
                tracing::warn!(index, "skipping undecodable frame");
                false
            };

            if !decodable {
                undecodable.insert(index);
            }

            let previous = durations.last().copied();
            durations.push(resolve_duration(source.frame_delays(index), index, previous));
        }

        let Some((poster_index, poster)) = poster else {
            return Err(PlayerError::NoDecodableFrames);
        };

        let loop_count = source.loop_count();
        tracing::debug!(
            frame_count,
            loop_count,
            poster_index,
            skipped = undecodable.len(),
            "built sequence descriptor"
        );

        Ok(Self {
            frame_count,
            durations,
            loop_count,
            poster_index,
            poster,
            undecodable,
            source,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn durations(&self) -> &[f64] {
        &self.durations
    }

    pub fn duration(&self, index: usize) -> Option<f64> {
        self.durations.get(index).copied()
    }

    /// Sum of every frame's duration: the length of one pass.
    pub fn total_duration(&self) -> f64 {
        self.durations.iter().sum()
    }

    /// Container loop count. Zero means loop forever.
    pub fn loop_count(&self) -> usize {
        self.loop_count
    }

    pub fn poster_index(&self) -> usize {
        self.poster_index
    }

    pub fn poster(&self) -> &Bitmap {
        &self.poster
    }

    pub fn is_decodable(&self, index: usize) -> bool {
        index < self.frame_count && !self.undecodable.contains(&index)
    }

    /// Bytes needed to hold every frame decoded at the poster's dimensions.
    pub fn decoded_size_bytes(&self) -> usize {
        let (width, height) = self.poster.dimensions();
        width as usize * height as usize * 4 * self.frame_count
    }

    pub(crate) fn source(&self) -> &Arc<dyn FrameSource> {
        &self.source
    }

    pub fn summary(&self) -> SequenceSummary {
        let (width, height) = self.poster.dimensions();
        SequenceSummary {
            frame_count: self.frame_count,
            durations: self.durations.clone(),
            loop_count: self.loop_count,
            poster_frame_index: self.poster_index,
            width,
            height,
            undecodable_frames: self.undecodable.iter().copied().collect(),
        }
    }
}

impl fmt::Debug for SequenceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceDescriptor")
            .field("frame_count", &self.frame_count)
            .field("loop_count", &self.loop_count)
            .field("poster_index", &self.poster_index)
            .field("undecodable", &self.undecodable)
            .finish()
    }
}

/// Resolves a frame's duration: unclamped metadata, then clamped metadata,
/// then the default (first frame) or the previous frame's resolved duration.
/// Anything below [`MIN_FRAME_DELAY`] snaps to [`DEFAULT_FRAME_DELAY`].
pub fn resolve_duration(delays: FrameDelays, index: usize, previous: Option<f64>) -> f64 {
    let resolved = delays
        .unclamped
        .or(delays.clamped)
        .unwrap_or_else(|| match (index, previous) {
            (0, _) | (_, None) => DEFAULT_FRAME_DELAY,
            (_, Some(previous)) => previous,
        });

    if !resolved.is_finite() || resolved < MIN_FRAME_DELAY - f64::EPSILON {
        DEFAULT_FRAME_DELAY
    } else {
        resolved
    }
}
