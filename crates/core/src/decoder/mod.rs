//! Decoder capability consumed by the sequence, cache and clock.
//!
//! A [`FrameSource`] reports frame count, per-frame delay metadata and the
//! container loop count, and decodes any single frame by index on demand.
//! Decoding must be pure with respect to the index: the cache calls it from a
//! background thread, in any order, possibly more than once per index.

mod gif_source;

use std::sync::Arc;

use image::RgbaImage;

use crate::Result;

pub use self::gif_source::{GifFrameReader, GifSource};

/// Decoded frame shared between the cache and whoever is displaying it.
pub type Bitmap = Arc<RgbaImage>;

/// Delay metadata recorded for one frame, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameDelays {
    /// Delay exactly as the container declares it.
    pub unclamped: Option<f64>,
    /// Delay after the container format's own compatibility clamp.
    pub clamped: Option<f64>,
}

impl FrameDelays {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn unclamped(seconds: f64) -> Self {
        Self {
            unclamped: Some(seconds),
            clamped: None,
        }
    }
}

pub trait FrameSource: Send + Sync {
    /// Number of frames the container declares.
    fn frame_count(&self) -> usize;

    /// Container loop count. Zero means loop forever.
    fn loop_count(&self) -> usize;

    fn frame_delays(&self, index: usize) -> FrameDelays;

    /// Decodes a single fully composited frame.
    fn decode_frame(&self, index: usize) -> Result<Bitmap>;

    /// Reports whether `index` can be decoded. Sources that already validated
    /// their frames while scanning can answer without decoding again.
    fn probe_frame(&self, index: usize) -> bool {
        self.decode_frame(index).is_ok()
    }

    /// Best available duration for a frame, if the container has any.
    fn frame_duration(&self, index: usize) -> Option<f64> {
        let delays = self.frame_delays(index);
        delays.unclamped.or(delays.clamped)
    }

    /// Opens a reader for decoding many frames in a row on one thread.
    /// Containers whose frames build on the previous ones can keep their
    /// position between calls instead of starting over for every index.
    fn reader(&self) -> Box<dyn FrameReader + '_> {
        Box::new(IndexedReader(self))
    }
}

/// Stateful decoder used by the background decode thread.
///
/// Every call must return the same bitmap [`FrameSource::decode_frame`] would
/// for that index, whatever was read before.
pub trait FrameReader {
    fn read_frame(&mut self, index: usize) -> Result<Bitmap>;
}

struct IndexedReader<'a, S: ?Sized>(&'a S);

impl<S: FrameSource + ?Sized> FrameReader for IndexedReader<'_, S> {
    fn read_frame(&mut self, index: usize) -> Result<Bitmap> {
        self.0.decode_frame(index)
    }
}

/// Premultiplies colour channels by alpha in place so the render path can
/// composite the bitmap without touching every pixel again.
pub fn premultiply_alpha(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        if a == u8::MAX {
            continue;
        }
        let scale = |channel: u8| ((u16::from(channel) * u16::from(a) + 127) / 255) as u8;
        pixel.0 = [scale(r), scale(g), scale(b), a];
    }
}


#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::testing::ScriptedSource;
    use super::*;

    #[test]
    fn premultiplies_translucent_pixels_only() {
        let mut image = RgbaImage::from_pixel(1, 2, Rgba([200, 100, 50, 128]));
        image.put_pixel(0, 1, Rgba([200, 100, 50, 255]));

        premultiply_alpha(&mut image);

        assert_eq!(image.get_pixel(0, 0).0, [100, 50, 25, 128]);
        assert_eq!(image.get_pixel(0, 1).0, [200, 100, 50, 255]);
    }

    #[test]
    fn frame_duration_prefers_unclamped_metadata() {
        let mut source = ScriptedSource::with_durations(&[0.05, 0.05]);
        source.delays[1] = FrameDelays {
            unclamped: None,
            clamped: Some(0.1),
        };

        assert_eq!(source.frame_duration(0), Some(0.05));
        assert_eq!(source.frame_duration(1), Some(0.1));
        assert_eq!(source.frame_duration(5), None);
    }

    #[test]
    fn default_probe_decodes() {
        let source = ScriptedSource::with_durations(&[0.1, 0.1]).failing(&[1]);

        assert!(source.probe_frame(0));
        assert!(!source.probe_frame(1));
        assert_eq!(source.decode_count(), 2);
    }
}
