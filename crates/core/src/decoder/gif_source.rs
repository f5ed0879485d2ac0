use std::io::Cursor;
use std::sync::Arc;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, Frames, ImageFormat};

use super::{premultiply_alpha, Bitmap, FrameDelays, FrameReader, FrameSource};
use crate::{PlayerError, Result};

/// Delays at or below this are treated as "as fast as possible" by the
/// format's compatibility clamp.
const GIF_CLAMP_THRESHOLD_SECONDS: f64 = 0.01;
const GIF_CLAMPED_DELAY_SECONDS: f64 = 0.1;

/// Animated GIF container backed by an in-memory byte buffer.
///
/// Construction scans the whole stream once for frame count, delays and the
/// loop count. Frames are decoded lazily. A one-off [`decode_frame`] has to
/// composite from the start of the stream; a [`GifFrameReader`] keeps its
/// place, so walking forward costs one frame per call.
///
/// [`decode_frame`]: FrameSource::decode_frame
pub struct GifSource {
    bytes: Arc<[u8]>,
    delays: Vec<u16>,
    loop_count: usize,
    predraw: bool,
}

impl GifSource {
    pub fn new(bytes: impl Into<Arc<[u8]>>, predraw: bool) -> Result<Self> {
        let bytes = bytes.into();

        match image::guess_format(&bytes) {
            Ok(ImageFormat::Gif) => {}
            Ok(other) => {
                return Err(PlayerError::InvalidContainer(format!(
                    "{other:?} is not an animated GIF container"
                )))
            }
            Err(err) => return Err(PlayerError::InvalidContainer(err.to_string())),
        }

        let (delays, loop_count) = scan(&bytes)?;

        if delays.is_empty() {
            return Err(PlayerError::EmptySequence);
        }

        tracing::debug!(frames = delays.len(), loop_count, "scanned GIF container");

        Ok(Self {
            bytes,
            delays,
            loop_count,
            predraw,
        })
    }

    pub fn frame_reader(&self) -> GifFrameReader<'_> {
        GifFrameReader {
            source: self,
            frames: None,
            next_index: 0,
            frames_read: 0,
        }
    }

    fn open_frames(&self) -> image::ImageResult<Frames<'static>> {
        let decoder = GifDecoder::new(Cursor::new(Arc::clone(&self.bytes)))?;
        Ok(decoder.into_frames())
    }
}

/// Forward-only reader over a [`GifSource`].
///
/// Reading an index at or after the current position continues the open
/// stream. Going backwards (a loop wrapping to frame 0) reopens it.
pub struct GifFrameReader<'a> {
    source: &'a GifSource,
    frames: Option<Frames<'static>>,
    next_index: usize,
    frames_read: usize,
}

impl GifFrameReader<'_> {
    /// Frames composited since the reader was opened, including skipped ones.
    pub fn frames_read(&self) -> usize {
        self.frames_read
    }
}

impl FrameReader for GifFrameReader<'_> {
    fn read_frame(&mut self, index: usize) -> Result<Bitmap> {
        let mut frames = match self.frames.take() {
            Some(frames) if index >= self.next_index => frames,
            _ => {
                self.next_index = 0;
                self.source
                    .open_frames()
                    .map_err(|err| PlayerError::frame_decode(index, err))?
            }
        };

        while self.next_index < index {
            self.frames_read += 1;
            self.next_index += 1;
            if frames.next().is_none() {
                return Err(PlayerError::frame_decode(index, "index past end of stream"));
            }
        }

        self.frames_read += 1;
        self.next_index = index + 1;
        let frame = match frames.next() {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => return Err(PlayerError::frame_decode(index, err)),
            None => return Err(PlayerError::frame_decode(index, "index past end of stream")),
        };
        self.frames = Some(frames);

        let mut buffer = frame.into_buffer();
        if self.source.predraw {
            premultiply_alpha(&mut buffer);
        }
        Ok(Arc::new(buffer))
    }
}

/// Reads every frame header and data block once, returning the delays in
/// centiseconds and the container loop count.
fn scan(bytes: &[u8]) -> Result<(Vec<u16>, usize)> {
    let mut options = ::gif::DecodeOptions::new();
    options.set_color_output(::gif::ColorOutput::Indexed);
    let mut reader = options
        .read_info(Cursor::new(bytes))
        .map_err(|err| PlayerError::InvalidContainer(err.to_string()))?;

    let mut delays = Vec::new();
    loop {
        match reader.read_next_frame() {
            Ok(Some(frame)) => delays.push(frame.delay),
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(
                    frames = delays.len(),
                    error = %err,
                    "GIF stream truncated; keeping frames read so far"
                );
                break;
            }
        }
    }

    let loop_count = match reader.repeat() {
        ::gif::Repeat::Finite(count) => usize::from(count),
        ::gif::Repeat::Infinite => 0,
    };
    Ok((delays, loop_count))
}

impl FrameSource for GifSource {
    fn frame_count(&self) -> usize {
        self.delays.len()
    }

    fn loop_count(&self) -> usize {
        self.loop_count
    }

    fn frame_delays(&self, index: usize) -> FrameDelays {
        let Some(centiseconds) = self.delays.get(index) else {
            return FrameDelays::default();
        };
        let seconds = f64::from(*centiseconds) / 100.0;
        let clamped = if seconds <= GIF_CLAMP_THRESHOLD_SECONDS {
            GIF_CLAMPED_DELAY_SECONDS
        } else {
            seconds
        };
        FrameDelays {
            unclamped: Some(seconds),
            clamped: Some(clamped),
        }
    }

    fn decode_frame(&self, index: usize) -> Result<Bitmap> {
        self.frame_reader().read_frame(index)
    }

    fn reader(&self) -> Box<dyn FrameReader + '_> {
        Box::new(self.frame_reader())
    }

    fn probe_frame(&self, index: usize) -> bool {
        // The scan already decoded every frame it counted.
        index < self.delays.len()
    }
}

impl std::fmt::Debug for GifSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GifSource")
            .field("bytes", &self.bytes.len())
            .field("frames", &self.delays.len())
            .field("loop_count", &self.loop_count)
            .field("predraw", &self.predraw)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::testing::encode_gif;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    #[test]
    fn scans_delays_and_loop_count() {
        let bytes = encode_gif(&[(5, RED), (20, BLUE), (1, RED)], ::gif::Repeat::Finite(3));
        let source = GifSource::new(bytes, false).unwrap();

        assert_eq!(source.frame_count(), 3);
        assert_eq!(source.loop_count(), 3);
        assert_eq!(source.frame_duration(0), Some(0.05));
        assert_eq!(source.frame_duration(1), Some(0.2));
        assert_eq!(source.frame_delays(2).clamped, Some(0.1));
    }

    #[test]
    fn infinite_repeat_maps_to_zero() {
        let bytes = encode_gif(&[(10, RED), (10, BLUE)], ::gif::Repeat::Infinite);
        let source = GifSource::new(bytes, true).unwrap();

        assert_eq!(source.loop_count(), 0);
    }

    #[test]
    fn decodes_frames_by_index_in_any_order() {
        let bytes = encode_gif(&[(10, RED), (10, BLUE)], ::gif::Repeat::Infinite);
        let source = GifSource::new(bytes, true).unwrap();

        let second = source.decode_frame(1).unwrap();
        let first = source.decode_frame(0).unwrap();
        let again = source.decode_frame(1).unwrap();

        assert_eq!(first.dimensions(), (2, 2));
        assert_eq!(second.get_pixel(0, 0).0, BLUE);
        assert_eq!(first.get_pixel(1, 1).0, RED);
        assert_eq!(second.as_raw(), again.as_raw());
        assert!(source.decode_frame(2).is_err());
    }

    #[test]
    fn reader_walks_forward_one_frame_per_call() {
        let frames: Vec<_> = (0..6)
            .map(|index| (10, if index % 2 == 0 { RED } else { BLUE }))
            .collect();
        let bytes = encode_gif(&frames, ::gif::Repeat::Infinite);
        let source = GifSource::new(bytes, false).unwrap();
        let mut reader = source.frame_reader();

        for index in 0..6 {
            let frame = reader.read_frame(index).unwrap();
            assert_eq!(frame.as_raw(), source.decode_frame(index).unwrap().as_raw());
        }
        assert_eq!(reader.frames_read(), 6);

        // Wrapping back to the start reopens the stream.
        reader.read_frame(0).unwrap();
        assert_eq!(reader.frames_read(), 7);

        // Skipping ahead only reads the frames in between.
        assert_eq!(reader.read_frame(3).unwrap().get_pixel(0, 0).0, BLUE);
        assert_eq!(reader.frames_read(), 10);
        assert!(reader.read_frame(6).is_err());
    }

    #[test]
    fn rejects_other_containers() {
        let png_signature = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
        let err = GifSource::new(png_signature, true).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidContainer(_)));

        let err = GifSource::new(b"not an image".to_vec(), true).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidContainer(_)));
    }

    #[test]
    fn rejects_streams_without_frames() {
        let bytes = encode_gif(&[], ::gif::Repeat::Infinite);
        let err = GifSource::new(bytes, true).unwrap_err();
        assert!(matches!(err, PlayerError::EmptySequence));
    }
}
