//! Video frame staging.
//!
//! The core hands over a borrowed framebuffer during `run()`. [`VideoSink`]
//! normalises it to a tightly packed buffer and pushes it through a
//! [`TextureUploader`] before the callback returns.

use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::raw;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 16-bit 5:6:5.
    Rgb565,
    /// 32-bit little-endian `B G R X`.
    Xrgb8888,
}

impl PixelFormat {
    /// Maps a `RETRO_PIXEL_FORMAT_*` value. 0RGB1555 is not supported.
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            raw::RETRO_PIXEL_FORMAT_RGB565 => Some(Self::Rgb565),
            raw::RETRO_PIXEL_FORMAT_XRGB8888 => Some(Self::Xrgb8888),
            _ => None,
        }
    }

    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb565 => 2,
            Self::Xrgb8888 => 4,
        }
    }
}

/// GPU-side (or any) consumer of packed frames.
pub trait TextureUploader: Send {
    /// Called before the first upload and whenever dimensions or format change.
    fn recreate(&mut self, width: u32, height: u32, format: PixelFormat);

    /// `data` holds `height` rows of exactly `width * bpp` bytes.
    fn upload(&mut self, data: &[u8]);
}

/// Uploader that drops every frame, used when nothing presents video.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullUploader;

impl TextureUploader for NullUploader {
    fn recreate(&mut self, _width: u32, _height: u32, _format: PixelFormat) {}

    fn upload(&mut self, _data: &[u8]) {}
}

/// A packed frame kept in system memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuFrame {
    pub width: u32,
    pub height: u32,
    pub format: Option<PixelFormat>,
    pub pixels: Vec<u8>,
}

impl CpuFrame {
    /// Converts the frame to straight RGBA8 for encoding.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let Some(format) = self.format else {
            return Vec::new();
        };
        let bpp = format.bytes_per_pixel();
        let mut out = Vec::with_capacity(self.pixels.len() / bpp * 4);
        for px in self.pixels.chunks_exact(bpp) {
            let (r, g, b) = match format {
                PixelFormat::Xrgb8888 => {
                    let pixel = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
                    (
                        ((pixel >> 16) & 0xFF) as u8,
                        ((pixel >> 8) & 0xFF) as u8,
                        (pixel & 0xFF) as u8,
                    )
                }
                PixelFormat::Rgb565 => {
                    let pixel = u16::from_le_bytes([px[0], px[1]]);
                    let r = ((pixel >> 11) & 0x1F) as u8;
                    let g = ((pixel >> 5) & 0x3F) as u8;
                    let b = (pixel & 0x1F) as u8;
                    ((r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2))
                }
            };
            out.extend_from_slice(&[r, g, b, 0xFF]);
        }
        out
    }
}

/// Cloneable in-memory texture: one clone goes to the sink, another is read by the host.
#[derive(Debug, Clone, Default)]
pub struct CpuTexture {
    inner: Arc<Mutex<CpuFrame>>,
}

impl CpuTexture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the last uploaded frame, `None` before the first upload.
    pub fn snapshot(&self) -> Option<CpuFrame> {
        let frame = self.inner.lock();
        (!frame.pixels.is_empty()).then(|| frame.clone())
    }
}

impl TextureUploader for CpuTexture {
    fn recreate(&mut self, width: u32, height: u32, format: PixelFormat) {
        let mut frame = self.inner.lock();
        frame.width = width;
        frame.height = height;
        frame.format = Some(format);
        frame.pixels.clear();
    }

    fn upload(&mut self, data: &[u8]) {
        let mut frame = self.inner.lock();
        frame.pixels.clear();
        frame.pixels.extend_from_slice(data);
    }
}

/// What happened to a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Pitch matched the packed row size.
    Uploaded,
    /// Rows were repacked through the staging buffer.
    Staged,
    /// Null data: the core asked to repeat the previous frame.
    Duplicate,
    /// Pitch too small or dimensions empty.
    Rejected,
}

/// A borrowed framebuffer with a resolved pixel format.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub width: u32,
    pub height: u32,
    pub pitch: usize,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

pub struct VideoSink {
    uploader: Box<dyn TextureUploader>,
    fallback_format: PixelFormat,
    format: Option<PixelFormat>,
    texture: Option<(u32, u32, PixelFormat)>,
    staging: Vec<u8>,
    needs_redraw: Arc<AtomicBool>,
    frames: AtomicU64,
}

impl VideoSink {
    /// `fallback_format` is used when the core never negotiates a format and
    /// the first frame's pitch is inconclusive.
    pub fn new(uploader: Box<dyn TextureUploader>, fallback_format: PixelFormat) -> Self {
        Self {
            uploader,
            fallback_format,
            format: None,
            texture: None,
            staging: Vec::new(),
            needs_redraw: Arc::new(AtomicBool::new(false)),
            frames: AtomicU64::new(0),
        }
    }

    /// Records the format negotiated through `SET_PIXEL_FORMAT` and forces a
    /// texture rebuild on the next frame.
    pub fn set_pixel_format(&mut self, format: PixelFormat) {
        self.format = Some(format);
        self.texture = None;
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.format
    }

    /// Flag set after every upload; presentation clears it when it redraws.
    pub fn redraw_flag(&self) -> Arc<AtomicBool> {
        self.needs_redraw.clone()
    }

    pub fn frames_uploaded(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Latches a format for a core that never called `SET_PIXEL_FORMAT`.
    fn resolve_format(&mut self, width: u32, pitch: usize) -> PixelFormat {
        if let Some(format) = self.format {
            return format;
        }
        let inferred = match pitch / width.max(1) as usize {
            2 => PixelFormat::Rgb565,
            bpp if bpp >= 4 => PixelFormat::Xrgb8888,
            _ => self.fallback_format,
        };
        tracing::debug!("pixel format inferred from pitch {}: {:?}", pitch, inferred);
        self.format = Some(inferred);
        inferred
    }

    /// Accepts a frame straight from the video-refresh callback.
    ///
    /// # Safety
    ///
    /// When non-null, `data` must be readable for `pitch * (height - 1) +
    /// width * bpp` bytes for the duration of the call.
    pub unsafe fn submit_raw(
        &mut self,
        data: *const c_void,
        width: u32,
        height: u32,
        pitch: usize,
    ) -> FrameOutcome {
        if data.is_null() {
            tracing::trace!("video_refresh: duplicate frame");
            return FrameOutcome::Duplicate;
        }
        if width == 0 || height == 0 {
            return FrameOutcome::Rejected;
        }

        let format = self.resolve_format(width, pitch);
        let expected = width as usize * format.bytes_per_pixel();
        if pitch < expected {
            tracing::warn!(
                "video_refresh: pitch {} smaller than row size {} ({}x{} {:?}), frame dropped",
                pitch,
                expected,
                width,
                height,
                format
            );
            return FrameOutcome::Rejected;
        }

        let len = pitch * (height as usize - 1) + expected;
        // SAFETY: caller guarantees `data` covers `len` bytes for this call.
        let data = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), len) };
        self.update_texture(Frame {
            width,
            height,
            pitch,
            format,
            data,
        })
    }

    /// Uploads one frame, repacking rows when `pitch` carries padding.
    pub fn update_texture(&mut self, frame: Frame<'_>) -> FrameOutcome {
        let Frame {
            width,
            height,
            pitch,
            format,
            data,
        } = frame;
        if width == 0 || height == 0 {
            return FrameOutcome::Rejected;
        }
        let expected = width as usize * format.bytes_per_pixel();
        let rows = height as usize;
        if pitch < expected || data.len() < pitch * (rows - 1) + expected {
            tracing::warn!(
                "video frame rejected: pitch {} row size {} buffer {} bytes",
                pitch,
                expected,
                data.len()
            );
            return FrameOutcome::Rejected;
        }

        if self.texture != Some((width, height, format)) {
            tracing::debug!("recreating texture {}x{} {:?}", width, height, format);
            self.uploader.recreate(width, height, format);
            self.texture = Some((width, height, format));
        }

        let outcome = if pitch == expected {
            self.uploader.upload(&data[..expected * rows]);
            FrameOutcome::Uploaded
        } else {
            self.staging.clear();
            self.staging.reserve(expected * rows);
            for row in data.chunks(pitch).take(rows) {
                self.staging.extend_from_slice(&row[..expected]);
            }
            self.uploader.upload(&self.staging);
            FrameOutcome::Staged
        };

        self.frames.fetch_add(1, Ordering::Relaxed);
        self.needs_redraw.store(true, Ordering::Release);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone)]
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        last: Arc<Mutex<Vec<u8>>>,
    }

    impl TextureUploader for Recorder {
        fn recreate(&mut self, width: u32, height: u32, format: PixelFormat) {
            self.log.lock().push(format!("recreate {width}x{height} {format:?}"));
        }

        fn upload(&mut self, data: &[u8]) {
            self.log.lock().push(format!("upload {}", data.len()));
            *self.last.lock() = data.to_vec();
        }
    }

    fn sink_with(recorder: &Recorder) -> VideoSink {
        VideoSink::new(Box::new(recorder.clone()), PixelFormat::Rgb565)
    }

    #[test]
    fn padded_rows_are_repacked() {
        let rec = Recorder::default();
        let mut sink = sink_with(&rec);
        sink.set_pixel_format(PixelFormat::Rgb565);

        // 2x2 RGB565 with 2 bytes of padding per row.
        let data = [1u8, 2, 3, 4, 0xEE, 0xEE, 5, 6, 7, 8, 0xEE, 0xEE];
        let outcome = sink.update_texture(Frame {
            width: 2,
            height: 2,
            pitch: 6,
            format: PixelFormat::Rgb565,
            data: &data,
        });

        assert_eq!(outcome, FrameOutcome::Staged);
        assert_eq!(*rec.last.lock(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(sink.redraw_flag().load(Ordering::Acquire));
    }

    #[test]
    fn tight_pitch_uploads_directly() {
        let rec = Recorder::default();
        let mut sink = sink_with(&rec);
        let data = [9u8; 16];
        let outcome = sink.update_texture(Frame {
            width: 2,
            height: 2,
            pitch: 8,
            format: PixelFormat::Xrgb8888,
            data: &data,
        });
        assert_eq!(outcome, FrameOutcome::Uploaded);
        assert_eq!(rec.last.lock().len(), 16);
    }

    #[test]
    fn short_pitch_is_rejected_without_upload() {
        let rec = Recorder::default();
        let mut sink = sink_with(&rec);
        let data = [0u8; 12];
        let outcome = sink.update_texture(Frame {
            width: 2,
            height: 2,
            pitch: 6,
            format: PixelFormat::Xrgb8888,
            data: &data,
        });
        assert_eq!(outcome, FrameOutcome::Rejected);
        assert!(rec.log.lock().is_empty());
        assert_eq!(sink.frames_uploaded(), 0);
    }

    #[test]
    fn texture_recreated_only_on_change() {
        let rec = Recorder::default();
        let mut sink = sink_with(&rec);
        let data = [0u8; 32];
        let frame = |w: u32| Frame {
            width: w,
            height: 2,
            pitch: w as usize * 2,
            format: PixelFormat::Rgb565,
            data: &data,
        };
        sink.update_texture(frame(2));
        sink.update_texture(frame(2));
        sink.update_texture(frame(4));

        let log = rec.log.lock();
        let recreates = log.iter().filter(|l| l.starts_with("recreate")).count();
        assert_eq!(recreates, 2);
    }

    #[test]
    fn null_frame_is_a_duplicate() {
        let rec = Recorder::default();
        let mut sink = sink_with(&rec);
        let outcome = unsafe { sink.submit_raw(std::ptr::null(), 256, 224, 512) };
        assert_eq!(outcome, FrameOutcome::Duplicate);
        assert!(rec.log.lock().is_empty());
    }

    #[test]
    fn unnegotiated_format_is_inferred_then_latched() {
        let rec = Recorder::default();
        let mut sink = sink_with(&rec);
        let data = [0u8; 64];

        let outcome = unsafe { sink.submit_raw(data.as_ptr().cast(), 4, 2, 16) };
        assert_eq!(outcome, FrameOutcome::Uploaded);
        assert_eq!(sink.pixel_format(), Some(PixelFormat::Xrgb8888));

        // Same format is kept even though this pitch alone would suggest RGB565.
        let outcome = unsafe { sink.submit_raw(data.as_ptr().cast(), 4, 2, 8) };
        assert_eq!(outcome, FrameOutcome::Rejected);
        assert_eq!(sink.pixel_format(), Some(PixelFormat::Xrgb8888));
    }

    #[test]
    fn rgba_conversion_expands_channels() {
        let frame = CpuFrame {
            width: 2,
            height: 1,
            format: Some(PixelFormat::Rgb565),
            pixels: vec![0x00, 0xF8, 0x1F, 0x00],
        };
        assert_eq!(frame.to_rgba8(), vec![255, 0, 0, 255, 0, 0, 255, 255]);

        let frame = CpuFrame {
            width: 1,
            height: 1,
            format: Some(PixelFormat::Xrgb8888),
            pixels: vec![0x30, 0x20, 0x10, 0x00],
        };
        assert_eq!(frame.to_rgba8(), vec![0x10, 0x20, 0x30, 255]);
    }

    #[test]
    fn cpu_texture_keeps_last_frame() {
        let texture = CpuTexture::new();
        let mut sink = VideoSink::new(Box::new(texture.clone()), PixelFormat::Rgb565);
        assert!(texture.snapshot().is_none());

        let data = [7u8; 8];
        sink.update_texture(Frame {
            width: 2,
            height: 2,
            pitch: 4,
            format: PixelFormat::Rgb565,
            data: &data,
        });
        let frame = texture.snapshot().expect("frame uploaded");
        assert_eq!((frame.width, frame.height), (2, 2));
        assert_eq!(frame.pixels, data.to_vec());
    }
}
