//! Graphics channel
//!
//! Forwards region updates and resizes from the engine to the session's
//! listener. Pixel memory belongs to the engine for the duration of the call;
//! [`PixelBuffer`] borrows it, so a listener can read it but not keep it.

use std::sync::Arc;

use tracing::trace;

use super::events::EventBridge;
use crate::core::Handle;

/// Rectangle in surface pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Clip to a `width` x `height` surface
    pub fn clip(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Rect {
            x,
            y,
            width: self.right().min(width) - x,
            height: self.bottom().min(height) - y,
        }
    }
}

/// Pixel layout of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb565,
    Rgb888,
    Xrgb8888,
}

impl PixelFormat {
    /// Layout the engine uses for a color depth
    pub fn for_color_depth(bpp: u32) -> Self {
        match bpp {
            0..=16 => PixelFormat::Rgb565,
            24 => PixelFormat::Rgb888,
            _ => PixelFormat::Xrgb8888,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Xrgb8888 => 4,
        }
    }
}

/// Borrowed view of pixel rows
#[derive(Debug, Clone, Copy)]
pub struct PixelBuffer<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
}

impl<'a> PixelBuffer<'a> {
    /// View `data` as `height` rows of `stride` bytes. `None` if the rows do
    /// not fit in `data`.
    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> Option<Self> {
        let row_bytes = width as usize * format.bytes_per_pixel();
        if stride < row_bytes {
            return None;
        }
        let needed = match height {
            0 => 0,
            h => (h as usize - 1) * stride + row_bytes,
        };
        if data.len() < needed {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
            stride,
            format,
        })
    }

    /// Tightly packed buffer
    pub fn packed(data: &'a [u8], width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        Self::new(data, width, height, width as usize * format.bytes_per_pixel(), format)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Pixel bytes of row `y`, without padding
    pub fn row(&self, y: u32) -> Option<&'a [u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        let len = self.width as usize * self.format.bytes_per_pixel();
        self.data.get(start..start + len)
    }

    /// Zero-copy view of `rect`, which must lie inside this buffer
    pub fn view(&self, rect: Rect) -> Option<PixelBuffer<'a>> {
        if rect.right() > self.width || rect.bottom() > self.height {
            return None;
        }
        let offset = rect.y as usize * self.stride + rect.x as usize * self.format.bytes_per_pixel();
        let data = self.data.get(offset..)?;
        PixelBuffer::new(data, rect.width, rect.height, self.stride, self.format)
    }

    /// Copy the rows into a tightly packed `Vec`
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * self.format.bytes_per_pixel());
        for y in 0..self.height {
            if let Some(row) = self.row(y) {
                out.extend_from_slice(row);
            }
        }
        out
    }
}

/// Owned copy of a buffer, used when a dispatch has to outlive the engine call
#[derive(Debug, Clone)]
pub(crate) struct OwnedFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl OwnedFrame {
    pub(crate) fn copy_of(buffer: &PixelBuffer<'_>) -> Self {
        Self {
            data: buffer.to_vec(),
            width: buffer.width(),
            height: buffer.height(),
            format: buffer.format(),
        }
    }

    pub(crate) fn as_buffer(&self) -> Option<PixelBuffer<'_>> {
        PixelBuffer::packed(&self.data, self.width, self.height, self.format)
    }
}

/// Engine-facing entry point for graphics callbacks
#[derive(Clone)]
pub struct GraphicsChannel {
    events: Arc<EventBridge>,
}

impl GraphicsChannel {
    pub fn new(events: Arc<EventBridge>) -> Self {
        Self { events }
    }

    /// Region `rect` of `surface` changed.
    ///
    /// The listener receives a view covering just the (clipped) region.
    pub fn update(&self, handle: Handle, rect: Rect, surface: &PixelBuffer<'_>) {
        let clipped = rect.clip(surface.width(), surface.height());
        if clipped.is_empty() {
            trace!(%handle, ?rect, "empty graphics update skipped");
            return;
        }
        if let Some(region) = surface.view(clipped) {
            self.events.on_graphics_update(handle, clipped, &region);
        }
    }

    /// Display geometry changed
    pub fn resize(&self, handle: Handle, width: u32, height: u32) {
        self.events.on_graphics_resize(handle, width, height);
    }
}
