use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::frame_buffer::{BYTES_PER_PIXEL, FrameBuffer};

/// FourCC the decoder is asked to produce. Nothing else is negotiated.
pub const CHROMA_RGBA: [u8; 4] = *b"RGBA";

/// Geometry of the pictures the decoder is currently producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub width: u32,
    pub height: u32,
    /// Bytes per source row.
    pub pitch: u32,
    pub lines: u32,
}

impl FormatDescriptor {
    /// Packed RGBA layout for the given size (`pitch = width * 4`, `lines = height`).
    pub fn rgba(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pitch: width.saturating_mul(BYTES_PER_PIXEL as u32),
            lines: height,
        }
    }

    /// Bytes needed to hold one picture.
    pub fn buffer_size(&self) -> usize {
        self.pitch as usize * self.lines as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Answer to the decoder's format query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub chroma: [u8; 4],
    pub pitch: u32,
    pub lines: u32,
}

/// The published descriptor together with the frame buffer generation that
/// was allocated for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveFormat {
    pub descriptor: FormatDescriptor,
    /// 0 when no buffer was allocated (empty geometry); never matches a slab.
    pub generation: u64,
}

/// Handles the decoder's "what format do you want" callback and keeps the
/// frame buffer sized to match.
pub struct FormatNegotiator {
    buffer: Arc<FrameBuffer>,
    active: Mutex<Option<ActiveFormat>>,
}

impl FormatNegotiator {
    pub fn new(buffer: Arc<FrameBuffer>) -> Self {
        Self {
            buffer,
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveFormat>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fix the output to RGBA at the requested size, resize the frame buffer,
    /// and publish the new descriptor. Runs on the decoder thread.
    pub fn negotiate(&self, width: u32, height: u32) -> NegotiatedFormat {
        let descriptor = FormatDescriptor::rgba(width, height);
        // Zero sizes are rejected by the buffer itself.
        let generation = self.buffer.allocate(descriptor.buffer_size()).unwrap_or(0);
        *self.active() = Some(ActiveFormat {
            descriptor,
            generation,
        });

        log::debug!(
            "Video format negotiated: {width}x{height}, pitch {}, {} lines",
            descriptor.pitch,
            descriptor.lines
        );

        NegotiatedFormat {
            chroma: CHROMA_RGBA,
            pitch: descriptor.pitch,
            lines: descriptor.lines,
        }
    }

    /// Snapshot of the active descriptor; `None` until the first negotiation.
    pub fn descriptor(&self) -> Option<FormatDescriptor> {
        self.active().map(|a| a.descriptor)
    }

    /// Descriptor and buffer generation, read together.
    pub fn active_format(&self) -> Option<ActiveFormat> {
        *self.active()
    }

    pub fn is_initialized(&self) -> bool {
        self.active().is_some()
    }

    pub fn reset(&self) {
        *self.active() = None;
    }
}
