use super::exchange::FrameExchange;
use super::format::{ActiveFormat, FormatDescriptor};
use super::frame_buffer::BYTES_PER_PIXEL;
use crate::surface::{VideoSurface, VideoTexture};

/// Render-thread half of the pipeline: keeps the presentable texture sized to
/// the negotiated format and moves ready pictures into it.
pub struct PixelBlitter<T> {
    texture: Option<T>,
    /// Tightly packed copy of the picture, reused across frames.
    staging: Vec<u8>,
    frames_presented: u64,
}

impl<T: VideoTexture> Default for PixelBlitter<T> {
    fn default() -> Self {
        Self {
            texture: None,
            staging: Vec::new(),
            frames_presented: 0,
        }
    }
}

impl<T: VideoTexture> PixelBlitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(&self) -> Option<&T> {
        self.texture.as_ref()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Recreate the texture if it is missing or no longer matches `format`.
    /// The old texture is released before the new one is created.
    pub fn sync_texture<S>(&mut self, surface: &mut S, format: Option<FormatDescriptor>)
    where
        S: VideoSurface<Texture = T>,
    {
        let Some(format) = format else {
            return;
        };
        let matches = self
            .texture
            .as_ref()
            .is_some_and(|t| t.width() == format.width && t.height() == format.height);
        if matches {
            return;
        }

        if let Some(old) = self.texture.take() {
            log::debug!(
                "Video size changed {}x{} -> {}x{}, releasing texture",
                old.width(),
                old.height(),
                format.width,
                format.height
            );
            drop(old);
        }

        if format.is_empty() {
            return;
        }

        match surface.create_texture(format.width, format.height) {
            Ok(texture) => {
                log::info!("Video texture created: {}x{}", format.width, format.height);
                self.staging =
                    vec![0; format.width as usize * format.height as usize * BYTES_PER_PIXEL];
                self.texture = Some(texture);
            }
            Err(e) => log::warn!("Failed to create video texture: {e}"),
        }
    }

    /// Drain the exchange and, if a picture is ready, copy it out of the slab
    /// it was written into and upload it. Returns true when a new picture
    /// reached the texture.
    ///
    /// A picture is only presented when its slab belongs to the buffer
    /// generation `active` was negotiated for; anything else was written at a
    /// different geometry and is dropped.
    pub fn present(&mut self, exchange: &FrameExchange, active: Option<ActiveFormat>) -> bool {
        let (Some(texture), Some(active)) = (self.texture.as_mut(), active) else {
            return false;
        };
        let Some(picture) = exchange.take_ready() else {
            return false;
        };
        if picture.generation() != active.generation {
            log::trace!(
                "Dropping picture from buffer generation {}, format is at {}",
                picture.generation(),
                active.generation
            );
            return false;
        }

        let (width, height) = (texture.width(), texture.height());
        let needed = width as usize * height as usize * BYTES_PER_PIXEL;
        if self.staging.len() != needed {
            self.staging.resize(needed, 0);
        }

        let format = active.descriptor;
        let copied = picture.copy_with_pitch(
            &mut self.staging,
            width,
            height,
            format.width,
            format.height,
            format.pitch,
        );
        if !copied {
            log::trace!("No frame this tick: buffer and texture geometry disagree");
            return false;
        }

        match texture.upload(&self.staging) {
            Ok(()) => {
                self.frames_presented += 1;
                true
            }
            Err(e) => {
                log::warn!("Video frame upload failed: {e}");
                false
            }
        }
    }

    /// Release the texture and staging memory.
    pub fn release(&mut self) {
        self.texture = None;
        self.staging = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::player::frame_buffer::FrameBuffer;
    use crate::surface::{CpuSurface, CpuTexture};

    fn write_picture(exchange: &FrameExchange, value: u8) {
        let ptr = exchange.lock().unwrap();
        let len = exchange.buffer().capacity();
        // SAFETY: the lease taken by `lock` keeps `len` bytes alive until display.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), value, len) };
        exchange.display();
    }

    fn setup(width: u32, height: u32) -> (FrameExchange, ActiveFormat) {
        let buffer = Arc::new(FrameBuffer::new());
        let descriptor = FormatDescriptor::rgba(width, height);
        let generation = buffer.allocate(descriptor.buffer_size()).unwrap();
        (
            FrameExchange::new(buffer),
            ActiveFormat {
                descriptor,
                generation,
            },
        )
    }

    #[test]
    fn creates_texture_once_per_geometry() {
        let mut surface = CpuSurface::new();
        let mut blitter = PixelBlitter::<CpuTexture>::new();
        let format = FormatDescriptor::rgba(4, 2);
        blitter.sync_texture(&mut surface, Some(format));
        blitter.sync_texture(&mut surface, Some(format));
        assert_eq!(surface.created(), 1);
        assert_eq!(blitter.texture().map(|t| (t.width(), t.height())), Some((4, 2)));
    }

    #[test]
    fn resize_releases_old_texture_first() {
        let mut surface = CpuSurface::new();
        let mut blitter = PixelBlitter::<CpuTexture>::new();
        blitter.sync_texture(&mut surface, Some(FormatDescriptor::rgba(4, 2)));
        blitter.sync_texture(&mut surface, Some(FormatDescriptor::rgba(8, 4)));
        assert_eq!(surface.created(), 2);
        assert_eq!(surface.live(), 1);
        assert_eq!(blitter.texture().unwrap().width(), 8);
    }

    #[test]
    fn no_texture_without_format_or_with_empty_format() {
        let mut surface = CpuSurface::new();
        let mut blitter = PixelBlitter::<CpuTexture>::new();
        blitter.sync_texture(&mut surface, None);
        blitter.sync_texture(&mut surface, Some(FormatDescriptor::rgba(0, 10)));
        assert!(blitter.texture().is_none());
        assert_eq!(surface.created(), 0);
    }

    #[test]
    fn presents_ready_picture_once() {
        let (exchange, active) = setup(2, 2);
        let mut surface = CpuSurface::new();
        let mut blitter = PixelBlitter::new();
        blitter.sync_texture(&mut surface, Some(active.descriptor));

        write_picture(&exchange, 0x42);
        assert!(blitter.present(&exchange, Some(active)));
        assert!(!blitter.present(&exchange, Some(active)));
        assert_eq!(blitter.frames_presented(), 1);
        let texture = blitter.texture().unwrap();
        assert_eq!(texture.uploads(), 1);
        assert!(texture.pixels().iter().all(|&p| p == 0x42));
    }

    #[test]
    fn ready_flag_kept_until_texture_exists() {
        let (exchange, active) = setup(2, 2);
        let mut blitter = PixelBlitter::<CpuTexture>::new();
        write_picture(&exchange, 1);
        assert!(!blitter.present(&exchange, Some(active)));
        assert!(exchange.is_dirty());
    }

    #[test]
    fn mismatched_buffer_skips_frame() {
        // Texture sized for 4x4 but the buffer only holds a 2x2 picture.
        let (exchange, active) = setup(2, 2);
        let mut surface = CpuSurface::new();
        let mut blitter = PixelBlitter::new();
        let big = ActiveFormat {
            descriptor: FormatDescriptor::rgba(4, 4),
            ..active
        };
        blitter.sync_texture(&mut surface, Some(big.descriptor));
        write_picture(&exchange, 9);
        assert!(!blitter.present(&exchange, Some(big)));
        assert_eq!(blitter.texture().unwrap().uploads(), 0);
        assert!(!exchange.is_dirty());
    }

    #[test]
    fn copies_from_written_slab_after_buffer_swap() {
        let (exchange, active) = setup(2, 2);
        let mut surface = CpuSurface::new();
        let mut blitter = PixelBlitter::new();
        blitter.sync_texture(&mut surface, Some(active.descriptor));

        write_picture(&exchange, 0x7F);
        // The decoder starts renegotiating: a larger, blank slab is swapped in.
        exchange.buffer().allocate(4 * 4 * 4);

        assert!(blitter.present(&exchange, Some(active)));
        assert!(blitter.texture().unwrap().pixels().iter().all(|&p| p == 0x7F));
    }

    #[test]
    fn picture_from_other_generation_is_dropped() {
        let (exchange, stale) = setup(4, 4);
        let mut surface = CpuSurface::new();
        let mut blitter = PixelBlitter::new();
        blitter.sync_texture(&mut surface, Some(stale.descriptor));

        // Format snapshotted, then the decoder renegotiates to the same size
        // and displays into the new slab.
        exchange.buffer().allocate(stale.descriptor.buffer_size());
        write_picture(&exchange, 3);

        assert!(!blitter.present(&exchange, Some(stale)));
        assert_eq!(blitter.texture().unwrap().uploads(), 0);
        assert!(!exchange.is_dirty());
    }

    #[test]
    fn release_drops_texture() {
        let mut surface = CpuSurface::new();
        let mut blitter = PixelBlitter::<CpuTexture>::new();
        blitter.sync_texture(&mut surface, Some(FormatDescriptor::rgba(2, 2)));
        blitter.release();
        assert!(blitter.texture().is_none());
        assert_eq!(surface.live(), 0);
    }
}
