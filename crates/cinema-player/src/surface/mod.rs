//! Where decoded pictures end up: a texture the display widgets can sample.

pub mod gpu;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{PlayerError, Result};

/// A presentable RGBA8 texture. Dropping it releases it.
pub trait VideoTexture {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Replace the texture contents with tightly packed RGBA rows.
    fn upload(&mut self, rgba: &[u8]) -> Result<()>;
}

/// Factory for presentable textures.
pub trait VideoSurface {
    type Texture: VideoTexture;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<Self::Texture>;
}

fn expected_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// In-memory surface for headless playback and tests.
#[derive(Debug, Default)]
pub struct CpuSurface {
    created: u64,
    live: Arc<AtomicUsize>,
}

impl CpuSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Textures created over the surface's lifetime.
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Textures currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

impl VideoSurface for CpuSurface {
    type Texture = CpuTexture;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<CpuTexture> {
        self.created += 1;
        self.live.fetch_add(1, Ordering::Relaxed);
        Ok(CpuTexture {
            width,
            height,
            pixels: vec![0; expected_len(width, height)],
            uploads: 0,
            live: Arc::clone(&self.live),
        })
    }
}

#[derive(Debug)]
pub struct CpuTexture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    uploads: u64,
    live: Arc<AtomicUsize>,
}

impl CpuTexture {
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }
}

impl VideoTexture for CpuTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn upload(&mut self, rgba: &[u8]) -> Result<()> {
        if rgba.len() != self.pixels.len() {
            return Err(PlayerError::Upload(format!(
                "expected {} bytes for {}x{}, got {}",
                self.pixels.len(),
                self.width,
                self.height,
                rgba.len()
            )));
        }
        self.pixels.copy_from_slice(rgba);
        self.uploads += 1;
        Ok(())
    }
}

impl Drop for CpuTexture {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_surface_tracks_live_textures() {
        let mut s = CpuSurface::new();
        let a = s.create_texture(2, 2).unwrap();
        let b = s.create_texture(4, 4).unwrap();
        assert_eq!(s.live(), 2);
        drop(a);
        assert_eq!(s.live(), 1);
        drop(b);
        assert_eq!(s.live(), 0);
        assert_eq!(s.created(), 2);
    }

    #[test]
    fn cpu_upload_checks_size() {
        let mut s = CpuSurface::new();
        let mut t = s.create_texture(2, 1).unwrap();
        assert!(t.upload(&[1; 4]).is_err());
        t.upload(&[9; 8]).unwrap();
        assert_eq!(t.pixels(), &[9; 8]);
        assert_eq!(t.uploads(), 1);
    }
}
