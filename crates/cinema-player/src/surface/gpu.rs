use wgpu::{
    Device, DeviceDescriptor, ExperimentalFeatures, Extent3d, Instance, InstanceDescriptor,
    MemoryHints, PowerPreference, Queue, RequestAdapterOptions, Texture, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsages, TextureView, Trace,
};

use super::{VideoSurface, VideoTexture, expected_len};
use crate::error::{PlayerError, Result};

/// Creates sampled RGBA textures on a wgpu device.
pub struct WgpuSurface {
    device: Device,
    queue: Queue,
}

impl WgpuSurface {
    pub fn new(device: Device, queue: Queue) -> Self {
        Self { device, queue }
    }

    /// Bring up a device with no window attached.
    pub fn headless() -> Result<Self> {
        let instance = Instance::new(&InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| PlayerError::Gpu(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&DeviceDescriptor {
            label: Some("cinema-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: ExperimentalFeatures::default(),
            memory_hints: MemoryHints::Performance,
            trace: Trace::Off,
        }))
        .map_err(|e| PlayerError::Gpu(e.to_string()))?;

        log::info!(
            "GPU initialized: {} ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(Self::new(device, queue))
    }
}

impl VideoSurface for WgpuSurface {
    type Texture = WgpuTexture;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<WgpuTexture> {
        if width == 0 || height == 0 {
            return Err(PlayerError::Upload(format!("cannot create {width}x{height} texture")));
        }
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(PlayerError::Upload(format!(
                "{width}x{height} exceeds the device limit of {max}"
            )));
        }

        // sRGB so sampling converts to linear automatically.
        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some("video-frame"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(WgpuTexture {
            texture,
            view,
            queue: self.queue.clone(),
            width,
            height,
        })
    }
}

pub struct WgpuTexture {
    texture: Texture,
    view: TextureView,
    queue: Queue,
    width: u32,
    height: u32,
}

impl WgpuTexture {
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }
}

impl VideoTexture for WgpuTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn upload(&mut self, rgba: &[u8]) -> Result<()> {
        let expected = expected_len(self.width, self.height);
        if rgba.len() != expected {
            return Err(PlayerError::Upload(format!(
                "expected {expected} bytes for {}x{}, got {}",
                self.width,
                self.height,
                rgba.len()
            )));
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }
}

impl Drop for WgpuTexture {
    fn drop(&mut self) {
        self.texture.destroy();
    }
}
