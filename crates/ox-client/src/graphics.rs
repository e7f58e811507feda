//! Graphics APIs are external collaborators. A backend must do exactly
//! three things: recognize its binding in session creation, allocate the
//! images behind a swapchain, and read pixels back out of an image so the
//! client can place them in the frame plane.
//!
//! The built-in [`CpuBackend`] keeps images in plain memory; it serves
//! headless applications and the test suite. GPU-backed implementations
//! plug in through the same trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{XrError, XrResult};

/// Opaque image identifier handed back from image enumeration.
pub type ImageId = u64;

/// What the application passed at session creation to select a graphics
/// API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionGraphicsBinding {
    /// Render on the CPU into plain buffers.
    Cpu,
}

pub trait GraphicsBackend: Send {
    /// Whether this backend owns the given binding.
    fn matches(&self, binding: &SessionGraphicsBinding) -> bool;

    /// Swapchain formats this backend can serve, preferred first.
    fn supported_formats(&self) -> Vec<i64>;

    /// Allocate the backing images for one swapchain.
    fn create_images(
        &mut self,
        width: u32,
        height: u32,
        format: i64,
        count: usize,
    ) -> XrResult<Vec<ImageId>>;

    /// Read an image's pixel bytes into `out` (RGBA8, row-major).
    fn read_pixels(&mut self, image: ImageId, out: &mut Vec<u8>) -> XrResult<()>;

    fn destroy_images(&mut self, images: &[ImageId]);
}

/// RGBA8 in host memory.
const CPU_FORMAT_RGBA8: i64 = 1;

struct CpuImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

#[derive(Default)]
struct CpuState {
    next_id: ImageId,
    images: HashMap<ImageId, CpuImage>,
}

/// CPU-memory backend. Clones share the same image store, so the
/// application side can keep one handle for writing pixels while the
/// runtime owns another for readback.
#[derive(Clone, Default)]
pub struct CpuBackend {
    state: Arc<Mutex<CpuState>>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Application side: write rendered pixels into an image.
    pub fn write_pixels(&self, image: ImageId, pixels: &[u8]) -> XrResult<()> {
        let mut state = self.state.lock().expect("cpu backend poisoned");
        let image = state.images.get_mut(&image).ok_or(XrError::HandleInvalid)?;
        if pixels.len() != image.pixels.len() {
            return Err(XrError::Validation);
        }
        image.pixels.copy_from_slice(pixels);
        Ok(())
    }

    pub fn image_size(&self, image: ImageId) -> Option<(u32, u32)> {
        let state = self.state.lock().expect("cpu backend poisoned");
        state.images.get(&image).map(|i| (i.width, i.height))
    }
}

impl GraphicsBackend for CpuBackend {
    fn matches(&self, binding: &SessionGraphicsBinding) -> bool {
        matches!(binding, SessionGraphicsBinding::Cpu)
    }

    fn supported_formats(&self) -> Vec<i64> {
        vec![CPU_FORMAT_RGBA8]
    }

    fn create_images(
        &mut self,
        width: u32,
        height: u32,
        _format: i64,
        count: usize,
    ) -> XrResult<Vec<ImageId>> {
        if width == 0 || height == 0 || count == 0 {
            return Err(XrError::Validation);
        }
        let mut state = self.state.lock().expect("cpu backend poisoned");
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            state.next_id += 1;
            let id = state.next_id;
            state.images.insert(
                id,
                CpuImage {
                    width,
                    height,
                    pixels: vec![0; (width * height * 4) as usize],
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    fn read_pixels(&mut self, image: ImageId, out: &mut Vec<u8>) -> XrResult<()> {
        let state = self.state.lock().expect("cpu backend poisoned");
        let image = state.images.get(&image).ok_or(XrError::HandleInvalid)?;
        out.clear();
        out.extend_from_slice(&image.pixels);
        Ok(())
    }

    fn destroy_images(&mut self, images: &[ImageId]) {
        let mut state = self.state.lock().expect("cpu backend poisoned");
        for id in images {
            state.images.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_backend_round_trips_pixels() {
        let mut backend = CpuBackend::new();
        let images = backend.create_images(2, 2, CPU_FORMAT_RGBA8, 3).unwrap();
        assert_eq!(images.len(), 3);

        let pixels = vec![9u8; 16];
        backend.write_pixels(images[1], &pixels).unwrap();

        let mut out = Vec::new();
        backend.read_pixels(images[1], &mut out).unwrap();
        assert_eq!(out, pixels);

        // other images untouched
        backend.read_pixels(images[0], &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn clones_share_the_image_store() {
        let mut backend = CpuBackend::new();
        let app_side = backend.clone();
        let images = backend.create_images(1, 1, CPU_FORMAT_RGBA8, 1).unwrap();

        app_side.write_pixels(images[0], &[1, 2, 3, 4]).unwrap();
        let mut out = Vec::new();
        backend.read_pixels(images[0], &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn wrong_sized_write_is_validation() {
        let mut backend = CpuBackend::new();
        let images = backend.create_images(2, 2, CPU_FORMAT_RGBA8, 1).unwrap();
        assert_eq!(
            backend.write_pixels(images[0], &[0; 3]),
            Err(XrError::Validation)
        );
    }

    #[test]
    fn destroyed_images_are_gone() {
        let mut backend = CpuBackend::new();
        let images = backend.create_images(1, 1, CPU_FORMAT_RGBA8, 2).unwrap();
        backend.destroy_images(&images);
        let mut out = Vec::new();
        assert_eq!(
            backend.read_pixels(images[0], &mut out),
            Err(XrError::HandleInvalid)
        );
    }
}
