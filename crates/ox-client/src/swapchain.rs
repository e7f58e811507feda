//! Client-side swapchain state.
//!
//! Image enumeration is lazy: the first call allocates a fixed-count image
//! set through the graphics backend. Acquire and release move a real ring
//! cursor so the image whose pixels are read back at frame end is the one
//! the application actually rendered into.

use std::collections::VecDeque;

use crate::graphics::ImageId;
use crate::{XrError, XrResult};

/// Fixed image count per swapchain.
pub const SWAPCHAIN_IMAGE_COUNT: usize = 3;

pub struct Swapchain {
    pub width: u32,
    pub height: u32,
    pub format: i64,
    images: Vec<ImageId>,
    next_acquire: usize,
    acquired: VecDeque<usize>,
    last_released: Option<usize>,
}

impl Swapchain {
    pub fn new(width: u32, height: u32, format: i64) -> Self {
        Self {
            width,
            height,
            format,
            images: Vec::new(),
            next_acquire: 0,
            acquired: VecDeque::new(),
            last_released: None,
        }
    }

    pub fn images(&self) -> &[ImageId] {
        &self.images
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    pub fn set_images(&mut self, images: Vec<ImageId>) {
        debug_assert_eq!(images.len(), SWAPCHAIN_IMAGE_COUNT);
        self.images = images;
    }

    /// Next image index in ring order. All images may be acquired at once;
    /// acquiring beyond that is a caller error.
    pub fn acquire(&mut self) -> XrResult<usize> {
        if self.acquired.len() >= SWAPCHAIN_IMAGE_COUNT {
            return Err(XrError::Validation);
        }
        let index = self.next_acquire;
        self.next_acquire = (self.next_acquire + 1) % SWAPCHAIN_IMAGE_COUNT;
        self.acquired.push_back(index);
        Ok(index)
    }

    /// Release the oldest acquired image; it becomes the submission
    /// candidate for the next frame end.
    pub fn release(&mut self) -> XrResult<usize> {
        let index = self.acquired.pop_front().ok_or(XrError::Validation)?;
        self.last_released = Some(index);
        Ok(index)
    }

    /// The image the application most recently finished rendering.
    pub fn last_released_image(&self) -> Option<ImageId> {
        let index = self.last_released?;
        self.images.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_walks_the_ring() {
        let mut swapchain = Swapchain::new(64, 64, 1);
        swapchain.set_images(vec![10, 11, 12]);

        for expected in [0usize, 1, 2, 0, 1] {
            let index = swapchain.acquire().unwrap();
            assert_eq!(index, expected);
            assert_eq!(swapchain.release().unwrap(), expected);
        }
        assert_eq!(swapchain.last_released_image(), Some(11));
    }

    #[test]
    fn release_without_acquire_fails() {
        let mut swapchain = Swapchain::new(64, 64, 1);
        swapchain.set_images(vec![1, 2, 3]);
        assert_eq!(swapchain.release(), Err(XrError::Validation));
    }

    #[test]
    fn acquire_beyond_image_count_fails() {
        let mut swapchain = Swapchain::new(64, 64, 1);
        swapchain.set_images(vec![1, 2, 3]);
        for _ in 0..SWAPCHAIN_IMAGE_COUNT {
            swapchain.acquire().unwrap();
        }
        assert_eq!(swapchain.acquire(), Err(XrError::Validation));
    }

    #[test]
    fn submission_candidate_tracks_the_rendered_image() {
        let mut swapchain = Swapchain::new(64, 64, 1);
        swapchain.set_images(vec![100, 200, 300]);
        assert_eq!(swapchain.last_released_image(), None);

        swapchain.acquire().unwrap();
        swapchain.release().unwrap();
        assert_eq!(swapchain.last_released_image(), Some(100));

        swapchain.acquire().unwrap();
        swapchain.release().unwrap();
        assert_eq!(swapchain.last_released_image(), Some(200));
    }
}
