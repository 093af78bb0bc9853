//! Frame sources for the reader task
//!
//! A source yields decoded RGB frames in stream order. Video decoding proper
//! stays outside this crate; `ImageSequenceSource` reads a directory of stills
//! so the pipeline can run end-to-end from extracted frames.

use crate::error::{Result, TrackingError};
use image::{imageops, RgbImage};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tiff"];

/// Sequential frame source
pub trait FrameSource: Send {
    /// Next frame, `Ok(None)` at end of stream
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Human readable description for logs
    fn describe(&self) -> String {
        "frame source".to_string()
    }
}

/// Directory of still images, played back in file name order
pub struct ImageSequenceSource {
    dir: PathBuf,
    paths: VecDeque<PathBuf>,
}

impl ImageSequenceSource {
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(TrackingError::frame_source(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        paths.sort();

        log::info!("Image sequence: {} frames in {}", paths.len(), dir.display());
        Ok(Self {
            dir,
            paths: paths.into(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path)?;
        Ok(Some(image.to_rgb8()))
    }

    fn describe(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }
}

/// Frames held in memory, used by tests and benchmarks
pub struct MemoryFrameSource {
    frames: VecDeque<RgbImage>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    /// `count` blank frames of the given size
    pub fn blank(count: usize, width: u32, height: u32) -> Self {
        Self::new(vec![RgbImage::new(width, height); count])
    }
}

impl FrameSource for MemoryFrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.pop_front())
    }

    fn describe(&self) -> String {
        format!("{} in-memory frames", self.frames.len())
    }
}

/// Resize to the display resolution; frames already at size are returned as-is
pub fn resize_frame(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image;
    }
    imageops::resize(&image, width, height, imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_frame() {
        let image = RgbImage::new(64, 48);
        let resized = resize_frame(image, 32, 16);
        assert_eq!(resized.dimensions(), (32, 16));

        let same = resize_frame(RgbImage::new(10, 10), 10, 10);
        assert_eq!(same.dimensions(), (10, 10));
    }

    #[test]
    fn test_memory_source_ends() {
        let mut source = MemoryFrameSource::blank(2, 4, 4);
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_image_sequence_sorted() {
        let dir = std::env::temp_dir().join(format!("mtt_seq_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        RgbImage::from_pixel(2, 2, image::Rgb([10, 0, 0]))
            .save(dir.join("frame_002.png"))
            .unwrap();
        RgbImage::from_pixel(2, 2, image::Rgb([20, 0, 0]))
            .save(dir.join("frame_001.png"))
            .unwrap();
        std::fs::write(dir.join("notes.txt"), "skip me").unwrap();

        let mut source = ImageSequenceSource::from_dir(&dir).unwrap();
        assert_eq!(source.remaining(), 2);
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.get_pixel(0, 0)[0], 20);
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.get_pixel(0, 0)[0], 10);
        assert!(source.next_frame().unwrap().is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_dir_is_error() {
        let dir = std::env::temp_dir().join(format!("mtt_empty_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        assert!(matches!(
            ImageSequenceSource::from_dir(&dir),
            Err(TrackingError::SourceError(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
