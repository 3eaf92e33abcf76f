//! Frame sources feeding the recognition loop.

use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode frame {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub trait FrameSource: Send {
    /// Next frame, or `None` if no frame is available yet.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, FrameError>;

    fn describe(&self) -> String;
}

/// Replays the images of a directory in file-name order, looping forever.
///
/// The directory is rescanned at the start of every pass and whenever a
/// listed file has disappeared, so frames added or removed after startup
/// are picked up.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, FrameError> {
        let dir = dir.as_ref().to_path_buf();
        let files = scan(&dir)?;
        tracing::info!(dir = %dir.display(), frames = files.len(), "frame directory opened");
        Ok(Self { dir, files, next: 0 })
    }

    fn rescan(&mut self) -> Result<(), FrameError> {
        self.files = scan(&self.dir)?;
        self.next = 0;
        Ok(())
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, FrameError> {
        if self.next == 0 {
            self.rescan()?;
        }
        if self.files.is_empty() {
            return Ok(None);
        }

        let path = self.files[self.next].clone();
        self.next = (self.next + 1) % self.files.len();

        match image::open(&path) {
            Ok(frame) => {
                tracing::trace!(path = %path.display(), "frame read");
                Ok(Some(frame.to_rgb8()))
            }
            Err(image::ImageError::IoError(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "frame vanished; rescanning");
                self.rescan()?;
                Ok(None)
            }
            Err(source) => Err(FrameError::Decode { path, source }),
        }
    }

    fn describe(&self) -> String {
        format!("{} ({} frames)", self.dir.display(), self.files.len())
    }
}

fn scan(dir: &Path) -> Result<Vec<PathBuf>, FrameError> {
    let io_err = |source| FrameError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_frame = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_frame && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_frame(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(4, 4, image::Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_replays_in_name_order_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "b.png", 20);
        write_frame(dir.path(), "a.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = DirectorySource::open(dir.path()).unwrap();
        let shades: Vec<u8> = (0..3)
            .map(|_| source.next_frame().unwrap().unwrap().get_pixel(0, 0)[0])
            .collect();
        assert_eq!(shades, vec![10, 20, 10]);
    }

    #[test]
    fn test_empty_directory_yields_none_until_populated() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert!(source.next_frame().unwrap().is_none());

        write_frame(dir.path(), "late.bmp", 7);
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.dimensions(), (4, 4));
    }

    #[test]
    fn test_missing_directory_is_error() {
        let err = DirectorySource::open("/nonexistent/doorman/frames").err().unwrap();
        assert!(matches!(err, FrameError::Io { .. }));
    }

    #[test]
    fn test_undecodable_frame_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"not a jpeg").unwrap();
        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert!(matches!(source.next_frame(), Err(FrameError::Decode { .. })));
    }

    #[test]
    fn test_deleted_frame_is_skipped_and_new_frames_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "a.png", 10);
        write_frame(dir.path(), "b.png", 20);

        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert_eq!(source.next_frame().unwrap().unwrap().get_pixel(0, 0)[0], 10);

        std::fs::remove_file(dir.path().join("b.png")).unwrap();
        write_frame(dir.path(), "c.png", 30);
        assert!(source.next_frame().unwrap().is_none());

        let shades: Vec<u8> = (0..4)
            .map(|_| source.next_frame().unwrap().unwrap().get_pixel(0, 0)[0])
            .collect();
        assert_eq!(shades, vec![10, 30, 10, 30]);
    }

    #[test]
    fn test_new_frame_joins_next_pass() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "a.png", 10);
        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert_eq!(source.next_frame().unwrap().unwrap().get_pixel(0, 0)[0], 10);

        write_frame(dir.path(), "b.png", 20);
        let shades: Vec<u8> = (0..2)
            .map(|_| source.next_frame().unwrap().unwrap().get_pixel(0, 0)[0])
            .collect();
        assert_eq!(shades, vec![10, 20]);
    }
}
