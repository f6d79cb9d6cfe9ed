//! Background image writer for periodic and on-demand snapshots.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use image::{DynamicImage, ImageFormat, Rgb32FImage, RgbImage};
use parking_lot::Mutex;

use crate::backend::{PixelFormat, Pixels, Snapshot};
use crate::settings::SnapshotFormat;
use crate::util::{Error, Result};

impl SnapshotFormat {
    /// Pixel encoding to read back for this file format.
    pub fn pixel_format(self) -> PixelFormat {
        match self {
            Self::Png => PixelFormat::Display,
            Self::Hdr => PixelFormat::Radiance,
        }
    }
}

/// `output_<epoch>.<ext>` inside `dir`.
pub fn snapshot_path(dir: &Path, epoch_secs: u64, format: SnapshotFormat) -> PathBuf {
    dir.join(format!("output_{epoch_secs}.{}", format.extension()))
}

/// Encode and write `snapshot` synchronously.
pub fn write_snapshot(snapshot: Snapshot, path: &Path) -> Result<()> {
    let Snapshot { width, height, pixels } = snapshot;
    let (image, format) = match pixels {
        Pixels::Rgb8(data) => {
            let img = RgbImage::from_raw(width, height, data)
                .ok_or_else(|| Error::other(format!("snapshot buffer does not match {width}x{height}")))?;
            (DynamicImage::ImageRgb8(img), ImageFormat::Png)
        }
        Pixels::RgbF32(data) => {
            let img = Rgb32FImage::from_raw(width, height, data)
                .ok_or_else(|| Error::other(format!("snapshot buffer does not match {width}x{height}")))?;
            (DynamicImage::ImageRgb32F(img), ImageFormat::Hdr)
        }
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    image.save_with_format(path, format)?;
    Ok(())
}

/// Spawns one writer thread per snapshot. Writes are not cancellable.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
    format: SnapshotFormat,
    last_written: Arc<Mutex<Option<PathBuf>>>,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, format: SnapshotFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
            last_written: Arc::new(Mutex::new(None)),
        }
    }

    pub fn format(&self) -> SnapshotFormat {
        self.format
    }

    /// Path of the most recently completed write.
    pub fn last_written(&self) -> Option<PathBuf> {
        self.last_written.lock().clone()
    }

    /// Write `snapshot` on a background thread.
    pub fn spawn(&self, snapshot: Snapshot) -> JoinHandle<Result<PathBuf>> {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let path = snapshot_path(&self.dir, epoch, self.format);
        let last_written = Arc::clone(&self.last_written);

        std::thread::spawn(move || {
            let _span = tracing::info_span!("snapshot_write").entered();
            match write_snapshot(snapshot, &path) {
                Ok(()) => {
                    log::info!("Snapshot written to {}", path.display());
                    *last_written.lock() = Some(path.clone());
                    Ok(path)
                }
                Err(e) => {
                    log::error!("Failed to write snapshot {}: {e}", path.display());
                    Err(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_path() {
        let p = snapshot_path(Path::new("out"), 1700000000, SnapshotFormat::Hdr);
        assert_eq!(p, PathBuf::from("out/output_1700000000.hdr"));
    }

    #[test]
    fn test_png_write() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path(), SnapshotFormat::Png);
        let snap = Snapshot {
            width: 2,
            height: 2,
            pixels: Pixels::Rgb8(vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 9, 9, 9]),
        };
        let path = writer.spawn(snap).join().unwrap().unwrap();
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(writer.last_written(), Some(path.clone()));

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(1, 0).0, [0, 255, 0]);
    }

    #[test]
    fn test_hdr_write() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path(), SnapshotFormat::Hdr);
        let snap = Snapshot {
            width: 3,
            height: 1,
            pixels: Pixels::RgbF32(vec![0.5; 9]),
        };
        let path = writer.spawn(snap).join().unwrap().unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("output_"));
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (3, 1));
    }

    #[test]
    fn test_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let snap = Snapshot {
            width: 4,
            height: 4,
            pixels: Pixels::Rgb8(vec![0; 3]),
        };
        assert!(write_snapshot(snap, &dir.path().join("x.png")).is_err());
        assert_eq!(SnapshotFormat::Hdr.pixel_format(), PixelFormat::Radiance);
    }
}
