use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{ClothSegError, Result};

pub const OUTPUT_PREFIX: &str = "output_";
pub const OUTPUT_EXTENSION: &str = "jpg";

/// Writes segmentation results into a single output directory.
///
/// Files are named `output_<uuid>.jpg` and opened with create-new semantics, so a
/// stored result is never overwritten. Nothing here deletes files; retention is left
/// to whoever owns the directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    output_dir: PathBuf,
}

impl ResultStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn generate_filename() -> String {
        format!("{OUTPUT_PREFIX}{}.{OUTPUT_EXTENSION}", Uuid::new_v4())
    }

    /// Encode `image` as JPEG (encoder default quality) under a fresh name and
    /// return the path written.
    pub fn store(&self, image: &DynamicImage) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).map_err(|e| {
            ClothSegError::storage(&self.output_dir, "output directory creation", e)
        })?;

        let path = self.output_dir.join(Self::generate_filename());
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| ClothSegError::storage(&path, "output file creation", e))?;

        if let Err(err) = write_jpeg(file, image) {
            // drop the partial file, the name is never handed out
            let _ = fs::remove_file(&path);
            return Err(ClothSegError::storage(&path, "jpeg encoding", err));
        }

        debug!(path = %path.display(), "stored segmentation output");
        Ok(path)
    }
}

fn write_jpeg(file: fs::File, image: &DynamicImage) -> std::io::Result<()> {
    let mut writer = BufWriter::new(file);
    image
        .write_with_encoder(JpegEncoder::new(&mut writer))
        .map_err(std::io::Error::other)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use image::{Rgb, RgbImage};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn is_output_filename(name: &str) -> bool {
        name.strip_prefix(OUTPUT_PREFIX)
            .and_then(|rest| rest.strip_suffix(OUTPUT_EXTENSION))
            .and_then(|rest| rest.strip_suffix('.'))
            .is_some_and(|id| Uuid::parse_str(id).is_ok())
    }

    #[test]
    fn creates_directory_and_writes_jpeg() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = ResultStore::new(temp_dir.path().join("nested").join("output"));
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(12, 7, Rgb([0, 128, 0])));

        let path = store.store(&image)?;

        assert!(path.exists());
        assert_eq!(path.parent(), Some(store.output_dir()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(is_output_filename(name), "{name}");

        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (12, 7));
        Ok(())
    }

    #[test]
    fn existing_directory_is_fine() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = ResultStore::new(temp_dir.path());
        let image = DynamicImage::new_luma8(4, 4);

        let first = store.store(&image)?;
        let second = store.store(&image)?;
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
        Ok(())
    }

    #[test]
    fn generated_names_are_unique() {
        let names: HashSet<_> = (0..1000).map(|_| ResultStore::generate_filename()).collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn filename_pattern() {
        assert!(is_output_filename(&ResultStore::generate_filename()));
        assert!(is_output_filename(
            "output_67e55044-10b1-426f-9247-bb680e5fe0c8.jpg"
        ));
        assert!(!is_output_filename("output_not-a-uuid.jpg"));
        assert!(!is_output_filename(
            "result_67e55044-10b1-426f-9247-bb680e5fe0c8.jpg"
        ));
        assert!(!is_output_filename(
            "output_67e55044-10b1-426f-9247-bb680e5fe0c8.png"
        ));
    }

    #[test]
    fn directory_blocked_by_a_file_is_a_storage_failure() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        let store = ResultStore::new(blocker.join("output"));
        let err = store.store(&DynamicImage::new_rgb8(2, 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
    }

    #[test]
    fn unencodable_image_leaves_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = ResultStore::new(temp_dir.path());

        // JPEG has no alpha channel
        let err = store.store(&DynamicImage::new_rgba8(2, 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
