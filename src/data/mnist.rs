use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use ndarray::Array4;
use tracing::info;

use super::Dataset;
use crate::error::{NetworkError, Result};

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    fn file_names(&self) -> (&'static str, &'static str) {
        match self {
            Split::Train => ("train-images-idx3-ubyte", "train-labels-idx1-ubyte"),
            Split::Test => ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte"),
        }
    }
}

/// Loads one MNIST split from the uncompressed IDX files in `dir`.
pub fn load(dir: impl AsRef<Path>, split: Split) -> Result<Dataset> {
    let dir = dir.as_ref();
    let (images_file, labels_file) = split.file_names();

    let images = read_images(BufReader::new(File::open(dir.join(images_file))?))?;
    let labels = read_labels(BufReader::new(File::open(dir.join(labels_file))?))?;
    info!(?split, examples = labels.len(), dir = %dir.display(), "loaded MNIST");

    Dataset::new(images, labels)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_be_bytes(bytes))
}

/// Reads exactly `len` bytes without trusting `len` for the allocation.
fn read_payload<R: Read>(reader: &mut R, len: usize, what: &str) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    reader.take(len as u64).read_to_end(&mut payload)?;
    if payload.len() != len {
        return Err(NetworkError::InvalidData(format!(
            "truncated {what} data: header promises {len} bytes, found {}",
            payload.len()
        )));
    }
    Ok(payload)
}

/// Parses an IDX3 image file into `(n, 1, rows, cols)` raw pixel values.
pub fn read_images<R: Read>(mut reader: R) -> Result<Array4<f32>> {
    let magic = read_u32(&mut reader)?;
    if magic != IMAGES_MAGIC {
        return Err(NetworkError::InvalidData(format!(
            "Invalid MNIST image magic number: 0x{magic:08x}"
        )));
    }

    let num_images = read_u32(&mut reader)? as usize;
    let rows = read_u32(&mut reader)? as usize;
    let cols = read_u32(&mut reader)? as usize;

    let expected = num_images
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| {
            NetworkError::InvalidData(format!("image header {num_images}x{rows}x{cols} overflows"))
        })?;
    let pixels = read_payload(&mut reader, expected, "image")?;

    let data: Vec<f32> = pixels.into_iter().map(f32::from).collect();
    Ok(Array4::from_shape_vec((num_images, 1, rows, cols), data)?)
}

/// Parses an IDX1 label file.
pub fn read_labels<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let magic = read_u32(&mut reader)?;
    if magic != LABELS_MAGIC {
        return Err(NetworkError::InvalidData(format!(
            "Invalid MNIST label magic number: 0x{magic:08x}"
        )));
    }

    let num_labels = read_u32(&mut reader)? as usize;
    let labels = read_payload(&mut reader, num_labels, "label")?;

    if let Some(&bad) = labels.iter().find(|&&l| l > 9) {
        return Err(NetworkError::InvalidData(format!("label {bad} is not a digit")));
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn idx_images(n: u32, rows: u32, cols: u32, pixels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for v in [IMAGES_MAGIC, n, rows, cols] {
            bytes.extend(v.to_be_bytes());
        }
        bytes.extend_from_slice(pixels);
        bytes
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(LABELS_MAGIC.to_be_bytes());
        bytes.extend((labels.len() as u32).to_be_bytes());
        bytes.extend_from_slice(labels);
        bytes
    }

    #[test]
    fn test_read_images() {
        let bytes = idx_images(2, 2, 2, &[0, 1, 2, 3, 255, 254, 253, 252]);
        let images = read_images(Cursor::new(bytes)).unwrap();

        assert_eq!(images.shape(), &[2, 1, 2, 2]);
        assert_eq!(images[[0, 0, 1, 1]], 3.0);
        assert_eq!(images[[1, 0, 0, 0]], 255.0);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = idx_images(1, 1, 1, &[0]);
        bytes[3] = 0x01;
        assert!(matches!(read_images(Cursor::new(bytes)), Err(NetworkError::InvalidData(_))));
    }

    #[test]
    fn test_truncated_images_rejected() {
        let bytes = idx_images(2, 2, 2, &[0, 1, 2]);
        assert!(matches!(read_images(Cursor::new(bytes)), Err(NetworkError::InvalidData(_))));
    }

    #[test]
    fn test_oversized_header_rejected() {
        let bytes = idx_images(u32::MAX, u32::MAX, u32::MAX, &[0, 1, 2, 3]);
        assert!(matches!(read_images(Cursor::new(bytes)), Err(NetworkError::InvalidData(_))));

        // fits in usize but promises far more than the file holds
        let bytes = idx_images(60_000, 28, 28, &[0; 16]);
        assert!(matches!(read_images(Cursor::new(bytes)), Err(NetworkError::InvalidData(_))));
    }

    #[test]
    fn test_truncated_labels_rejected() {
        let mut bytes = idx_labels(&[1, 2, 3]);
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(read_labels(Cursor::new(bytes)), Err(NetworkError::InvalidData(_))));
    }

    #[test]
    fn test_read_labels() {
        let labels = read_labels(Cursor::new(idx_labels(&[7, 2, 1]))).unwrap();
        assert_eq!(labels, vec![7, 2, 1]);
        assert!(read_labels(Cursor::new(idx_labels(&[12]))).is_err());
    }

    #[test]
    fn test_load_split_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t10k-images-idx3-ubyte"), idx_images(3, 1, 1, &[1, 2, 3])).unwrap();
        std::fs::write(dir.path().join("t10k-labels-idx1-ubyte"), idx_labels(&[4, 5, 6])).unwrap();

        let dataset = load(dir.path(), Split::Test).unwrap();
        assert_eq!(dataset.num_examples(), 3);
        assert_eq!(dataset.labels(), &[4, 5, 6]);
        assert!(load(dir.path(), Split::Train).is_err());
    }
}
