//! Image detection and extraction from BLOB values.
//!
//! Blobs are matched against a fixed table of file signatures (magic bytes),
//! first match wins. Matched blobs are written to the image directory as
//! `image_<n>.<ext>` and the column value is replaced with the file name.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::sqlite::record::Value;
use crate::RecoveryError;

/// A recognised image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageSignature {
    /// Format name.
    pub name: &'static str,
    /// File extension, without the dot.
    pub extension: &'static str,
    /// Leading bytes that identify the format.
    #[serde(skip)]
    pub magic: &'static [u8],
}

/// Signatures in match order.
pub const SIGNATURES: &[ImageSignature] = &[
    ImageSignature {
        name: "JPEG",
        extension: "jpg",
        magic: &[0xFF, 0xD8, 0xFF],
    },
    ImageSignature {
        name: "PNG",
        extension: "png",
        magic: &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
    },
    ImageSignature {
        name: "GIF",
        extension: "gif",
        magic: b"GIF87a",
    },
    ImageSignature {
        name: "GIF",
        extension: "gif",
        magic: b"GIF89a",
    },
    ImageSignature {
        name: "BMP",
        extension: "bmp",
        magic: b"BM",
    },
    ImageSignature {
        name: "TIFF",
        extension: "tif",
        magic: &[b'I', b'I', 0x2A, 0x00],
    },
    ImageSignature {
        name: "TIFF",
        extension: "tif",
        magic: &[b'M', b'M', 0x00, 0x2A],
    },
    ImageSignature {
        name: "ICO",
        extension: "ico",
        magic: &[0x00, 0x00, 0x01, 0x00],
    },
];

/// Identify the image format of `bytes`, if any.
///
/// # Examples
///
/// ```
/// use sqlrec::recovery::images::identify_image;
///
/// let sig = identify_image(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]).unwrap();
/// assert_eq!(sig.name, "JPEG");
/// assert_eq!(sig.extension, "jpg");
/// assert!(identify_image(b"plain bytes").is_none());
/// ```
pub fn identify_image(bytes: &[u8]) -> Option<&'static ImageSignature> {
    SIGNATURES.iter().find(|sig| bytes.starts_with(sig.magic))
}

/// Writes matched blobs to an image directory with sequential names.
#[derive(Debug)]
pub struct ImageCarver {
    dir: PathBuf,
    next_index: u64,
    /// Files written, in order.
    pub extracted: Vec<String>,
    /// Write failures, one message per failed image.
    pub failures: Vec<String>,
}

impl ImageCarver {
    /// Create a carver writing into `dir`, creating the directory if needed.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, RecoveryError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            RecoveryError::Io(format!("Cannot create image directory {}: {}", dir.display(), e))
        })?;
        Ok(ImageCarver {
            dir: dir.to_path_buf(),
            next_index: 1,
            extracted: Vec::new(),
            failures: Vec::new(),
        })
    }

    /// Directory images are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Extract every image blob in `values`, replacing it with its file name.
    ///
    /// Blobs that are not images, or whose file could not be written, are
    /// left as they are. Returns the number of images written.
    pub fn carve_row(&mut self, values: &mut [Value]) -> usize {
        let mut written = 0;
        for value in values.iter_mut() {
            if let Value::Blob(bytes) = value {
                if let Some(sig) = identify_image(bytes) {
                    match self.write_image(sig, bytes) {
                        Ok(name) => {
                            *value = Value::Text(name);
                            written += 1;
                        }
                        Err(e) => self.failures.push(e.to_string()),
                    }
                }
            }
        }
        written
    }

    /// Write one image under the next sequential name.
    ///
    /// The counter only advances on success, so names stay gapless.
    pub fn write_image(
        &mut self,
        sig: &ImageSignature,
        bytes: &[u8],
    ) -> Result<String, RecoveryError> {
        let name = format!("image_{}.{}", self.next_index, sig.extension);
        let path = self.dir.join(&name);
        std::fs::write(&path, bytes).map_err(|e| {
            RecoveryError::ImageWrite(format!("Failed to save image {}: {}", path.display(), e))
        })?;
        self.next_index += 1;
        self.extracted.push(name.clone());
        Ok(name)
    }
}
