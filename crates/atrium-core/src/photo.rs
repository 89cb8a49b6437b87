//! Experimenter avatars.
//!
//! Uploads in any format the decoder understands are normalised to JPEG
//! before they are stored, so everything served from `/myphoto` is
//! `image/jpeg`. Photos live under `photos/<id>`.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use tracing::info;

use atrium_storage::StorageBackend;

use crate::error::PhotoError;

const PHOTO_PREFIX: &str = "photos/";

/// JPEG quality used when re-encoding uploads and crops.
const JPEG_QUALITY: u8 = 90;

/// Edge length of the placeholder served when no photo exists.
pub const PLACEHOLDER_SIZE: u32 = 150;

fn photo_key(experimenter_id: u64) -> String {
    format!("{PHOTO_PREFIX}{experimenter_id:020}")
}

/// A crop rectangle in pixel coordinates, `(x1, y1)` inclusive and
/// `(x2, y2)` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropBox {
    fn validate(self, width: u32, height: u32) -> Result<(), PhotoError> {
        if self.x2 <= self.x1 || self.y2 <= self.y1 {
            return Err(PhotoError::InvalidCrop {
                reason: format!(
                    "box ({}, {})-({}, {}) is empty",
                    self.x1, self.y1, self.x2, self.y2
                ),
            });
        }
        if self.x2 > width || self.y2 > height {
            return Err(PhotoError::InvalidCrop {
                reason: format!(
                    "box ({}, {})-({}, {}) exceeds the {width}x{height} image",
                    self.x1, self.y1, self.x2, self.y2
                ),
            });
        }
        Ok(())
    }
}

/// Stores one JPEG avatar per experimenter.
pub struct PhotoStore {
    storage: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for PhotoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoStore").finish_non_exhaustive()
    }
}

impl PhotoStore {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// The stored JPEG, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PhotoError::Storage`] if the read fails.
    pub async fn get(&self, experimenter_id: u64) -> Result<Option<Vec<u8>>, PhotoError> {
        Ok(self.storage.get(&photo_key(experimenter_id)).await?)
    }

    /// `(width, height)` of the stored photo, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PhotoError`] if the read fails or the stored bytes are not an image.
    pub async fn size(&self, experimenter_id: u64) -> Result<Option<(u32, u32)>, PhotoError> {
        match self.get(experimenter_id).await? {
            Some(bytes) => blocking(move || dimensions(&bytes)).await.map(Some),
            None => Ok(None),
        }
    }

    /// Decode an upload, re-encode it as JPEG and store it.
    ///
    /// # Errors
    ///
    /// - [`PhotoError::InvalidImage`] if the bytes cannot be decoded.
    /// - [`PhotoError::Encoding`] if JPEG encoding fails.
    pub async fn upload(&self, experimenter_id: u64, bytes: &[u8]) -> Result<(u32, u32), PhotoError> {
        let bytes = bytes.to_vec();
        let (width, height, jpeg) = blocking(move || {
            let image = decode(&bytes)?;
            Ok((image.width(), image.height(), encode_jpeg(&image)?))
        })
        .await?;
        self.storage.put(&photo_key(experimenter_id), &jpeg).await?;

        info!(experimenter_id, width, height, "photo uploaded");
        Ok((width, height))
    }

    /// Crop the stored photo in place.
    ///
    /// # Errors
    ///
    /// - [`PhotoError::NoPhoto`] if nothing is stored.
    /// - [`PhotoError::InvalidCrop`] if the box is empty or outside the image.
    pub async fn crop(&self, experimenter_id: u64, crop: CropBox) -> Result<(u32, u32), PhotoError> {
        let bytes = self
            .get(experimenter_id)
            .await?
            .ok_or(PhotoError::NoPhoto { id: experimenter_id })?;
        let (width, height, jpeg) = blocking(move || {
            let image = decode(&bytes)?;
            crop.validate(image.width(), image.height())?;
            let cropped = image.crop_imm(crop.x1, crop.y1, crop.x2 - crop.x1, crop.y2 - crop.y1);
            Ok((cropped.width(), cropped.height(), encode_jpeg(&cropped)?))
        })
        .await?;
        self.storage.put(&photo_key(experimenter_id), &jpeg).await?;

        info!(experimenter_id, width, height, "photo cropped");
        Ok((width, height))
    }

    /// Remove the stored photo. Removing a missing photo is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PhotoError::Storage`] if the delete fails.
    pub async fn delete(&self, experimenter_id: u64) -> Result<(), PhotoError> {
        self.storage.delete(&photo_key(experimenter_id)).await?;
        info!(experimenter_id, "photo deleted");
        Ok(())
    }
}

/// Run image work on the blocking pool.
async fn blocking<T, F>(op: F) -> Result<T, PhotoError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PhotoError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| PhotoError::Task {
            reason: e.to_string(),
        })?
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, PhotoError> {
    image::load_from_memory(bytes).map_err(|e| PhotoError::InvalidImage {
        reason: e.to_string(),
    })
}

fn dimensions(bytes: &[u8]) -> Result<(u32, u32), PhotoError> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PhotoError::InvalidImage {
            reason: e.to_string(),
        })?
        .into_dimensions()
        .map_err(|e| PhotoError::InvalidImage {
            reason: e.to_string(),
        })
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, PhotoError> {
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut out = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .map_err(|e| PhotoError::Encoding {
            reason: e.to_string(),
        })?;
    Ok(out)
}

/// A neutral grey square served in place of a missing photo.
///
/// # Errors
///
/// Returns [`PhotoError::Encoding`] if JPEG encoding fails.
pub async fn placeholder_jpeg() -> Result<Vec<u8>, PhotoError> {
    blocking(|| {
        let image = RgbImage::from_pixel(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, Rgb([204, 204, 204]));
        encode_jpeg(&DynamicImage::ImageRgb8(image))
    })
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use atrium_storage::MemoryBackend;

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([10, 120, 200]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
            .unwrap();
        out
    }

    fn store() -> PhotoStore {
        PhotoStore::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn upload_normalises_to_jpeg() {
        let photos = store();
        assert_eq!(photos.upload(4, &png(40, 30)).await.unwrap(), (40, 30));

        let stored = photos.get(4).await.unwrap().unwrap();
        assert_eq!(&stored[..2], &[0xFF, 0xD8]);
        assert_eq!(photos.size(4).await.unwrap(), Some((40, 30)));
    }

    #[tokio::test]
    async fn garbage_upload_is_rejected() {
        let photos = store();
        let err = photos.upload(4, b"definitely not an image").await.unwrap_err();
        assert!(matches!(err, PhotoError::InvalidImage { .. }));
        assert!(photos.get(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn crop_shrinks_the_photo() {
        let photos = store();
        photos.upload(4, &png(40, 30)).await.unwrap();
        let size = photos
            .crop(4, CropBox { x1: 5, y1: 5, x2: 25, y2: 15 })
            .await
            .unwrap();
        assert_eq!(size, (20, 10));
        assert_eq!(photos.size(4).await.unwrap(), Some((20, 10)));
    }

    #[tokio::test]
    async fn crop_rejects_bad_boxes() {
        let photos = store();
        let err = photos
            .crop(4, CropBox { x1: 0, y1: 0, x2: 1, y2: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoError::NoPhoto { id: 4 }));

        photos.upload(4, &png(40, 30)).await.unwrap();
        for crop in [
            CropBox { x1: 10, y1: 0, x2: 10, y2: 5 },
            CropBox { x1: 0, y1: 8, x2: 5, y2: 2 },
            CropBox { x1: 0, y1: 0, x2: 41, y2: 5 },
        ] {
            let err = photos.crop(4, crop).await.unwrap_err();
            assert!(matches!(err, PhotoError::InvalidCrop { .. }), "{crop:?}");
        }
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let photos = store();
        photos.upload(4, &png(8, 8)).await.unwrap();
        photos.delete(4).await.unwrap();
        photos.delete(4).await.unwrap();
        assert_eq!(photos.size(4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn placeholder_is_a_jpeg_square() {
        let bytes = placeholder_jpeg().await.unwrap();
        assert_eq!(dimensions(&bytes).unwrap(), (PLACEHOLDER_SIZE, PLACEHOLDER_SIZE));
    }
}
