//! Avatar page.

use crate::error::GatewayError;
use crate::gateway::Connection;
use crate::photo::{self, CropBox};

/// Photo operations on the connected experimenter.
#[derive(Debug)]
pub struct UploadController {
    conn: Connection,
}

impl UploadController {
    #[must_use]
    pub fn new(conn: &Connection) -> Self {
        Self { conn: conn.clone() }
    }

    /// # Errors
    ///
    /// [`GatewayError::Photo`] if the upload is not a readable image.
    pub async fn attach_photo(&self, bytes: &[u8]) -> Result<(u32, u32), GatewayError> {
        self.conn.upload_my_photo(bytes).await
    }

    /// # Errors
    ///
    /// [`GatewayError::Photo`] if there is no photo or the box is invalid.
    pub async fn crop(&self, crop: CropBox) -> Result<(u32, u32), GatewayError> {
        self.conn.crop_my_photo(crop).await
    }

    /// # Errors
    ///
    /// [`GatewayError::Photo`] if storage fails.
    pub async fn delete_photo(&self) -> Result<(), GatewayError> {
        self.conn.delete_my_photo().await
    }

    /// # Errors
    ///
    /// [`GatewayError::Photo`] if the stored photo cannot be read.
    pub async fn photo_size(&self) -> Result<Option<(u32, u32)>, GatewayError> {
        self.conn.my_photo_size().await
    }

    /// The stored JPEG, or the placeholder when there is none.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Photo`] if storage or placeholder encoding fails.
    pub async fn photo_or_placeholder(&self) -> Result<Vec<u8>, GatewayError> {
        match self.conn.get_my_photo().await? {
            Some(bytes) => Ok(bytes),
            None => Ok(photo::placeholder_jpeg().await?),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gateway::tests::{root, server};
    use crate::photo::tests::png;

    #[tokio::test]
    async fn placeholder_until_upload() {
        let server = server().await;
        let admin = root(&server).await;
        let upload = UploadController::new(&admin);

        let placeholder = upload.photo_or_placeholder().await.unwrap();
        assert!(upload.photo_size().await.unwrap().is_none());

        upload.attach_photo(&png(30, 20)).await.unwrap();
        let stored = upload.photo_or_placeholder().await.unwrap();
        assert_ne!(stored, placeholder);
        assert_eq!(upload.crop(CropBox { x1: 0, y1: 0, x2: 20, y2: 20 }).await.unwrap(), (20, 20));

        upload.delete_photo().await.unwrap();
        assert_eq!(upload.photo_or_placeholder().await.unwrap(), placeholder);
    }
}
