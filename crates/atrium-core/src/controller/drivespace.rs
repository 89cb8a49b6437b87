//! Repository usage page.

use crate::drivespace::UsageRecord;
use crate::error::GatewayError;
use crate::gateway::Connection;

/// Free and used bytes of the repository.
#[derive(Debug, Clone, Copy)]
pub struct DriveSpaceController {
    /// `None` where the platform cannot report free space.
    pub free_space: Option<u64>,
    pub used_space: u64,
}

impl DriveSpaceController {
    /// # Errors
    ///
    /// [`GatewayError::DriveSpace`] if the repository cannot be measured.
    pub async fn load(conn: &Connection) -> Result<Self, GatewayError> {
        let repository = conn.repository();
        Ok(Self {
            free_space: repository.free_space().await?,
            used_space: repository.used_space().await?,
        })
    }

    /// One page of per-experimenter usage, experimenters in id order.
    ///
    /// # Errors
    ///
    /// [`GatewayError`] if the directory or the repository cannot be read.
    pub async fn users_data(conn: &Connection, offset: usize) -> Result<Vec<UsageRecord>, GatewayError> {
        let experimenters = conn.directory().list_experimenters().await?;
        Ok(conn.repository().users_data(&experimenters, offset).await?)
    }

    /// Share of the filesystem in use, as a whole percentage.
    #[must_use]
    pub fn used_percent(&self) -> Option<u8> {
        let free = self.free_space?;
        let total = free.checked_add(self.used_space)?;
        if total == 0 {
            return Some(0);
        }
        let percent = u128::from(self.used_space) * 100 / u128::from(total);
        u8::try_from(percent).ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gateway::tests::{root, server};

    #[test]
    fn used_percent_rounds_down() {
        let c = DriveSpaceController { free_space: Some(300), used_space: 100 };
        assert_eq!(c.used_percent(), Some(25));
        let c = DriveSpaceController { free_space: None, used_space: 100 };
        assert_eq!(c.used_percent(), None);
        let c = DriveSpaceController { free_space: Some(0), used_space: 0 };
        assert_eq!(c.used_percent(), Some(0));
    }

    #[tokio::test]
    async fn users_data_covers_built_in_accounts() {
        let server = server().await;
        let admin = root(&server).await;
        let page = DriveSpaceController::users_data(&admin, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].label, "root root");
        assert_eq!(page[0].data, 0);
    }
}
