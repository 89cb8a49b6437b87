//! Disk usage of the managed data repository.
//!
//! Each experimenter's data lives in `<repository>/<ome_name>_<id>`. Sizes
//! are computed by walking the tree on the blocking pool; symlinks are
//! counted as links and never followed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::DriveSpaceError;
use crate::model::Experimenter;

/// Number of users returned per `users_data` page.
pub const USERS_PAGE_SIZE: usize = 10;

/// One bar of the per-user usage chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub label: String,
    /// Bytes used.
    pub data: u64,
}

/// Measures the repository directory.
#[derive(Debug, Clone)]
pub struct RepositoryUsage {
    root: PathBuf,
}

impl RepositoryUsage {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding an experimenter's data.
    #[must_use]
    pub fn user_dir(&self, experimenter: &Experimenter) -> PathBuf {
        self.root
            .join(format!("{}_{}", experimenter.ome_name, experimenter.id))
    }

    /// Bytes available to unprivileged users on the repository filesystem.
    /// `None` where the platform offers no way to ask.
    ///
    /// # Errors
    ///
    /// Returns [`DriveSpaceError::Io`] if the filesystem query fails.
    pub async fn free_space(&self) -> Result<Option<u64>, DriveSpaceError> {
        let root = self.root.clone();
        blocking(move || {
            // Ask about the nearest existing ancestor.
            let mut probe = root.as_path();
            while !probe.exists() {
                match probe.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => probe = parent,
                    _ => {
                        probe = Path::new(".");
                        break;
                    }
                }
            }
            filesystem_available(probe).map_err(|e| io_error(probe, &e))
        })
        .await
    }

    /// Total bytes stored under the repository.
    ///
    /// # Errors
    ///
    /// Returns [`DriveSpaceError::Io`] if the walk fails.
    pub async fn used_space(&self) -> Result<u64, DriveSpaceError> {
        let root = self.root.clone();
        blocking(move || tree_size(&root)).await
    }

    /// Bytes stored in one experimenter's directory.
    ///
    /// # Errors
    ///
    /// Returns [`DriveSpaceError::Io`] if the walk fails.
    pub async fn user_usage(&self, experimenter: &Experimenter) -> Result<u64, DriveSpaceError> {
        let dir = self.user_dir(experimenter);
        blocking(move || tree_size(&dir)).await
    }

    /// Usage of up to [`USERS_PAGE_SIZE`] experimenters starting at `offset`,
    /// in the order given.
    ///
    /// # Errors
    ///
    /// Returns [`DriveSpaceError::Io`] if a walk fails.
    pub async fn users_data(
        &self,
        experimenters: &[Experimenter],
        offset: usize,
    ) -> Result<Vec<UsageRecord>, DriveSpaceError> {
        let mut records = Vec::new();
        for experimenter in experimenters.iter().skip(offset).take(USERS_PAGE_SIZE) {
            records.push(UsageRecord {
                label: experimenter.full_name(),
                data: self.user_usage(experimenter).await?,
            });
        }
        debug!(offset, returned = records.len(), "user drive space page");
        Ok(records)
    }
}

async fn blocking<T, F>(op: F) -> Result<T, DriveSpaceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DriveSpaceError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| DriveSpaceError::Task {
            reason: e.to_string(),
        })?
}

fn io_error(path: &Path, e: &io::Error) -> DriveSpaceError {
    DriveSpaceError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Recursive size of `path`. A missing path has size zero.
fn tree_size(path: &Path) -> Result<u64, DriveSpaceError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_error(path, &e)),
    };
    if !meta.is_dir() {
        return Ok(meta.len());
    }

    let mut total = 0u64;
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| io_error(&dir, &e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir, &e))?;
            let meta = entry
                .metadata()
                .map_err(|e| io_error(&entry.path(), &e))?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                total = total.saturating_add(meta.len());
            }
        }
    }
    Ok(total)
}

#[cfg(unix)]
fn filesystem_available(path: &Path) -> io::Result<Option<u64>> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `statvfs` only writes into the struct we pass, and `c_path`
    // is a valid NUL-terminated string for the duration of the call.
    #[allow(unsafe_code)]
    let (rc, stat) = unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        let rc = libc::statvfs(c_path.as_ptr(), &mut stat);
        (rc, stat)
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // Field widths differ between platforms.
    #[allow(clippy::unnecessary_cast, clippy::cast_lossless, clippy::useless_conversion)]
    let available = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
    Ok(Some(available))
}

#[cfg(not(unix))]
fn filesystem_available(_path: &Path) -> io::Result<Option<u64>> {
    Ok(None)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn experimenter(id: u64, name: &str) -> Experimenter {
        Experimenter {
            id,
            ome_name: name.to_owned(),
            first_name: name.to_owned(),
            middle_name: String::new(),
            last_name: "Tester".to_owned(),
            email: String::new(),
            institution: String::new(),
            ldap_dn: None,
            password_hash: None,
            default_group: 3,
            groups: vec![3],
            created_at: Utc::now(),
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "atrium-drivespace-{name}-{}",
            uuid::Uuid::new_v4()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn used_space_sums_nested_files() {
        let root = scratch("used");
        let usage = RepositoryUsage::new(&root);
        let alice = experimenter(2, "alice");
        let alice_dir = usage.user_dir(&alice);
        fs::create_dir_all(alice_dir.join("nested")).unwrap();
        fs::write(alice_dir.join("a.bin"), vec![0u8; 100]).unwrap();
        fs::write(alice_dir.join("nested/b.bin"), vec![0u8; 50]).unwrap();
        fs::write(root.join("top.bin"), vec![0u8; 7]).unwrap();

        assert_eq!(usage.user_usage(&alice).await.unwrap(), 150);
        assert_eq!(usage.used_space().await.unwrap(), 157);

        fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn missing_repository_is_empty() {
        let usage = RepositoryUsage::new(std::env::temp_dir().join("atrium-does-not-exist/deeper"));
        assert_eq!(usage.used_space().await.unwrap(), 0);
        assert_eq!(usage.user_usage(&experimenter(2, "bob")).await.unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn free_space_is_reported_on_unix() {
        let root = scratch("free");
        let usage = RepositoryUsage::new(root.join("not-yet-created"));
        assert!(usage.free_space().await.unwrap().is_some());
        fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn users_data_pages_by_ten() {
        let root = scratch("pages");
        let usage = RepositoryUsage::new(&root);
        let people: Vec<Experimenter> = (0..13)
            .map(|i| experimenter(i, &format!("user{i}")))
            .collect();
        fs::create_dir_all(usage.user_dir(&people[11])).unwrap();
        fs::write(usage.user_dir(&people[11]).join("x"), [1u8; 3]).unwrap();

        let first = usage.users_data(&people, 0).await.unwrap();
        assert_eq!(first.len(), USERS_PAGE_SIZE);
        assert_eq!(first[0].label, "user0 Tester");

        let second = usage.users_data(&people, 10).await.unwrap();
        assert_eq!(second.len(), 3);
        assert_eq!(second[1], UsageRecord { label: "user11 Tester".to_owned(), data: 3 });

        assert!(usage.users_data(&people, 20).await.unwrap().is_empty());
        fs::remove_dir_all(&root).unwrap();
    }
}
