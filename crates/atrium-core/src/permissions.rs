//! Group permission strings.
//!
//! A group's permissions are six flags written as `rwrwrw`: read/write for
//! the owner, for other group members, and for everyone else. Owners always
//! keep `rw`. The admin panel never exposes the raw flags; it works with a
//! [`PermissionLevel`] plus a read-only switch:
//!
//! | level         | read-only | flags    |
//! |---------------|-----------|----------|
//! | Private       | n/a       | `rw----` |
//! | Collaborative | yes       | `rwr---` |
//! | Collaborative | no        | `rwrw--` |
//! | Public        | yes       | `rwrwr-` |
//! | Public        | no        | `rwrwrw` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;

/// Coarse sharing level chosen in the group forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionLevel {
    Private = 0,
    Collaborative = 1,
    Public = 2,
}

impl PermissionLevel {
    /// Map the numeric form value (`0`, `1`, `2`) to a level.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Private),
            1 => Some(Self::Collaborative),
            2 => Some(Self::Public),
            _ => None,
        }
    }

    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Private => "Private",
            Self::Collaborative => "Collaborative",
            Self::Public => "Public",
        }
    }
}

/// The six permission flags of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permissions {
    group_read: bool,
    group_write: bool,
    world_read: bool,
    world_write: bool,
}

impl Permissions {
    /// Build the flags for a level and read-only switch.
    ///
    /// The read-only switch has no effect on a private group.
    #[must_use]
    pub fn from_level(level: PermissionLevel, read_only: bool) -> Self {
        match level {
            PermissionLevel::Private => Self::private(),
            PermissionLevel::Collaborative => Self {
                group_read: true,
                group_write: !read_only,
                world_read: false,
                world_write: false,
            },
            PermissionLevel::Public => Self {
                group_read: true,
                group_write: true,
                world_read: true,
                world_write: !read_only,
            },
        }
    }

    /// `rw----`
    #[must_use]
    pub fn private() -> Self {
        Self {
            group_read: false,
            group_write: false,
            world_read: false,
            world_write: false,
        }
    }

    /// The level these flags correspond to.
    #[must_use]
    pub fn actual_level(self) -> PermissionLevel {
        if self.world_read {
            PermissionLevel::Public
        } else if self.group_read {
            PermissionLevel::Collaborative
        } else {
            PermissionLevel::Private
        }
    }

    /// True when a readable tier cannot write.
    #[must_use]
    pub fn is_read_only(self) -> bool {
        (self.group_read && !self.group_write) || (self.world_read && !self.world_write)
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::private()
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |on: bool, c: char| if on { c } else { '-' };
        write!(
            f,
            "rw{}{}{}{}",
            flag(self.group_read, 'r'),
            flag(self.group_write, 'w'),
            flag(self.world_read, 'r'),
            flag(self.world_write, 'w'),
        )
    }
}

impl FromStr for Permissions {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DirectoryError::Invalid {
            reason: format!("malformed permissions '{s}'"),
        };

        let bytes = s.as_bytes();
        if bytes.len() != 6 || &bytes[..2] != b"rw" {
            return Err(invalid());
        }

        let read = |b: u8| match b {
            b'r' => Ok(true),
            b'-' => Ok(false),
            _ => Err(invalid()),
        };
        let write = |b: u8| match b {
            b'w' => Ok(true),
            b'-' => Ok(false),
            _ => Err(invalid()),
        };

        let perms = Self {
            group_read: read(bytes[2])?,
            group_write: write(bytes[3])?,
            world_read: read(bytes[4])?,
            world_write: write(bytes[5])?,
        };

        // Write without read is not a state any form can produce.
        if (perms.group_write && !perms.group_read) || (perms.world_write && !perms.world_read) {
            return Err(invalid());
        }
        if perms.world_read && !perms.group_read {
            return Err(invalid());
        }

        Ok(perms)
    }
}

impl TryFrom<String> for Permissions {
    type Error = DirectoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permissions> for String {
    fn from(value: Permissions) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn levels_render_expected_flags() {
        let cases = [
            (PermissionLevel::Private, false, "rw----"),
            (PermissionLevel::Private, true, "rw----"),
            (PermissionLevel::Collaborative, true, "rwr---"),
            (PermissionLevel::Collaborative, false, "rwrw--"),
            (PermissionLevel::Public, true, "rwrwr-"),
            (PermissionLevel::Public, false, "rwrwrw"),
        ];
        for (level, read_only, expected) in cases {
            assert_eq!(
                Permissions::from_level(level, read_only).to_string(),
                expected
            );
        }
    }

    #[test]
    fn actual_level_and_read_only_are_recovered() {
        let p: Permissions = "rwr---".parse().unwrap();
        assert_eq!(p.actual_level(), PermissionLevel::Collaborative);
        assert!(p.is_read_only());

        let p: Permissions = "rwrwrw".parse().unwrap();
        assert_eq!(p.actual_level(), PermissionLevel::Public);
        assert!(!p.is_read_only());

        let p: Permissions = "rw----".parse().unwrap();
        assert_eq!(p.actual_level(), PermissionLevel::Private);
        assert!(!p.is_read_only());
    }

    #[test]
    fn malformed_strings_are_rejected() {
        for bad in ["", "rw", "r-----", "rwxx--", "rw-w--", "rw--r-", "rwrwrwrw"] {
            assert!(bad.parse::<Permissions>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn serde_uses_flag_string() {
        let p = Permissions::from_level(PermissionLevel::Collaborative, false);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"rwrw--\"");
        let back: Permissions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn level_codes() {
        assert_eq!(PermissionLevel::from_code(1), Some(PermissionLevel::Collaborative));
        assert_eq!(PermissionLevel::from_code(3), None);
        assert_eq!(PermissionLevel::Public.code(), 2);
    }
}
