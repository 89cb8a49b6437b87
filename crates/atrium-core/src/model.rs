//! Directory records: experimenters, groups, and connection identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::Permissions;

/// Id of the `system` group. Membership makes an experimenter an administrator.
pub const SYSTEM_GROUP_ID: u64 = 0;
/// Id of the `user` group. Membership makes an experimenter active.
pub const USER_GROUP_ID: u64 = 1;
/// Id of the `guest` group.
pub const GUEST_GROUP_ID: u64 = 2;

/// Id of the built-in `root` administrator.
pub const ROOT_EXPERIMENTER_ID: u64 = 0;
/// Id of the built-in `guest` account used for unauthenticated flows.
pub const GUEST_EXPERIMENTER_ID: u64 = 1;

/// Whether `id` is one of the three built-in groups.
#[must_use]
pub fn is_system_group(id: u64) -> bool {
    matches!(id, SYSTEM_GROUP_ID | USER_GROUP_ID | GUEST_GROUP_ID)
}

/// Case-insensitive comparison of names and emails, folding full Unicode case.
#[must_use]
pub fn same_name(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experimenter {
    pub id: u64,
    /// Login name.
    pub ome_name: String,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub institution: String,
    /// Distinguished name when the account authenticates against LDAP.
    #[serde(default)]
    pub ldap_dn: Option<String>,
    /// Argon2 PHC string. Never rendered or logged.
    #[serde(default)]
    pub password_hash: Option<String>,
    pub default_group: u64,
    /// Every group the experimenter belongs to, system groups included.
    pub groups: Vec<u64>,
    pub created_at: DateTime<Utc>,
}

impl Experimenter {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.groups.contains(&SYSTEM_GROUP_ID)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.groups.contains(&USER_GROUP_ID)
    }

    #[must_use]
    pub fn ldap_auth(&self) -> bool {
        self.ldap_dn.is_some()
    }

    #[must_use]
    pub fn is_member_of(&self, group_id: u64) -> bool {
        self.groups.contains(&group_id)
    }

    /// "First Middle Last", skipping an empty middle name.
    #[must_use]
    pub fn full_name(&self) -> String {
        [
            self.first_name.as_str(),
            self.middle_name.as_str(),
            self.last_name.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// Groups the experimenter chose, without `system`, `user` and `guest`.
    pub fn other_group_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.groups.iter().copied().filter(|g| !is_system_group(*g))
    }
}

/// A collection of experimenters sharing permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Permissions,
    /// Experimenters that lead the group. Owners are always members.
    #[serde(default)]
    pub owners: Vec<u64>,
}

impl Group {
    #[must_use]
    pub fn is_system(&self) -> bool {
        is_system_group(self.id)
    }

    #[must_use]
    pub fn is_owned_by(&self, experimenter_id: u64) -> bool {
        self.owners.contains(&experimenter_id)
    }
}

/// Identity and permission context of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventContext {
    pub user_id: u64,
    pub user_name: String,
    pub is_admin: bool,
    pub member_of_groups: Vec<u64>,
    pub leader_of_groups: Vec<u64>,
}

impl EventContext {
    #[must_use]
    pub fn is_leader_of(&self, group_id: u64) -> bool {
        self.leader_of_groups.contains(&group_id)
    }
}

/// Fields for a new experimenter.
#[derive(Debug, Clone)]
pub struct NewExperimenter {
    pub ome_name: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: String,
    pub institution: String,
    pub admin: bool,
    pub active: bool,
    pub default_group: u64,
    pub other_groups: Vec<u64>,
    pub password: Option<String>,
}

/// Fields an administrator may change on an existing experimenter.
#[derive(Debug, Clone)]
pub struct ExperimenterUpdate {
    pub ome_name: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: String,
    pub institution: String,
    pub admin: bool,
    pub active: bool,
    pub default_group: u64,
    pub other_groups: Vec<u64>,
}

/// Fields an experimenter may change on their own account.
#[derive(Debug, Clone)]
pub struct AccountUpdate {
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: String,
    pub institution: String,
    pub default_group: u64,
}

/// Fields for creating or updating a group.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub name: String,
    pub description: String,
    pub owners: Vec<u64>,
    pub permissions: Permissions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_compare_with_unicode_case_folding() {
        assert!(same_name("Jürgen", "JÜRGEN"));
        assert!(same_name("ÉLODIE@example.org", "élodie@EXAMPLE.org"));
        assert!(!same_name("jurgen", "jürgen"));
    }

    fn experimenter(groups: Vec<u64>) -> Experimenter {
        Experimenter {
            id: 5,
            ome_name: "jdoe".to_owned(),
            first_name: "Jane".to_owned(),
            middle_name: String::new(),
            last_name: "Doe".to_owned(),
            email: String::new(),
            institution: String::new(),
            ldap_dn: None,
            password_hash: None,
            default_group: 3,
            groups,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn flags_follow_system_membership() {
        let e = experimenter(vec![3, USER_GROUP_ID]);
        assert!(e.is_active());
        assert!(!e.is_admin());

        let e = experimenter(vec![3, SYSTEM_GROUP_ID]);
        assert!(e.is_admin());
        assert!(!e.is_active());
    }

    #[test]
    fn full_name_skips_empty_middle() {
        let mut e = experimenter(vec![3]);
        assert_eq!(e.full_name(), "Jane Doe");
        e.middle_name = "Q".to_owned();
        assert_eq!(e.full_name(), "Jane Q Doe");
    }

    #[test]
    fn other_groups_exclude_system_groups() {
        let e = experimenter(vec![3, SYSTEM_GROUP_ID, USER_GROUP_ID, 7]);
        assert_eq!(e.other_group_ids().collect::<Vec<_>>(), vec![3, 7]);
    }
}
