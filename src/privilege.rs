//! Privilege descriptors: replicated access-control lists attached to schema
//! objects. A descriptor holds a list of users sorted by name, each with a
//! bitfield over the privilege kinds. ALL is a distinguished bit that
//! subsumes the individual kinds; a user either holds ALL alone or some
//! combination of individual privileges, never both.

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};

/// The administrative superuser. Always present in a valid descriptor, with
/// ALL privileges.
pub const ROOT_USER: &str = "root";

/// The closed set of privilege kinds. The bit for a kind is 1 << kind.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Kind {
    All = 0,
    Read = 1,
    Write = 2,
}

impl Kind {
    /// All kinds, in bit order (which is also alphabetical name order).
    pub const VALUES: [Kind; 3] = [Kind::All, Kind::Read, Kind::Write];

    /// The descriptor bit for this kind.
    pub fn bit(self) -> u32 {
        1 << self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::All => "ALL",
            Kind::Read => "READ",
            Kind::Write => "WRITE",
        }
    }
}

/// Converts a list of kinds to a bitfield.
fn to_bits(kinds: &[Kind]) -> u32 {
    kinds.iter().fold(0, |bits, kind| bits | kind.bit())
}

/// A user's entry in a privilege descriptor.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserPrivileges {
    pub user: String,
    pub privileges: u32,
}

/// A {user, privileges} pair rendered for display, with privilege names
/// sorted and comma-separated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserPrivilegeString {
    pub user: String,
    pub privileges: String,
}

/// An access-control list on a schema object. The user list is kept sorted
/// by name and de-duplicated; entries with no remaining privileges are
/// dropped.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PrivilegeDescriptor {
    pub users: Vec<UserPrivileges>,
}

impl crate::encoding::Value for PrivilegeDescriptor {}

impl PrivilegeDescriptor {
    /// Returns a descriptor with ALL privileges for the root user.
    pub fn new_default() -> Self {
        PrivilegeDescriptor {
            users: vec![UserPrivileges {
                user: ROOT_USER.to_string(),
                privileges: Kind::All.bit(),
            }],
        }
    }

    /// Looks for a given user, returning its index if present.
    fn find_user_index(&self, user: &str) -> Option<usize> {
        self.users.binary_search_by(|u| u.user.as_str().cmp(user)).ok()
    }

    /// Looks for a specific user in the list.
    pub fn find_user(&self, user: &str) -> Option<&UserPrivileges> {
        self.find_user_index(user).map(|i| &self.users[i])
    }

    /// Looks for a specific user in the list, creating it (at its sorted
    /// position) if needed.
    fn find_or_create_user(&mut self, user: &str) -> &mut UserPrivileges {
        let index = match self.users.binary_search_by(|u| u.user.as_str().cmp(user)) {
            Ok(index) => index,
            Err(index) => {
                self.users
                    .insert(index, UserPrivileges { user: user.to_string(), privileges: 0 });
                index
            }
        };
        &mut self.users[index]
    }

    /// Adds new privileges for a user. Granting ALL overwrites any
    /// individual privileges; a user that already holds ALL is unaffected.
    /// Granting every individual privilege does not collapse them into ALL.
    pub fn grant(&mut self, user: &str, kinds: &[Kind]) {
        let entry = self.find_or_create_user(user);
        if entry.privileges & Kind::All.bit() != 0 {
            // User already has ALL privileges: no-op.
            return;
        }
        let bits = to_bits(kinds);
        if bits & Kind::All.bit() != 0 {
            entry.privileges = Kind::All.bit();
            return;
        }
        entry.privileges |= bits;
    }

    /// Removes privileges from a user. Revoking ALL drops the user entirely.
    /// A user holding ALL first has it expanded to the individual
    /// privileges, from which the revoked ones are then subtracted. A user
    /// left without privileges is dropped.
    pub fn revoke(&mut self, user: &str, kinds: &[Kind]) {
        let Some(index) = self.find_user_index(user) else { return };
        if self.users[index].privileges == 0 {
            return;
        }

        let bits = to_bits(kinds);
        if bits & Kind::All.bit() != 0 {
            self.users.remove(index);
            return;
        }

        let entry = &mut self.users[index];
        if entry.privileges & Kind::All.bit() != 0 {
            // Expand ALL into the individual privileges before subtracting.
            entry.privileges = 0;
            for kind in Kind::VALUES {
                if kind != Kind::All {
                    entry.privileges |= kind.bit();
                }
            }
        }
        entry.privileges &= !bits;

        let remaining = entry.privileges;
        if remaining == 0 {
            self.users.remove(index);
        }
    }

    /// Validates the descriptor before writing it: the root user must be
    /// present with ALL privileges.
    pub fn validate(&self) -> Result<()> {
        let Some(root) = self.find_user(ROOT_USER) else {
            return Err(Error::InvalidInput(format!("{ROOT_USER} user does not have privileges")));
        };
        if root.privileges & Kind::All.bit() == 0 {
            return Err(Error::InvalidInput(format!(
                "{ROOT_USER} user does not have ALL privileges"
            )));
        }
        Ok(())
    }

    /// Returns the list of {user, privileges} sorted by user name, with
    /// privilege names sorted and comma-separated.
    pub fn show(&self) -> Vec<UserPrivilegeString> {
        self.users
            .iter()
            .map(|entry| {
                let names: Vec<&str> = Kind::VALUES
                    .iter()
                    .filter(|kind| entry.privileges & kind.bit() != 0)
                    .map(|kind| kind.name())
                    .collect();
                UserPrivilegeString {
                    user: entry.user.clone(),
                    privileges: names.join(","),
                }
            })
            .collect()
    }

    /// Returns true if the user holds the given privilege. ALL implies
    /// everything.
    pub fn check_privilege(&self, user: &str, kind: Kind) -> bool {
        let Some(entry) = self.find_user(user) else { return false };
        if entry.privileges & Kind::All.bit() != 0 {
            return true;
        }
        entry.privileges & kind.bit() != 0
    }
}
