//! Identities, ACLs and permission bits.

use std::sync::LazyLock;

use super::record;

/// Permission bits carried in `Acl::perms`.
pub mod perms {
    pub const READ: i32 = 1 << 0;
    pub const WRITE: i32 = 1 << 1;
    pub const CREATE: i32 = 1 << 2;
    pub const DELETE: i32 = 1 << 3;
    pub const ADMIN: i32 = 1 << 4;
    pub const ALL: i32 = READ | WRITE | CREATE | DELETE | ADMIN;
}

record! {
    /// An authenticated identity: `scheme:id`.
    #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Id {
        pub scheme: String => string,
        pub id: String => string,
    }
}

record! {
    /// A permission grant for one identity.
    #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Acl {
        pub perms: i32 => int,
        pub id: Id => record,
    }
}

impl Id {
    pub fn new(scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
        }
    }

    /// `world:anyone`.
    pub fn anyone() -> Self {
        Self::new("world", "anyone")
    }

    /// `auth:` - whatever identities the session has authenticated as.
    pub fn authenticated() -> Self {
        Self::new("auth", "")
    }
}

impl Acl {
    pub fn new(perms: i32, id: Id) -> Self {
        Self { perms, id }
    }
}

/// Completely open ACL.
pub static OPEN_ACL_UNSAFE: LazyLock<Vec<Acl>> =
    LazyLock::new(|| vec![Acl::new(perms::ALL, Id::anyone())]);

/// Read-only ACL for everyone.
pub static READ_ACL_UNSAFE: LazyLock<Vec<Acl>> =
    LazyLock::new(|| vec![Acl::new(perms::READ, Id::anyone())]);

/// All permissions for the creator's authenticated identities.
pub static CREATOR_ALL_ACL: LazyLock<Vec<Acl>> =
    LazyLock::new(|| vec![Acl::new(perms::ALL, Id::authenticated())]);
