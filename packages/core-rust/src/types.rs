use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a tenant (an organization workspace).
///
/// Bound into every tenant-scoped database transaction; row-level-security
/// policies compare stored rows against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated identity, resolved once per request and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for the authenticated user.
    pub user_id: UserId,
    /// Primary email address.
    pub email: String,
    /// Display name.
    pub name: String,
}

/// Session state for a signed-in user.
///
/// `active_tenant_id` is the organization the user currently works in.
/// `None` means the user is signed in but has not picked one yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tenant_id: Option<TenantId>,
}

/// Membership role of a user inside one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl Role {
    /// Every role, most privileged first.
    pub const ALL: [Self; 4] = [Self::Owner, Self::Admin, Self::Member, Self::Viewer];

    /// Parses a stored role name, ignoring ASCII case and surrounding whitespace.
    ///
    /// Returns `None` for names this server does not know.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(trimmed))
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }

    /// Owners and admins may perform administrative operations.
    #[must_use]
    pub fn is_elevated(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse(" owner "), Some(Role::Owner));
        assert_eq!(Role::parse("Member"), Some(Role::Member));
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn only_owner_and_admin_are_elevated() {
        assert!(Role::Owner.is_elevated());
        assert!(Role::Admin.is_elevated());
        assert!(!Role::Member.is_elevated());
        assert!(!Role::Viewer.is_elevated());
    }

    #[test]
    fn session_without_tenant_omits_field() {
        let session = Session {
            user_id: UserId::new("u-1"),
            active_tenant_id: None,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json, serde_json::json!({ "user_id": "u-1" }));

        let back: Session = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&TenantId::new("t-1")).unwrap();
        assert_eq!(json, "\"t-1\"");
    }

    proptest! {
        #[test]
        fn role_name_parses_back(role in prop_oneof![
            Just(Role::Owner),
            Just(Role::Admin),
            Just(Role::Member),
            Just(Role::Viewer),
        ]) {
            prop_assert_eq!(Role::parse(role.as_str()), Some(role));
            prop_assert_eq!(Role::parse(&role.as_str().to_uppercase()), Some(role));
        }
    }
}
