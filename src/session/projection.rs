use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::providers::{AccountInfo, ProfileRecord};

/// Closed role set. The marketplace has exactly three kinds of account.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    #[default]
    #[serde(rename = "property-owner")]
    PropertyOwner,
    #[serde(rename = "tenant")]
    Tenant,
    #[serde(rename = "administrator")]
    Administrator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::PropertyOwner => "property-owner",
            Role::Tenant => "tenant",
            Role::Administrator => "administrator",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "property-owner" => Ok(Role::PropertyOwner),
            "tenant" => Ok(Role::Tenant),
            "administrator" => Ok(Role::Administrator),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// The merged view of a user's identity, rebuilt wholesale at every session
/// check or refresh. Never patched incrementally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProjection {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
}

/// Two-source reconciliation. Precedence: profile row wins when present and
/// non-empty, account metadata is the fallback, hardcoded defaults last
/// (empty name, property-owner role).
pub fn resolve_user(account: &AccountInfo, profile: Option<&ProfileRecord>) -> UserProjection {
    let profile_name = profile
        .and_then(|p| p.name.as_deref())
        .filter(|n| !n.is_empty());
    let name = profile_name
        .or(account.metadata.name.as_deref())
        .unwrap_or("")
        .to_string();

    let role = profile
        .and_then(|p| p.role)
        .or(account.metadata.role)
        .unwrap_or_default();

    UserProjection {
        id: account.id.clone(),
        email: account.email.clone(),
        name,
        role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::AccountMetadata;

    fn account(name: Option<&str>, role: Option<Role>) -> AccountInfo {
        AccountInfo {
            id: "acct-1".into(),
            email: "a@example.com".into(),
            metadata: AccountMetadata { name: name.map(String::from), role },
        }
    }

    #[test]
    fn profile_row_wins_over_metadata() {
        let acct = account(Some("Bob"), Some(Role::PropertyOwner));
        let row = ProfileRecord {
            id: "acct-1".into(),
            name: Some("Alice".into()),
            role: Some(Role::Administrator),
            ..Default::default()
        };
        let user = resolve_user(&acct, Some(&row));
        assert_eq!(user.name, "Alice");
        assert_eq!(user.role, Role::Administrator);
    }

    #[test]
    fn empty_profile_name_falls_back_to_metadata() {
        let acct = account(Some("Bob"), None);
        let row = ProfileRecord { id: "acct-1".into(), name: Some(String::new()), ..Default::default() };
        let user = resolve_user(&acct, Some(&row));
        assert_eq!(user.name, "Bob");
    }

    #[test]
    fn metadata_fallback_when_no_row() {
        let acct = account(None, Some(Role::Tenant));
        let user = resolve_user(&acct, None);
        assert_eq!(user.role, Role::Tenant);
        assert_eq!(user.name, "");
    }

    #[test]
    fn hardcoded_defaults_when_neither_source_has_values() {
        let acct = account(None, None);
        let user = resolve_user(&acct, None);
        assert_eq!(user.role, Role::PropertyOwner);
        assert_eq!(user.name, "");
        assert_eq!(user.id, "acct-1");
        assert_eq!(user.email, "a@example.com");
    }

    #[test]
    fn role_serde_uses_kebab_names() {
        let json = serde_json::to_string(&Role::PropertyOwner).unwrap();
        assert_eq!(json, "\"property-owner\"");
        let r: Role = serde_json::from_str("\"administrator\"").unwrap();
        assert_eq!(r, Role::Administrator);
        assert!("landlord".parse::<Role>().is_err());
    }
}
