use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The signed-in user as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tenant,
    Owner,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            profile_image_url: None,
        }
    }

    pub fn with_profile_image(mut self, url: impl Into<String>) -> Self {
        self.profile_image_url = Some(url.into());
        self
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Tenant => f.write_str("tenant"),
            Role::Owner => f.write_str("owner"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tenant" => Ok(Role::Tenant),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown role '{}', expected tenant or owner", other)),
        }
    }
}

/// A listing as exposed by the property catalog. Only used to seed a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub owner_name: String,
}

impl Property {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        owner_id: impl Into<String>,
        owner_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner_id: owner_id.into(),
            owner_name: owner_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Owner".parse::<Role>(), Ok(Role::Owner));
        assert_eq!(" tenant ".parse::<Role>(), Ok(Role::Tenant));
        assert!("landlord".parse::<Role>().is_err());
    }

    #[test]
    fn user_serializes_role_lowercase() {
        let user = User::new("t1", "Rohan", Role::Tenant);
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["role"], "tenant");
        assert!(json.get("profileImageUrl").is_none());
    }
}
