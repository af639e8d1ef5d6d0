use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

// Keys are UUID per the persisted-state section; stored here as their
// string form since the admission path never needs to parse them back
// into a `uuid::Uuid` — it only compares and logs them.
id_newtype!(TenantId);
id_newtype!(ApiKeyId);
id_newtype!(RoleId);
id_newtype!(GroupId);

/// Identity and scope resolved from the inbound request's bearer token or
/// `X-API-Key` header, before policy enforcement runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub tenant_id: TenantId,
    pub api_key_id: ApiKeyId,
    #[serde(default)]
    pub role_id: Option<RoleId>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

impl AuthContext {
    pub fn new(tenant_id: TenantId, api_key_id: ApiKeyId) -> Self {
        Self {
            tenant_id,
            api_key_id,
            role_id: None,
            group_id: None,
        }
    }
}
