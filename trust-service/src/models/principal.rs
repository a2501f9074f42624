//! Principal model - an identity that can authenticate and hold a role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MfaMethod, Role};

/// Principal entity. Never deleted, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub mfa_enrolled_methods: Vec<MfaMethod>,
    pub backup_codes_remaining: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(new: NewPrincipal, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            email: new.email,
            display_name: new.display_name,
            role: new.role,
            mfa_enrolled_methods: Vec::new(),
            backup_codes_remaining: 0,
            active: true,
            created_at: now,
        }
    }

    pub fn has_method(&self, method: MfaMethod) -> bool {
        self.mfa_enrolled_methods.contains(&method)
    }
}

/// Signup input.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPrincipal {
    pub id: Option<String>,
    pub email: String,
    pub display_name: String,
    pub role: Role,
}
