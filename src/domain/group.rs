use super::money::Balance;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Identifier of a shared-expense group.
    GroupId
);
entity_id!(
    /// Identifier of a group member. Unique across all groups.
    MemberId
);
entity_id!(
    /// Identifier of a recorded payment. Unique across all groups.
    PaymentId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

/// A participant in exactly one group, with its running balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub group_id: GroupId,
    pub name: String,
    pub balance: Balance,
}

impl Member {
    pub fn new(id: MemberId, group_id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            group_id,
            name: name.into(),
            balance: Balance::ZERO,
        }
    }
}

/// Rejects names that are empty once trimmed and returns the trimmed form.
pub fn validated_name(name: &str) -> crate::error::Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(crate::error::LedgerError::validation("Name must not be blank"));
    }
    Ok(trimmed.to_string())
}
