use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Client-supplied fields for a new item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct NewItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewItem {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: Some(description.into()) }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvariantViolation("item name must not be empty".to_owned()));
        }
        Ok(())
    }

    pub fn into_item(self, id: ItemId, created_at: DateTime<Utc>) -> Result<Item, DomainError> {
        self.validate()?;
        Ok(Item {
            id,
            name: self.name.trim().to_owned(),
            description: self.description.unwrap_or_default(),
            created_at,
        })
    }
}
