//! In-memory item catalogue backing the `/api/items` endpoints.

use std::sync::RwLock;

use chrono::Utc;

use crate::domain::item::{Item, ItemId, NewItem};
use crate::errors::DomainError;

#[derive(Debug, Default)]
pub struct ItemStore {
    items: RwLock<Vec<Item>>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the three sample items served by the demo API.
    pub fn with_samples() -> Self {
        let store = Self::new();
        for index in 1..=3 {
            let sample =
                NewItem::new(format!("Item {index}"), format!("Description for item {index}"));
            // Sample names are non-empty, so creation cannot fail.
            let _ = store.create(sample);
        }
        store
    }

    pub fn list(&self) -> Vec<Item> {
        self.items.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn get(&self, id: &ItemId) -> Result<Item, DomainError> {
        self.items
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|item| &item.id == id)
            .cloned()
            .ok_or_else(|| DomainError::ItemNotFound(id.clone()))
    }

    pub fn create(&self, new_item: NewItem) -> Result<Item, DomainError> {
        let mut items = self.items.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut id = ItemId::generate();
        while items.iter().any(|item| item.id == id) {
            id = ItemId::generate();
        }

        let item = new_item.into_item(id, Utc::now())?;
        items.push(item.clone());
        Ok(item)
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
