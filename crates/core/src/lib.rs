pub mod config;
pub mod domain;
pub mod errors;
pub mod items;

pub use domain::item::{Item, ItemId, NewItem};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use items::ItemStore;
