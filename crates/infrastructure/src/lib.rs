pub mod dynamodb;
pub mod event_store;
pub mod memory;
pub mod models;
pub mod ports;
pub mod post_tag_index;
pub mod repository;
pub mod tag_migration_store;

pub use dynamodb::*;
pub use event_store::*;
pub use memory::*;
pub use models::*;
pub use ports::*;
pub use post_tag_index::*;
pub use repository::*;
pub use tag_migration_store::*;
