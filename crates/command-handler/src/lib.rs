pub mod cascade;
pub mod collection_service;
pub mod image_post_service;
pub mod services;
pub mod tag_migration_service;
pub mod tag_resolver;

pub use cascade::*;
pub use collection_service::*;
pub use image_post_service::*;
pub use services::*;
pub use tag_migration_service::*;
pub use tag_resolver::*;
