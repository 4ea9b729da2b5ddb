pub mod aggregate;
pub mod collection;
pub mod errors;
pub mod events;
pub mod identifiers;
pub mod image_post;
pub mod tag;
pub mod tag_migration;
pub mod tagging;

pub use aggregate::*;
pub use collection::*;
pub use errors::*;
pub use events::*;
pub use identifiers::*;
pub use image_post::*;
pub use tag::*;
pub use tag_migration::*;
pub use tagging::*;
