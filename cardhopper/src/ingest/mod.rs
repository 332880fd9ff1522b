//! Placement rules: where a file goes and what happens on collision.

pub mod duplicate;
pub mod organizer;

pub use duplicate::{resolve_duplicate, DuplicateAction, DuplicateHandling, Resolution};
pub use organizer::{destination_path, NamingOptions, OrganizationScheme};
