//! Application services: visibility filtering, rendering and response assembly.

pub mod error;
pub mod pagination;
pub mod posts;
pub mod render;
pub mod repos;
pub mod visibility;
