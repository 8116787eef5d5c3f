pub mod catalog;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod object;
pub mod schema;
pub mod store;
mod validate;
pub mod wait;
