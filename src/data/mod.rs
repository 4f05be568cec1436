pub mod resolver;
pub mod store;
pub mod types;
