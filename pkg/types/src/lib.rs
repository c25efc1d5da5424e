pub mod config;
pub mod quantity;
pub mod quota;
pub mod validate;
