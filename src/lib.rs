pub mod aggregate;
pub mod config;
pub mod loader;
pub mod logging;
pub mod manifest;
pub mod normalize;
pub mod projection;
pub mod registry;
pub mod schema;
pub mod source;
pub mod store;
pub mod table;
