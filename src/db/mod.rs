pub mod connectors;
pub mod registry;
pub mod schema;
