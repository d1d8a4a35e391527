pub mod csv_io;
pub mod loader;
pub mod metro;
pub mod registry;
pub mod schema;
