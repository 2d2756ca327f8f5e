pub mod driver;
pub mod server;
