pub mod codec;
pub mod message;
pub mod record;
pub mod state;
pub mod transcript;
