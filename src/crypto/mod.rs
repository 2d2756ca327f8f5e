pub mod keys;
pub mod protection;
pub mod suite;
