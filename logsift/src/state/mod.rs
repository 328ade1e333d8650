pub mod buffer;
pub mod persistence;
pub mod registry;
pub mod reservoir;
