pub mod config;
pub mod folder;
pub mod selective;
pub mod sync;
