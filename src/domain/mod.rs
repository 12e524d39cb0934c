pub mod commands;
pub mod console;
pub mod devices;
pub mod errors;
pub mod models;
pub mod protocol;
pub mod settings;
