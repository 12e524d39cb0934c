pub mod console;
pub mod devices;
pub mod settings;
