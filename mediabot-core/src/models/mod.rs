pub mod media;
pub mod proxy;
pub mod settings;
