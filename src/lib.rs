pub mod app;
pub mod arbiter;
pub mod audio;
pub mod config;
pub mod export;
pub mod field;
pub mod modulator;
pub mod overlay;
pub mod params;
pub mod preset;
pub mod render;
pub mod session;
pub mod terminal;
