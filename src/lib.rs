pub mod app;
pub mod config;
pub mod filters;
pub mod models;
pub mod preferences;
pub mod randomiser;
pub mod sampler;
pub mod tmdb;
