pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod services;
pub mod state;
