pub mod access;
pub mod app;
pub mod clock;
pub mod config;
pub mod duration;
pub mod error;
pub mod models;
pub mod session;
pub mod storage;
pub mod token;
