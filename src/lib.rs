pub mod api;
pub mod app;
pub mod audit;
pub mod config;
pub mod error;
pub mod export;
pub mod mail;
pub mod migrate;
pub mod mongo_ext;
pub mod util;
pub mod validation;
