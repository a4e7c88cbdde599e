pub mod app;
pub mod config;
pub mod coordination;
pub mod error;
pub mod fetch;
pub mod market;
pub mod records;
pub mod services;

pub use error::{AppError, FetchError, FetchResult, Result};
