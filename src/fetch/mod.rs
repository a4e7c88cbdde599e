pub mod client;
pub mod decode;

pub use client::{Classified, QuoteApi, UpstreamClient};
