pub mod client;
pub mod config;
pub mod diff;
pub mod download;
pub mod normalize;
pub mod project;
pub mod replace;
pub mod retry;
pub mod sync;
pub mod upload;
