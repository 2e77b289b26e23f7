pub mod config;
pub mod llm;
pub mod session;
pub mod state;
pub mod styles;
pub mod upload;
pub mod utils;
