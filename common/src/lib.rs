pub mod config;
pub mod frame;
pub mod results;
pub mod state;
