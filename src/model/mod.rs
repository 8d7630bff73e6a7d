pub mod chart;
pub mod color;
pub mod config;
pub mod timing;
