pub mod app;
pub mod certificates;
pub mod cli;
pub mod config;
pub mod network;
pub mod output;
pub mod utils;

#[cfg(test)]
mod tests;
