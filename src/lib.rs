pub mod classifier;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod follower;
pub mod login;
pub mod page;
pub mod prompt;
pub mod report;
