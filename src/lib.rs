pub mod conductor_config;
pub mod config;
pub mod dag;
pub mod errors;
pub mod exit_codes;
pub mod logging;
pub mod manifest;
pub mod orchestrator;
pub mod parallel;
pub mod phase;
pub mod quality;
pub mod runner;
pub mod security;
pub mod ui;
