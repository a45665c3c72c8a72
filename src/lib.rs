pub mod commands;
pub mod config;
pub mod delivery;
pub mod logging;
pub mod media;
pub mod orchestrator;
pub mod phone;
pub mod roster;
pub mod server;
pub mod storage;
