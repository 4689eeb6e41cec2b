// devwarden: supervisor for local development servers

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod logs;
pub mod process;
