// IPC module - communication between the CLI and the daemon

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{Command, LogOptions, Request, Response, ResponseData, StartOptions};
pub use server::IpcServer;
