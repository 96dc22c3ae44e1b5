pub mod api;
pub mod config;
pub mod metrics;
pub mod server;
pub mod session;

#[cfg(test)]
mod session_props;

pub use server::RendezvousServer;
