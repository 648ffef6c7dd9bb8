pub mod duplex;
pub mod pump;

mod client;
mod server;
mod tls;

mod tests;

pub use client::ClientForwarder;
pub use duplex::{DuplexStream, TunnelBody};
pub use server::ServerForwarder;
