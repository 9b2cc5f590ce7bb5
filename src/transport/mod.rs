//! Transport module - TCP connections to coordination servers.

mod tcp;

pub use tcp::ServerStream;
