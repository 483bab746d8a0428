//! The MMS command protocol over TCP.
//!
//! Every exchange is a command frame with a 48-byte preamble. After the handshake the
//! server interleaves header fragments, media packets and further commands on the same
//! connection, each introduced by an 8-byte pre-header.

pub mod command;
mod session;

pub use session::{MmstSession, MMST_PORT};
