//! RESP protocol types
//!
//! Only the typed reply model lives here. Request parsing and response
//! serialization belong to the network layer, which is outside this crate.

pub mod resp;

pub use resp::RespFrame;
