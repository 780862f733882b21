//! Cinnabar library
//!
//! Cinnabar is the Lua scripting subsystem of a Redis-protocol-compatible
//! database server: clients upload and invoke Lua scripts that run inside the
//! server, issue database commands as if they were a connected client, and
//! receive a RESP reply.

pub mod command;
pub mod config;
pub mod error;
pub mod protocol;
pub mod scripting;
pub mod storage;

// Re-export commonly used types
pub use command::{ClientHandle, CommandContext, CommandTable};
pub use config::Config;
pub use error::{CinnabarError, Result};
pub use protocol::resp::RespFrame;
pub use scripting::LuaInterpreter;
pub use storage::Store;
