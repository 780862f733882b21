//! Lua scripting subsystem
//!
//! Implements EVAL/EVALSHA/SCRIPT on top of an embedded Lua engine. Each
//! worker owns one [`LuaInterpreter`]; the script cache and the execution
//! context registry are process-global and independently locked, so any
//! worker can resolve hashes or cancel scripts running elsewhere.

pub mod bridge;
pub mod cache;
pub mod codec;
pub mod commands;
pub mod interpreter;
pub mod monitor;
pub mod registry;

pub use commands::{handle_eval, handle_evalsha, handle_script};
pub use interpreter::LuaInterpreter;
pub use registry::ExecContext;
