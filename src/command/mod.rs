//! Command table and dispatch
//!
//! The scripting bridge resolves command names through the table defined
//! here, checks the per-command flags (notably `CMD_NOSCRIPT`), and invokes
//! the handler with the invocation's own [`CommandContext`]. The table is
//! the same one the server's request dispatcher consults, so a script
//! observes exactly the commands a connected client would.

pub mod basic;
mod context;

pub use context::{ClientHandle, CommandContext};

use std::collections::HashMap;

use crate::error::{CommandError, Result};
use crate::protocol::resp::RespFrame;

/// Command may not be invoked from inside a script
pub const CMD_NOSCRIPT: u32 = 1 << 0;

/// Command writes to the keyspace
pub const CMD_WRITE: u32 = 1 << 1;

/// Handler signature: full argument vector, `args[0]` is the command name
pub type CommandHandler = fn(&CommandContext, &[Vec<u8>]) -> Result<RespFrame>;

/// A registered command: handler plus behavioral flags
pub struct CommandSpec {
    pub name: &'static str,
    pub handler: CommandHandler,
    pub flags: u32,
}

impl CommandSpec {
    pub fn is_noscript(&self) -> bool {
        self.flags & CMD_NOSCRIPT != 0
    }
}

/// Name -> handler-and-flags lookup table
pub struct CommandTable {
    commands: HashMap<&'static str, CommandSpec>,
}

impl CommandTable {
    /// Empty table; useful for tests that register their own commands
    pub fn new() -> Self {
        CommandTable {
            commands: HashMap::new(),
        }
    }

    /// Table pre-populated with the built-in commands
    pub fn with_defaults() -> Self {
        let mut table = CommandTable::new();
        basic::register_defaults(&mut table);
        table
    }

    /// Register a command, replacing any previous registration
    pub fn register(&mut self, name: &'static str, handler: CommandHandler, flags: u32) {
        self.commands.insert(name, CommandSpec { name, handler, flags });
    }

    /// Case-insensitive lookup
    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name.to_uppercase().as_str())
    }

    /// Execute a command through the table. `args[0]` is the command name.
    pub fn dispatch(&self, ctx: &CommandContext, args: &[Vec<u8>]) -> Result<RespFrame> {
        let name = match args.first() {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => {
                return Err(CommandError::Generic("empty command".to_string()).into());
            }
        };
        match self.lookup(&name) {
            Some(spec) => (spec.handler)(ctx, args),
            None => Err(CommandError::UnknownCommand(name).into()),
        }
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        CommandTable::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_case_insensitive() {
        let table = CommandTable::with_defaults();
        assert!(table.lookup("get").is_some());
        assert!(table.lookup("GET").is_some());
        assert!(table.lookup("NOSUCH").is_none());
    }

    #[test]
    fn test_scripting_commands_flagged_noscript() {
        let table = CommandTable::with_defaults();
        for name in ["EVAL", "EVALSHA", "SCRIPT", "MULTI", "EXEC", "WATCH"] {
            assert!(
                table.lookup(name).unwrap().is_noscript(),
                "{} should be NOSCRIPT",
                name
            );
        }
        assert!(!table.lookup("GET").unwrap().is_noscript());
    }
}
