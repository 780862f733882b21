//! Per-command execution context and client connection seam

use std::sync::Arc;

use super::CommandTable;
use crate::storage::Store;

/// Hook into the event loop's ownership of a client socket.
///
/// During a long-running script the monitor detaches the originating
/// connection so the event loop keeps servicing other clients, and asks the
/// loop to make progress on every tick. All three operations are provided by
/// the network layer; invocations without a bound connection simply carry no
/// handle.
pub trait ClientHandle: Send + Sync {
    /// Remove the client socket from event-loop ownership
    fn detach(&self);

    /// Return the client socket to normal event-loop ownership
    fn attach(&self);

    /// Ask the hosting event loop to service other connections
    fn event_loop_continue(&self);
}

/// Context a command executes under: which database, which storage engine,
/// which command table, and (optionally) which client connection.
///
/// A script invocation clones the context of the EVAL that started it, so
/// commands issued from inside the script observe the same transactional
/// state as the surrounding command.
#[derive(Clone)]
pub struct CommandContext {
    pub db_index: usize,
    pub store: Arc<Store>,
    pub commands: Arc<CommandTable>,
    pub client: Option<Arc<dyn ClientHandle>>,
}

impl CommandContext {
    pub fn new(store: Arc<Store>, commands: Arc<CommandTable>) -> Self {
        CommandContext {
            db_index: 0,
            store,
            commands,
            client: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn ClientHandle>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_db(mut self, db_index: usize) -> Self {
        self.db_index = db_index;
        self
    }
}
