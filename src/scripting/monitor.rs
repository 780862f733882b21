//! In-flight script monitor
//!
//! The interpreter installs an instruction-count hook for every invocation;
//! the hook calls [`tick`]. Soft timeouts detach the client so the event loop
//! can keep servicing other connections while the script runs to completion.
//! Kill and abort requests are the only things that stop a script early, and
//! they stop it by raising a Lua error from inside the hook.

use std::sync::Arc;

use log::warn;

use crate::command::ClientHandle;
use crate::scripting::registry::ExecContext;

/// Error raised inside the script when a kill or abort request is observed
pub const KILLED_MSG: &str = "Script killed by user with SCRIPT KILL...";

/// One monitor pass. Returns an error to terminate the running script.
pub fn tick(
    ctx: &ExecContext,
    client: Option<&Arc<dyn ClientHandle>>,
    time_limit_ms: u64,
) -> mlua::Result<()> {
    if ctx.kill_requested() || ctx.abort_requested() {
        return Err(mlua::Error::RuntimeError(KILLED_MSG.to_string()));
    }

    if time_limit_ms > 0 && !ctx.timed_out() && ctx.elapsed_ms() >= time_limit_ms {
        ctx.mark_timed_out();
        warn!(
            "Slow script f_{} detected, running for {}ms",
            ctx.func(),
            ctx.elapsed_ms()
        );
        if let Some(client) = client {
            client.detach();
        }
    }

    if ctx.timed_out() {
        if let Some(client) = client {
            client.event_loop_continue();
        }
    }

    Ok(())
}
