//! redis.call / redis.pcall bridge
//!
//! [`dispatch_call`] is the single entry point both variants share. It never
//! raises a Lua error itself; every failure (argument validation, command
//! resolution, handler error) is reported as an `{err = ...}` table. The thin
//! Lua wrappers installed by the interpreter turn that table into a raised
//! error for `redis.call` and hand it back verbatim for `redis.pcall`.

use mlua::{Lua, Value, Variadic};

use crate::command::CommandContext;
use crate::scripting::codec::{resp_to_lua, single_field_table};

/// Validate arguments, resolve the command and run it, converting the reply
/// for the script
pub fn dispatch_call<'lua>(
    lua: &'lua Lua,
    cmd: &CommandContext,
    args: Variadic<Value<'lua>>,
) -> mlua::Result<Value<'lua>> {
    if args.is_empty() {
        return err_table(lua, "Please specify at least one argument for redis.call()");
    }

    let mut argv: Vec<Vec<u8>> = Vec::with_capacity(args.len());
    for arg in args.iter() {
        match arg {
            Value::String(s) => argv.push(s.as_bytes().to_vec()),
            Value::Integer(_) | Value::Number(_) => {
                // numbers travel as their decimal rendering
                let s = lua.coerce_string(arg.clone())?;
                match s {
                    Some(s) => argv.push(s.as_bytes().to_vec()),
                    None => {
                        return err_table(
                            lua,
                            "Lua redis() command arguments must be strings or integers",
                        )
                    }
                }
            }
            _ => {
                return err_table(
                    lua,
                    "Lua redis() command arguments must be strings or integers",
                )
            }
        }
    }

    let name = String::from_utf8_lossy(&argv[0]).into_owned();
    let spec = match cmd.commands.lookup(&name) {
        Some(spec) => spec,
        None => return err_table(lua, "Unknown Redis command called from script"),
    };
    if spec.is_noscript() {
        return err_table(lua, "This Redis command is not allowed from scripts");
    }

    match (spec.handler)(cmd, &argv) {
        Ok(frame) => resp_to_lua(lua, &frame),
        Err(e) => err_table(lua, &e.to_string()),
    }
}

fn err_table<'lua>(lua: &'lua Lua, msg: &str) -> mlua::Result<Value<'lua>> {
    Ok(Value::Table(single_field_table(lua, "err", msg.as_bytes())?))
}
