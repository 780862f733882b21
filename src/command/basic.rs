//! Built-in command handlers
//!
//! A small but real command set so scripts have something to call. Each
//! handler takes the full argument vector (`args[0]` is the command name)
//! and produces a RESP reply or a command error.

use super::{CommandContext, CommandTable, CMD_NOSCRIPT, CMD_WRITE};
use crate::error::{CommandError, Result};
use crate::protocol::resp::RespFrame;

pub fn register_defaults(table: &mut CommandTable) {
    table.register("PING", cmd_ping, 0);
    table.register("ECHO", cmd_echo, 0);
    table.register("GET", cmd_get, 0);
    table.register("SET", cmd_set, CMD_WRITE);
    table.register("DEL", cmd_del, CMD_WRITE);
    table.register("EXISTS", cmd_exists, 0);
    table.register("INCR", cmd_incr, CMD_WRITE);
    table.register("DECR", cmd_decr, CMD_WRITE);

    // Dispatched at the server loop level, registered here so the bridge
    // can resolve them and refuse them inside scripts.
    table.register("EVAL", cmd_server_only, CMD_NOSCRIPT | CMD_WRITE);
    table.register("EVALSHA", cmd_server_only, CMD_NOSCRIPT | CMD_WRITE);
    table.register("SCRIPT", cmd_server_only, CMD_NOSCRIPT);
    table.register("MULTI", cmd_server_only, CMD_NOSCRIPT);
    table.register("EXEC", cmd_server_only, CMD_NOSCRIPT);
    table.register("WATCH", cmd_server_only, CMD_NOSCRIPT);
}

fn wrong_args(name: &str) -> crate::error::CinnabarError {
    CommandError::WrongNumberOfArgs(name.to_lowercase()).into()
}

fn cmd_server_only(_ctx: &CommandContext, args: &[Vec<u8>]) -> Result<RespFrame> {
    let name = String::from_utf8_lossy(&args[0]).into_owned();
    Err(CommandError::Generic(format!("'{}' must be dispatched by the server loop", name)).into())
}

fn cmd_ping(_ctx: &CommandContext, args: &[Vec<u8>]) -> Result<RespFrame> {
    match args.len() {
        1 => Ok(RespFrame::simple_string("PONG")),
        2 => Ok(RespFrame::bulk_string(&args[1])),
        _ => Err(wrong_args("ping")),
    }
}

fn cmd_echo(_ctx: &CommandContext, args: &[Vec<u8>]) -> Result<RespFrame> {
    if args.len() != 2 {
        return Err(wrong_args("echo"));
    }
    Ok(RespFrame::bulk_string(&args[1]))
}

fn cmd_get(ctx: &CommandContext, args: &[Vec<u8>]) -> Result<RespFrame> {
    if args.len() != 2 {
        return Err(wrong_args("get"));
    }
    match ctx.store.get(ctx.db_index, &args[1])? {
        Some(value) => Ok(RespFrame::bulk_string(value)),
        None => Ok(RespFrame::null_bulk()),
    }
}

fn cmd_set(ctx: &CommandContext, args: &[Vec<u8>]) -> Result<RespFrame> {
    if args.len() != 3 {
        return Err(wrong_args("set"));
    }
    ctx.store
        .set(ctx.db_index, args[1].clone(), args[2].clone())?;
    Ok(RespFrame::ok())
}

fn cmd_del(ctx: &CommandContext, args: &[Vec<u8>]) -> Result<RespFrame> {
    if args.len() < 2 {
        return Err(wrong_args("del"));
    }
    let mut deleted = 0;
    for key in &args[1..] {
        if ctx.store.delete(ctx.db_index, key)? {
            deleted += 1;
        }
    }
    Ok(RespFrame::Integer(deleted))
}

fn cmd_exists(ctx: &CommandContext, args: &[Vec<u8>]) -> Result<RespFrame> {
    if args.len() < 2 {
        return Err(wrong_args("exists"));
    }
    let mut count = 0;
    for key in &args[1..] {
        if ctx.store.exists(ctx.db_index, key)? {
            count += 1;
        }
    }
    Ok(RespFrame::Integer(count))
}

fn cmd_incr(ctx: &CommandContext, args: &[Vec<u8>]) -> Result<RespFrame> {
    if args.len() != 2 {
        return Err(wrong_args("incr"));
    }
    Ok(RespFrame::Integer(ctx.store.incr_by(ctx.db_index, &args[1], 1)?))
}

fn cmd_decr(ctx: &CommandContext, args: &[Vec<u8>]) -> Result<RespFrame> {
    if args.len() != 2 {
        return Err(wrong_args("decr"));
    }
    Ok(RespFrame::Integer(ctx.store.incr_by(ctx.db_index, &args[1], -1)?))
}
