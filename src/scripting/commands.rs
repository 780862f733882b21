//! EVAL / EVALSHA / SCRIPT command surface
//!
//! These handlers sit above the command table: they need the worker's
//! [`LuaInterpreter`], which plain table handlers never see, so the server
//! loop dispatches them directly. Script failures never propagate as `Err`;
//! every outcome is rendered into the reply frame here.

use crate::command::CommandContext;
use crate::error::CinnabarError;
use crate::protocol::RespFrame;
use crate::scripting::cache;
use crate::scripting::interpreter::{LuaInterpreter, NOSCRIPT_MSG};
use crate::scripting::registry;

/// EVAL script numkeys [key ...] [arg ...]
pub fn handle_eval(
    interp: &LuaInterpreter,
    cmd: &CommandContext,
    parts: &[RespFrame],
) -> RespFrame {
    let (script, keys, argv) = match parse_eval_args(parts, "eval") {
        Ok(parsed) => parsed,
        Err(frame) => return frame,
    };
    match interp.eval(cmd, &script, &keys, &argv) {
        Ok(frame) => frame,
        Err(e) => script_error_frame(e),
    }
}

/// EVALSHA sha1 numkeys [key ...] [arg ...]
pub fn handle_evalsha(
    interp: &LuaInterpreter,
    cmd: &CommandContext,
    parts: &[RespFrame],
) -> RespFrame {
    let (sha, keys, argv) = match parse_eval_args(parts, "evalsha") {
        Ok(parsed) => parsed,
        Err(frame) => return frame,
    };
    // a malformed hash can never match a cached script
    if sha.len() != 40 {
        return RespFrame::error(NOSCRIPT_MSG);
    }
    let sha = String::from_utf8_lossy(&sha).into_owned();
    match interp.eval_sha(cmd, &sha, &keys, &argv) {
        Ok(frame) => frame,
        Err(e) => script_error_frame(e),
    }
}

/// SCRIPT LOAD|EXISTS|FLUSH|KILL
pub fn handle_script(interp: &LuaInterpreter, parts: &[RespFrame]) -> RespFrame {
    let sub = match parts.get(1).and_then(frame_bytes) {
        Some(bytes) => String::from_utf8_lossy(bytes).to_uppercase(),
        None => {
            return RespFrame::error("ERR wrong number of arguments for 'script' command")
        }
    };

    match sub.as_str() {
        "LOAD" => {
            if parts.len() != 3 {
                return unknown_subcommand();
            }
            let script = match frame_bytes(&parts[2]) {
                Some(bytes) => bytes,
                None => return unknown_subcommand(),
            };
            match interp.load(script) {
                Ok(sha) => RespFrame::bulk_string(sha.as_bytes()),
                Err(e) => script_error_frame(e),
            }
        }
        "EXISTS" => {
            // zero hashes is legal and answers an empty array
            let mut flags = Vec::with_capacity(parts.len() - 2);
            for part in &parts[2..] {
                let exists = frame_bytes(part)
                    .map(|sha| {
                        let sha = String::from_utf8_lossy(sha);
                        cache::script_exists(&cache::function_name(&sha))
                    })
                    .unwrap_or(false);
                flags.push(RespFrame::Integer(exists as i64));
            }
            RespFrame::array(flags)
        }
        "FLUSH" => {
            if parts.len() != 2 {
                return unknown_subcommand();
            }
            cache::clear_scripts();
            RespFrame::ok()
        }
        "KILL" => {
            if parts.len() > 3 {
                return unknown_subcommand();
            }
            if registry::live_count() == 0 {
                return RespFrame::error("NOTBUSY No scripts in execution right now.");
            }
            let sha = parts
                .get(2)
                .and_then(frame_bytes)
                .map(|b| String::from_utf8_lossy(b).into_owned());
            registry::kill(sha.as_deref());
            RespFrame::ok()
        }
        _ => unknown_subcommand(),
    }
}

fn unknown_subcommand() -> RespFrame {
    RespFrame::error("ERR Unknown SCRIPT subcommand or wrong number of arguments")
}

type EvalArgs = (Vec<u8>, Vec<Vec<u8>>, Vec<Vec<u8>>);

/// Shared EVAL/EVALSHA argument parsing: subject (script or hash), then
/// numkeys splitting the tail into KEYS and ARGV
fn parse_eval_args(parts: &[RespFrame], name: &str) -> std::result::Result<EvalArgs, RespFrame> {
    if parts.len() < 3 {
        return Err(RespFrame::error(format!(
            "ERR wrong number of arguments for '{}' command",
            name
        )));
    }

    let subject = frame_bytes(&parts[1])
        .ok_or_else(|| RespFrame::error("ERR value is not a valid string"))?
        .to_vec();

    let numkeys_text = frame_bytes(&parts[2])
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();
    let numkeys: i64 = numkeys_text
        .trim()
        .parse()
        .map_err(|_| RespFrame::error("ERR value is not an integer or out of range"))?;

    if numkeys < 0 {
        return Err(RespFrame::error("ERR Number of keys can't be negative"));
    }
    let tail = parts.len() - 3;
    if numkeys as usize > tail {
        return Err(RespFrame::error(
            "ERR Number of keys can't be greater than number of args",
        ));
    }

    let mut keys = Vec::with_capacity(numkeys as usize);
    let mut argv = Vec::with_capacity(tail - numkeys as usize);
    for (i, part) in parts[3..].iter().enumerate() {
        let bytes = frame_bytes(part)
            .ok_or_else(|| RespFrame::error("ERR value is not a valid string"))?
            .to_vec();
        if i < numkeys as usize {
            keys.push(bytes);
        } else {
            argv.push(bytes);
        }
    }

    Ok((subject, keys, argv))
}

fn frame_bytes(frame: &RespFrame) -> Option<&[u8]> {
    match frame {
        RespFrame::BulkString(Some(bytes)) => Some(&bytes[..]),
        RespFrame::SimpleString(bytes) => Some(&bytes[..]),
        _ => None,
    }
}

/// Script errors carry their own error code when the first word is an
/// all-uppercase token; everything else gets the generic ERR code
fn script_error_frame(err: CinnabarError) -> RespFrame {
    let text = err.to_string();
    let first = text.split_whitespace().next().unwrap_or("");
    let has_code = first.len() > 1
        && first
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if has_code {
        RespFrame::error(text)
    } else {
        RespFrame::error(format!("ERR {}", text))
    }
}
