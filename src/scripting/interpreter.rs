//! Per-worker Lua engine
//!
//! Each worker thread owns one [`LuaInterpreter`]. The engine is built once
//! and reused across invocations: compiled script functions accumulate in its
//! global namespace under their `f_<sha1>` identifiers, and per-invocation
//! state (KEYS, ARGV, the active execution context) is swapped in and out
//! around each call.
//!
//! The sandbox loads only the table, string, math and debug libraries on top
//! of the base library; os, io and package are never present. After setup a
//! metatable on the global table rejects global reads and writes from inside
//! functions, which keeps scripts self-contained and makes a script's
//! behavior independent of what ran before it on the same engine.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use log::{error, info, trace, warn, Level};
use mlua::{Lua, LuaOptions, StdLib, Value, Variadic};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::command::CommandContext;
use crate::config::Config;
use crate::error::{CinnabarError, Result};
use crate::protocol::RespFrame;
use crate::scripting::bridge;
use crate::scripting::cache;
use crate::scripting::codec::{lua_to_resp, single_field_table};
use crate::scripting::monitor;
use crate::scripting::registry::{self, ExecContext};

/// Monitor hook cadence, in VM instructions
const INSTRUCTION_BATCH: u32 = 100_000;

/// Incremental GC step every this many invocations
const GC_EVERY: usize = 50;

/// Reply for a hash-only invocation whose script is not cached
pub const NOSCRIPT_MSG: &str = "NOSCRIPT No matching script. Please use EVAL.";

/// Installs redis.call/redis.pcall wrappers around the low-level dispatch
/// callback, the xpcall error handler, and the assert2 builtin. Runs before
/// the strict-globals metatable is in place.
const SETUP_CHUNK: &str = r#"
local impl = __redis_call_impl
__redis_call_impl = nil

redis.call = function(...)
    local r = impl(...)
    if type(r) == 'table' and r.err ~= nil then
        error(r, 0)
    end
    return r
end

redis.pcall = function(...)
    return impl(...)
end

function __redis__err__handler(err)
    local i = debug.getinfo(2, 'nSl')
    if i and i.what == 'C' then
        i = debug.getinfo(3, 'nSl')
    end
    if type(err) == 'table' and err.err ~= nil then
        return err
    end
    if type(err) ~= 'string' then
        err = tostring(err)
    end
    if i and i.currentline and i.currentline > 0 then
        return i.source .. ':' .. i.currentline .. ': ' .. err
    end
    return err
end

local report = __redis_assert_report
__redis_assert_report = nil

local function render(v)
    if type(v) == 'table' then
        local parts = {}
        for k, val in pairs(v) do
            parts[#parts + 1] = tostring(k) .. '=' .. render(val)
        end
        return '{' .. table.concat(parts, ',') .. '}'
    end
    return tostring(v)
end

function assert2(cond, ...)
    local info = debug.getinfo(2, 'Sl')
    local where = info.source .. ':' .. info.currentline
    local parts = {}
    for i = 1, select('#', ...) do
        parts[#parts + 1] = render((select(i, ...)))
    end
    report(cond and true or false, where, table.concat(parts, ' '))
    return cond
end
redis.assert2 = assert2

-- no filesystem access from scripts
loadfile = nil
dofile = nil
"#;

/// Rejects global variable creation and access except from main chunks and
/// C functions, matching the engine's own setup paths
const STRICT_GLOBALS_CHUNK: &str = r#"
local dbg = debug
local mt = {}
setmetatable(_G, mt)
mt.__newindex = function(t, n, v)
    local w = dbg.getinfo(2, 'S').what
    if w ~= 'main' and w ~= 'C' then
        error("Script attempted to create global variable '" .. tostring(n) .. "'", 2)
    end
    rawset(t, n, v)
end
mt.__index = function(t, n)
    local w = dbg.getinfo(2, 'S').what
    if w ~= 'main' and w ~= 'C' then
        error("Script attempted to access nonexistent global variable '" .. tostring(n) .. "'", 2)
    end
    return nil
end
"#;

/// State of the invocation currently running on this engine
struct ActiveCall {
    ctx: Arc<ExecContext>,
    cmd: CommandContext,
}

type ActiveSlot = Rc<RefCell<Option<ActiveCall>>>;

pub struct LuaInterpreter {
    lua: Lua,
    active: ActiveSlot,
    rng: Rc<RefCell<StdRng>>,
    gc_count: Cell<usize>,
    time_limit_ms: u64,
}

impl LuaInterpreter {
    pub fn new(config: &Config) -> Result<Self> {
        Self::build(config.lua_time_limit)
    }

    /// Discard the engine and build a fresh one. Compiled functions are
    /// lost; the shared cache re-materializes them on demand.
    pub fn reset(&mut self) -> Result<()> {
        *self = Self::build(self.time_limit_ms)?;
        Ok(())
    }

    fn build(time_limit_ms: u64) -> Result<Self> {
        // The debug library backs the error handler, assert2 and the
        // strict-globals metatable. It is never exposed past setup in a way
        // scripts can abuse beyond getinfo.
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::DEBUG;
        let lua = unsafe { Lua::unsafe_new_with(libs, LuaOptions::default()) };

        let active: ActiveSlot = Rc::new(RefCell::new(None));
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(0)));

        let interp = LuaInterpreter {
            lua,
            active,
            rng,
            gc_count: Cell::new(0),
            time_limit_ms,
        };
        interp.install_builtins().map_err(engine_error)?;
        interp.install_hook(time_limit_ms);
        Ok(interp)
    }

    fn install_builtins(&self) -> mlua::Result<()> {
        let lua = &self.lua;
        let globals = lua.globals();

        let redis = lua.create_table()?;

        redis.raw_set("LOG_DEBUG", 0)?;
        redis.raw_set("LOG_VERBOSE", 1)?;
        redis.raw_set("LOG_NOTICE", 2)?;
        redis.raw_set("LOG_WARNING", 3)?;

        redis.raw_set(
            "log",
            lua.create_function(|lua, args: Variadic<Value>| {
                if args.len() < 2 {
                    return Err(mlua::Error::RuntimeError(
                        "redis.log() requires two arguments or more.".to_string(),
                    ));
                }
                let level = match &args[0] {
                    Value::Integer(0) => Level::Debug,
                    Value::Integer(1) => Level::Trace,
                    Value::Integer(2) => Level::Info,
                    Value::Integer(3) => Level::Warn,
                    _ => {
                        return Err(mlua::Error::RuntimeError(
                            "Invalid debug level.".to_string(),
                        ))
                    }
                };
                let mut parts = Vec::with_capacity(args.len() - 1);
                for arg in args.iter().skip(1) {
                    match lua.coerce_string(arg.clone())? {
                        Some(s) => parts.push(String::from_utf8_lossy(s.as_bytes()).into_owned()),
                        None => parts.push(format!("{:?}", arg)),
                    }
                }
                log::log!(level, "{}", parts.join(" "));
                Ok(())
            })?,
        )?;

        redis.raw_set(
            "sha1hex",
            lua.create_function(|_, s: mlua::String| Ok(cache::sha1_hex(s.as_bytes())))?,
        )?;

        redis.raw_set(
            "error_reply",
            lua.create_function(|lua, msg: mlua::String| {
                single_field_table(lua, "err", msg.as_bytes())
            })?,
        )?;

        redis.raw_set(
            "status_reply",
            lua.create_function(|lua, msg: mlua::String| {
                single_field_table(lua, "ok", msg.as_bytes())
            })?,
        )?;

        globals.raw_set("redis", redis)?;

        // Low-level command dispatch; the setup chunk wraps it into
        // redis.call and redis.pcall and then removes this global.
        let call_active = self.active.clone();
        globals.raw_set(
            "__redis_call_impl",
            lua.create_function(move |lua, args: Variadic<Value>| {
                let cmd = call_active.borrow().as_ref().map(|c| c.cmd.clone());
                match cmd {
                    Some(cmd) => bridge::dispatch_call(lua, &cmd, args),
                    None => Err(mlua::Error::RuntimeError(
                        "redis.call is only available during script execution".to_string(),
                    )),
                }
            })?,
        )?;

        // Assertion reporter behind the assert2 builtin. A failed assertion
        // does not stop the script directly; it flags the invocation for
        // abort and the monitor hook terminates it.
        let assert_active = self.active.clone();
        globals.raw_set(
            "__redis_assert_report",
            lua.create_function(
                move |_, (passed, location, detail): (bool, String, String)| {
                    if passed {
                        info!("[PASS] {} {}", location, detail);
                    } else {
                        error!("[FAIL] {} {}", location, detail);
                        if let Some(call) = assert_active.borrow().as_ref() {
                            call.ctx.request_abort();
                        }
                    }
                    Ok(())
                },
            )?,
        )?;

        lua.load(SETUP_CHUNK).set_name("@engine_setup").exec()?;

        // Deterministic math.random, reseeded at every invocation
        let math: mlua::Table = globals.raw_get("math")?;
        let rand_rng = self.rng.clone();
        math.raw_set(
            "random",
            lua.create_function(move |_, bounds: Variadic<i64>| {
                let r: f64 = rand_rng.borrow_mut().gen();
                match bounds.len() {
                    0 => Ok(Value::Number(r)),
                    1 => {
                        let upper = bounds[0];
                        if upper < 1 {
                            return Err(mlua::Error::RuntimeError(
                                "interval is empty".to_string(),
                            ));
                        }
                        Ok(Value::Integer((r * upper as f64).floor() as i64 + 1))
                    }
                    _ => {
                        let (lower, upper) = (bounds[0], bounds[1]);
                        if upper < lower {
                            return Err(mlua::Error::RuntimeError(
                                "interval is empty".to_string(),
                            ));
                        }
                        let span = (upper - lower + 1) as f64;
                        Ok(Value::Integer((r * span).floor() as i64 + lower))
                    }
                }
            })?,
        )?;
        let seed_rng = self.rng.clone();
        math.raw_set(
            "randomseed",
            lua.create_function(move |_, seed: i64| {
                *seed_rng.borrow_mut() = StdRng::seed_from_u64(seed as u64);
                Ok(())
            })?,
        )?;

        lua.load(STRICT_GLOBALS_CHUNK)
            .set_name("@strict_globals")
            .exec()?;

        Ok(())
    }

    fn install_hook(&self, time_limit_ms: u64) {
        let hook_active = self.active.clone();
        self.lua.set_hook(
            mlua::HookTriggers {
                every_nth_instruction: Some(INSTRUCTION_BATCH),
                ..Default::default()
            },
            move |_lua, _debug| {
                let snapshot = hook_active
                    .borrow()
                    .as_ref()
                    .map(|call| (call.ctx.clone(), call.cmd.client.clone()));
                match snapshot {
                    Some((ctx, client)) => monitor::tick(&ctx, client.as_ref(), time_limit_ms),
                    None => Ok(()),
                }
            },
        );
    }

    /// EVAL: hash the script, cache it, and invoke it
    pub fn eval(
        &self,
        cmd: &CommandContext,
        script: &[u8],
        keys: &[Vec<u8>],
        argv: &[Vec<u8>],
    ) -> Result<RespFrame> {
        let sha = cache::sha1_hex(script);
        cache::save_script(&cache::function_name(&sha), script);
        self.invoke(cmd, &sha, keys, argv)
    }

    /// EVALSHA: invoke a previously cached script by its bare hex hash
    pub fn eval_sha(
        &self,
        cmd: &CommandContext,
        sha: &str,
        keys: &[Vec<u8>],
        argv: &[Vec<u8>],
    ) -> Result<RespFrame> {
        self.invoke(cmd, sha, keys, argv)
    }

    /// SCRIPT LOAD: compile the script and, only if that succeeds, cache it
    /// and return its hash. Broken source must leave no trace; a cache
    /// entry that never compiled would make SCRIPT EXISTS lie.
    pub fn load(&self, script: &[u8]) -> Result<String> {
        let sha = cache::sha1_hex(script);
        self.define_function(&sha, script)?;
        cache::save_script(&cache::function_name(&sha), script);
        Ok(sha)
    }

    fn invoke(
        &self,
        cmd: &CommandContext,
        sha: &str,
        keys: &[Vec<u8>],
        argv: &[Vec<u8>],
    ) -> Result<RespFrame> {
        let fname = self.ensure_function(sha)?;

        self.set_global_array("KEYS", keys).map_err(engine_error)?;
        self.set_global_array("ARGV", argv).map_err(engine_error)?;

        // Scripts observe an identical random sequence on every run
        *self.rng.borrow_mut() = StdRng::seed_from_u64(0);

        let ctx = Arc::new(ExecContext::new(sha));
        registry::register(ctx.clone());
        *self.active.borrow_mut() = Some(ActiveCall {
            ctx: ctx.clone(),
            cmd: cmd.clone(),
        });

        trace!("invoking {}", fname);
        let outcome = self.run_protected(&fname);

        *self.active.borrow_mut() = None;
        registry::unregister(&ctx);

        if ctx.timed_out() {
            if let Some(client) = &cmd.client {
                client.attach();
            }
            warn!(
                "Slow script {} finished after {}ms",
                fname,
                ctx.elapsed_ms()
            );
        }

        let count = self.gc_count.get() + 1;
        if count >= GC_EVERY {
            self.gc_count.set(0);
            let _ = self.lua.gc_step();
        } else {
            self.gc_count.set(count);
        }

        outcome
    }

    fn run_protected(&self, fname: &str) -> Result<RespFrame> {
        let globals = self.lua.globals();
        let func: mlua::Function = globals.raw_get(fname).map_err(engine_error)?;
        let xpcall: mlua::Function = globals.raw_get("xpcall").map_err(engine_error)?;
        let handler: mlua::Function = globals
            .raw_get("__redis__err__handler")
            .map_err(engine_error)?;

        let (ok, result): (bool, Value) = xpcall
            .call((func, handler))
            .map_err(|e| run_error(fname, &strip_engine_noise(&e.to_string())))?;

        if ok {
            lua_to_resp(&result).map_err(engine_error)
        } else {
            Err(match &result {
                Value::Table(t) => match t.raw_get::<_, Option<mlua::String>>("err") {
                    Ok(Some(err)) => CinnabarError::Script(
                        String::from_utf8_lossy(err.as_bytes()).into_owned(),
                    ),
                    _ => run_error(fname, "unknown error"),
                },
                Value::String(s) => run_error(
                    fname,
                    &strip_engine_noise(&String::from_utf8_lossy(s.as_bytes())),
                ),
                other => run_error(fname, &format!("{:?}", other)),
            })
        }
    }

    /// Resolve a bare hash to its compiled function, defining it from the
    /// cached source when this engine has not seen it yet
    fn ensure_function(&self, sha: &str) -> Result<String> {
        let fname = cache::function_name(sha);
        let source = match cache::get_script(&fname) {
            Some(source) => source,
            None => return Err(CinnabarError::Script(NOSCRIPT_MSG.to_string())),
        };

        let globals = self.lua.globals();
        let existing: Value = globals.raw_get(fname.as_str()).map_err(engine_error)?;
        if matches!(existing, Value::Function(_)) {
            return Ok(fname);
        }

        self.define_function(sha, &source)
    }

    /// Compile and define `f_<sha>` from raw source bytes. Touches neither
    /// the cache nor the global on failure.
    fn define_function(&self, sha: &str, source: &[u8]) -> Result<String> {
        let fname = cache::function_name(sha);

        // Wrapping the body in a function definition keeps the body outside
        // main-chunk scope, so the strict-globals metatable applies to it.
        // Built as bytes; the source may not be valid UTF-8.
        let mut funcdef = Vec::with_capacity(fname.len() + source.len() + 16);
        funcdef.extend_from_slice(b"function ");
        funcdef.extend_from_slice(fname.as_bytes());
        funcdef.extend_from_slice(b"() ");
        funcdef.extend_from_slice(source);
        funcdef.extend_from_slice(b" end");

        let func = self
            .lua
            .load(funcdef.as_slice())
            .set_name("@user_script")
            .into_function()
            .map_err(|e| {
                CinnabarError::Script(format!(
                    "Error compiling script (new function): {}",
                    strip_engine_noise(&e.to_string())
                ))
            })?;
        func.call::<_, ()>(()).map_err(|e| {
            CinnabarError::Script(format!(
                "Error running script (new function): {}",
                strip_engine_noise(&e.to_string())
            ))
        })?;

        Ok(fname)
    }

    fn set_global_array(&self, name: &str, items: &[Vec<u8>]) -> mlua::Result<()> {
        let table = self.lua.create_table_with_capacity(items.len(), 0)?;
        for (i, item) in items.iter().enumerate() {
            table.raw_set(i + 1, self.lua.create_string(&item[..])?)?;
        }
        self.lua.globals().raw_set(name, table)
    }
}

fn engine_error(e: mlua::Error) -> CinnabarError {
    CinnabarError::Internal(format!("lua engine: {}", e))
}

fn run_error(fname: &str, detail: &str) -> CinnabarError {
    CinnabarError::Script(format!("Error running script (call to {}): {}", fname, detail))
}

/// Trim engine-internal decoration from an error string: the generic
/// "runtime error:"/"syntax error:" prefixes and any appended traceback
fn strip_engine_noise(text: &str) -> String {
    let mut text = text.to_string();
    if let Some(pos) = text.find("\nstack traceback:") {
        text.truncate(pos);
    }
    let text = text.replacen("runtime error: ", "", 1);
    let text = text.replacen("syntax error: ", "", 1);
    text.trim().to_string()
}
