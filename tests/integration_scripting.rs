//! End-to-end scripting tests through the EVAL/EVALSHA/SCRIPT surface
//!
//! The script cache is process-global, so tests in this binary serialize on
//! a single lock; SCRIPT FLUSH in one test must not race another test's
//! EVAL/EVALSHA pair.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use cinnabar::scripting::cache;
use cinnabar::scripting::{handle_eval, handle_evalsha, handle_script};
use cinnabar::{ClientHandle, CommandContext, CommandTable, Config, LuaInterpreter, RespFrame, Store};

static CACHE_LOCK: Mutex<()> = Mutex::new(());

fn lock_cache() -> MutexGuard<'static, ()> {
    // a test that panicked while holding the lock has already failed
    CACHE_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn setup(config: &Config) -> (LuaInterpreter, CommandContext) {
    let _ = env_logger::builder().is_test(true).try_init();
    let interp = LuaInterpreter::new(config).expect("engine construction");
    let cmd = CommandContext::new(
        Arc::new(Store::new(config.databases)),
        Arc::new(CommandTable::with_defaults()),
    );
    (interp, cmd)
}

fn frames(parts: &[&str]) -> Vec<RespFrame> {
    parts.iter().map(|p| RespFrame::bulk_string(p.as_bytes())).collect()
}

#[derive(Default)]
struct RecordingClient {
    detached: AtomicUsize,
    attached: AtomicUsize,
    continued: AtomicUsize,
}

impl ClientHandle for RecordingClient {
    fn detach(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
    fn attach(&self) {
        self.attached.fetch_add(1, Ordering::SeqCst);
    }
    fn event_loop_continue(&self) {
        self.continued.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn eval_runs_commands_against_store() {
    let _guard = lock_cache();
    let (interp, cmd) = setup(&Config::default());

    let reply = handle_eval(
        &interp,
        &cmd,
        &frames(&[
            "EVAL",
            "redis.call('SET', KEYS[1], ARGV[1]); return redis.call('GET', KEYS[1])",
            "1",
            "greeting",
            "hello",
        ]),
    );
    assert_eq!(reply, RespFrame::bulk_string(b"hello"));
    assert_eq!(
        cmd.store.get(0, b"greeting").unwrap(),
        Some(b"hello".to_vec())
    );
}

#[test]
fn eval_reply_conversions() {
    let _guard = lock_cache();
    let (interp, cmd) = setup(&Config::default());

    let reply = handle_eval(
        &interp,
        &cmd,
        &frames(&["EVAL", "return {1, 'two', {ok='fine'}, false}", "0"]),
    );
    assert_eq!(
        reply,
        RespFrame::array(vec![
            RespFrame::Integer(1),
            RespFrame::bulk_string(b"two"),
            RespFrame::simple_string("fine"),
            RespFrame::null_bulk(),
        ])
    );
}

#[test]
fn evalsha_requires_prior_eval_or_load() {
    let _guard = lock_cache();
    let (interp, cmd) = setup(&Config::default());

    let script = "return 'evalsha integration'";
    let sha = cache::sha1_hex(script.as_bytes());

    let reply = handle_evalsha(&interp, &cmd, &frames(&["EVALSHA", &sha, "0"]));
    assert_eq!(
        reply.error_text().unwrap(),
        "NOSCRIPT No matching script. Please use EVAL."
    );

    // anything that is not 40 characters is rejected before cache lookup
    let reply = handle_evalsha(&interp, &cmd, &frames(&["EVALSHA", "abc123", "0"]));
    assert!(reply.error_text().unwrap().starts_with("NOSCRIPT"));

    handle_eval(&interp, &cmd, &frames(&["EVAL", script, "0"]));
    let reply = handle_evalsha(&interp, &cmd, &frames(&["EVALSHA", &sha, "0"]));
    assert_eq!(reply, RespFrame::bulk_string(b"evalsha integration"));
}

#[test]
fn evalsha_resolves_on_another_worker() {
    let _guard = lock_cache();
    let (interp_a, cmd) = setup(&Config::default());
    let (interp_b, _) = setup(&Config::default());

    let script = "return 'cross worker'";
    let sha = cache::sha1_hex(script.as_bytes());
    handle_eval(&interp_a, &cmd, &frames(&["EVAL", script, "0"]));

    // worker B has never compiled the script; the shared cache supplies it
    let reply = handle_evalsha(&interp_b, &cmd, &frames(&["EVALSHA", &sha, "0"]));
    assert_eq!(reply, RespFrame::bulk_string(b"cross worker"));
}

#[test]
fn script_load_exists_flush() {
    let _guard = lock_cache();
    let (interp, cmd) = setup(&Config::default());

    let script = "return 'load flow'";
    let sha = cache::sha1_hex(script.as_bytes());

    let reply = handle_script(&interp, &frames(&["SCRIPT", "LOAD", script]));
    assert_eq!(reply, RespFrame::bulk_string(sha.as_bytes()));

    let reply = handle_script(&interp, &frames(&["SCRIPT", "EXISTS", &sha, &"0".repeat(40)]));
    assert_eq!(
        reply,
        RespFrame::array(vec![RespFrame::Integer(1), RespFrame::Integer(0)])
    );

    // LOAD is enough for a hash-only invocation
    let reply = handle_evalsha(&interp, &cmd, &frames(&["EVALSHA", &sha, "0"]));
    assert_eq!(reply, RespFrame::bulk_string(b"load flow"));

    let reply = handle_script(&interp, &frames(&["SCRIPT", "FLUSH"]));
    assert_eq!(reply, RespFrame::ok());

    let reply = handle_script(&interp, &frames(&["SCRIPT", "EXISTS", &sha]));
    assert_eq!(reply, RespFrame::array(vec![RespFrame::Integer(0)]));

    let reply = handle_evalsha(&interp, &cmd, &frames(&["EVALSHA", &sha, "0"]));
    assert!(reply.error_text().unwrap().starts_with("NOSCRIPT"));
}

#[test]
fn script_load_rejects_broken_source() {
    let _guard = lock_cache();
    let (interp, _) = setup(&Config::default());

    let broken = "return (((";
    let reply = handle_script(&interp, &frames(&["SCRIPT", "LOAD", broken]));
    assert!(reply
        .error_text()
        .unwrap()
        .contains("Error compiling script (new function)"));

    // a rejected script must not become visible to EXISTS
    let sha = cache::sha1_hex(broken.as_bytes());
    let reply = handle_script(&interp, &frames(&["SCRIPT", "EXISTS", &sha]));
    assert_eq!(reply, RespFrame::array(vec![RespFrame::Integer(0)]));
}

#[test]
fn script_exists_with_no_hashes_is_empty_array() {
    let _guard = lock_cache();
    let (interp, _) = setup(&Config::default());

    let reply = handle_script(&interp, &frames(&["SCRIPT", "EXISTS"]));
    assert_eq!(reply, RespFrame::array(vec![]));
}

#[test]
fn script_unknown_subcommand() {
    let _guard = lock_cache();
    let (interp, _) = setup(&Config::default());

    let reply = handle_script(&interp, &frames(&["SCRIPT", "BOGUS"]));
    assert_eq!(
        reply.error_text().unwrap(),
        "ERR Unknown SCRIPT subcommand or wrong number of arguments"
    );
}

#[test]
fn slow_script_detaches_client_and_reattaches() {
    let _guard = lock_cache();
    let mut config = Config::default();
    config.lua_time_limit = 5;
    let (interp, cmd) = setup(&config);

    let client = Arc::new(RecordingClient::default());
    let cmd = cmd.with_client(client.clone());

    // long enough to trip the 5ms budget, but finite
    let reply = handle_eval(
        &interp,
        &cmd,
        &frames(&[
            "EVAL",
            "local x = 0\nfor i = 1, 20000000 do x = x + i end\nreturn 'slow done'",
            "0",
        ]),
    );
    assert_eq!(reply, RespFrame::bulk_string(b"slow done"));
    assert_eq!(client.detached.load(Ordering::SeqCst), 1);
    assert_eq!(client.attached.load(Ordering::SeqCst), 1);
    assert!(client.continued.load(Ordering::SeqCst) > 0);
}

#[test]
fn script_kill_stops_runaway_script() {
    let _guard = lock_cache();
    let mut config = Config::default();
    config.lua_time_limit = 5;

    let script = "while true do end -- kill target";
    let sha = cache::sha1_hex(script.as_bytes());

    let client = Arc::new(RecordingClient::default());
    let (tx, rx) = mpsc::channel();
    let worker_client = client.clone();
    let worker_script = script.to_string();
    let worker = std::thread::spawn(move || {
        let (interp, cmd) = setup(&config);
        let cmd = cmd.with_client(worker_client);
        let reply = handle_eval(&interp, &cmd, &frames(&["EVAL", &worker_script, "0"]));
        tx.send(reply).unwrap();
    });

    // issue targeted kills from another worker until the script dies
    let (killer, _) = setup(&Config::default());
    let deadline = Instant::now() + Duration::from_secs(10);
    let reply = loop {
        match rx.recv_timeout(Duration::from_millis(20)) {
            Ok(reply) => break reply,
            Err(RecvTimeoutError::Timeout) => {
                assert!(Instant::now() < deadline, "script was never killed");
                handle_script(&killer, &frames(&["SCRIPT", "KILL", &sha]));
            }
            Err(RecvTimeoutError::Disconnected) => panic!("worker died without replying"),
        }
    };
    worker.join().unwrap();

    let text = reply.error_text().expect("killed script must reply an error");
    assert!(
        text.contains("Script killed by user with SCRIPT KILL"),
        "unexpected reply: {}",
        text
    );
    // the budget tripped before the kill landed, so the client was parked
    // and must be returned to the event loop afterwards
    assert_eq!(client.detached.load(Ordering::SeqCst), 1);
    assert_eq!(client.attached.load(Ordering::SeqCst), 1);
}

#[test]
fn script_kill_without_running_scripts() {
    let _guard = lock_cache();
    let (interp, _) = setup(&Config::default());

    let reply = handle_script(&interp, &frames(&["SCRIPT", "KILL"]));
    assert_eq!(
        reply.error_text().unwrap(),
        "NOTBUSY No scripts in execution right now."
    );
}

#[test]
fn scripts_cannot_reenter_scripting_commands() {
    let _guard = lock_cache();
    let (interp, cmd) = setup(&Config::default());

    let reply = handle_eval(
        &interp,
        &cmd,
        &frames(&["EVAL", "return redis.call('EVAL', 'return 1', '0')", "0"]),
    );
    assert!(reply
        .error_text()
        .unwrap()
        .contains("This Redis command is not allowed from scripts"));
}
