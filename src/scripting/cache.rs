//! Global script cache: content hash -> source bytes
//!
//! Scripts are content-addressed: a script is identified by the hex SHA1 of
//! its source, and its compiled function is registered in the engine's
//! global namespace under `f_<sha1>`. Source is kept as raw bytes; scripts
//! may embed arbitrary binary data in string literals and the cached bytes
//! must stay identical to what was hashed. The cache maps the prefixed
//! identifier back to the original source so a hash-only invocation
//! (EVALSHA) can re-materialize the function on an engine instance that has
//! not compiled it yet, and so EXISTS queries can be answered without
//! touching any engine.
//!
//! Entries are removed only by SCRIPT FLUSH, never by size or age. Flushing
//! does not decompile functions already defined on an engine instance; it
//! only affects future hash-only resolution and existence queries.

use std::collections::HashMap;
use std::sync::Mutex;

use lazy_static::lazy_static;
use sha1::{Digest, Sha1};

/// Structural prefix distinguishing compiled script functions from other
/// globals in the engine namespace
pub const FUNC_PREFIX: &str = "f_";

lazy_static! {
    static ref SCRIPTS: Mutex<HashMap<String, Vec<u8>>> = Mutex::new(HashMap::new());
}

/// Hex SHA1 digest of `data`; 40 lowercase hex characters
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Prefixed function identifier for a bare hex hash
pub fn function_name(sha1: &str) -> String {
    format!("{}{}", FUNC_PREFIX, sha1)
}

/// Record a script under its prefixed identifier
pub fn save_script(funcname: &str, body: &[u8]) {
    let mut cache = SCRIPTS.lock().unwrap();
    cache.insert(funcname.to_string(), body.to_vec());
}

/// Fetch a script body by prefixed identifier
pub fn get_script(funcname: &str) -> Option<Vec<u8>> {
    let cache = SCRIPTS.lock().unwrap();
    cache.get(funcname).cloned()
}

/// Existence query by prefixed identifier
pub fn script_exists(funcname: &str) -> bool {
    let cache = SCRIPTS.lock().unwrap();
    cache.contains_key(funcname)
}

/// Drop every cached script (SCRIPT FLUSH)
pub fn clear_scripts() {
    let mut cache = SCRIPTS.lock().unwrap();
    cache.clear();
}
