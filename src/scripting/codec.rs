//! Lua <-> RESP conversion
//!
//! The mapping is not a bijection and is not meant to round-trip. Scripts see
//! command replies through [`resp_to_lua`] and their return values travel back
//! through [`lua_to_resp`]; both directions follow the conventions clients
//! expect from EVAL.

use mlua::{Lua, Table, Value};

use crate::protocol::RespFrame;

/// Convert a script value into the frame sent to the client.
///
/// Numbers are truncated to integers. A table is inspected for a string `err`
/// field first, then a string `ok` field; otherwise it is read as an array by
/// scanning indices from 1 and stopping at the first nil. Unconvertible kinds
/// (functions, userdata, threads) become a null bulk.
pub fn lua_to_resp(value: &Value) -> mlua::Result<RespFrame> {
    Ok(match value {
        Value::Nil => RespFrame::null_bulk(),
        Value::Boolean(false) => RespFrame::null_bulk(),
        Value::Boolean(true) => RespFrame::Integer(1),
        Value::Integer(n) => RespFrame::Integer(*n),
        Value::Number(n) => RespFrame::Integer(*n as i64),
        Value::String(s) => RespFrame::bulk_string(s.as_bytes()),
        Value::Table(t) => table_to_resp(t)?,
        _ => RespFrame::null_bulk(),
    })
}

fn table_to_resp(table: &Table) -> mlua::Result<RespFrame> {
    if let Value::String(err) = table.raw_get::<_, Value>("err")? {
        return Ok(RespFrame::error(sanitize_line(err.as_bytes())));
    }
    if let Value::String(ok) = table.raw_get::<_, Value>("ok")? {
        return Ok(RespFrame::simple_string(sanitize_line(ok.as_bytes())));
    }

    let mut items = Vec::new();
    for i in 1.. {
        let item: Value = table.raw_get(i)?;
        if item == Value::Nil {
            break;
        }
        items.push(lua_to_resp(&item)?);
    }
    Ok(RespFrame::array(items))
}

/// Status and error lines cannot carry CRLF; fold it into a space
fn sanitize_line(bytes: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(bytes);
    text.replace("\r\n", " ").into_bytes()
}

/// Convert a command reply into the value `redis.call` hands to the script.
///
/// Null replies of any kind become boolean false so that scripts can branch
/// on existence with a plain `if`.
pub fn resp_to_lua<'lua>(lua: &'lua Lua, frame: &RespFrame) -> mlua::Result<Value<'lua>> {
    Ok(match frame {
        RespFrame::Integer(n) => Value::Integer(*n),
        RespFrame::Double(d) => Value::Number(*d),
        RespFrame::BulkString(Some(bytes)) => Value::String(lua.create_string(&bytes[..])?),
        RespFrame::BulkString(None) | RespFrame::Array(None) | RespFrame::Null => {
            Value::Boolean(false)
        }
        RespFrame::SimpleString(s) => {
            Value::Table(single_field_table(lua, "ok", &s[..])?)
        }
        RespFrame::Error(e) => Value::Table(single_field_table(lua, "err", &e[..])?),
        RespFrame::Array(Some(items)) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, resp_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
        RespFrame::Boolean(b) => Value::Boolean(*b),
    })
}

/// Build `{ ok = text }` / `{ err = text }` style tables
pub fn single_field_table<'lua>(
    lua: &'lua Lua,
    field: &str,
    text: &[u8],
) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table_with_capacity(0, 1)?;
    table.raw_set(field, lua.create_string(text)?)?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_value<'l>(lua: &'l Lua, script: &str) -> Value<'l> {
        lua.load(script).eval().unwrap()
    }

    #[test]
    fn test_lua_scalars_to_resp() {
        let lua = Lua::new();

        let v = eval_value(&lua, "return 3.99");
        assert_eq!(lua_to_resp(&v).unwrap(), RespFrame::Integer(3));

        let v = eval_value(&lua, "return true");
        assert_eq!(lua_to_resp(&v).unwrap(), RespFrame::Integer(1));

        let v = eval_value(&lua, "return false");
        assert_eq!(lua_to_resp(&v).unwrap(), RespFrame::null_bulk());

        let v = eval_value(&lua, "return 'hi'");
        assert_eq!(lua_to_resp(&v).unwrap(), RespFrame::bulk_string(b"hi"));
    }

    #[test]
    fn test_lua_table_to_resp() {
        let lua = Lua::new();

        let v = eval_value(&lua, "return {err='boom\\r\\nbang'}");
        assert_eq!(lua_to_resp(&v).unwrap(), RespFrame::error("boom bang"));

        let v = eval_value(&lua, "return {ok='fine'}");
        assert_eq!(lua_to_resp(&v).unwrap(), RespFrame::simple_string("fine"));

        // array conversion stops at the first nil
        let v = eval_value(&lua, "return {1, 'two', nil, 4}");
        assert_eq!(
            lua_to_resp(&v).unwrap(),
            RespFrame::array(vec![RespFrame::Integer(1), RespFrame::bulk_string(b"two")])
        );
    }

    #[test]
    fn test_resp_to_lua() {
        let lua = Lua::new();

        let v = resp_to_lua(&lua, &RespFrame::Integer(7)).unwrap();
        assert_eq!(v, Value::Integer(7));

        let v = resp_to_lua(&lua, &RespFrame::Double(3.5)).unwrap();
        assert_eq!(v, Value::Number(3.5));

        let v = resp_to_lua(&lua, &RespFrame::null_bulk()).unwrap();
        assert_eq!(v, Value::Boolean(false));

        let v = resp_to_lua(&lua, &RespFrame::ok()).unwrap();
        match v {
            Value::Table(t) => {
                let ok: String = t.raw_get("ok").unwrap();
                assert_eq!(ok, "OK");
            }
            other => panic!("expected table, got {:?}", other),
        }

        let v = resp_to_lua(
            &lua,
            &RespFrame::array(vec![RespFrame::bulk_string(b"a"), RespFrame::Null]),
        )
        .unwrap();
        match v {
            Value::Table(t) => {
                let first: String = t.raw_get(1).unwrap();
                assert_eq!(first, "a");
                let second: bool = t.raw_get(2).unwrap();
                assert!(!second);
            }
            other => panic!("expected table, got {:?}", other),
        }
    }
}
