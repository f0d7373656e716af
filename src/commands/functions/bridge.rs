//! Value bridge between Lua and the reply model
//!
//! Conversions follow the Redis RESP2 scripting rules:
//!   - Integer reply -> Lua number
//!   - Bulk string -> Lua string
//!   - Array -> Lua table (1-indexed)
//!   - Nil/Null -> Lua `false`
//!   - Status reply -> Lua table `{ok = ...}`
//!   - Error reply -> raised error, or `{err = ...}` under `redis.pcall`
//!   - Lua number -> Integer reply (truncated)
//!   - Lua string -> Bulk string
//!   - Lua table with "ok" / "err" -> Status / Error reply
//!   - Lua table (array) -> Array reply, up to the first nil
//!   - Lua boolean false/nil -> Null reply
//!   - Lua boolean true -> Integer 1
//!
//! Every direction is total. Values that have no reply shape (functions,
//! userdata, threads) become null.

use bytes::Bytes;
use mlua::{Lua, Result as LuaResult, Table, Value as LuaValue};

use crate::protocol::Frame;

/// Tables nested deeper than this are not walked further
const MAX_DEPTH: usize = 64;

/// A value crossing the script boundary, in either direction
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// Absence of a value
    Null,
    /// Lua boolean `true` (false collapses to `Null`)
    Boolean(bool),
    /// Integer
    Integer(i64),
    /// Binary-safe string
    Str(Bytes),
    /// 1-indexed sequence
    Sequence(Vec<ScriptValue>),
    /// Status reply (`{ok = ...}`)
    Status(Bytes),
    /// Error reply (`{err = ...}`)
    Error(Bytes),
}

impl ScriptValue {
    /// Convert a value returned by a callback
    pub fn from_lua(value: LuaValue) -> Self {
        from_lua_depth(value, 0)
    }

    /// Convert a store reply for delivery to a script
    pub fn from_frame(frame: Frame) -> Self {
        match frame {
            Frame::Simple(s) => ScriptValue::Status(s),
            Frame::Error(e) => ScriptValue::Error(e),
            Frame::Integer(n) => ScriptValue::Integer(n),
            Frame::Bulk(Some(b)) => ScriptValue::Str(b),
            Frame::Bulk(None) | Frame::Array(None) | Frame::Null => ScriptValue::Null,
            Frame::Boolean(true) => ScriptValue::Integer(1),
            Frame::Boolean(false) => ScriptValue::Null,
            Frame::Double(d) => ScriptValue::Str(Bytes::from(d.to_string())),
            Frame::Array(Some(frames)) => {
                ScriptValue::Sequence(frames.into_iter().map(ScriptValue::from_frame).collect())
            }
            Frame::Map(map) => {
                // RESP2 flattens maps into key/value arrays
                let mut entries: Vec<_> = map.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                let mut flat = Vec::with_capacity(entries.len() * 2);
                for (key, value) in entries {
                    flat.push(ScriptValue::Str(key));
                    flat.push(ScriptValue::from_frame(value));
                }
                ScriptValue::Sequence(flat)
            }
        }
    }

    /// Push this value into the interpreter.
    ///
    /// An `Error` raises when `pcall` is false; under `redis.pcall` it is
    /// handed back as an `{err = ...}` table.
    pub fn into_lua(self, lua: &Lua, pcall: bool) -> LuaResult<LuaValue> {
        match self {
            ScriptValue::Null => Ok(LuaValue::Boolean(false)),
            ScriptValue::Boolean(b) => Ok(LuaValue::Boolean(b)),
            ScriptValue::Integer(n) => Ok(LuaValue::Integer(n)),
            ScriptValue::Str(b) => Ok(LuaValue::String(lua.create_string(&b)?)),
            ScriptValue::Sequence(items) => {
                let table = lua.create_table_with_capacity(items.len(), 0)?;
                for (i, item) in items.into_iter().enumerate() {
                    table.raw_set(i + 1, item.into_lua(lua, pcall)?)?;
                }
                Ok(LuaValue::Table(table))
            }
            ScriptValue::Status(s) => {
                let table = lua.create_table()?;
                table.set("ok", lua.create_string(&s)?)?;
                Ok(LuaValue::Table(table))
            }
            ScriptValue::Error(e) => {
                if pcall {
                    let table = lua.create_table()?;
                    table.set("err", lua.create_string(&e)?)?;
                    Ok(LuaValue::Table(table))
                } else {
                    Err(mlua::Error::RuntimeError(
                        String::from_utf8_lossy(&e).into_owned(),
                    ))
                }
            }
        }
    }
}

impl From<ScriptValue> for Frame {
    fn from(value: ScriptValue) -> Self {
        match value {
            ScriptValue::Null | ScriptValue::Boolean(false) => Frame::null(),
            ScriptValue::Boolean(true) => Frame::Integer(1),
            ScriptValue::Integer(n) => Frame::Integer(n),
            ScriptValue::Str(b) => Frame::bulk(b),
            ScriptValue::Sequence(items) => {
                Frame::array(items.into_iter().map(Frame::from).collect())
            }
            ScriptValue::Status(s) => Frame::Simple(s),
            ScriptValue::Error(e) => Frame::Error(e),
        }
    }
}

fn from_lua_depth(value: LuaValue, depth: usize) -> ScriptValue {
    match value {
        LuaValue::Nil | LuaValue::Boolean(false) => ScriptValue::Null,
        LuaValue::Boolean(true) => ScriptValue::Boolean(true),
        LuaValue::Integer(n) => ScriptValue::Integer(n),
        LuaValue::Number(n) => number_reply(n),
        LuaValue::String(s) => ScriptValue::Str(Bytes::from(s.as_bytes().to_vec())),
        LuaValue::Table(t) => table_reply(&t, depth),
        _ => ScriptValue::Null,
    }
}

/// Redis truncates Lua numbers to integers
fn number_reply(n: f64) -> ScriptValue {
    if n.is_finite() && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        ScriptValue::Integer(n.trunc() as i64)
    } else {
        ScriptValue::Str(Bytes::from(n.to_string()))
    }
}

fn table_reply(t: &Table, depth: usize) -> ScriptValue {
    if depth >= MAX_DEPTH {
        return ScriptValue::Error(Bytes::from_static(b"ERR reached lua stack limit"));
    }
    if let Ok(LuaValue::String(s)) = t.raw_get::<LuaValue>("ok") {
        return ScriptValue::Status(Bytes::from(s.as_bytes().to_vec()));
    }
    if let Ok(LuaValue::String(s)) = t.raw_get::<LuaValue>("err") {
        return ScriptValue::Error(Bytes::from(s.as_bytes().to_vec()));
    }

    let mut items = Vec::new();
    let mut i = 1;
    while let Ok(v) = t.raw_get::<LuaValue>(i) {
        if matches!(v, LuaValue::Nil) {
            break;
        }
        items.push(from_lua_depth(v, depth + 1));
        i += 1;
    }
    ScriptValue::Sequence(items)
}

/// Convert one `redis.call` argument to its wire form
pub fn to_command_arg(value: &LuaValue) -> Option<Bytes> {
    match value {
        LuaValue::String(s) => Some(Bytes::from(s.as_bytes().to_vec())),
        LuaValue::Integer(n) => Some(Bytes::from(n.to_string())),
        LuaValue::Number(n) if n.fract() == 0.0 && n.is_finite() => {
            Some(Bytes::from((*n as i64).to_string()))
        }
        LuaValue::Number(n) => Some(Bytes::from(n.to_string())),
        _ => None,
    }
}
