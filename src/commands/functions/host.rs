//! Sandboxed Lua interpreter for function libraries
//!
//! A [`ScriptHost`] wraps one interpreter instance. It is created fresh for
//! every load and every call, so nothing a callback leaves in the global
//! namespace survives past the command that ran it.
//!
//! The host has two phases. While a library body runs (`exec_library`),
//! `redis.register_function` stages callbacks. Once the body has finished,
//! registration is closed and [`ScriptHost::install_dispatcher`] may expose
//! `redis.call` / `redis.pcall`.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use mlua::{
    Function, Lua, LuaOptions, LuaSerdeExt, MultiValue, Result as LuaResult, StdLib, Table,
    Value as LuaValue,
};

use super::bridge::{self, ScriptValue};
use crate::commands::dispatcher::{CallContext, SharedDispatcher};
use crate::error::{FerriteError, Result};

/// Redis log levels for redis.log()
const LOG_DEBUG: i64 = 0;
const LOG_VERBOSE: i64 = 1;
const LOG_NOTICE: i64 = 2;
const LOG_WARNING: i64 = 3;

/// Globals removed from the base library
const BLOCKED_GLOBALS: &[&str] = &["dofile", "loadfile", "load", "collectgarbage"];

/// Capability flags a function may declare at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FunctionFlag {
    /// The function never writes; callable through FCALL_RO
    NoWrites,
    /// May run when the server is out of memory
    AllowOom,
    /// May run on a stale replica
    AllowStale,
    /// Refuses to run in cluster mode
    NoCluster,
    /// May touch keys from different slots
    AllowCrossSlotKeys,
}

impl FunctionFlag {
    /// Wire name of the flag
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionFlag::NoWrites => "no-writes",
            FunctionFlag::AllowOom => "allow-oom",
            FunctionFlag::AllowStale => "allow-stale",
            FunctionFlag::NoCluster => "no-cluster",
            FunctionFlag::AllowCrossSlotKeys => "allow-cross-slot-keys",
        }
    }

    /// Parse a wire flag name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "no-writes" => Some(FunctionFlag::NoWrites),
            "allow-oom" => Some(FunctionFlag::AllowOom),
            "allow-stale" => Some(FunctionFlag::AllowStale),
            "no-cluster" => Some(FunctionFlag::NoCluster),
            "allow-cross-slot-keys" => Some(FunctionFlag::AllowCrossSlotKeys),
            _ => None,
        }
    }
}

impl fmt::Display for FunctionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A callback staged by `redis.register_function`
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub callback: Function,
    pub flags: BTreeSet<FunctionFlag>,
    pub description: Option<String>,
}

impl Registration {
    /// Whether the function declared `no-writes`
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(&FunctionFlag::NoWrites)
    }
}

type Staging = Rc<RefCell<BTreeMap<String, Registration>>>;

/// One sandboxed interpreter instance
pub struct ScriptHost {
    lua: Lua,
    registrations: Staging,
    loading: Rc<Cell<bool>>,
}

impl ScriptHost {
    /// Create an interpreter with the restricted global namespace
    pub fn new() -> Result<Self> {
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE;
        let lua = Lua::new_with(libs, LuaOptions::default())
            .map_err(|e| FerriteError::Internal(e.to_string()))?;

        let host = Self {
            lua,
            registrations: Rc::new(RefCell::new(BTreeMap::new())),
            loading: Rc::new(Cell::new(false)),
        };
        host.setup_sandbox()
            .map_err(|e| FerriteError::Internal(e.to_string()))?;
        Ok(host)
    }

    fn setup_sandbox(&self) -> LuaResult<()> {
        let lua = &self.lua;
        let globals = lua.globals();

        for name in BLOCKED_GLOBALS {
            globals.set(*name, LuaValue::Nil)?;
        }

        let print_fn = lua.create_function(|_, args: MultiValue| {
            let line = args.iter().map(display_value).collect::<Vec<_>>().join("\t");
            tracing::debug!(target: "lua_script", "{}", line);
            Ok(())
        })?;
        globals.set("print", print_fn)?;

        let redis_table = lua.create_table()?;

        // redis.register_function(name, fn) or redis.register_function{...}
        let staging = Rc::clone(&self.registrations);
        let loading = Rc::clone(&self.loading);
        let register_fn = lua.create_function(move |_, args: MultiValue| {
            if !loading.get() {
                return Err(registration_error(
                    "redis.register_function can only be called on FUNCTION LOAD command",
                ));
            }
            let registration = parse_registration(args)?;
            staging
                .borrow_mut()
                .insert(registration.name.clone(), registration);
            Ok(())
        })?;
        redis_table.set("register_function", register_fn)?;

        // redis.status_reply(msg) -- Return a status reply table {ok = msg}
        let status_reply_fn = lua.create_function(|lua_ctx, msg: mlua::String| {
            let table = lua_ctx.create_table()?;
            table.set("ok", msg)?;
            Ok(table)
        })?;
        redis_table.set("status_reply", status_reply_fn)?;

        // redis.error_reply(msg) -- Return an error reply table {err = msg}
        let error_reply_fn = lua.create_function(|lua_ctx, msg: mlua::String| {
            let table = lua_ctx.create_table()?;
            table.set("err", msg)?;
            Ok(table)
        })?;
        redis_table.set("error_reply", error_reply_fn)?;

        let log_fn = lua.create_function(|_, (level, msg): (i64, String)| {
            match level {
                LOG_DEBUG => tracing::debug!(target: "lua_script", "{}", msg),
                LOG_VERBOSE | LOG_NOTICE => tracing::info!(target: "lua_script", "{}", msg),
                LOG_WARNING => tracing::warn!(target: "lua_script", "{}", msg),
                _ => {
                    return Err(mlua::Error::RuntimeError(
                        "Invalid debug level.".to_string(),
                    ))
                }
            }
            Ok(())
        })?;
        redis_table.set("log", log_fn)?;

        redis_table.set("LOG_DEBUG", LOG_DEBUG)?;
        redis_table.set("LOG_VERBOSE", LOG_VERBOSE)?;
        redis_table.set("LOG_NOTICE", LOG_NOTICE)?;
        redis_table.set("LOG_WARNING", LOG_WARNING)?;

        globals.set("redis", redis_table)?;
        globals.set("cjson", self.cjson_table()?)?;

        Ok(())
    }

    fn cjson_table(&self) -> LuaResult<Table> {
        let lua = &self.lua;
        let cjson = lua.create_table()?;

        let encode = lua.create_function(|lua_ctx, value: LuaValue| {
            let json: serde_json::Value = lua_ctx.from_value(value)?;
            serde_json::to_string(&json).map_err(mlua::Error::external)
        })?;
        cjson.set("encode", encode)?;

        let decode = lua.create_function(|lua_ctx, text: mlua::String| {
            let json: serde_json::Value =
                serde_json::from_slice(&text.as_bytes()).map_err(mlua::Error::external)?;
            lua_ctx.to_value(&json)
        })?;
        cjson.set("decode", decode)?;

        Ok(cjson)
    }

    /// Compile and run a library body with registration open.
    ///
    /// `library` names the chunk in interpreter error messages.
    pub fn exec_library(&self, library: &str, body: &str) -> Result<()> {
        let chunk = self
            .lua
            .load(body)
            .set_name(format!("={library}"))
            .into_function()
            .map_err(|e| FerriteError::compile(lua_error_message(&e)))?;

        self.loading.set(true);
        let result = chunk.call::<()>(());
        self.loading.set(false);

        result.map_err(|e| into_ferrite_error(&e))
    }

    /// Registrations staged so far, in name order
    pub fn registrations(&self) -> Vec<Registration> {
        self.registrations.borrow().values().cloned().collect()
    }

    /// Remove and return one staged registration
    pub fn take_registration(&self, name: &str) -> Option<Registration> {
        self.registrations.borrow_mut().remove(name)
    }

    /// Expose `redis.call` and `redis.pcall`, bound to `ctx`
    pub fn install_dispatcher(&self, dispatcher: SharedDispatcher, ctx: CallContext) -> Result<()> {
        self.try_install_dispatcher(dispatcher, ctx)
            .map_err(|e| FerriteError::Internal(e.to_string()))
    }

    fn try_install_dispatcher(&self, dispatcher: SharedDispatcher, ctx: CallContext) -> LuaResult<()> {
        let redis_table: Table = self.lua.globals().get("redis")?;

        // redis.call(cmd, ...) -- Execute a store command, raise error on failure
        let call_dispatcher = dispatcher.clone();
        let call_fn = self.lua.create_function(move |lua_ctx, args: MultiValue| {
            redis_call(lua_ctx, &call_dispatcher, &ctx, args, false)
        })?;
        redis_table.set("call", call_fn)?;

        // redis.pcall(cmd, ...) -- Execute a store command, return error as table
        let pcall_fn = self.lua.create_function(move |lua_ctx, args: MultiValue| {
            redis_call(lua_ctx, &dispatcher, &ctx, args, true)
        })?;
        redis_table.set("pcall", pcall_fn)?;

        Ok(())
    }

    /// Invoke a registered callback with `(keys, args)`.
    ///
    /// The same sequences are published as the `KEYS` and `ARGV` globals.
    pub fn call(&self, callback: &Function, keys: &[Bytes], args: &[Bytes]) -> Result<ScriptValue> {
        let (keys_table, argv_table) = self
            .set_arguments(keys, args)
            .map_err(|e| FerriteError::Internal(e.to_string()))?;

        let value = callback
            .call::<LuaValue>((keys_table, argv_table))
            .map_err(|e| into_ferrite_error(&e))?;
        Ok(ScriptValue::from_lua(value))
    }

    fn set_arguments(&self, keys: &[Bytes], args: &[Bytes]) -> LuaResult<(Table, Table)> {
        let globals = self.lua.globals();

        let keys_table = self.string_sequence(keys)?;
        globals.set("KEYS", keys_table.clone())?;

        let argv_table = self.string_sequence(args)?;
        globals.set("ARGV", argv_table.clone())?;

        Ok((keys_table, argv_table))
    }

    fn string_sequence(&self, items: &[Bytes]) -> LuaResult<Table> {
        let table = self.lua.create_table_with_capacity(items.len(), 0)?;
        for (i, item) in items.iter().enumerate() {
            table.raw_set(i + 1, self.lua.create_string(item)?)?;
        }
        Ok(table)
    }
}

/// Execute a store command from Lua (used by redis.call and redis.pcall)
fn redis_call(
    lua: &Lua,
    dispatcher: &SharedDispatcher,
    ctx: &CallContext,
    args: MultiValue,
    is_pcall: bool,
) -> LuaResult<LuaValue> {
    let (name, cmd_args) = match command_from_args(&args) {
        Ok(parsed) => parsed,
        Err(msg) => return ScriptValue::Error(Bytes::from(msg)).into_lua(lua, is_pcall),
    };

    let reply = dispatcher.dispatch(ctx, &name, &cmd_args);
    ScriptValue::from_frame(reply).into_lua(lua, is_pcall)
}

fn command_from_args(args: &MultiValue) -> std::result::Result<(String, Vec<Bytes>), &'static str> {
    let mut iter = args.iter();
    let name = match iter.next() {
        Some(LuaValue::String(s)) => s.to_string_lossy(),
        Some(_) => return Err("ERR Lua redis lib command arguments must be strings or integers"),
        None => return Err("ERR Please specify at least one argument for this redis lib call"),
    };

    let cmd_args = iter
        .map(bridge::to_command_arg)
        .collect::<Option<Vec<_>>>()
        .ok_or("ERR Lua redis lib command arguments must be strings or integers")?;

    Ok((name, cmd_args))
}

fn registration_error(msg: impl Into<String>) -> mlua::Error {
    mlua::Error::external(FerriteError::InvalidRegistration(msg.into()))
}

fn parse_registration(args: MultiValue) -> LuaResult<Registration> {
    let mut values: Vec<LuaValue> = args.into_iter().collect();
    match values.len() {
        1 => match values.pop() {
            Some(LuaValue::Table(spec)) => parse_registration_table(&spec),
            _ => Err(registration_error(
                "calling redis.register_function with a single argument is only applicable to Lua table (representing named arguments)",
            )),
        },
        2 => {
            let callback = values.pop();
            let name = values.pop();
            let name = match name {
                Some(LuaValue::String(s)) => s.to_string_lossy(),
                _ => return Err(registration_error("wrong function name type")),
            };
            let callback = match callback {
                Some(LuaValue::Function(f)) => f,
                _ => return Err(registration_error("wrong callback type given to redis.register_function")),
            };
            build_registration(name, callback, BTreeSet::new(), None)
        }
        _ => Err(registration_error("wrong number of arguments to redis.register_function")),
    }
}

fn parse_registration_table(spec: &Table) -> LuaResult<Registration> {
    let mut name = None;
    let mut callback = None;
    let mut flags = BTreeSet::new();
    let mut description = None;

    for pair in spec.clone().pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair?;
        let key = match key {
            LuaValue::String(s) => s.to_string_lossy(),
            _ => return Err(registration_error("named argument key given to redis.register_function is not a string")),
        };
        match (key.as_str(), value) {
            ("function_name", LuaValue::String(s)) => name = Some(s.to_string_lossy()),
            ("function_name", _) => {
                return Err(registration_error("function_name argument given to redis.register_function must be a string"))
            }
            ("callback", LuaValue::Function(f)) => callback = Some(f),
            ("callback", _) => {
                return Err(registration_error("callback argument given to redis.register_function must be a function"))
            }
            ("description", LuaValue::String(s)) => description = Some(s.to_string_lossy()),
            ("description", _) => {
                return Err(registration_error("description argument given to redis.register_function must be a string"))
            }
            ("flags", LuaValue::Table(t)) => flags = parse_flags(&t)?,
            ("flags", _) => {
                return Err(registration_error("flags argument to redis.register_function must be a table representing function flags"))
            }
            (other, _) => {
                return Err(registration_error(format!(
                    "unknown argument given to redis.register_function: {other}"
                )))
            }
        }
    }

    let name = name.ok_or_else(|| registration_error("redis.register_function must get a function name argument"))?;
    let callback = callback.ok_or_else(|| registration_error("redis.register_function must get a callback argument"))?;
    build_registration(name, callback, flags, description)
}

fn parse_flags(table: &Table) -> LuaResult<BTreeSet<FunctionFlag>> {
    let mut flags = BTreeSet::new();
    for value in table.clone().sequence_values::<LuaValue>() {
        let flag = match value? {
            LuaValue::String(s) => s.to_string_lossy(),
            _ => return Err(registration_error("unknown flag given")),
        };
        match FunctionFlag::parse(&flag) {
            Some(f) => {
                flags.insert(f);
            }
            None => return Err(registration_error(format!("unknown flag given: {flag}"))),
        }
    }
    Ok(flags)
}

fn build_registration(
    name: String,
    callback: Function,
    flags: BTreeSet<FunctionFlag>,
    description: Option<String>,
) -> LuaResult<Registration> {
    if !is_valid_function_name(&name) {
        return Err(registration_error(
            "Function names can only contain letters, numbers, or underscores(_) and must be at least one character long",
        ));
    }
    Ok(Registration {
        name,
        callback,
        flags,
        description,
    })
}

/// Function names are non-empty ASCII letters, digits, and underscores
pub fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn display_value(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(n) => n.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_string_lossy(),
        other => other.type_name().to_string(),
    }
}

/// Find a [`FerriteError`] carried through the interpreter, if any
fn find_ferrite_error(err: &mlua::Error) -> Option<FerriteError> {
    match err {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<FerriteError>().cloned(),
        mlua::Error::CallbackError { cause, .. } => find_ferrite_error(cause),
        mlua::Error::WithContext { cause, .. } => find_ferrite_error(cause),
        _ => None,
    }
}

/// The interpreter's message, without the Rust-side prefix or traceback
fn lua_error_message(err: &mlua::Error) -> String {
    let message = match err {
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::CallbackError { cause, .. } => return lua_error_message(cause),
        mlua::Error::WithContext { cause, .. } => return lua_error_message(cause),
        mlua::Error::ExternalError(inner) => inner.to_string(),
        other => other.to_string(),
    };
    match message.find("\nstack traceback:") {
        Some(pos) => message[..pos].to_string(),
        None => message,
    }
}

fn into_ferrite_error(err: &mlua::Error) -> FerriteError {
    find_ferrite_error(err).unwrap_or_else(|| FerriteError::runtime(lua_error_message(err)))
}
