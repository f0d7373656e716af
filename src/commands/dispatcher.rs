//! Store command dispatch
//!
//! [`CommandDispatcher`] is the seam between the function subsystem and the
//! data store: the executor forwards plain client commands through it, and
//! `redis.call` / `redis.pcall` reach it from inside a callback.
//!
//! [`StoreDispatcher`] is the in-memory implementation. It covers the string,
//! hash, list, and set commands callbacks commonly use.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::FerriteError;
use crate::protocol::Frame;
use crate::storage::{Store, Value};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Where a dispatched command came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    /// Database selected by the issuing connection
    pub db: u8,
    /// The command was issued by a callback through `redis.call`
    pub from_script: bool,
    /// The issuing callback may not write
    pub read_only: bool,
}

impl CallContext {
    /// Context for a command sent directly by a client
    pub fn client(db: u8) -> Self {
        Self {
            db,
            from_script: false,
            read_only: false,
        }
    }

    /// Context for a command issued by a callback
    pub fn script(db: u8, read_only: bool) -> Self {
        Self {
            db,
            from_script: true,
            read_only,
        }
    }
}

/// Generic command-dispatch entry point of the data store
pub trait CommandDispatcher: Send + Sync {
    /// Execute `name` with `args` and return the reply
    fn dispatch(&self, ctx: &CallContext, name: &str, args: &[Bytes]) -> Frame;

    /// Whether `name` mutates the keyspace
    fn is_write_command(&self, name: &str) -> bool;
}

/// Shared handle to a dispatcher
pub type SharedDispatcher = Arc<dyn CommandDispatcher>;

struct CommandInfo {
    name: &'static str,
    /// Redis arity: positive is exact, negative is a minimum (command name included)
    arity: i64,
    write: bool,
}

const COMMAND_INFO: &[CommandInfo] = &[
    CommandInfo { name: "PING", arity: -1, write: false },
    CommandInfo { name: "ECHO", arity: 2, write: false },
    CommandInfo { name: "GET", arity: 2, write: false },
    CommandInfo { name: "SET", arity: -3, write: true },
    CommandInfo { name: "DEL", arity: -2, write: true },
    CommandInfo { name: "EXISTS", arity: -2, write: false },
    CommandInfo { name: "INCR", arity: 2, write: true },
    CommandInfo { name: "INCRBY", arity: 3, write: true },
    CommandInfo { name: "DECR", arity: 2, write: true },
    CommandInfo { name: "DECRBY", arity: 3, write: true },
    CommandInfo { name: "APPEND", arity: 3, write: true },
    CommandInfo { name: "STRLEN", arity: 2, write: false },
    CommandInfo { name: "MGET", arity: -2, write: false },
    CommandInfo { name: "MSET", arity: -3, write: true },
    CommandInfo { name: "TYPE", arity: 2, write: false },
    CommandInfo { name: "HSET", arity: -4, write: true },
    CommandInfo { name: "HGET", arity: 3, write: false },
    CommandInfo { name: "HDEL", arity: -3, write: true },
    CommandInfo { name: "HGETALL", arity: 2, write: false },
    CommandInfo { name: "HINCRBY", arity: 4, write: true },
    CommandInfo { name: "HEXISTS", arity: 3, write: false },
    CommandInfo { name: "HLEN", arity: 2, write: false },
    CommandInfo { name: "LPUSH", arity: -3, write: true },
    CommandInfo { name: "RPUSH", arity: -3, write: true },
    CommandInfo { name: "LRANGE", arity: 4, write: false },
    CommandInfo { name: "LLEN", arity: 2, write: false },
    CommandInfo { name: "SADD", arity: -3, write: true },
    CommandInfo { name: "SREM", arity: -3, write: true },
    CommandInfo { name: "SISMEMBER", arity: 3, write: false },
    CommandInfo { name: "SCARD", arity: 2, write: false },
    CommandInfo { name: "SMEMBERS", arity: 2, write: false },
];

/// Commands that run scripts; never reachable from inside a callback
const SCRIPT_COMMANDS: &[&str] = &[
    "FUNCTION",
    "FCALL",
    "FCALL_RO",
    "EVAL",
    "EVAL_RO",
    "EVALSHA",
    "EVALSHA_RO",
    "SCRIPT",
];

fn command_info(name: &str) -> Option<&'static CommandInfo> {
    COMMAND_INFO.iter().find(|info| info.name == name)
}

fn arity_ok(arity: i64, argc: usize) -> bool {
    // argc excludes the command name
    let total = argc as i64 + 1;
    if arity >= 0 {
        total == arity
    } else {
        total >= -arity
    }
}

fn parse_i64(arg: &Bytes) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

/// Dispatcher executing commands against an in-memory [`Store`]
pub struct StoreDispatcher {
    store: Arc<Store>,
}

impl StoreDispatcher {
    /// Create a dispatcher over `store`
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

impl CommandDispatcher for StoreDispatcher {
    fn dispatch(&self, ctx: &CallContext, name: &str, args: &[Bytes]) -> Frame {
        let cmd = name.to_uppercase();

        if ctx.from_script && SCRIPT_COMMANDS.contains(&cmd.as_str()) {
            return FerriteError::NestedCallNotAllowed.to_frame();
        }

        let info = match command_info(&cmd) {
            Some(info) => info,
            None => return FerriteError::UnknownCommand(name.to_string()).to_frame(),
        };
        if !arity_ok(info.arity, args.len()) {
            return FerriteError::WrongArity(name.to_lowercase()).to_frame();
        }
        if ctx.read_only && self.is_write_command(&cmd) {
            return FerriteError::WriteCommandNotAllowed.to_frame();
        }
        if self.store.database(ctx.db).is_none() {
            return FerriteError::InvalidDbIndex.to_frame();
        }

        execute(&self.store, ctx.db, &cmd, args)
    }

    fn is_write_command(&self, name: &str) -> bool {
        command_info(&name.to_uppercase()).is_some_and(|info| info.write)
    }
}

/// Execute an already validated command. Arity was checked against
/// `COMMAND_INFO`, so fixed argument positions are present.
fn execute(store: &Store, db: u8, cmd: &str, args: &[Bytes]) -> Frame {
    match cmd {
        "PING" => match args.first() {
            None => Frame::simple("PONG"),
            Some(msg) if args.len() == 1 => Frame::bulk(msg.clone()),
            Some(_) => FerriteError::WrongArity("ping".to_string()).to_frame(),
        },
        "ECHO" => Frame::bulk(args[0].clone()),
        "GET" => match store.get(db, &args[0]) {
            Some(Value::String(data)) => Frame::bulk(data),
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::null(),
        },
        "SET" => {
            // Only the plain form; options are not supported here
            if args.len() != 2 {
                return FerriteError::Syntax.to_frame();
            }
            store.set(db, args[0].clone(), Value::String(args[1].clone()));
            Frame::ok()
        }
        "DEL" => Frame::Integer(store.del(db, args)),
        "EXISTS" => Frame::Integer(store.exists(db, args)),
        "INCR" => incr_by(store, db, &args[0], 1),
        "DECR" => incr_by(store, db, &args[0], -1),
        "INCRBY" | "DECRBY" => match parse_i64(&args[1]) {
            Some(delta) if cmd == "INCRBY" => incr_by(store, db, &args[0], delta),
            Some(delta) => incr_by(store, db, &args[0], delta.saturating_neg()),
            None => FerriteError::NotInteger.to_frame(),
        },
        "APPEND" => {
            let mut data = match store.get(db, &args[0]) {
                Some(Value::String(existing)) => existing.to_vec(),
                Some(_) => return Frame::error(WRONGTYPE),
                None => Vec::new(),
            };
            data.extend_from_slice(&args[1]);
            let len = data.len() as i64;
            store.set(db, args[0].clone(), Value::String(Bytes::from(data)));
            Frame::Integer(len)
        }
        "STRLEN" => match store.get(db, &args[0]) {
            Some(Value::String(data)) => Frame::Integer(data.len() as i64),
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::Integer(0),
        },
        "MGET" => Frame::array(
            args.iter()
                .map(|key| match store.get(db, key) {
                    Some(Value::String(data)) => Frame::bulk(data),
                    _ => Frame::null(),
                })
                .collect(),
        ),
        "MSET" => {
            if args.len() % 2 != 0 {
                return FerriteError::WrongArity("mset".to_string()).to_frame();
            }
            for pair in args.chunks(2) {
                store.set(db, pair[0].clone(), Value::String(pair[1].clone()));
            }
            Frame::ok()
        }
        "TYPE" => match store.get(db, &args[0]) {
            Some(value) => Frame::simple(value.type_name()),
            None => Frame::simple("none"),
        },
        "HSET" => {
            if (args.len() - 1) % 2 != 0 {
                return FerriteError::WrongArity("hset".to_string()).to_frame();
            }
            let mut hash = match store.get(db, &args[0]) {
                Some(Value::Hash(h)) => h,
                Some(_) => return Frame::error(WRONGTYPE),
                None => HashMap::new(),
            };
            let added = args[1..]
                .chunks(2)
                .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                .count();
            store.set(db, args[0].clone(), Value::Hash(hash));
            Frame::Integer(added as i64)
        }
        "HGET" => match store.get(db, &args[0]) {
            Some(Value::Hash(hash)) => match hash.get(&args[1]) {
                Some(value) => Frame::bulk(value.clone()),
                None => Frame::null(),
            },
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::null(),
        },
        "HDEL" => match store.get(db, &args[0]) {
            Some(Value::Hash(mut hash)) => {
                let removed = args[1..].iter().filter(|f| hash.remove(*f).is_some()).count();
                if hash.is_empty() {
                    store.del(db, std::slice::from_ref(&args[0]));
                } else {
                    store.set(db, args[0].clone(), Value::Hash(hash));
                }
                Frame::Integer(removed as i64)
            }
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::Integer(0),
        },
        "HGETALL" => match store.get(db, &args[0]) {
            Some(Value::Hash(hash)) => {
                let mut fields: Vec<_> = hash.into_iter().collect();
                fields.sort();
                Frame::array(
                    fields
                        .into_iter()
                        .flat_map(|(k, v)| [Frame::bulk(k), Frame::bulk(v)])
                        .collect(),
                )
            }
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::array(vec![]),
        },
        "HINCRBY" => {
            let delta = match parse_i64(&args[2]) {
                Some(d) => d,
                None => return FerriteError::NotInteger.to_frame(),
            };
            let mut hash = match store.get(db, &args[0]) {
                Some(Value::Hash(h)) => h,
                Some(_) => return Frame::error(WRONGTYPE),
                None => HashMap::new(),
            };
            let current = match hash.get(&args[1]) {
                Some(v) => match parse_i64(v) {
                    Some(n) => n,
                    None => return Frame::error("ERR hash value is not an integer"),
                },
                None => 0,
            };
            let updated = match current.checked_add(delta) {
                Some(n) => n,
                None => return Frame::error("ERR increment or decrement would overflow"),
            };
            hash.insert(args[1].clone(), Bytes::from(updated.to_string()));
            store.set(db, args[0].clone(), Value::Hash(hash));
            Frame::Integer(updated)
        }
        "HEXISTS" => match store.get(db, &args[0]) {
            Some(Value::Hash(hash)) => Frame::Integer(hash.contains_key(&args[1]) as i64),
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::Integer(0),
        },
        "HLEN" => match store.get(db, &args[0]) {
            Some(Value::Hash(hash)) => Frame::Integer(hash.len() as i64),
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::Integer(0),
        },
        "LPUSH" | "RPUSH" => {
            let mut list = match store.get(db, &args[0]) {
                Some(Value::List(l)) => l,
                Some(_) => return Frame::error(WRONGTYPE),
                None => VecDeque::new(),
            };
            for value in &args[1..] {
                if cmd == "LPUSH" {
                    list.push_front(value.clone());
                } else {
                    list.push_back(value.clone());
                }
            }
            let len = list.len() as i64;
            store.set(db, args[0].clone(), Value::List(list));
            Frame::Integer(len)
        }
        "LRANGE" => {
            let (start, stop) = match (parse_i64(&args[1]), parse_i64(&args[2])) {
                (Some(start), Some(stop)) => (start, stop),
                _ => return FerriteError::NotInteger.to_frame(),
            };
            match store.get(db, &args[0]) {
                Some(Value::List(list)) => lrange(&list, start, stop),
                Some(_) => Frame::error(WRONGTYPE),
                None => Frame::array(vec![]),
            }
        }
        "LLEN" => match store.get(db, &args[0]) {
            Some(Value::List(list)) => Frame::Integer(list.len() as i64),
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::Integer(0),
        },
        "SADD" => {
            let mut set = match store.get(db, &args[0]) {
                Some(Value::Set(s)) => s,
                Some(_) => return Frame::error(WRONGTYPE),
                None => HashSet::new(),
            };
            let added = args[1..].iter().filter(|m| set.insert((*m).clone())).count();
            store.set(db, args[0].clone(), Value::Set(set));
            Frame::Integer(added as i64)
        }
        "SREM" => match store.get(db, &args[0]) {
            Some(Value::Set(mut set)) => {
                let removed = args[1..].iter().filter(|m| set.remove(*m)).count();
                if set.is_empty() {
                    store.del(db, std::slice::from_ref(&args[0]));
                } else {
                    store.set(db, args[0].clone(), Value::Set(set));
                }
                Frame::Integer(removed as i64)
            }
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::Integer(0),
        },
        "SISMEMBER" => match store.get(db, &args[0]) {
            Some(Value::Set(set)) => Frame::Integer(set.contains(&args[1]) as i64),
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::Integer(0),
        },
        "SCARD" => match store.get(db, &args[0]) {
            Some(Value::Set(set)) => Frame::Integer(set.len() as i64),
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::Integer(0),
        },
        "SMEMBERS" => match store.get(db, &args[0]) {
            Some(Value::Set(set)) => {
                let mut members: Vec<_> = set.into_iter().collect();
                members.sort();
                Frame::array(members.into_iter().map(Frame::bulk).collect())
            }
            Some(_) => Frame::error(WRONGTYPE),
            None => Frame::array(vec![]),
        },
        _ => FerriteError::UnknownCommand(cmd.to_string()).to_frame(),
    }
}

/// Helper function for INCR/DECR/INCRBY/DECRBY
fn incr_by(store: &Store, db: u8, key: &Bytes, delta: i64) -> Frame {
    let current = match store.get(db, key) {
        Some(Value::String(data)) => match parse_i64(&data) {
            Some(n) => n,
            None => return FerriteError::NotInteger.to_frame(),
        },
        Some(_) => return Frame::error(WRONGTYPE),
        None => 0,
    };
    match current.checked_add(delta) {
        Some(updated) => {
            store.set(db, key.clone(), Value::String(Bytes::from(updated.to_string())));
            Frame::Integer(updated)
        }
        None => Frame::error("ERR increment or decrement would overflow"),
    }
}

fn lrange(list: &VecDeque<Bytes>, start: i64, stop: i64) -> Frame {
    let len = list.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return Frame::array(vec![]);
    }
    Frame::array(
        list.iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|v| Frame::bulk(v.clone()))
            .collect(),
    )
}
