//! Command execution engine.
//!
//! [`CommandExecutor::execute`] is the single entry point for a client
//! command. Every command goes through the same steps:
//!
//! 1. Argument validation. A rejected command marks the session dirty.
//! 2. The authentication gate (`security.requirepass`).
//! 3. The pub/sub gate.
//! 4. The single-writer section, held until the reply is built. Function
//!    calls and any `redis.call` they make run inside it.
//!
//! FUNCTION, FCALL, and FCALL_RO are served by the [`functions`](super::functions)
//! subsystem. AUTH and SELECT are handled here. Everything else is forwarded
//! to the store dispatcher.


use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::SharedConfig;
use crate::error::{FerriteError, Result};
use crate::protocol::Frame;
use crate::storage::Store;

use super::dispatcher::{CallContext, SharedDispatcher, StoreDispatcher};
use super::functions::handlers::function_command;
use super::functions::invoker::{self, CallMode, FunctionCall};
use super::functions::registry::{CollisionPolicy, Registry};
use super::session::Session;

/// Commands accepted while the session is in pub/sub mode
const PUBSUB_ALLOWED: &[&str] = &[
    "SUBSCRIBE",
    "UNSUBSCRIBE",
    "PSUBSCRIBE",
    "PUNSUBSCRIBE",
    "SSUBSCRIBE",
    "SUNSUBSCRIBE",
    "PING",
    "QUIT",
    "RESET",
];

/// A command after argument validation
enum Request<'a> {
    Auth(&'a [Bytes]),
    Select(&'a Bytes),
    Function(&'a [Bytes]),
    Call(&'a [Bytes], CallMode),
    Store(&'a str, &'a [Bytes]),
}

/// Executes client commands against the store and the function registry
pub struct CommandExecutor {
    config: SharedConfig,
    store: Arc<Store>,
    dispatcher: SharedDispatcher,
    /// Function registry. Its lock is also the store-wide single-writer
    /// section.
    registry: Mutex<Registry>,
}

impl CommandExecutor {
    /// Create an executor with an in-memory store sized from `config`
    pub fn new(config: SharedConfig) -> Self {
        let store = Arc::new(Store::new(config.storage.databases));
        let dispatcher = Arc::new(StoreDispatcher::new(store.clone()));
        Self::with_dispatcher(config, store, dispatcher)
    }

    /// Create an executor that forwards store commands to `dispatcher`
    pub fn with_dispatcher(config: SharedConfig, store: Arc<Store>, dispatcher: SharedDispatcher) -> Self {
        let policy = if config.functions.allow_function_override {
            CollisionPolicy::Override
        } else {
            CollisionPolicy::Reject
        };

        Self {
            config,
            store,
            dispatcher,
            registry: Mutex::new(Registry::new(policy)),
        }
    }

    /// The configuration this executor was built with
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Number of loaded function libraries
    pub fn library_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Execute one command (`argv[0]` is the command name)
    pub fn execute(&self, session: &mut Session, argv: &[Bytes]) -> Frame {
        let Some((name, args)) = argv.split_first() else {
            return FerriteError::UnknownCommand(String::new()).to_frame();
        };
        let name = String::from_utf8_lossy(name).to_uppercase();
        tracing::trace!(command = %name, args = args.len(), db = session.db(), "Executing command");

        let request = match self.parse_request(&name, args) {
            Ok(request) => request,
            Err(e) => {
                session.mark_dirty();
                return e.to_frame();
            }
        };

        if let Err(e) = self.check_gates(session, &name) {
            return e.to_frame();
        }

        match self.run(session, request) {
            Ok(frame) => frame,
            Err(e) => {
                if e.is_argument_error() {
                    session.mark_dirty();
                }
                e.to_frame()
            }
        }
    }

    /// Arity checks only; argument values are validated after the gates
    fn parse_request<'a>(&self, name: &'a str, args: &'a [Bytes]) -> Result<Request<'a>> {
        match name {
            "AUTH" => {
                if args.is_empty() || args.len() > 2 {
                    return Err(FerriteError::WrongArity("auth".to_string()));
                }
                Ok(Request::Auth(args))
            }
            "SELECT" => {
                let [index] = args else {
                    return Err(FerriteError::WrongArity("select".to_string()));
                };
                Ok(Request::Select(index))
            }
            "FUNCTION" => {
                if args.is_empty() {
                    return Err(FerriteError::WrongArity("function".to_string()));
                }
                Ok(Request::Function(args))
            }
            "FCALL" | "FCALL_RO" => {
                let mode = if name == "FCALL" {
                    CallMode::ReadWrite
                } else {
                    CallMode::ReadOnly
                };
                if args.len() < 2 {
                    return Err(FerriteError::WrongArity(mode.command_name().to_string()));
                }
                Ok(Request::Call(args, mode))
            }
            _ => Ok(Request::Store(name, args)),
        }
    }

    fn check_gates(&self, session: &Session, name: &str) -> Result<()> {
        if self.config.security.requirepass.is_some()
            && !session.is_authenticated()
            && name != "AUTH"
        {
            return Err(FerriteError::NoAuth);
        }

        if session.is_subscribed() && !PUBSUB_ALLOWED.contains(&name) {
            return Err(FerriteError::PubSubContext(name.to_lowercase()));
        }

        Ok(())
    }

    fn run(&self, session: &mut Session, request: Request<'_>) -> Result<Frame> {
        match request {
            Request::Auth(args) => self.auth(session, args),
            Request::Select(index) => {
                let index: i64 = std::str::from_utf8(index)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(FerriteError::NotInteger)?;
                if index < 0 || index >= self.store.num_databases() as i64 {
                    return Err(FerriteError::InvalidDbIndex);
                }
                session.select(index as u8);
                Ok(Frame::ok())
            }
            Request::Function(args) => {
                let mut registry = self.registry.lock();
                function_command(&mut registry, args)
            }
            Request::Call(args, mode) => {
                let call = FunctionCall::parse(args, mode)?;
                let registry = self.registry.lock();
                invoker::invoke(&registry, &call, mode, self.dispatcher.clone(), session.db())
            }
            Request::Store(name, args) => {
                let _section = self.registry.lock();
                Ok(self
                    .dispatcher
                    .dispatch(&CallContext::client(session.db()), name, args))
            }
        }
    }

    /// AUTH [username] password
    fn auth(&self, session: &mut Session, args: &[Bytes]) -> Result<Frame> {
        let Some(expected) = self.config.security.requirepass.as_deref() else {
            return Ok(Frame::error(
                "ERR AUTH <password> called without any password configured for the default user. \
                 Are you sure your configuration is correct?",
            ));
        };

        let (username, password) = match args {
            [password] => (&b"default"[..], password.as_ref()),
            [username, password] => (username.as_ref(), password.as_ref()),
            _ => return Err(FerriteError::WrongArity("auth".to_string())),
        };

        if username == b"default" && password == expected.as_bytes() {
            session.set_authenticated(true);
            Ok(Frame::ok())
        } else {
            tracing::warn!("Failed AUTH attempt");
            Err(FerriteError::InvalidPassword)
        }
    }
}
