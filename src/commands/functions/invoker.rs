//! FCALL / FCALL_RO
//!
//! Each call builds a fresh interpreter, re-runs the owning library's body
//! to bring the callback into scope, and invokes it with the supplied keys
//! and arguments.

use bytes::Bytes;

use super::host::ScriptHost;
use super::registry::Registry;
use crate::commands::dispatcher::{CallContext, SharedDispatcher};
use crate::error::{FerriteError, Result};
use crate::protocol::Frame;

/// Which entry point the call came through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// FCALL
    ReadWrite,
    /// FCALL_RO
    ReadOnly,
}

impl CallMode {
    /// Lowercase command name, used in arity errors
    pub fn command_name(&self) -> &'static str {
        match self {
            CallMode::ReadWrite => "fcall",
            CallMode::ReadOnly => "fcall_ro",
        }
    }
}

/// Parsed `<function> <numkeys> [key ...] [arg ...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub function: String,
    pub keys: Vec<Bytes>,
    pub args: Vec<Bytes>,
}

impl FunctionCall {
    /// Parse the arguments following the command name
    pub fn parse(args: &[Bytes], mode: CallMode) -> Result<Self> {
        if args.len() < 2 {
            return Err(FerriteError::WrongArity(mode.command_name().to_string()));
        }

        let function = String::from_utf8_lossy(&args[0]).into_owned();
        let numkeys: i64 = std::str::from_utf8(&args[1])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(FerriteError::NotInteger)?;

        if numkeys < 0 {
            return Err(FerriteError::NegativeKeyCount);
        }
        let remaining = args.len() - 2;
        let numkeys = usize::try_from(numkeys).map_err(|_| FerriteError::TooManyKeys)?;
        if numkeys > remaining {
            return Err(FerriteError::TooManyKeys);
        }

        Ok(Self {
            function,
            keys: args[2..2 + numkeys].to_vec(),
            args: args[2 + numkeys..].to_vec(),
        })
    }
}

/// Resolve and run `call`
pub fn invoke(
    registry: &Registry,
    call: &FunctionCall,
    mode: CallMode,
    dispatcher: SharedDispatcher,
    db: u8,
) -> Result<Frame> {
    let (function, library) = registry.lookup_function(&call.function)?;

    if mode == CallMode::ReadOnly && !function.is_read_only() {
        return Err(FerriteError::WriteInReadOnlyCall);
    }

    tracing::debug!(
        function = %function.name,
        library = %library.name,
        keys = call.keys.len(),
        args = call.args.len(),
        "Invoking function"
    );

    let host = ScriptHost::new()?;
    host.exec_library(&library.name, &library.code)?;
    let registration = host
        .take_registration(&function.name)
        .ok_or_else(|| FerriteError::FunctionNotFound(function.name.clone()))?;

    let read_only = function.is_read_only() || mode == CallMode::ReadOnly;
    host.install_dispatcher(dispatcher, CallContext::script(db, read_only))?;

    let value = host.call(&registration.callback, &call.keys, &call.args)?;
    Ok(Frame::from(value))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::commands::dispatcher::StoreDispatcher;
    use crate::commands::functions::loader;
    use crate::storage::Store;

    fn argv(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from(p.to_string())).collect()
    }

    fn setup(payload: &str) -> (Registry, SharedDispatcher, Arc<Store>) {
        let mut registry = Registry::default();
        loader::load(&mut registry, payload, false).unwrap();
        let store = Arc::new(Store::new(16));
        let dispatcher: SharedDispatcher = Arc::new(StoreDispatcher::new(store.clone()));
        (registry, dispatcher, store)
    }

    #[test]
    fn test_parse_call() {
        let call = FunctionCall::parse(&argv(&["f", "2", "k1", "k2", "a1"]), CallMode::ReadWrite).unwrap();
        assert_eq!(call.function, "f");
        assert_eq!(call.keys, argv(&["k1", "k2"]));
        assert_eq!(call.args, argv(&["a1"]));

        let call = FunctionCall::parse(&argv(&["f", "0"]), CallMode::ReadWrite).unwrap();
        assert!(call.keys.is_empty() && call.args.is_empty());
    }

    #[test]
    fn test_parse_call_errors() {
        assert_eq!(
            FunctionCall::parse(&argv(&["f"]), CallMode::ReadOnly).unwrap_err(),
            FerriteError::WrongArity("fcall_ro".to_string())
        );
        assert_eq!(
            FunctionCall::parse(&argv(&["f", "2", "k1"]), CallMode::ReadWrite).unwrap_err(),
            FerriteError::TooManyKeys
        );
        assert_eq!(
            FunctionCall::parse(&argv(&["f", "-1"]), CallMode::ReadWrite).unwrap_err(),
            FerriteError::NegativeKeyCount
        );
        assert_eq!(
            FunctionCall::parse(&argv(&["f", "x"]), CallMode::ReadWrite).unwrap_err(),
            FerriteError::NotInteger
        );
    }

    #[test]
    fn test_invoke_constant() {
        let (registry, dispatcher, _) =
            setup("#!lua name=mylib\nredis.register_function('f', function() return 42 end)");
        let call = FunctionCall::parse(&argv(&["f", "0"]), CallMode::ReadWrite).unwrap();
        assert_eq!(
            invoke(&registry, &call, CallMode::ReadWrite, dispatcher, 0).unwrap(),
            Frame::Integer(42)
        );
    }

    #[test]
    fn test_invoke_unknown_function() {
        let (registry, dispatcher, _) =
            setup("#!lua name=mylib\nredis.register_function('f', function() return 1 end)");
        let call = FunctionCall::parse(&argv(&["nope", "0"]), CallMode::ReadWrite).unwrap();
        assert_eq!(
            invoke(&registry, &call, CallMode::ReadWrite, dispatcher, 0).unwrap_err(),
            FerriteError::FunctionNotFound("nope".to_string())
        );
    }

    #[test]
    fn test_read_only_entry_point() {
        let (registry, dispatcher, _) = setup(
            "#!lua name=mylib\n\
             redis.register_function('writer', function() return 1 end)\n\
             redis.register_function{function_name='reader', callback=function() return 2 end, flags={'no-writes'}}",
        );
        let writer = FunctionCall::parse(&argv(&["writer", "0"]), CallMode::ReadOnly).unwrap();
        assert_eq!(
            invoke(&registry, &writer, CallMode::ReadOnly, dispatcher.clone(), 0).unwrap_err(),
            FerriteError::WriteInReadOnlyCall
        );
        assert_eq!(
            invoke(&registry, &writer, CallMode::ReadWrite, dispatcher.clone(), 0).unwrap(),
            Frame::Integer(1)
        );

        let reader = FunctionCall::parse(&argv(&["reader", "0"]), CallMode::ReadOnly).unwrap();
        assert_eq!(
            invoke(&registry, &reader, CallMode::ReadOnly, dispatcher.clone(), 0).unwrap(),
            Frame::Integer(2)
        );
        assert_eq!(
            invoke(&registry, &reader, CallMode::ReadWrite, dispatcher, 0).unwrap(),
            Frame::Integer(2)
        );
    }

    #[test]
    fn test_no_writes_function_cannot_write() {
        let (registry, dispatcher, store) = setup(
            "#!lua name=mylib\n\
             redis.register_function{function_name='sneaky', flags={'no-writes'}, \
                 callback=function(keys) return redis.call('SET', keys[1], 'x') end}",
        );
        let call = FunctionCall::parse(&argv(&["sneaky", "1", "k"]), CallMode::ReadWrite).unwrap();
        let err = invoke(&registry, &call, CallMode::ReadWrite, dispatcher, 0).unwrap_err();
        assert!(err.to_resp_error().contains("Write commands are not allowed"));
        assert!(store.get(0, &Bytes::from("k")).is_none());
    }

    #[test]
    fn test_nested_call_refused() {
        let (registry, dispatcher, _) = setup(
            "#!lua name=mylib\n\
             redis.register_function('outer', function() return redis.call('FCALL', 'outer', '0') end)",
        );
        let call = FunctionCall::parse(&argv(&["outer", "0"]), CallMode::ReadWrite).unwrap();
        let err = invoke(&registry, &call, CallMode::ReadWrite, dispatcher, 0).unwrap_err();
        assert!(err.to_resp_error().contains("not allowed from script"));
    }

    #[test]
    fn test_globals_do_not_leak_between_calls() {
        let (registry, dispatcher, _) = setup(
            "#!lua name=mylib\n\
             redis.register_function('bump', function() counter = (counter or 0) + 1 return counter end)",
        );
        let call = FunctionCall::parse(&argv(&["bump", "0"]), CallMode::ReadWrite).unwrap();
        for _ in 0..3 {
            assert_eq!(
                invoke(&registry, &call, CallMode::ReadWrite, dispatcher.clone(), 0).unwrap(),
                Frame::Integer(1)
            );
        }
    }

    #[test]
    fn test_selected_database() {
        let (registry, dispatcher, store) = setup(
            "#!lua name=mylib\n\
             redis.register_function('put', function(keys, args) return redis.call('SET', keys[1], args[1]) end)",
        );
        let call = FunctionCall::parse(&argv(&["put", "1", "k", "v"]), CallMode::ReadWrite).unwrap();
        assert_eq!(
            invoke(&registry, &call, CallMode::ReadWrite, dispatcher, 3).unwrap(),
            Frame::ok()
        );
        assert!(store.get(3, &Bytes::from("k")).is_some());
        assert!(store.get(0, &Bytes::from("k")).is_none());
    }
}
