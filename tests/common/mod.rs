//! Shared test utilities for Ferrite Functions integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::sync::Arc;

use bytes::Bytes;

use ferrite_functions::config::Config;
use ferrite_functions::protocol::Frame;
use ferrite_functions::{CommandExecutor, Session};

// ============================================================================
// Executor helpers
// ============================================================================

/// A client bound to one executor and one session
pub struct TestClient {
    pub executor: Arc<CommandExecutor>,
    pub session: Session,
}

impl TestClient {
    /// Run one command, given as separate arguments
    pub fn cmd(&mut self, parts: &[&str]) -> Frame {
        let argv: Vec<Bytes> = parts.iter().map(|p| Bytes::from(p.to_string())).collect();
        self.executor.execute(&mut self.session, &argv)
    }

    /// Open a second session on the same executor
    #[allow(dead_code)]
    pub fn another(&self) -> TestClient {
        TestClient {
            executor: self.executor.clone(),
            session: Session::new(),
        }
    }
}

/// Create a client over a fresh executor with the default config
#[allow(dead_code)]
pub fn new_client() -> TestClient {
    client_with_config(Config::default())
}

/// Create a client over a fresh executor built from `config`
#[allow(dead_code)]
pub fn client_with_config(config: Config) -> TestClient {
    TestClient {
        executor: Arc::new(CommandExecutor::new(Arc::new(config))),
        session: Session::new(),
    }
}

/// Build a library payload registering each `(name, body)` pair
#[allow(dead_code)]
pub fn library(name: &str, functions: &[(&str, &str)]) -> String {
    let mut code = format!("#!lua name={name}\n");
    for (function, body) in functions {
        code.push_str(&format!(
            "redis.register_function('{function}', function(keys, args) {body} end)\n"
        ));
    }
    code
}

// ============================================================================
// Assertion helpers
// ============================================================================

/// Assert that `frame` is an error reply containing `needle`
#[allow(dead_code)]
pub fn assert_error_contains(frame: &Frame, needle: &str) {
    match frame {
        Frame::Error(e) => {
            let message = String::from_utf8_lossy(e);
            assert!(
                message.contains(needle),
                "expected error containing {needle:?}, got {message:?}"
            );
        }
        other => panic!("expected error containing {needle:?}, got {other:?}"),
    }
}

/// Assert that `frame` is a bulk string equal to `expected`
#[allow(dead_code)]
pub fn assert_bulk(frame: &Frame, expected: &str) {
    assert_eq!(frame, &Frame::bulk(expected.to_string()), "unexpected reply");
}
