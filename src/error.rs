//! Error types for Ferrite Functions
//!
//! This module defines the error taxonomy shared by the function registry,
//! the script host, and the command surface. Uses `thiserror` for ergonomic
//! error definitions.

use std::fmt;

use thiserror::Error;

use crate::protocol::Frame;

/// Stage of script execution at which an interpreter error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStage {
    /// The chunk failed to compile
    Compiling,
    /// The chunk or a callback raised an error while running
    Running,
}

impl fmt::Display for ScriptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptStage::Compiling => f.write_str("compiling"),
            ScriptStage::Running => f.write_str("running"),
        }
    }
}

/// Main error type for Ferrite Functions operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FerriteError {
    /// Configuration parsing or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wrong number of arguments for a command
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    /// Declared key count exceeds the number of remaining arguments
    #[error("Number of keys can't be greater than number of args")]
    TooManyKeys,

    /// Declared key count is negative
    #[error("Number of keys can't be negative")]
    NegativeKeyCount,

    /// Value cannot be parsed as integer
    #[error("value is not an integer or out of range")]
    NotInteger,

    /// Command syntax error
    #[error("syntax error")]
    Syntax,

    /// Unknown or unimplemented command
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Unknown subcommand of a container command
    #[error("unknown subcommand '{0}'. Try FUNCTION HELP.")]
    UnknownSubcommand(String),

    /// Unknown option given to a subcommand
    #[error("Unknown argument '{0}'")]
    UnknownArgument(String),

    /// Invalid database index
    #[error("DB index is out of range")]
    InvalidDbIndex,

    /// Authentication required but not provided
    #[error("Authentication required")]
    NoAuth,

    /// Invalid password provided
    #[error("invalid password")]
    InvalidPassword,

    /// Command issued while the session is in pub/sub mode
    #[error("Can't execute '{0}': only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE / PING / QUIT / RESET are allowed in this context")]
    PubSubContext(String),

    /// Library payload does not start with a valid `#!lua name=` header
    #[error("{0}")]
    InvalidHeader(String),

    /// A library with this name is already registered
    #[error("Library '{0}' already exists")]
    DuplicateLibrary(String),

    /// A function with this name is owned by another registered library
    #[error("Function {0} already exists")]
    FunctionExists(String),

    /// `redis.register_function` was called with an unsupported shape
    #[error("{0}")]
    InvalidRegistration(String),

    /// The embedded interpreter failed to compile or run a chunk
    #[error("Error {stage} script: {message}")]
    ScriptError {
        /// Where the failure happened
        stage: ScriptStage,
        /// Interpreter message, passed through verbatim
        message: String,
    },

    /// The library body registered no functions
    #[error("No functions registered")]
    EmptyLibrary,

    /// Library does not exist
    #[error("Library '{0}' does not exist")]
    LibraryNotFound(String),

    /// Function does not exist
    #[error("Function not found")]
    FunctionNotFound(String),

    /// FCALL_RO on a function lacking the `no-writes` flag
    #[error("Can not execute a script with write flag using *_ro command.")]
    WriteInReadOnlyCall,

    /// Write command issued from a read-only callback
    #[error("Write commands are not allowed from read-only scripts.")]
    WriteCommandNotAllowed,

    /// Script-to-store call attempted to run another script
    #[error("This Redis command is not allowed from script")]
    NestedCallNotAllowed,

    /// Malformed FUNCTION DUMP payload
    #[error("Invalid DUMP payload: {0}")]
    InvalidPayload(String),

    /// FUNCTION KILL with nothing running
    #[error("No function is running")]
    NoFunctionRunning,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Ferrite Functions operations
pub type Result<T> = std::result::Result<T, FerriteError>;

impl FerriteError {
    /// Create a running-stage script error
    pub fn runtime(message: impl Into<String>) -> Self {
        FerriteError::ScriptError {
            stage: ScriptStage::Running,
            message: message.into(),
        }
    }

    /// Create a compiling-stage script error
    pub fn compile(message: impl Into<String>) -> Self {
        FerriteError::ScriptError {
            stage: ScriptStage::Compiling,
            message: message.into(),
        }
    }

    /// Returns true if this error was raised while validating arguments,
    /// before any state was touched
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            FerriteError::WrongArity(_)
                | FerriteError::TooManyKeys
                | FerriteError::NegativeKeyCount
                | FerriteError::NotInteger
                | FerriteError::Syntax
                | FerriteError::UnknownSubcommand(_)
                | FerriteError::UnknownArgument(_)
        )
    }

    /// Convert error to RESP error string
    #[cold]
    pub fn to_resp_error(&self) -> String {
        match self {
            FerriteError::NoAuth => format!("NOAUTH {self}"),
            FerriteError::NoFunctionRunning => format!("NOTBUSY {self}"),
            FerriteError::ScriptError {
                stage: ScriptStage::Running,
                message,
            } if has_error_code(message) => message.clone(),
            _ => format!("ERR {self}"),
        }
    }

    /// Convert error to an error reply frame
    #[cold]
    pub fn to_frame(&self) -> Frame {
        Frame::error(self.to_resp_error())
    }
}

/// Returns true when `message` already starts with a Redis error code such as
/// `ERR` or `WRONGTYPE`, in which case it is forwarded untouched.
fn has_error_code(message: &str) -> bool {
    match message.split_once(' ') {
        Some((code, _)) => {
            !code.is_empty()
                && code.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                && !has_location_prefix(message)
        }
        None => false,
    }
}

/// Whether the first line contains a `chunk:line:` position, as the
/// interpreter prepends to runtime errors. The chunk name is the library
/// name, which may itself start with an uppercase word.
fn has_location_prefix(message: &str) -> bool {
    let first_line = message.lines().next().unwrap_or_default();
    first_line.match_indices(':').any(|(i, _)| {
        let rest = &first_line[i + 1..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        digits > 0 && rest[digits..].starts_with(':')
    })
}
