//! Per-connection state consulted by the command gates.

/// Connection context for a single client.
///
/// The network front end owns one `Session` per connection and hands it to
/// [`CommandExecutor::execute`](super::CommandExecutor::execute) with every
/// command.
#[derive(Debug, Clone, Default)]
pub struct Session {
    db: u8,
    authenticated: bool,
    subscribed: bool,
    dirty: bool,
}

impl Session {
    /// Create a session on database 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently selected database
    pub fn db(&self) -> u8 {
        self.db
    }

    /// Switch the selected database. Range checking is the caller's job.
    pub fn select(&mut self, db: u8) {
        self.db = db;
    }

    /// Whether AUTH succeeded on this connection
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    /// Whether the connection is in pub/sub mode
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Enter or leave pub/sub mode
    pub fn set_subscribed(&mut self, subscribed: bool) {
        self.subscribed = subscribed;
    }

    /// Flag the session after a command was rejected during argument
    /// validation, so an enclosing MULTI aborts on EXEC.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether a command was rejected since the last [`Session::clear_dirty`]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Reset the dirty flag (on EXEC or DISCARD)
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults() {
        let session = Session::new();
        assert_eq!(session.db(), 0);
        assert!(!session.is_authenticated());
        assert!(!session.is_subscribed());
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_dirty_flag() {
        let mut session = Session::new();
        session.mark_dirty();
        assert!(session.is_dirty());
        session.clear_dirty();
        assert!(!session.is_dirty());
    }
}
