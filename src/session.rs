//! Per-conversation source selection.
//!
//! `/setsource` stores a source for the user (or chat) that sent it;
//! `/download` reads it back. The registry is handed to [`crate::bot::BotController`]
//! explicitly and lives only in memory: a restart falls back to the default.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Identifies whoever picks a source: a Telegram user id, or a chat id.
pub type SessionId = i64;

#[derive(Debug, Default)]
pub struct SourceRegistry {
    default_source: Option<String>,
    sources: RwLock<HashMap<SessionId, String>>,
}

impl SourceRegistry {
    pub fn new(default_source: Option<String>) -> Self {
        Self {
            default_source: default_source.filter(|s| !s.trim().is_empty()),
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Remember `source` for `session`, replacing any earlier choice.
    pub fn set(&self, session: SessionId, source: impl Into<String>) {
        let source = source.into();
        debug!("Session {} selected source {}", session, source);
        // A poisoned lock only means another handler panicked mid-insert.
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        sources.insert(session, source);
    }

    /// The session's source, or the default when none was chosen.
    pub fn get(&self, session: SessionId) -> Option<String> {
        let sources = self.sources.read().unwrap_or_else(|e| e.into_inner());
        sources
            .get(&session)
            .cloned()
            .or_else(|| self.default_source.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_isolated() {
        let registry = SourceRegistry::new(None);
        registry.set(1, "/srv/a");
        registry.set(2, "https://example.org/b.json");
        assert_eq!(registry.get(1).as_deref(), Some("/srv/a"));
        assert_eq!(registry.get(2).as_deref(), Some("https://example.org/b.json"));
        assert_eq!(registry.get(3), None);
    }

    #[test]
    fn default_applies_until_overridden() {
        let registry = SourceRegistry::new(Some("/srv/default".into()));
        assert_eq!(registry.get(9).as_deref(), Some("/srv/default"));
        registry.set(9, "/srv/mine");
        assert_eq!(registry.get(9).as_deref(), Some("/srv/mine"));
        assert_eq!(registry.get(10).as_deref(), Some("/srv/default"));
    }

    #[test]
    fn blank_default_is_ignored() {
        let registry = SourceRegistry::new(Some("  ".into()));
        assert_eq!(registry.get(1), None);
    }
}
