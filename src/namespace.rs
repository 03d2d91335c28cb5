//! Key namespace
//!
//! Derives backend keys: `application_id + separator + session_id`.
//! The separator is a naming convention only.

use crate::config::DEFAULT_KEY_SEPARATOR;

/// Maps session ids into one application's key space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    application_id: String,
    separator: String,
}

impl KeyNamespace {
    pub fn new(application_id: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            separator: separator.into(),
        }
    }

    /// Namespace using the library default separator
    pub fn with_default_separator(application_id: impl Into<String>) -> Self {
        Self::new(application_id, DEFAULT_KEY_SEPARATOR)
    }

    /// Backend key for a session id
    pub fn key(&self, session_id: &str) -> String {
        let mut key = String::with_capacity(
            self.application_id.len() + self.separator.len() + session_id.len(),
        );
        key.push_str(&self.application_id);
        key.push_str(&self.separator);
        key.push_str(session_id);
        key
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }
}
