use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Store-assigned identifier of a persisted session.
///
/// Opaque to the engine: it is only compared, displayed and handed back to
/// the store.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a store-assigned id.
    ///
    /// # Errors
    ///
    /// Returns `ParseIdError` if the id is empty or only whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ParseIdError { kind: "SessionId" });
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Error type for parsing an id from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to parse {kind} from string")]
pub struct ParseIdError {
    kind: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SessionKeyError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

/// Composite business key of a session: one attempt slot per user,
/// competence and level.
///
/// The store does not enforce uniqueness on this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    user_id: String,
    competence: String,
    level: String,
}

impl SessionKey {
    /// Build a key from its three parts. Surrounding whitespace is trimmed.
    ///
    /// # Errors
    ///
    /// Returns `SessionKeyError::Empty` if any part is blank.
    pub fn new(
        user_id: impl Into<String>,
        competence: impl Into<String>,
        level: impl Into<String>,
    ) -> Result<Self, SessionKeyError> {
        Ok(Self {
            user_id: non_empty("user_id", user_id.into())?,
            competence: non_empty("competence", competence.into())?,
            level: non_empty("level", level.into())?,
        })
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn competence(&self) -> &str {
        &self.competence
    }

    #[must_use]
    pub fn level(&self) -> &str {
        &self.level
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.competence, self.level)
    }
}

fn non_empty(field: &'static str, value: String) -> Result<String, SessionKeyError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SessionKeyError::Empty { field });
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_rejects_blank() {
        assert!(SessionId::new("  ").is_err());
        assert!("".parse::<SessionId>().is_err());
    }

    #[test]
    fn session_id_display_is_raw_value() {
        let id: SessionId = "abc123".parse().unwrap();
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(format!("{id:?}"), "SessionId(abc123)");
    }

    #[test]
    fn key_trims_parts() {
        let key = SessionKey::new(" u1 ", "1.1", "basico").unwrap();
        assert_eq!(key.user_id(), "u1");
        assert_eq!(key.to_string(), "u1/1.1/basico");
    }

    #[test]
    fn key_rejects_empty_competence() {
        let err = SessionKey::new("u1", "", "basico").unwrap_err();
        assert_eq!(err, SessionKeyError::Empty { field: "competence" });
    }
}
