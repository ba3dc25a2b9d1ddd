use crate::{Parse, ParseError, Storage, StorageError};

use tracing::{debug, instrument};

/// Set `key` to hold the string `value`.
///
/// If `key` already holds a value, it is overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Set {
    /// the lookup key
    key: String,

    /// the value to be stored
    value: String,
}

impl Set {
    /// Create a new `Set` command which sets `key` to `value`.
    pub fn new(key: impl ToString, value: impl ToString) -> Set {
        Set {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// Get the key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Parse a `Set` instance from the remaining tokens of a line.
    ///
    /// The `SET` token has already been consumed. Both the key and the value
    /// are required and must be non-empty; values cannot contain spaces.
    ///
    /// # Format
    ///
    /// ```text
    /// SET key value
    /// ```
    pub(crate) fn parse_tokens(parse: &mut Parse) -> Result<Set, ParseError> {
        // Read the key to set. This is a required field
        let key = parse.next_string("key")?;

        // Read the value to set. This is a required field.
        let value = parse.next_string("value")?;

        Ok(Set { key, value })
    }

    /// Apply the `Set` command to the specified storage.
    #[instrument(skip(self, storage), fields(key = %self.key))]
    pub(crate) async fn apply(self, storage: &dyn Storage) -> Result<(), StorageError> {
        let response = storage.set(self.key, self.value).await;
        debug!(?response);
        response
    }

    pub(crate) fn into_line(self) -> String {
        format!("SET {} {}", self.key, self.value)
    }
}
