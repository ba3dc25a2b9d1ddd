use crate::{Parse, ParseError, Storage, StorageError};

use tracing::{debug, instrument};

/// Get the value of key.
///
/// If the key does not exist the storage reports `NotFound`, which the
/// session turns into an `ERROR:` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Get {
    /// Name of the key to get
    key: String,
}

impl Get {
    /// Create a new `Get` command which fetches `key`.
    pub fn new(key: impl ToString) -> Get {
        Get {
            key: key.to_string(),
        }
    }

    /// Get the key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Parse a `Get` instance from the remaining tokens of a line.
    ///
    /// The `GET` token has already been consumed.
    ///
    /// # Format
    ///
    /// ```text
    /// GET key
    /// ```
    pub(crate) fn parse_tokens(parse: &mut Parse) -> Result<Get, ParseError> {
        let key = parse.next_string("key")?;

        Ok(Get { key })
    }

    /// Apply the `Get` command to the specified storage.
    #[instrument(skip(self, storage), fields(key = %self.key))]
    pub(crate) async fn apply(self, storage: &dyn Storage) -> Result<String, StorageError> {
        let response = storage.get(&self.key).await;

        debug!(?response);

        response
    }

    pub(crate) fn into_line(self) -> String {
        format!("GET {}", self.key)
    }
}
