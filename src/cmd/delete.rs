use crate::{Parse, ParseError, Storage, StorageError};

use tracing::{debug, instrument};

/// Removes `key`.
///
/// Deleting an absent key is an error, not a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    key: String,
}

impl Delete {
    /// Create a new `Delete` command which removes `key`.
    pub fn new(key: impl ToString) -> Delete {
        Delete {
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// # Format
    ///
    /// ```text
    /// DELETE key
    /// ```
    pub(crate) fn parse_tokens(parse: &mut Parse) -> Result<Delete, ParseError> {
        let key = parse.next_string("key")?;

        Ok(Delete { key })
    }

    #[instrument(skip(self, storage), fields(key = %self.key))]
    pub(crate) async fn apply(self, storage: &dyn Storage) -> Result<(), StorageError> {
        let response = storage.delete(&self.key).await;
        debug!(?response);
        response
    }

    pub(crate) fn into_line(self) -> String {
        format!("DELETE {}", self.key)
    }
}
