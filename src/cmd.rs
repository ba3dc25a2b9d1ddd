mod delete;
pub use delete::Delete;

mod get;
pub use get::Get;

mod set;
pub use set::Set;

use crate::{Parse, ParseError, Storage, StorageError};

/// Enumeration of supported commands.
///
/// A command is built from one line of input and is discarded once it has
/// been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(Get),
    Set(Set),
    Delete(Delete),
}

impl Command {
    /// Parse a command from a single line, without its line terminator.
    ///
    /// Operations are case-sensitive: only `GET`, `SET` and `DELETE` are
    /// recognized.
    ///
    /// # Returns
    ///
    /// On success, the command value is returned. Any deviation from the
    /// expected arity or an empty key or value is an error; partial commands
    /// are never returned.
    pub fn from_line(line: &str) -> Result<Command, ParseError> {
        // The line is wrapped with `Parse`, which provides a "cursor" like
        // API over its space separated tokens.
        let mut parse = Parse::new(line);

        // The first token is the operation name. It selects the command,
        // which then consumes its own arguments.
        let command = match parse.next_operation()? {
            "GET" => Command::Get(Get::parse_tokens(&mut parse)?),
            "SET" => Command::Set(Set::parse_tokens(&mut parse)?),
            "DELETE" => Command::Delete(Delete::parse_tokens(&mut parse)?),
            op => return Err(ParseError::UnsupportedOperation(op.to_string())),
        };

        // Any token left over means the line had too many arguments.
        parse.finish()?;

        Ok(command)
    }

    /// Apply the command to the given storage.
    ///
    /// Returns the response payload, or `None` for commands that only
    /// acknowledge success.
    pub(crate) async fn apply(
        self,
        storage: &dyn Storage,
    ) -> Result<Option<String>, StorageError> {
        use Command::*;

        match self {
            Get(cmd) => cmd.apply(storage).await.map(Some),
            Set(cmd) => cmd.apply(storage).await.map(|()| None),
            Delete(cmd) => cmd.apply(storage).await.map(|()| None),
        }
    }

    /// Returns the command name
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get(_) => "get",
            Command::Set(_) => "set",
            Command::Delete(_) => "delete",
        }
    }

    /// Returns the key the command operates on.
    pub fn key(&self) -> &str {
        match self {
            Command::Get(cmd) => cmd.key(),
            Command::Set(cmd) => cmd.key(),
            Command::Delete(cmd) => cmd.key(),
        }
    }

    /// Converts the command into its wire representation, without the line
    /// terminator.
    pub fn into_line(self) -> String {
        match self {
            Command::Get(cmd) => cmd.into_line(),
            Command::Set(cmd) => cmd.into_line(),
            Command::Delete(cmd) => cmd.into_line(),
        }
    }
}
