use std::str;

/// Cursor over the tokens of a single command line.
///
/// A command line is a sequence of tokens separated by exactly one space.
/// `Parse` is initialized with the line and provides a cursor-like API;
/// each command has a `parse_tokens` method that uses it to extract its
/// fields.
///
/// Delimiters are never collapsed: `"GET  key"` yields an empty token, which
/// is reported instead of being skipped.
#[derive(Debug)]
pub(crate) struct Parse<'a> {
    parts: str::Split<'a, char>,
}

/// Error encountered while parsing a command line.
///
/// The message is sent back to the client as `ERROR: <message>` so it must
/// read well on its own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The line holds no operation at all.
    #[error("empty command")]
    EmptyCommand,

    /// The operation is not one of `GET`, `SET` or `DELETE`.
    #[error("unsupported operation '{0}'")]
    UnsupportedOperation(String),

    /// A required argument is absent.
    #[error("missing {0}")]
    Missing(&'static str),

    /// A required argument is present but empty.
    #[error("empty {0}")]
    EmptyArgument(&'static str),

    /// More arguments than the operation accepts.
    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),

    /// The line ends with a delimiter.
    #[error("unexpected trailing delimiter")]
    TrailingDelimiter,
}

impl<'a> Parse<'a> {
    pub(crate) fn new(line: &'a str) -> Parse<'a> {
        Parse {
            parts: line.split(' '),
        }
    }

    /// Returns the operation token.
    ///
    /// Must be called once, before any argument is read.
    pub(crate) fn next_operation(&mut self) -> Result<&'a str, ParseError> {
        match self.parts.next() {
            Some(op) if !op.is_empty() => Ok(op),
            _ => Err(ParseError::EmptyCommand),
        }
    }

    /// Returns the next argument as an owned string.
    ///
    /// `what` names the argument in the error message.
    pub(crate) fn next_string(&mut self, what: &'static str) -> Result<String, ParseError> {
        match self.parts.next() {
            None => Err(ParseError::Missing(what)),
            Some("") => Err(ParseError::EmptyArgument(what)),
            Some(token) => Ok(token.to_string()),
        }
    }

    /// Ensure there are no more tokens in the line.
    pub(crate) fn finish(&mut self) -> Result<(), ParseError> {
        match self.parts.next() {
            None => Ok(()),
            Some("") => Err(ParseError::TrailingDelimiter),
            Some(token) => Err(ParseError::UnexpectedArgument(token.to_string())),
        }
    }
}
