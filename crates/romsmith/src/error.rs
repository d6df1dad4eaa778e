use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad descriptor, missing required repository url, invalid variant.
    Config,
    /// Missing host tool or unusable build root.
    Environment,
    /// An external tool exited non-zero.
    Tool,
    /// The user declined a confirmation.
    Cancelled,
    Other,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Other, msg)
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Config, msg)
    }

    pub fn environment<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Environment, msg)
    }

    pub fn tool<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Tool, msg)
    }

    pub fn cancelled<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Cancelled, msg)
    }

    fn with_kind<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    // Prefix the message while keeping the kind, so a stage can say where it failed.
    pub fn context(self, prefix: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            msg: format!("{prefix}: {}", self.msg),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
