/// Malformed request text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxError {
    #[error("invalid command")]
    InvalidCommand,
    #[error("invalid argument: expected type code")]
    ExpectedTypeCode,
    #[error("invalid argument: unexpected type code")]
    UnexpectedTypeCode,
    #[error("invalid argument: bad paired text")]
    BadPairedText,
    #[error("invalid argument: bad paired len")]
    BadPairedLen,
    #[error("invalid argument: unexpected post-immediate text")]
    PostImmediateText,
}

/// Failures detected while a command runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("bad answer for {command} cmd")]
    BadAnswer { command: &'static str },
    #[error("custom immediate quant overrun")]
    QuantOverrun,
    #[error("custom immediate char overrun")]
    CharOverrun,
    #[error("invalid custom immediate b64")]
    BadRawBase64,
    #[error("host timeout")]
    HostTimeout,
    #[error("host link failure: {0}")]
    HostLink(String),
}

/// Conditions that abort the request (and the device loop) outright.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalError {
    #[error("fatal condition requested")]
    Requested,
    #[error("unexpected message ident {0:?}")]
    UnexpectedIdent(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
