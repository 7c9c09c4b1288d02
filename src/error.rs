use parse_display::Display;
use thiserror::Error;

use crate::template::TemplateError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while tracking state, compiling templates, rendering, or dispatching messages.
#[derive(Debug, Error)]
pub enum Error {
    #[error("`{action}` is not an allowed action of `{class}`")]
    UnknownAction { class: String, action: String },

    #[error("`{name}` is not a reactive variable of `{class}`")]
    UnknownReactiveVariable { class: String, name: String },

    #[error("default of reactive variable `{name}` must be absent, a scalar, or a factory")]
    InvalidDefaultFactory { name: String },

    #[error("no component `{id}` in this session")]
    UnknownComponent { id: String },

    #[error("component `{id}` is already mounted")]
    DuplicateComponent { id: String },

    #[error("`{class}` has no template `{variant}`")]
    UnknownTemplate { class: String, variant: String },

    #[error("`{class}` declares no child component `{child}`")]
    UnknownChildClass { class: String, child: String },

    #[error("`{record}` has no field `{field}`")]
    UnknownField { record: String, field: String },

    #[error("`{name}` is reserved and cannot be declared by `{class}`")]
    ReservedName { class: String, name: String },

    #[error("component `{id}` is rendered recursively")]
    RecursiveRender { id: String },

    #[error("undefined variable `{name}`")]
    UndefinedVariable { name: String },

    #[error("{0}")]
    Eval(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("in fragment #{part} `{fragment}`: {error}")]
    Render {
        part: usize,
        fragment: String,
        #[source]
        error: Box<Error>,
    },

    #[error("action `{action}` of `{class}` failed: {error}")]
    Action {
        class: String,
        action: String,
        error: anyhow::Error,
    },

    #[error("helper `{name}` failed: {error}")]
    Helper { name: String, error: anyhow::Error },

    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("session is closed")]
    Closed,
}

/// Coarse classification of [`Error`], shown in diagnostic fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    UnknownAction,
    UnknownReactiveVariable,
    InvalidDefaultFactory,
    UnknownComponent,
    DuplicateComponent,
    UnknownTemplate,
    UnknownChildClass,
    UnknownField,
    ReservedName,
    RecursiveRender,
    UndefinedVariable,
    EvalError,
    TemplateError,
    ActionError,
    HelperError,
    InvalidMessage,
    ConfigError,
    Closed,
}

impl Error {
    pub(crate) fn eval(message: impl Into<String>) -> Self {
        Error::Eval(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownAction { .. } => ErrorKind::UnknownAction,
            Error::UnknownReactiveVariable { .. } => ErrorKind::UnknownReactiveVariable,
            Error::InvalidDefaultFactory { .. } => ErrorKind::InvalidDefaultFactory,
            Error::UnknownComponent { .. } => ErrorKind::UnknownComponent,
            Error::DuplicateComponent { .. } => ErrorKind::DuplicateComponent,
            Error::UnknownTemplate { .. } => ErrorKind::UnknownTemplate,
            Error::UnknownChildClass { .. } => ErrorKind::UnknownChildClass,
            Error::UnknownField { .. } => ErrorKind::UnknownField,
            Error::ReservedName { .. } => ErrorKind::ReservedName,
            Error::RecursiveRender { .. } => ErrorKind::RecursiveRender,
            Error::UndefinedVariable { .. } => ErrorKind::UndefinedVariable,
            Error::Eval(_) => ErrorKind::EvalError,
            Error::Template(_) => ErrorKind::TemplateError,
            Error::Render { error, .. } => error.kind(),
            Error::Action { .. } => ErrorKind::ActionError,
            Error::Helper { .. } => ErrorKind::HelperError,
            Error::InvalidMessage(_) => ErrorKind::InvalidMessage,
            Error::Config(_) | Error::Io(_) => ErrorKind::ConfigError,
            Error::Closed => ErrorKind::Closed,
        }
    }

    /// Messages from the outermost error down to its root cause.
    pub fn frames(&self) -> Vec<String> {
        let mut frames = vec![self.to_string()];
        match self {
            Error::Action { error, .. } | Error::Helper { error, .. } => {
                frames.extend(error.chain().skip(1).map(|e| e.to_string()));
            }
            Error::Render { error, .. } => frames.extend(error.frames()),
            _ => {
                let mut source = std::error::Error::source(self);
                while let Some(e) = source {
                    frames.push(e.to_string());
                    source = e.source();
                }
            }
        }
        frames
    }
}
