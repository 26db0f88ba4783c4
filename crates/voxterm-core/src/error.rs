//! Error types for voxterm-core.

use thiserror::Error;

use crate::types::ModuleId;

/// Boxed error a handler body returns when it cannot complete a turn.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Startup-fatal problems with the declared module set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// A phrase entry is not text.
    #[error("module {module:?}: phrase entry #{index} is not text: {entry}")]
    PhraseNotText {
        module: String,
        index: usize,
        entry: String,
    },

    /// A phrase entry names an unknown comparison mode.
    #[error("module {module:?}: phrase entry #{index} has unknown comparison mode {mode:?}")]
    UnknownCompareMode {
        module: String,
        index: usize,
        mode: String,
    },

    #[error("module {id}: name is empty")]
    EmptyName { id: ModuleId },

    #[error("module {name:?}: name is longer than {max} chars")]
    NameTooLong { name: String, max: usize },

    #[error("module {name:?}: name must be lowercase")]
    NameNotLowercase { name: String },

    #[error("module {name:?}: name must not contain whitespace or commas")]
    NameHasSeparator { name: String },

    #[error("modules {first} and {second} share the name {name:?}")]
    DuplicateName {
        name: String,
        first: ModuleId,
        second: ModuleId,
    },

    #[error("modules {first:?} and {second:?} share the id {id}")]
    DuplicateId {
        id: ModuleId,
        first: String,
        second: String,
    },

    #[error("module {name:?} has no trigger phrases")]
    NoTriggers { name: String },

    #[error("module {name:?} has no handler")]
    NoHandler { name: String },
}

/// A handler failed while processing an utterance.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("module {module} failed: {source}")]
    Handler {
        module: ModuleId,
        #[source]
        source: HandlerError,
    },
}

/// Persisted override store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("override store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("override store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
