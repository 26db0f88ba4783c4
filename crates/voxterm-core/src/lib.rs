//! voxterm-core — Phrase dispatch engine and module registry.
//!
//! No async runtime, no I/O beyond the collaborator traits.

pub mod collab;
pub mod conflicts;
pub mod dispatch;
pub mod effects;
pub mod error;
pub mod locale;
pub mod module;
pub mod registry;
pub mod text;
pub mod trigger;
pub mod types;

pub use collab::{Collaborators, MemoryStore, OverrideStore, Silent, Speaker, Terminator};
pub use dispatch::Dispatcher;
pub use effects::{Effect, Outcome, StateChange};
pub use error::{DispatchError, HandlerError, RegistrationError, StoreError};
pub use locale::{Language, LocaleError, LocalizationProvider};
pub use module::{Handler, Invocation, Module, ModuleDraft, Registrar, handler_fn};
pub use registry::ModuleRegistry;
pub use types::{
    Activation, CompareMode, EngineStatus, ModuleId, ModuleInfo, ModuleOverride, Overrides,
    RunMode, Turn,
};
