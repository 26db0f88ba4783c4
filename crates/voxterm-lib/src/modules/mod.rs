//! Built-in modules, declared in matching order.
//!
//! Trigger phrases come from the active locale, so a language switch means
//! declaring the set again and reloading the registry.

pub mod forward;
pub mod system;
pub mod talk;

use std::sync::Arc;

use voxterm_core::locale::LocalizationProvider;
use voxterm_core::module::Registrar;
use voxterm_core::trigger::PhraseSpec;
use voxterm_core::types::{CompareMode, RunMode};

use forward::ForwardHandler;
use system::{DebugHandler, HelpHandler, LockHandler, ModulesHandler, ShutdownHandler, StatusHandler};
use talk::{CountHandler, RepeatHandler};

pub const HELP_ID: &str = "system.help";
pub const DEBUG_ID: &str = "system.debug";
pub const LOCK_ID: &str = "system.lock";
pub const MODULES_ID: &str = "system.modules";
pub const SHUTDOWN_ID: &str = "system.shutdown";
pub const STATUS_ID: &str = "system.status";
pub const COUNT_ID: &str = "talk.count";
pub const REPEAT_ID: &str = "talk.repeat";
pub const FORWARD_ID: &str = "home.forward";

/// Declare every built-in module. `forward` is added last, and only when a
/// forwarding target is configured.
pub fn builtins(locale: &Arc<LocalizationProvider>, forward: Option<ForwardHandler>) -> Registrar {
    let mut r = Registrar::new();
    let text = |key: &str| locale.text(key);

    r.declare(LOCK_ID, RunMode::Any, "lock", &text("lock.description"))
        .trigger(exact(locale, "lock.phrase"))
        .hardcoded()
        .handle(LockHandler::new(locale.clone()));

    r.declare(DEBUG_ID, RunMode::Any, "debug", &text("debug.description"))
        .trigger_in(RunMode::Normal, locale.phrases("debug.enter"))
        .trigger_in(RunMode::Debug, locale.phrases("debug.leave"))
        .hardcoded()
        .handle(DebugHandler {
            locale: locale.clone(),
        });

    r.declare(MODULES_ID, RunMode::Any, "modules", &text("modules.description"))
        .trigger(locale.phrases("modules.enable"))
        .trigger(locale.phrases("modules.disable"))
        .trigger(locale.phrases("modules.mode"))
        .hardcoded()
        .handle(ModulesHandler::new(locale.clone()));

    r.declare(HELP_ID, RunMode::Any, "help", &text("help.description"))
        .trigger(locale.phrases("help.phrases"))
        .handle(HelpHandler {
            locale: locale.clone(),
        });

    r.declare(SHUTDOWN_ID, RunMode::Any, "shutdown", &text("shutdown.description"))
        .trigger(exact(locale, "shutdown.phrase"))
        .trigger(exact(locale, "shutdown.reload"))
        .handle(ShutdownHandler::new(locale.clone()));

    r.declare(STATUS_ID, RunMode::Debug, "status", &text("status.description"))
        .trigger(exact(locale, "status.phrase"))
        .handle(StatusHandler {
            locale: locale.clone(),
        });

    r.declare(COUNT_ID, RunMode::Any, "count", &text("count.description"))
        .trigger(locale.phrases("count.phrase"))
        .handle(CountHandler::new(locale.clone()));

    r.declare(REPEAT_ID, RunMode::Any, "repeat", &text("repeat.description"))
        .trigger(locale.phrases("repeat.phrase"))
        .handle(RepeatHandler {
            locale: locale.clone(),
        });

    if let Some(handler) = forward {
        r.declare(FORWARD_ID, RunMode::Normal, "forward", &text("forward.description"))
            .trigger("")
            .handle(handler);
    }
    r
}

/// Phrases of `key` that must match the whole utterance.
fn exact(locale: &LocalizationProvider, key: &str) -> Vec<PhraseSpec> {
    locale
        .phrases(key)
        .into_iter()
        .map(|p| PhraseSpec::Moded(p, CompareMode::Equals))
        .collect()
}
