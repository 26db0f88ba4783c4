//! Handler results and the interpreter that turns them into actions.
//!
//! A handler answers with an [`Outcome`]: a single [`Effect`] or an ordered
//! list of them. The interpreter walks the list in order, applies state
//! changes, forwards low-priority phrases to the speech collaborator and
//! keeps the last `Say`/`Ask` as the turn's reply.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::collab::Collaborators;
use crate::dispatch::EngineState;
use crate::types::{ModuleId, RunMode};

// ─── Vocabulary ────────────────────────────────────────────────────────────

/// One thing a handler wants to happen.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// No opinion; keep scanning.
    Next,
    /// Mutate engine or registry state as part of finalizing this turn.
    Set(Vec<StateChange>),
    /// Reply for this turn.
    Say(String),
    /// Reply and expect the next utterance to come back to this module.
    Ask(String),
    /// Queue phrases at low priority: (text, pause in seconds after it).
    SayLow(Vec<(String, f32)>),
}

/// A named state mutation carried by [`Effect::Set`].
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Debug(bool),
    ToggleDebug,
    /// Set or clear the one-way override.
    OneWay(Option<ModuleId>),
    Mode { module: ModuleId, mode: RunMode },
    Enabled { module: ModuleId, enabled: bool },
    /// Schedule process exit (or restart when `reload`).
    Terminate { delay: Duration, reload: bool },
}

/// Everything a handler returned for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome(Vec<Effect>);

impl Outcome {
    /// Pass; the scan continues with the next entry.
    pub fn next() -> Self {
        Self(vec![Effect::Next])
    }

    /// Consume the utterance without replying.
    pub fn silent() -> Self {
        Self(Vec::new())
    }

    pub fn say(text: impl Into<String>) -> Self {
        Self(vec![Effect::Say(text.into())])
    }

    pub fn ask(text: impl Into<String>) -> Self {
        Self(vec![Effect::Ask(text.into())])
    }

    pub fn set(changes: impl IntoIterator<Item = StateChange>) -> Self {
        Self(vec![Effect::Set(changes.into_iter().collect())])
    }

    pub fn say_low(phrases: impl IntoIterator<Item = (String, f32)>) -> Self {
        Self(vec![Effect::SayLow(phrases.into_iter().collect())])
    }

    /// Append another effect.
    pub fn then(mut self, effect: Effect) -> Self {
        self.0.push(effect);
        self
    }

    /// Exactly one `Next` and nothing else.
    pub fn is_next(&self) -> bool {
        matches!(self.0.as_slice(), [Effect::Next])
    }

    pub fn effects(&self) -> &[Effect] {
        &self.0
    }

    /// Reason the outcome cannot be interpreted, if any.
    fn defect(&self) -> Option<String> {
        if self.0.len() > 1 && self.0.contains(&Effect::Next) {
            return Some("`Next` mixed with other effects".to_string());
        }
        self.0.iter().find_map(|effect| match effect {
            Effect::SayLow(phrases) => phrases
                .iter()
                .find(|(_, pause)| !pause.is_finite() || *pause < 0.0)
                .map(|(text, pause)| format!("invalid pause {pause} after {text:?}")),
            _ => None,
        })
    }
}

impl From<Effect> for Outcome {
    fn from(effect: Effect) -> Self {
        Self(vec![effect])
    }
}

impl From<Vec<Effect>> for Outcome {
    fn from(effects: Vec<Effect>) -> Self {
        Self(effects)
    }
}

// ─── Interpreter ───────────────────────────────────────────────────────────

/// What a turn produced once its effects were applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub reply: Option<String>,
    pub awaiting: bool,
}

/// Apply `outcome` on behalf of `module`.
pub(crate) fn apply(
    state: &mut EngineState,
    module: &ModuleId,
    outcome: Outcome,
    collab: &Collaborators,
) -> Applied {
    if let Some(defect) = outcome.defect() {
        error!(critical = true, "module {module} returned a malformed result: {defect}");
        return Applied::default();
    }

    let mut applied = Applied::default();
    for effect in outcome.0 {
        match effect {
            Effect::Next => {}
            Effect::Set(changes) => {
                for change in changes {
                    apply_change(state, module, change, collab);
                }
            }
            Effect::Say(text) => {
                applied.reply = Some(text);
                applied.awaiting = false;
            }
            Effect::Ask(text) => {
                applied.reply = Some(text);
                applied.awaiting = true;
            }
            Effect::SayLow(phrases) => {
                for (text, pause) in phrases {
                    let pause = Duration::try_from_secs_f32(pause).unwrap_or(Duration::MAX);
                    collab.speaker.say_low(&text, pause);
                }
            }
        }
    }
    applied
}

fn apply_change(
    state: &mut EngineState,
    module: &ModuleId,
    change: StateChange,
    collab: &Collaborators,
) {
    match change {
        StateChange::Debug(on) => set_debug(state, on),
        StateChange::ToggleDebug => {
            let on = !state.debug;
            set_debug(state, on);
        }
        StateChange::OneWay(Some(target)) => {
            if state.registry.get(&target).is_some() {
                info!("one-way override set to {target} by {module}");
                state.one_way = Some(target);
            } else {
                warn!("{module} tried to set one-way override to unknown module {target}");
            }
        }
        StateChange::OneWay(None) => {
            if let Some(previous) = state.one_way.take() {
                info!("one-way override {previous} cleared by {module}");
            }
        }
        StateChange::Mode { module: target, mode } => {
            state.registry.set_mode(&target, mode);
        }
        StateChange::Enabled {
            module: target,
            enabled,
        } => {
            state.registry.set_enabled(&target, enabled);
        }
        StateChange::Terminate { delay, reload } => {
            info!(
                "{module} scheduled {} in {:?}",
                if reload { "reload" } else { "shutdown" },
                delay
            );
            collab.terminator.die_in(delay, reload);
        }
    }
}

fn set_debug(state: &mut EngineState, on: bool) {
    if state.debug == on {
        debug!("debug mode already {}", if on { "on" } else { "off" });
        return;
    }
    info!("debug mode {}", if on { "on" } else { "off" });
    state.debug = on;
}
