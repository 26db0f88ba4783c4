//! Dispatch engine: routes one utterance at a time to a module and applies
//! what it answers.
//!
//! Order of precedence for every call to [`Dispatcher::process`]:
//!
//! ```text
//! one-way override ──(Next)──► direct target ──(Next)──► phrase scan
//!                                                        dynamic (LIFO)
//!                                                        static (declared order)
//! ```
//!
//! A single mutex guards the registry and the dispatch state. Handlers run
//! while it is held, so they never overlap each other, a reload, or a
//! dynamic insertion.

use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::collab::Collaborators;
use crate::conflicts::{Conflicts, find_conflicts, log_conflicts};
use crate::effects::{self, Outcome};
use crate::error::{DispatchError, RegistrationError};
use crate::module::{Invocation, Module, ModuleDraft};
use crate::registry::ModuleRegistry;
use crate::text::fold;
use crate::types::{Activation, EngineStatus, ModuleId, ModuleInfo, Overrides, RunMode, Turn};

/// Registry plus the process-wide dispatch state.
#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) registry: ModuleRegistry,
    pub(crate) debug: bool,
    pub(crate) one_way: Option<ModuleId>,
    /// Module that asked a question during the last turn.
    pub(crate) follow_up: Option<ModuleId>,
    pub(crate) activation: Activation,
    pub(crate) active_model: Option<String>,
}

impl EngineState {
    pub(crate) fn new(registry: ModuleRegistry) -> Self {
        Self {
            registry,
            debug: false,
            one_way: None,
            follow_up: None,
            activation: Activation::Phrase,
            active_model: None,
        }
    }
}

/// Where the matched text came from for one handler call.
struct Call<'u> {
    phrase: &'u str,
    remainder: &'u str,
    utterance: &'u str,
    activation: Activation,
}

pub struct Dispatcher {
    state: Mutex<EngineState>,
    collab: Collaborators,
    /// Catch-all modules the conflict analyzer skips.
    no_check: Vec<ModuleId>,
}

impl Dispatcher {
    pub fn new(registry: ModuleRegistry, collab: Collaborators) -> Self {
        Self {
            state: Mutex::new(EngineState::new(registry)),
            collab,
            no_check: Vec::new(),
        }
    }

    /// Modules excluded from conflict analysis.
    pub fn with_conflict_allowlist(mut self, ids: impl IntoIterator<Item = ModuleId>) -> Self {
        self.no_check = ids.into_iter().collect();
        self
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─── Dispatch ──────────────────────────────────────────────────────────

    /// Route one utterance.
    ///
    /// `direct` resumes a pending ask; `active_model` is passed through to
    /// handlers untouched. A handler error aborts the turn with none of its
    /// effects applied and is returned to the caller.
    pub fn process(
        &self,
        utterance: &str,
        direct: Option<&ModuleId>,
        active_model: Option<&str>,
    ) -> Result<Turn, DispatchError> {
        let mut state = self.lock();
        state.active_model = active_model.map(str::to_owned);
        state.activation = Activation::Phrase;
        state.follow_up = None;

        let utterance = fold(utterance.trim());

        if let Some(target) = state.one_way.clone() {
            if state.registry.get(&target).is_some() {
                let call = Call {
                    phrase: "",
                    remainder: &utterance,
                    utterance: &utterance,
                    activation: Activation::OneWay,
                };
                let outcome = invoke(&state, &target, &call)?;
                if !outcome.is_next() {
                    return Ok(self.finalize(&mut state, target, Activation::OneWay, outcome));
                }
            } else {
                warn!("one-way target {target} is gone, clearing");
                state.one_way = None;
            }
        }

        if let Some(target) = direct {
            if state.registry.get(target).is_some() {
                let call = Call {
                    phrase: "",
                    remainder: &utterance,
                    utterance: &utterance,
                    activation: Activation::Direct,
                };
                let outcome = invoke(&state, target, &call)?;
                if !outcome.is_next() {
                    return Ok(self.finalize(&mut state, target.clone(), Activation::Direct, outcome));
                }
            } else {
                warn!("direct target {target} is not registered, falling back to phrases");
            }
        }

        if utterance.is_empty() {
            info!("empty utterance, nothing to do");
            return Ok(Turn::default());
        }

        let mut chosen: Option<(ModuleId, Outcome)> = None;
        'scan: for module in state.registry.candidates(state.debug) {
            for found in module.triggers.matches(&utterance, state.debug) {
                let call = Call {
                    phrase: &found.phrase,
                    remainder: &found.remainder,
                    utterance: &utterance,
                    activation: Activation::Phrase,
                };
                let outcome = call_module(&state, module, &call)?;
                if outcome.is_next() {
                    continue;
                }
                chosen = Some((module.id.clone(), outcome));
                break 'scan;
            }
        }

        match chosen {
            Some((module, outcome)) => Ok(self.finalize(&mut state, module, Activation::Phrase, outcome)),
            None => {
                debug!("no module matched {utterance:?}");
                Ok(Turn::default())
            }
        }
    }

    fn finalize(
        &self,
        state: &mut EngineState,
        module: ModuleId,
        activation: Activation,
        outcome: Outcome,
    ) -> Turn {
        state.activation = activation;
        let applied = effects::apply(state, &module, outcome, &self.collab);
        let follow_up = applied.awaiting.then(|| module.clone());
        state.follow_up = follow_up.clone();
        debug!("turn finalized by {module} ({activation:?})");
        Turn {
            reply: applied.reply,
            follow_up,
            module: Some(module),
            activation,
        }
    }

    // ─── Registry access ───────────────────────────────────────────────────

    /// Rebuild the static module set. The running registry is replaced only
    /// if the new one validates; dynamic modules carry over.
    pub fn reload(
        &self,
        drafts: Vec<ModuleDraft>,
        overrides: &Map<String, Value>,
    ) -> Result<(), RegistrationError> {
        let mut fresh = ModuleRegistry::finalize(drafts, overrides)?;
        let mut state = self.lock();
        fresh.adopt_dynamic(&mut state.registry);
        state.registry = fresh;

        if let Some(id) = state.one_way.clone() {
            if state.registry.get(&id).is_none() {
                warn!("one-way target {id} dropped by reload");
                state.one_way = None;
            }
        }
        if let Some(id) = state.follow_up.clone() {
            if state.registry.get(&id).is_none() {
                state.follow_up = None;
            }
        }

        log_conflicts(&state.registry, &self.no_check);
        Ok(())
    }

    /// Log conflicts for the current registry in both debug states.
    pub fn analyze(&self) {
        log_conflicts(&self.lock().registry, &self.no_check);
    }

    pub fn conflicts(&self, debug: bool) -> Conflicts {
        find_conflicts(&self.lock().registry, debug, &self.no_check)
    }

    pub fn insert(&self, module: Module) -> bool {
        self.lock().registry.insert(module)
    }

    pub fn remove(&self, id: &ModuleId) -> bool {
        let mut state = self.lock();
        let removed = state.registry.remove(id);
        if removed && state.one_way.as_ref() == Some(id) && state.registry.get(id).is_none() {
            state.one_way = None;
        }
        removed
    }

    pub fn set_mode(&self, id: &ModuleId, mode: RunMode) -> bool {
        self.lock().registry.set_mode(id, mode)
    }

    pub fn set_enabled(&self, id: &ModuleId, enabled: bool) -> bool {
        self.lock().registry.set_enabled(id, enabled)
    }

    pub fn set_debug(&self, on: bool) {
        let mut state = self.lock();
        if state.debug != on {
            info!("debug mode {}", if on { "on" } else { "off" });
            state.debug = on;
        }
    }

    /// Static module flags for the override store.
    pub fn persist(&self) -> Overrides {
        self.lock().registry.persist()
    }

    /// Resolve a module name (static first, then dynamic) to its id.
    pub fn resolve(&self, name_or_id: &str) -> Option<ModuleId> {
        let state = self.lock();
        let id = ModuleId::from(name_or_id);
        if state.registry.get(&id).is_some() {
            return Some(id);
        }
        state
            .registry
            .find_by_name(name_or_id)
            .or_else(|| state.registry.dynamic().find(|m| m.name == name_or_id))
            .map(|m| m.id.clone())
    }

    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.lock().registry.infos()
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.lock();
        EngineStatus {
            debug: state.debug,
            one_way: state.one_way.clone(),
            follow_up: state.follow_up.clone(),
            activation: state.activation,
            active_model: state.active_model.clone(),
            static_modules: state.registry.len(),
            dynamic_modules: state.registry.dynamic_len(),
        }
    }
}

fn invoke(state: &EngineState, target: &ModuleId, call: &Call<'_>) -> Result<Outcome, DispatchError> {
    match state.registry.get(target) {
        Some(module) => call_module(state, module, call),
        None => Ok(Outcome::next()),
    }
}

fn call_module(state: &EngineState, module: &Module, call: &Call<'_>) -> Result<Outcome, DispatchError> {
    let invocation = Invocation {
        module: &module.id,
        phrase: call.phrase,
        remainder: call.remainder,
        utterance: call.utterance,
        activation: call.activation,
        active_model: state.active_model.as_deref(),
        debug: state.debug,
        one_way: state.one_way.as_ref(),
        modules: &state.registry,
    };
    module
        .call(&invocation)
        .map_err(|source| DispatchError::Handler {
            module: module.id.clone(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::testing::recording;
    use crate::effects::{Effect, StateChange};
    use crate::error::HandlerError;
    use crate::module::{Registrar, handler_fn};
    use crate::types::CompareMode;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo(call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        Ok(Outcome::say(format!("{}|{}", call.phrase, call.remainder)))
    }

    fn dispatcher(registrar: Registrar) -> Dispatcher {
        let registry = ModuleRegistry::finalize(registrar.into_drafts(), &Map::new()).unwrap();
        Dispatcher::new(registry, Collaborators::default())
    }

    fn reply(d: &Dispatcher, text: &str) -> Option<String> {
        d.process(text, None, None).unwrap().reply
    }

    #[test]
    fn starts_with_passes_stripped_remainder() {
        let mut r = Registrar::new();
        r.declare("t.volume", RunMode::Any, "volume", "").trigger("громкость").handle(echo);
        let d = dispatcher(r);
        assert_eq!(reply(&d, "Громкость музыки").as_deref(), Some("громкость|музыки"));
    }

    #[test]
    fn equals_needs_exact_utterance() {
        let mut r = Registrar::new();
        r.declare("t.exit", RunMode::Any, "exit", "")
            .trigger(("выход", CompareMode::Equals))
            .handle(echo);
        let d = dispatcher(r);
        assert_eq!(reply(&d, "выход").as_deref(), Some("выход|"));
        assert_eq!(reply(&d, "выход срочно"), None);
    }

    #[test]
    fn dynamic_wildcard_beats_static_modules() {
        let mut r = Registrar::new();
        r.declare("t.help", RunMode::Any, "help", "").trigger("помощь").handle(echo);
        let d = dispatcher(r);

        let mut draft = Module::draft("d.all", RunMode::Any, "catch", "");
        draft
            .trigger("")
            .handle(handler_fn(|_| Ok(Outcome::say("dynamic"))));
        assert!(d.insert(draft.build().unwrap()));

        let turn = d.process("помощь", None, None).unwrap();
        assert_eq!(turn.reply.as_deref(), Some("dynamic"));
        assert_eq!(turn.module, Some(ModuleId::from("d.all")));
    }

    #[test]
    fn newest_dynamic_module_wins() {
        let d = dispatcher(Registrar::new());
        for (id, text) in [("d.old", "old"), ("d.new", "new")] {
            let mut draft = Module::draft(id, RunMode::Any, "dyn", "");
            let text = text.to_string();
            draft
                .trigger("привет")
                .handle(handler_fn(move |_| Ok(Outcome::say(text.clone()))));
            d.insert(draft.build().unwrap());
        }
        assert_eq!(reply(&d, "привет").as_deref(), Some("new"));
        d.remove(&"d.new".into());
        assert_eq!(reply(&d, "привет").as_deref(), Some("old"));
    }

    #[test]
    fn normal_only_trigger_hidden_in_debug() {
        let mut r = Registrar::new();
        r.declare("t.x", RunMode::Any, "x", "").trigger_in(RunMode::Normal, "x").handle(echo);
        r.declare("t.y", RunMode::Any, "y", "").trigger_in(RunMode::Debug, "x").handle(handler_fn(|_| Ok(Outcome::say("debug"))));
        let d = dispatcher(r);
        assert_eq!(reply(&d, "x").as_deref(), Some("x|"));
        d.set_debug(true);
        assert_eq!(reply(&d, "x").as_deref(), Some("debug"));
    }

    #[test]
    fn next_falls_through_to_later_modules() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut r = Registrar::new();
        r.declare("t.pass", RunMode::Any, "pass", "")
            .trigger("")
            .handle(handler_fn(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(Outcome::next())
            }));
        r.declare("t.help", RunMode::Any, "help", "").trigger("помощь").handle(echo);
        let d = dispatcher(r);
        assert_eq!(reply(&d, "помощь").as_deref(), Some("помощь|"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_match_and_empty_utterance_give_empty_turn() {
        let mut r = Registrar::new();
        r.declare("t.help", RunMode::Any, "help", "").trigger("помощь").handle(echo);
        let d = dispatcher(r);
        assert_eq!(d.process("погода", None, None).unwrap(), Turn::default());
        assert_eq!(d.process("   ", None, None).unwrap(), Turn::default());
    }

    fn lock_handler(call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        if call.activation != Activation::OneWay {
            return Ok(Outcome::set([StateChange::OneWay(Some(call.module.clone()))])
                .then(Effect::Say("заблокировано".into())));
        }
        if call.utterance == "разблокировать" {
            return Ok(Outcome::set([StateChange::OneWay(None)]).then(Effect::Say("свободно".into())));
        }
        Ok(Outcome::say(format!("заперто: {}", call.remainder)))
    }

    #[test]
    fn one_way_intercepts_until_cleared() {
        let mut r = Registrar::new();
        r.declare("t.lock", RunMode::Any, "lock", "")
            .trigger(("блокировка", CompareMode::Equals))
            .handle(lock_handler);
        r.declare("t.help", RunMode::Any, "help", "").trigger("помощь").handle(echo);
        let d = dispatcher(r);

        assert_eq!(reply(&d, "блокировка").as_deref(), Some("заблокировано"));
        let turn = d.process("что угодно", None, None).unwrap();
        assert_eq!(turn.reply.as_deref(), Some("заперто: что угодно"));
        assert_eq!(turn.activation, Activation::OneWay);
        assert_eq!(reply(&d, "помощь").as_deref(), Some("заперто: помощь"));

        assert_eq!(reply(&d, "разблокировать").as_deref(), Some("свободно"));
        assert_eq!(reply(&d, "помощь").as_deref(), Some("помощь|"));
        assert!(d.status().one_way.is_none());
    }

    fn gate_handler(call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        if call.activation == Activation::OneWay {
            return Ok(Outcome::next());
        }
        Ok(Outcome::set([StateChange::OneWay(Some(call.module.clone()))]))
    }

    #[test]
    fn one_way_next_falls_through_to_direct_then_phrases() {
        let mut r = Registrar::new();
        r.declare("t.gate", RunMode::Any, "gate", "")
            .trigger(("шлюз", CompareMode::Equals))
            .handle(gate_handler);
        r.declare("t.ask", RunMode::Any, "ask", "")
            .trigger("вопрос")
            .handle(handler_fn(|call| Ok(Outcome::say(format!("прямо {}", call.remainder)))));
        r.declare("t.help", RunMode::Any, "help", "").trigger("помощь").handle(echo);
        let d = dispatcher(r);

        d.process("шлюз", None, None).unwrap();
        let gate = ModuleId::from("t.gate");
        assert_eq!(d.status().one_way.as_ref(), Some(&gate));

        let direct = d.process("помощь", Some(&"t.ask".into()), None).unwrap();
        assert_eq!(direct.reply.as_deref(), Some("прямо помощь"));
        assert_eq!(direct.activation, Activation::Direct);

        let scanned = d.process("помощь", None, None).unwrap();
        assert_eq!(scanned.reply.as_deref(), Some("помощь|"));
        assert_eq!(scanned.activation, Activation::Phrase);
        assert_eq!(d.status().one_way.as_ref(), Some(&gate));
    }

    #[test]
    fn unregistered_direct_target_falls_back_to_phrases() {
        let mut r = Registrar::new();
        r.declare("t.help", RunMode::Any, "help", "").trigger("помощь").handle(echo);
        let d = dispatcher(r);

        let turn = d.process("помощь", Some(&"t.gone".into()), None).unwrap();
        assert_eq!(turn.reply.as_deref(), Some("помощь|"));
        assert_eq!(turn.module, Some(ModuleId::from("t.help")));
        assert_eq!(turn.activation, Activation::Phrase);
    }

    #[test]
    fn set_debug_switches_engine_mode() {
        let d = dispatcher(Registrar::new());
        assert!(!d.status().debug);
        d.set_debug(true);
        d.set_debug(true);
        assert!(d.status().debug);
        d.set_debug(false);
        assert!(!d.status().debug);
    }

    #[test]
    fn ask_continuation_routes_directly() {
        let mut r = Registrar::new();
        r.declare("t.wiki", RunMode::Any, "wiki", "")
            .trigger("что такое")
            .handle(handler_fn(|call| {
                Ok(match call.activation {
                    Activation::Direct => Outcome::say(format!("выбрано {}", call.remainder)),
                    _ => Outcome::ask("Уточните: A, B"),
                })
            }));
        r.declare("t.catch", RunMode::Any, "catch", "").trigger("").handle(echo);
        let d = dispatcher(r);

        let asked = d.process("что такое ключ", None, None).unwrap();
        assert_eq!(asked.reply.as_deref(), Some("Уточните: A, B"));
        assert!(asked.awaiting_follow_up());
        let target = asked.follow_up.unwrap();
        assert_eq!(d.status().follow_up.as_ref(), Some(&target));

        let answered = d.process("A", Some(&target), None).unwrap();
        assert_eq!(answered.reply.as_deref(), Some("выбрано a"));
        assert_eq!(answered.activation, Activation::Direct);
        assert!(!answered.awaiting_follow_up());
        assert!(d.status().follow_up.is_none());
    }

    #[test]
    fn handler_error_propagates_without_effects() {
        let mut r = Registrar::new();
        r.declare("t.bad", RunMode::Any, "bad", "")
            .trigger("сломай")
            .handle(handler_fn(|_| Err("boom".into())));
        let d = dispatcher(r);
        let err = d.process("сломай", None, None).unwrap_err();
        assert!(err.to_string().contains("t.bad"));
        assert!(!d.status().debug);
    }

    #[test]
    fn active_model_reaches_handlers() {
        let mut r = Registrar::new();
        r.declare("t.model", RunMode::Any, "model", "")
            .trigger("модель")
            .handle(handler_fn(|call| Ok(Outcome::say(call.active_model.unwrap_or("-").to_string()))));
        let d = dispatcher(r);
        let turn = d.process("модель", None, Some("alexa.pmdl")).unwrap();
        assert_eq!(turn.reply.as_deref(), Some("alexa.pmdl"));
        assert_eq!(d.status().active_model.as_deref(), Some("alexa.pmdl"));
    }

    #[test]
    fn set_state_changes_registry_and_terminates() {
        let (collab, recorder) = recording();
        let mut r = Registrar::new();
        r.declare("t.admin", RunMode::Any, "admin", "")
            .trigger("выключи помощь")
            .handle(handler_fn(|_| {
                Ok(Outcome::set([
                    StateChange::Enabled { module: "t.help".into(), enabled: false },
                    StateChange::Terminate { delay: std::time::Duration::from_secs(1), reload: false },
                ]))
            }));
        r.declare("t.help", RunMode::Any, "help", "").trigger("помощь").handle(echo);
        let registry = ModuleRegistry::finalize(r.into_drafts(), &Map::new()).unwrap();
        let d = Dispatcher::new(registry, collab);

        let turn = d.process("выключи помощь", None, None).unwrap();
        assert_eq!(turn.reply, None);
        assert_eq!(reply(&d, "помощь"), None);
        assert_eq!(recorder.terminations().len(), 1);
        assert!(!d.persist()[&ModuleId::from("t.help")].enabled);
    }

    #[test]
    fn failed_reload_keeps_previous_registry() {
        let mut r = Registrar::new();
        r.declare("t.help", RunMode::Any, "help", "").trigger("помощь").handle(echo);
        let d = dispatcher(r);

        let mut bad = Registrar::new();
        bad.declare("t.a", RunMode::Any, "dup", "").trigger("a").handle(echo);
        bad.declare("t.b", RunMode::Any, "dup", "").trigger("b").handle(echo);
        assert!(d.reload(bad.into_drafts(), &Map::new()).is_err());
        assert_eq!(reply(&d, "помощь").as_deref(), Some("помощь|"));

        let mut good = Registrar::new();
        good.declare("t.weather", RunMode::Any, "weather", "").trigger("погода").handle(echo);
        d.reload(good.into_drafts(), &Map::new()).unwrap();
        assert_eq!(reply(&d, "помощь"), None);
        assert_eq!(reply(&d, "погода").as_deref(), Some("погода|"));
    }

    #[test]
    fn duplicate_registration_does_not_change_matching() {
        let mut r = Registrar::new();
        r.declare("t.stop", RunMode::Any, "stop", "")
            .trigger(("стоп", CompareMode::Equals))
            .trigger(("стоп", CompareMode::Equals))
            .handle(echo);
        let d = dispatcher(r);
        assert_eq!(reply(&d, "стоп").as_deref(), Some("стоп|"));
    }

    #[test]
    fn resolves_names_and_ids() {
        let mut r = Registrar::new();
        r.declare("t.help", RunMode::Any, "help", "").trigger("помощь").handle(echo);
        let d = dispatcher(r);
        assert_eq!(d.resolve("help"), Some(ModuleId::from("t.help")));
        assert_eq!(d.resolve("t.help"), Some(ModuleId::from("t.help")));
        assert_eq!(d.resolve("nothing"), None);
    }
}
