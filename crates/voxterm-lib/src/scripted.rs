//! Dynamic modules described in JSON.
//!
//! ```json
//! {
//!   "id": "quiz.capital",
//!   "name": "capital",
//!   "description": "Capital quiz",
//!   "mode": "any",
//!   "phrases": ["столица", {"phrase": "стоп викторина", "mode": "equals"}],
//!   "reply": [{"set": {"one_way": "self"}}, {"ask": "Столица Франции?"}]
//! }
//! ```
//!
//! `reply` is one effect or a list of them: `"next"`, `{"say": ..}`,
//! `{"ask": ..}`, `{"say_low": [[text, pause], ..]}` or
//! `{"set": {..}}`. `set` fields:
//!
//! - `"debug": bool`, `"toggle_debug": true`
//! - `"one_way": "self" | id | null`
//! - `"mode": {id: "normal" | "debug" | "any", ..}`
//! - `"enabled": {id: bool, ..}`
//! - `"terminate": {"delay": seconds, "reload": bool}`
//!
//! In texts, `{remainder}` and `{utterance}` are replaced with the current
//! call's values. Unknown `set` fields are ignored; a known field with a bad
//! value rejects the module.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use voxterm_core::effects::{Effect, Outcome, StateChange};
use voxterm_core::error::{HandlerError, RegistrationError};
use voxterm_core::module::{Handler, Invocation, Module};
use voxterm_core::types::{ModuleId, RunMode};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid module description: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("module {module:?}: bad reply: {reason}")]
    BadReply { module: String, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptSpec {
    pub id: ModuleId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "any_mode")]
    pub mode: RunMode,
    pub phrases: Value,
    pub reply: Value,
}

fn any_mode() -> RunMode {
    RunMode::Any
}

impl ScriptSpec {
    /// Validate and build the module.
    pub fn build(self) -> Result<Module, ScriptError> {
        let effects = parse_reply(&self.name, &self.reply)?;
        let mut draft = Module::draft(self.id, self.mode, &self.name, &self.description);
        draft
            .trigger_json(RunMode::Any, &self.phrases)?
            .handle(ScriptedHandler { effects });
        Ok(draft.build()?)
    }
}

/// Parse and build in one go.
pub fn module_from_json(value: Value) -> Result<Module, ScriptError> {
    serde_json::from_value::<ScriptSpec>(value)?.build()
}

// ─── Reply effects ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum ScriptEffect {
    Next,
    Say(String),
    Ask(String),
    SayLow(Vec<(String, f32)>),
    Set(Vec<ScriptChange>),
}

#[derive(Debug, Clone, PartialEq)]
enum ScriptChange {
    Debug(bool),
    ToggleDebug,
    OneWaySelf,
    OneWay(Option<ModuleId>),
    Mode(ModuleId, RunMode),
    Enabled(ModuleId, bool),
    Terminate { delay: Duration, reload: bool },
}

fn parse_reply(module: &str, value: &Value) -> Result<Vec<ScriptEffect>, ScriptError> {
    let bad = |reason: String| ScriptError::BadReply {
        module: module.to_string(),
        reason,
    };
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    if items.is_empty() {
        return Err(bad("empty effect list".into()));
    }
    items
        .into_iter()
        .map(|item| parse_effect(item).map_err(&bad))
        .collect()
}

fn parse_effect(value: &Value) -> Result<ScriptEffect, String> {
    if value.as_str() == Some("next") {
        return Ok(ScriptEffect::Next);
    }
    let Some(obj) = value.as_object().filter(|o| o.len() == 1) else {
        return Err(format!("expected \"next\" or a single-key object, got {value}"));
    };
    let Some((key, arg)) = obj.iter().next() else {
        return Err(format!("empty effect {value}"));
    };

    let text = || {
        arg.as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("{key} needs text, got {arg}"))
    };

    match key.as_str() {
        "say" => text().map(ScriptEffect::Say),
        "ask" => text().map(ScriptEffect::Ask),
        "say_low" => parse_say_low(arg).map(ScriptEffect::SayLow),
        "set" => arg
            .as_object()
            .ok_or_else(|| format!("set needs an object, got {arg}"))
            .and_then(parse_set)
            .map(ScriptEffect::Set),
        other => Err(format!("unknown effect {other:?}")),
    }
}

fn parse_say_low(arg: &Value) -> Result<Vec<(String, f32)>, String> {
    let Some(items) = arg.as_array() else {
        return Err(format!("say_low needs a list, got {arg}"));
    };
    items
        .iter()
        .map(|item| match item.as_array().map(Vec::as_slice) {
            Some([Value::String(text), pause]) => pause
                .as_f64()
                .map(|p| p as f32)
                .filter(|p| p.is_finite() && *p >= 0.0)
                .map(|p| (text.clone(), p))
                .ok_or_else(|| format!("bad pause in {item}")),
            Some([Value::String(text)]) => Ok((text.clone(), 0.0)),
            _ => Err(format!("say_low entry must be [text, pause], got {item}")),
        })
        .collect()
}

fn parse_set(fields: &Map<String, Value>) -> Result<Vec<ScriptChange>, String> {
    let mut changes = Vec::new();
    for (key, value) in fields {
        match (key.as_str(), value) {
            ("debug", Value::Bool(on)) => changes.push(ScriptChange::Debug(*on)),
            ("toggle_debug", Value::Bool(true)) => changes.push(ScriptChange::ToggleDebug),
            ("one_way", Value::Null) => changes.push(ScriptChange::OneWay(None)),
            ("one_way", Value::String(id)) if id == "self" => changes.push(ScriptChange::OneWaySelf),
            ("one_way", Value::String(id)) => {
                changes.push(ScriptChange::OneWay(Some(ModuleId::from(id.as_str()))))
            }
            ("mode", Value::Object(targets)) => {
                for (id, mode) in targets {
                    let mode = mode
                        .as_str()
                        .ok_or_else(|| format!("mode for {id} needs text, got {mode}"))?
                        .parse::<RunMode>()?;
                    changes.push(ScriptChange::Mode(ModuleId::from(id.as_str()), mode));
                }
            }
            ("enabled", Value::Object(targets)) => {
                for (id, enabled) in targets {
                    let enabled = enabled
                        .as_bool()
                        .ok_or_else(|| format!("enabled for {id} needs a bool, got {enabled}"))?;
                    changes.push(ScriptChange::Enabled(ModuleId::from(id.as_str()), enabled));
                }
            }
            ("terminate", Value::Object(spec)) => changes.push(parse_terminate(spec)?),
            ("debug" | "toggle_debug" | "one_way" | "mode" | "enabled" | "terminate", _) => {
                return Err(format!("bad value for set field {key}: {value}"));
            }
            _ => debug!("scripted: ignoring set field {key}={value}"),
        }
    }
    Ok(changes)
}

fn parse_terminate(spec: &Map<String, Value>) -> Result<ScriptChange, String> {
    let delay = match spec.get("delay") {
        None => Duration::ZERO,
        Some(secs) => secs
            .as_f64()
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .ok_or_else(|| format!("bad terminate delay {secs}"))?,
    };
    let reload = match spec.get("reload") {
        None => false,
        Some(Value::Bool(reload)) => *reload,
        Some(other) => return Err(format!("terminate reload needs a bool, got {other}")),
    };
    Ok(ScriptChange::Terminate { delay, reload })
}

// ─── Handler ───────────────────────────────────────────────────────────────

struct ScriptedHandler {
    effects: Vec<ScriptEffect>,
}

fn fill(template: &str, call: &Invocation<'_>) -> String {
    template
        .replace("{remainder}", call.remainder)
        .replace("{utterance}", call.utterance)
}

impl Handler for ScriptedHandler {
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        let effects = self
            .effects
            .iter()
            .map(|effect| match effect {
                ScriptEffect::Next => Effect::Next,
                ScriptEffect::Say(text) => Effect::Say(fill(text, call)),
                ScriptEffect::Ask(text) => Effect::Ask(fill(text, call)),
                ScriptEffect::SayLow(items) => Effect::SayLow(
                    items
                        .iter()
                        .map(|(text, pause)| (fill(text, call), *pause))
                        .collect(),
                ),
                ScriptEffect::Set(changes) => Effect::Set(
                    changes
                        .iter()
                        .map(|change| match change {
                            ScriptChange::Debug(on) => StateChange::Debug(*on),
                            ScriptChange::ToggleDebug => StateChange::ToggleDebug,
                            ScriptChange::OneWaySelf => StateChange::OneWay(Some(call.module.clone())),
                            ScriptChange::OneWay(target) => StateChange::OneWay(target.clone()),
                            ScriptChange::Mode(module, mode) => StateChange::Mode {
                                module: module.clone(),
                                mode: *mode,
                            },
                            ScriptChange::Enabled(module, enabled) => StateChange::Enabled {
                                module: module.clone(),
                                enabled: *enabled,
                            },
                            ScriptChange::Terminate { delay, reload } => StateChange::Terminate {
                                delay: *delay,
                                reload: *reload,
                            },
                        })
                        .collect(),
                ),
            })
            .collect::<Vec<_>>();
        Ok(Outcome::from(effects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    use voxterm_core::collab::{Collaborators, Silent, Terminator};
    use voxterm_core::dispatch::Dispatcher;
    use voxterm_core::locale::{Language, LocalizationProvider};
    use voxterm_core::registry::ModuleRegistry;
    use voxterm_core::types::Activation;

    use crate::modules::builtins;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(ModuleRegistry::default(), Collaborators::default())
    }

    #[test]
    fn say_with_remainder() {
        let module = module_from_json(json!({
            "id": "d.weather",
            "name": "weather",
            "phrases": "погода в",
            "reply": {"say": "В городе {remainder} солнечно"}
        }))
        .unwrap();
        let d = dispatcher();
        assert!(d.insert(module));
        let turn = d.process("погода в москве", None, None).unwrap();
        assert_eq!(turn.reply.as_deref(), Some("В городе москве солнечно"));
    }

    #[test]
    fn one_way_self_then_release() {
        let quiz = module_from_json(json!({
            "id": "d.quiz",
            "name": "quiz",
            "phrases": [{"phrase": "викторина", "mode": "equals"}],
            "reply": [{"set": {"one_way": "self", "colour": "red"}}, {"say": "Начали"}]
        }))
        .unwrap();
        let d = dispatcher();
        d.insert(quiz);

        assert_eq!(d.process("викторина", None, None).unwrap().reply.as_deref(), Some("Начали"));
        let status = d.status();
        assert_eq!(status.one_way, Some(ModuleId::from("d.quiz")));

        let turn = d.process("париж", None, None).unwrap();
        assert_eq!(turn.activation, Activation::OneWay);

        assert!(d.remove(&"d.quiz".into()));
        assert!(d.status().one_way.is_none());
    }

    #[test]
    fn next_passes_to_older_module() {
        let d = dispatcher();
        d.insert(
            module_from_json(json!({
                "id": "d.old", "name": "old", "phrases": "", "reply": {"say": "старый"}
            }))
            .unwrap(),
        );
        d.insert(
            module_from_json(json!({
                "id": "d.new", "name": "new", "phrases": "", "reply": "next"
            }))
            .unwrap(),
        );
        assert_eq!(d.process("что угодно", None, None).unwrap().reply.as_deref(), Some("старый"));
    }

    #[test]
    fn rejects_malformed_descriptions() {
        let bad_phrase = module_from_json(json!({
            "id": "d.x", "name": "x", "phrases": [42], "reply": "next"
        }));
        assert!(matches!(
            bad_phrase,
            Err(ScriptError::Registration(RegistrationError::PhraseNotText { .. }))
        ));

        let bad_effect = module_from_json(json!({
            "id": "d.x", "name": "x", "phrases": "x", "reply": {"shout": "x"}
        }));
        assert!(matches!(bad_effect, Err(ScriptError::BadReply { .. })));

        let bad_pause = module_from_json(json!({
            "id": "d.x", "name": "x", "phrases": "x", "reply": {"say_low": [["раз", -1]]}
        }));
        assert!(matches!(bad_pause, Err(ScriptError::BadReply { .. })));

        let bad_name = module_from_json(json!({
            "id": "d.x", "name": "Big Name", "phrases": "x", "reply": "next"
        }));
        assert!(matches!(bad_name, Err(ScriptError::Registration(_))));

        let missing = module_from_json(json!({"id": "d.x", "name": "x"}));
        assert!(matches!(missing, Err(ScriptError::Json(_))));
    }

    #[test]
    fn parses_say_low_entries() {
        let effects = parse_reply("x", &json!({"say_low": [["раз", 0.5], ["два"]]})).unwrap();
        assert_eq!(
            effects,
            vec![ScriptEffect::SayLow(vec![
                ("раз".to_string(), 0.5),
                ("два".to_string(), 0.0)
            ])]
        );
    }

    #[test]
    fn pause_too_large_for_f32_is_rejected() {
        let huge = module_from_json(json!({
            "id": "d.x", "name": "x", "phrases": "x", "reply": {"say_low": [["раз", 1e300]]}
        }));
        assert!(matches!(huge, Err(ScriptError::BadReply { .. })));
    }

    #[derive(Default)]
    struct Exits(Mutex<Vec<(Duration, bool)>>);

    impl Terminator for Exits {
        fn die_in(&self, delay: Duration, reload: bool) {
            self.0.lock().unwrap().push((delay, reload));
        }
    }

    #[test]
    fn set_reaches_module_flags_and_termination() {
        let locale = Arc::new(LocalizationProvider::new(Language::Ru));
        let registry = ModuleRegistry::finalize(builtins(&locale, None).into_drafts(), &Map::new()).unwrap();
        let exits = Arc::new(Exits::default());
        let collab = Collaborators {
            speaker: Arc::new(Silent),
            terminator: exits.clone(),
        };
        let d = Dispatcher::new(registry, collab);
        d.insert(
            module_from_json(json!({
                "id": "d.night", "name": "night", "phrases": "ночной режим",
                "reply": [
                    {"set": {"mode": {"talk.count": "debug"}, "enabled": {"talk.repeat": false}}},
                    {"set": {"terminate": {"delay": 1.5, "reload": true}}},
                    {"say": "спокойной ночи"}
                ]
            }))
            .unwrap(),
        );

        let turn = d.process("ночной режим", None, None).unwrap();
        assert_eq!(turn.reply.as_deref(), Some("спокойной ночи"));

        let modules = d.modules();
        let flags = |id: &str| {
            let id = ModuleId::from(id);
            modules
                .iter()
                .find(|m| m.id == id)
                .map(|m| (m.mode, m.enabled))
                .unwrap()
        };
        assert_eq!(flags("talk.count").0, RunMode::Debug);
        assert!(!flags("talk.repeat").1);
        assert_eq!(*exits.0.lock().unwrap(), vec![(Duration::from_millis(1500), true)]);
    }

    #[test]
    fn known_set_fields_need_valid_values() {
        for set in [
            json!({"mode": {"talk.count": "loud"}}),
            json!({"enabled": {"talk.count": "no"}}),
            json!({"terminate": {"delay": -1}}),
            json!({"debug": "yes"}),
        ] {
            let module = module_from_json(json!({
                "id": "d.x", "name": "x", "phrases": "x", "reply": {"set": set.clone()}
            }));
            assert!(matches!(module, Err(ScriptError::BadReply { .. })), "{set}");
        }
    }
}
