//! Trigger table: the (phrase, comparison mode, run mode) entries a module
//! answers to.
//!
//! Phrases are folded once when they are registered. Registering the same
//! entry twice keeps both copies; matching behaviour is unchanged because the
//! first copy always wins.

use serde_json::Value;

use crate::error::RegistrationError;
use crate::text::fold;
use crate::types::{CompareMode, RunMode};

// ─── Phrase input ──────────────────────────────────────────────────────────

/// One phrase as declared by a module author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhraseSpec {
    /// Bare phrase, compared with [`CompareMode::StartsWith`].
    Bare(String),
    /// Phrase with an explicit comparison mode.
    Moded(String, CompareMode),
}

impl From<&str> for PhraseSpec {
    fn from(s: &str) -> Self {
        PhraseSpec::Bare(s.to_string())
    }
}

impl From<String> for PhraseSpec {
    fn from(s: String) -> Self {
        PhraseSpec::Bare(s)
    }
}

impl From<(&str, CompareMode)> for PhraseSpec {
    fn from((s, mode): (&str, CompareMode)) -> Self {
        PhraseSpec::Moded(s.to_string(), mode)
    }
}

impl From<(String, CompareMode)> for PhraseSpec {
    fn from((s, mode): (String, CompareMode)) -> Self {
        PhraseSpec::Moded(s, mode)
    }
}

/// A single phrase, a (phrase, mode) pair, or an ordered list mixing both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Phrases(Vec<PhraseSpec>);

impl Phrases {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse phrases from JSON.
    ///
    /// Accepts a string, an object `{"phrase": .., "mode": ..}`, or an array
    /// of those. Anything else is rejected with the offending entry and the
    /// declaring module's name.
    pub fn from_json(module: &str, value: &Value) -> Result<Self, RegistrationError> {
        match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| parse_entry(module, index, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Phrases),
            other => parse_entry(module, 0, other).map(|spec| Phrases(vec![spec])),
        }
    }
}

fn parse_entry(module: &str, index: usize, value: &Value) -> Result<PhraseSpec, RegistrationError> {
    let not_text = || RegistrationError::PhraseNotText {
        module: module.to_string(),
        index,
        entry: value.to_string(),
    };

    match value {
        Value::String(s) => Ok(PhraseSpec::Bare(s.clone())),
        Value::Object(obj) => {
            let phrase = obj.get("phrase").and_then(Value::as_str).ok_or_else(not_text)?;
            match obj.get("mode") {
                None | Some(Value::Null) => Ok(PhraseSpec::Bare(phrase.to_string())),
                Some(Value::String(mode)) => mode
                    .parse::<CompareMode>()
                    .map(|mode| PhraseSpec::Moded(phrase.to_string(), mode))
                    .map_err(|_| RegistrationError::UnknownCompareMode {
                        module: module.to_string(),
                        index,
                        mode: mode.clone(),
                    }),
                Some(other) => Err(RegistrationError::UnknownCompareMode {
                    module: module.to_string(),
                    index,
                    mode: other.to_string(),
                }),
            }
        }
        _ => Err(not_text()),
    }
}

impl From<PhraseSpec> for Phrases {
    fn from(spec: PhraseSpec) -> Self {
        Phrases(vec![spec])
    }
}

impl From<&str> for Phrases {
    fn from(s: &str) -> Self {
        Phrases(vec![s.into()])
    }
}

impl From<String> for Phrases {
    fn from(s: String) -> Self {
        Phrases(vec![s.into()])
    }
}

impl From<(&str, CompareMode)> for Phrases {
    fn from(pair: (&str, CompareMode)) -> Self {
        Phrases(vec![pair.into()])
    }
}

impl From<Vec<PhraseSpec>> for Phrases {
    fn from(specs: Vec<PhraseSpec>) -> Self {
        Phrases(specs)
    }
}

impl From<Vec<String>> for Phrases {
    fn from(list: Vec<String>) -> Self {
        Phrases(list.into_iter().map(PhraseSpec::Bare).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Phrases {
    fn from(list: [&str; N]) -> Self {
        Phrases(list.into_iter().map(PhraseSpec::from).collect())
    }
}

impl<const N: usize> From<[PhraseSpec; N]> for Phrases {
    fn from(list: [PhraseSpec; N]) -> Self {
        Phrases(list.into())
    }
}

// ─── Entries ───────────────────────────────────────────────────────────────

/// One compiled trigger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Folded phrase text; empty means wildcard.
    pub phrase: String,
    pub compare: CompareMode,
    pub run_mode: RunMode,
}

/// A successful comparison of an utterance against a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// The matched part of the utterance (whole utterance for EQUALS).
    pub phrase: String,
    /// What is left once the matched phrase is stripped.
    pub remainder: String,
}

impl Trigger {
    pub fn is_wildcard(&self) -> bool {
        self.phrase.is_empty()
    }

    /// Compare against an already folded utterance.
    pub fn matches(&self, utterance: &str) -> Option<Match> {
        if self.is_wildcard() {
            return Some(Match {
                phrase: String::new(),
                remainder: utterance.to_string(),
            });
        }

        match self.compare {
            CompareMode::Equals => (utterance == self.phrase).then(|| Match {
                phrase: utterance.to_string(),
                remainder: String::new(),
            }),
            CompareMode::StartsWith => utterance.strip_prefix(self.phrase.as_str()).map(|rest| Match {
                phrase: self.phrase.clone(),
                remainder: rest.trim_start().to_string(),
            }),
            CompareMode::EndsWith => utterance.strip_suffix(self.phrase.as_str()).map(|rest| Match {
                phrase: self.phrase.clone(),
                remainder: rest.trim_end().to_string(),
            }),
        }
    }
}

// ─── Table ─────────────────────────────────────────────────────────────────

/// Per-module trigger entries in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerTable {
    entries: Vec<Trigger>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold and append entries under `run_mode`. Repeated calls accumulate.
    pub fn register(&mut self, phrases: impl Into<Phrases>, run_mode: RunMode) {
        for spec in phrases.into().0 {
            let (phrase, compare) = match spec {
                PhraseSpec::Bare(p) => (p, CompareMode::StartsWith),
                PhraseSpec::Moded(p, mode) => (p, mode),
            };
            self.entries.push(Trigger {
                phrase: fold(phrase.trim()),
                compare,
                run_mode,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.entries.iter()
    }

    /// Entries visible under the given debug flag, in matching order:
    /// registration order, with wildcards after every non-wildcard entry.
    pub fn visible(&self, debug: bool) -> impl Iterator<Item = &Trigger> {
        let shown = move |t: &&Trigger| t.run_mode.visible(debug);
        let specific = self.entries.iter().filter(shown).filter(|t| !t.is_wildcard());
        let wildcards = self.entries.iter().filter(shown).filter(|t| t.is_wildcard());
        specific.chain(wildcards)
    }

    /// Every visible entry that matches, in matching order.
    pub fn matches<'a>(&'a self, utterance: &'a str, debug: bool) -> impl Iterator<Item = Match> + 'a {
        self.visible(debug).filter_map(move |t| t.matches(utterance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(phrases: impl Into<Phrases>) -> TriggerTable {
        let mut t = TriggerTable::new();
        t.register(phrases, RunMode::Any);
        t
    }

    #[test]
    fn starts_with_strips_prefix() {
        let t = table("Громкость");
        let m = t.matches("громкость музыки", false).next().unwrap();
        assert_eq!(m.phrase, "громкость");
        assert_eq!(m.remainder, "музыки");
    }

    #[test]
    fn equals_is_exact() {
        let t = table(("выход", CompareMode::Equals));
        assert!(t.matches("выход", false).next().is_some());
        assert!(t.matches("выход срочно", false).next().is_none());
    }

    #[test]
    fn ends_with_keeps_prefix() {
        let t = table(("пожалуйста", CompareMode::EndsWith));
        let m = t.matches("включи свет пожалуйста", false).next().unwrap();
        assert_eq!(m.phrase, "пожалуйста");
        assert_eq!(m.remainder, "включи свет");
    }

    #[test]
    fn wildcard_matches_everything_unstripped() {
        let t = table("");
        let m = t.matches("что угодно", false).next().unwrap();
        assert_eq!(m.phrase, "");
        assert_eq!(m.remainder, "что угодно");
    }

    #[test]
    fn wildcard_tried_last_within_table() {
        let mut t = TriggerTable::new();
        t.register(["", "привет"], RunMode::Any);
        let found: Vec<_> = t.matches("привет мир", false).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].phrase, "привет");
        assert_eq!(found[1].phrase, "");
    }

    #[test]
    fn run_mode_filters_entries() {
        let mut t = TriggerTable::new();
        t.register("x", RunMode::Normal);
        assert!(t.matches("x", false).next().is_some());
        assert!(t.matches("x", true).next().is_none());
    }

    #[test]
    fn duplicate_registration_accumulates() {
        let mut t = TriggerTable::new();
        t.register(("стоп", CompareMode::Equals), RunMode::Any);
        t.register(("стоп", CompareMode::Equals), RunMode::Any);
        assert_eq!(t.len(), 2);
        let first = t.matches("стоп", false).next().unwrap();
        assert_eq!(first.remainder, "");
    }

    #[test]
    fn parses_json_phrase_list() {
        let value = json!(["привет", {"phrase": "пока", "mode": "equals"}]);
        let phrases = Phrases::from_json("greet", &value).unwrap();
        assert_eq!(
            phrases,
            Phrases::from(vec![
                PhraseSpec::Bare("привет".into()),
                PhraseSpec::Moded("пока".into(), CompareMode::Equals),
            ])
        );
    }

    #[test]
    fn rejects_non_text_phrase() {
        let err = Phrases::from_json("greet", &json!(["ok", 42])).unwrap_err();
        assert_eq!(
            err,
            RegistrationError::PhraseNotText {
                module: "greet".into(),
                index: 1,
                entry: "42".into(),
            }
        );
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = Phrases::from_json("greet", &json!({"phrase": "a", "mode": "sometimes"})).unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownCompareMode { ref mode, .. } if mode == "sometimes"));
    }
}
