//! Advisory overlap check between trigger entries of different modules.
//!
//! Runs after every (re)load, once per debug state. Results are logged; they
//! never stop a load.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::module::Module;
use crate::registry::ModuleRegistry;
use crate::trigger::Trigger;
use crate::types::{CompareMode, ModuleId};

/// Representative phrase → names of the modules whose entries overlap on it.
pub type Conflicts = BTreeMap<String, BTreeSet<String>>;

/// Find overlapping entries among static modules visible under `debug`.
///
/// Modules in `skip` (catch-alls) are left out. Disabled modules are
/// checked too.
pub fn find_conflicts(registry: &ModuleRegistry, debug: bool, skip: &[ModuleId]) -> Conflicts {
    let entries: Vec<(&Module, &Trigger)> = registry
        .modules()
        .iter()
        .filter(|m| m.mode.visible(debug) && !skip.contains(&m.id))
        .flat_map(|m| {
            m.triggers
                .iter()
                .filter(move |t| t.run_mode.visible(debug))
                .map(move |t| (m, t))
        })
        .collect();

    let mut conflicts = Conflicts::new();
    for (i, (first_module, first)) in entries.iter().enumerate() {
        for (second_module, second) in &entries[i + 1..] {
            if first_module.id == second_module.id || !overlaps(first, second) {
                continue;
            }
            let names = conflicts.entry(first.phrase.clone()).or_default();
            names.insert(first_module.name.clone());
            names.insert(second_module.name.clone());
        }
    }
    conflicts
}

/// Whether one entry can shadow the other.
fn overlaps(a: &Trigger, b: &Trigger) -> bool {
    let (short, long) = if a.phrase.chars().count() <= b.phrase.chars().count() {
        (a, b)
    } else {
        (b, a)
    };

    if short.phrase.is_empty() || short.phrase == long.phrase {
        return true;
    }
    if long.phrase.starts_with(&short.phrase)
        && matches!(short.compare, CompareMode::Equals | CompareMode::StartsWith)
        && long.compare != CompareMode::EndsWith
    {
        return true;
    }
    short.compare == CompareMode::EndsWith
        && long.phrase.ends_with(&short.phrase)
        && matches!(long.compare, CompareMode::Equals | CompareMode::EndsWith)
}

/// Check both debug states and log what was found.
pub fn log_conflicts(registry: &ModuleRegistry, skip: &[ModuleId]) {
    for debug in [false, true] {
        let mode = if debug { "debug" } else { "normal" };
        for (phrase, names) in find_conflicts(registry, debug, skip) {
            let names: Vec<_> = names.into_iter().collect();
            warn!("{mode} mode: phrase {phrase:?} is claimed by [{}]", names.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::Outcome;
    use crate::error::HandlerError;
    use crate::module::{Invocation, Registrar};
    use crate::types::RunMode;
    use serde_json::Map;

    fn noop(_: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        Ok(Outcome::silent())
    }

    fn trigger(phrase: &str, compare: CompareMode) -> Trigger {
        Trigger {
            phrase: phrase.to_string(),
            compare,
            run_mode: RunMode::Any,
        }
    }

    #[test]
    fn overlap_rules() {
        use CompareMode::*;
        assert!(overlaps(&trigger("", Equals), &trigger("свет", EndsWith)));
        assert!(overlaps(&trigger("свет", EndsWith), &trigger("свет", Equals)));
        assert!(overlaps(&trigger("свет", StartsWith), &trigger("свет на кухне", StartsWith)));
        assert!(!overlaps(&trigger("свет", StartsWith), &trigger("свет на кухне", EndsWith)));
        assert!(overlaps(&trigger("кухне", EndsWith), &trigger("свет на кухне", Equals)));
        assert!(!overlaps(&trigger("кухне", EndsWith), &trigger("свет на кухне", StartsWith)));
        assert!(!overlaps(&trigger("погода", StartsWith), &trigger("музыка", StartsWith)));
    }

    #[test]
    fn reports_overlap_without_blocking_finalize() {
        let mut r = Registrar::new();
        r.declare("t.volume", RunMode::Any, "volume", "").trigger("громкость").handle(noop);
        r.declare("t.music", RunMode::Any, "music", "").trigger("громкость музыки").handle(noop);
        r.declare("t.weather", RunMode::Any, "weather", "").trigger("погода").handle(noop);
        let registry = ModuleRegistry::finalize(r.into_drafts(), &Map::new()).unwrap();

        let found = find_conflicts(&registry, false, &[]);
        assert_eq!(found.len(), 1);
        let names: Vec<_> = found["громкость"].iter().cloned().collect();
        assert_eq!(names, vec!["music", "volume"]);
    }

    #[test]
    fn respects_run_mode_and_skip_list() {
        let mut r = Registrar::new();
        r.declare("t.forward", RunMode::Normal, "forward", "").trigger("").handle(noop);
        r.declare("t.status", RunMode::Debug, "status", "").trigger("статус").handle(noop);
        r.declare("t.help", RunMode::Any, "help", "").trigger("помощь").handle(noop);
        let registry = ModuleRegistry::finalize(r.into_drafts(), &Map::new()).unwrap();

        // wildcard catches everything in normal mode
        assert!(!find_conflicts(&registry, false, &[]).is_empty());
        assert!(find_conflicts(&registry, false, &["t.forward".into()]).is_empty());
        // the normal-only wildcard is invisible in debug mode
        assert!(find_conflicts(&registry, true, &[]).is_empty());
    }

    #[test]
    fn same_module_never_conflicts_with_itself() {
        let mut r = Registrar::new();
        r.declare("t.a", RunMode::Any, "a", "").trigger(["стоп", "стоп музыку"]).handle(noop);
        let registry = ModuleRegistry::finalize(r.into_drafts(), &Map::new()).unwrap();
        assert!(find_conflicts(&registry, false, &[]).is_empty());
    }
}
