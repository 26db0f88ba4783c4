//! Localized strings for built-in modules.
//!
//! Tables are embedded; `|` separates alternatives in phrase keys and `{}` is
//! replaced by arguments in order.

use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ru,
    En,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Ru, Language::En];

    pub fn code(self) -> &'static str {
        match self {
            Language::Ru => "ru",
            Language::En => "en",
        }
    }

    fn table(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Language::Ru => RU,
            Language::En => EN,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = LocaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ru" | "rus" | "russian" => Ok(Language::Ru),
            "en" | "eng" | "english" => Ok(Language::En),
            other => Err(LocaleError::UnknownLanguage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocaleError {
    #[error("unknown language {0:?}, expected one of: ru, en")]
    UnknownLanguage(String),
}

/// Active language plus lookups into its table.
#[derive(Debug, Default)]
pub struct LocalizationProvider {
    language: RwLock<Language>,
}

impl LocalizationProvider {
    pub fn new(language: Language) -> Self {
        Self {
            language: RwLock::new(language),
        }
    }

    pub fn language(&self) -> Language {
        *self.language.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch the active table.
    pub fn reload(&self, language: &str) -> Result<Language, LocaleError> {
        let language: Language = language.parse()?;
        let mut active = self.language.write().unwrap_or_else(|e| e.into_inner());
        if *active != language {
            info!("language {} -> {language}", *active);
            *active = language;
        }
        Ok(language)
    }

    /// String for `key`, or the key itself when no table has it.
    pub fn text(&self, key: &str) -> String {
        let language = self.language();
        lookup(language, key)
            .or_else(|| {
                warn!("locale {language}: missing key {key}");
                lookup(Language::Ru, key)
            })
            .unwrap_or(key)
            .to_string()
    }

    /// [`text`](Self::text) with each `{}` replaced by the next argument.
    pub fn format(&self, key: &str, args: &[&dyn fmt::Display]) -> String {
        let template = self.text(key);
        let mut out = String::with_capacity(template.len());
        let mut args = args.iter();
        let mut rest = template.as_str();
        while let Some(at) = rest.find("{}") {
            out.push_str(&rest[..at]);
            match args.next() {
                Some(arg) => out.push_str(&arg.to_string()),
                None => out.push_str("{}"),
            }
            rest = &rest[at + 2..];
        }
        out.push_str(rest);
        out
    }

    /// Alternatives of a `|`-separated key.
    pub fn phrases(&self, key: &str) -> Vec<String> {
        self.text(key)
            .split('|')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn lookup(language: Language, key: &str) -> Option<&'static str> {
    language
        .table()
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
}

// ─── Tables ────────────────────────────────────────────────────────────────

const RU: &[(&str, &str)] = &[
    ("common.on", "включена"),
    ("common.off", "выключена"),
    ("common.none", "нет"),
    ("help.description", "Рассказывает, что я умею"),
    ("help.phrases", "помощь|что ты умеешь"),
    ("help.reply", "Я умею: {}"),
    ("help.empty", "Сейчас мне нечего предложить"),
    ("debug.description", "Включает и выключает режим отладки"),
    ("debug.enter", "режим отладки"),
    ("debug.leave", "выход из отладки"),
    ("debug.on", "Режим отладки включён"),
    ("debug.off", "Режим отладки выключен"),
    ("lock.description", "Блокирует все команды, кроме разблокировки"),
    ("lock.phrase", "блокировка"),
    ("lock.unlock", "разблокировать"),
    ("lock.locked", "Заблокировано"),
    ("lock.unlocked", "Разблокировано"),
    ("modules.description", "Включает, выключает и переключает модули"),
    ("modules.enable", "включи модуль"),
    ("modules.disable", "выключи модуль"),
    ("modules.mode", "режим модуля"),
    ("modules.enabled", "Модуль {} включён"),
    ("modules.disabled", "Модуль {} выключен"),
    ("modules.moded", "Модуль {} теперь в режиме {}"),
    ("modules.unknown", "Не знаю модуль {}"),
    ("modules.fixed", "Модуль {} нельзя менять"),
    ("modules.bad_mode", "Не знаю режим {}"),
    ("mode.normal", "обычный"),
    ("mode.debug", "отладочный"),
    ("mode.any", "любой"),
    ("shutdown.description", "Выключает или перезапускает ассистента"),
    ("shutdown.phrase", "выключись"),
    ("shutdown.reload", "перезагрузись"),
    ("shutdown.confirm", "Точно выключиться?"),
    ("shutdown.confirm_reload", "Точно перезагрузиться?"),
    ("shutdown.yes", "да|конечно|подтверждаю"),
    ("shutdown.bye", "Выключаюсь"),
    ("shutdown.restart", "Перезагружаюсь"),
    ("shutdown.cancel", "Отменено"),
    ("count.description", "Считает вслух"),
    ("count.phrase", "посчитай до"),
    ("count.start", "Считаю до {}"),
    ("count.bad", "Не понял число"),
    ("count.numbers", "ноль|один|два|три|четыре|пять|шесть|семь|восемь|девять|десять"),
    ("repeat.description", "Повторяет сказанное"),
    ("repeat.phrase", "повтори|скажи"),
    ("repeat.empty", "Нечего повторять"),
    ("status.description", "Сообщает состояние ассистента"),
    ("status.phrase", "статус"),
    ("status.reply", "Отладка {}, блокировка {}, динамических модулей {}, модель {}"),
    ("forward.description", "Передаёт остальные команды умному дому"),
];

const EN: &[(&str, &str)] = &[
    ("common.on", "on"),
    ("common.off", "off"),
    ("common.none", "none"),
    ("help.description", "Tells what I can do"),
    ("help.phrases", "help|what can you do"),
    ("help.reply", "I can: {}"),
    ("help.empty", "I have nothing to offer right now"),
    ("debug.description", "Turns debug mode on and off"),
    ("debug.enter", "debug mode"),
    ("debug.leave", "leave debug"),
    ("debug.on", "Debug mode on"),
    ("debug.off", "Debug mode off"),
    ("lock.description", "Blocks every command except unlock"),
    ("lock.phrase", "lock"),
    ("lock.unlock", "unlock"),
    ("lock.locked", "Locked"),
    ("lock.unlocked", "Unlocked"),
    ("modules.description", "Enables, disables and switches modules"),
    ("modules.enable", "enable module"),
    ("modules.disable", "disable module"),
    ("modules.mode", "module mode"),
    ("modules.enabled", "Module {} enabled"),
    ("modules.disabled", "Module {} disabled"),
    ("modules.moded", "Module {} is now in {} mode"),
    ("modules.unknown", "I don't know module {}"),
    ("modules.fixed", "Module {} cannot be changed"),
    ("modules.bad_mode", "I don't know mode {}"),
    ("mode.normal", "normal"),
    ("mode.debug", "debug"),
    ("mode.any", "any"),
    ("shutdown.description", "Shuts the assistant down or restarts it"),
    ("shutdown.phrase", "shut down"),
    ("shutdown.reload", "restart"),
    ("shutdown.confirm", "Really shut down?"),
    ("shutdown.confirm_reload", "Really restart?"),
    ("shutdown.yes", "yes|sure|confirm"),
    ("shutdown.bye", "Shutting down"),
    ("shutdown.restart", "Restarting"),
    ("shutdown.cancel", "Cancelled"),
    ("count.description", "Counts out loud"),
    ("count.phrase", "count to"),
    ("count.start", "Counting to {}"),
    ("count.bad", "I didn't get the number"),
    ("count.numbers", "zero|one|two|three|four|five|six|seven|eight|nine|ten"),
    ("repeat.description", "Repeats what was said"),
    ("repeat.phrase", "repeat|say"),
    ("repeat.empty", "Nothing to repeat"),
    ("status.description", "Reports assistant state"),
    ("status.phrase", "status"),
    ("status.reply", "Debug {}, lock {}, dynamic modules {}, model {}"),
    ("forward.description", "Hands other commands to the smart home"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_have_the_same_keys() {
        let ru: Vec<_> = RU.iter().map(|(k, _)| *k).collect();
        let en: Vec<_> = EN.iter().map(|(k, _)| *k).collect();
        assert_eq!(ru, en);
    }

    #[test]
    fn substitutes_arguments_in_order() {
        let locale = LocalizationProvider::new(Language::Ru);
        assert_eq!(
            locale.format("modules.moded", &[&"help", &"отладочный"]),
            "Модуль help теперь в режиме отладочный"
        );
        // missing arguments leave the placeholder
        assert_eq!(locale.format("help.reply", &[]), "Я умею: {}");
    }

    #[test]
    fn reload_switches_table() {
        let locale = LocalizationProvider::default();
        assert_eq!(locale.phrases("help.phrases"), vec!["помощь", "что ты умеешь"]);
        assert_eq!(locale.reload("EN").unwrap(), Language::En);
        assert_eq!(locale.text("lock.locked"), "Locked");
        assert_eq!(
            locale.reload("de"),
            Err(LocaleError::UnknownLanguage("de".to_string()))
        );
        assert_eq!(locale.language(), Language::En);
    }

    #[test]
    fn unknown_key_falls_back_to_itself() {
        let locale = LocalizationProvider::new(Language::En);
        assert_eq!(locale.text("nope.nothing"), "nope.nothing");
    }
}
