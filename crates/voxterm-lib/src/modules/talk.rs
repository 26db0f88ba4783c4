//! Small talk modules: counting out loud and repeating.

use std::sync::Arc;

use voxterm_core::effects::{Effect, Outcome};
use voxterm_core::error::HandlerError;
use voxterm_core::locale::LocalizationProvider;
use voxterm_core::module::{Handler, Invocation};
use voxterm_core::text::fold;

/// Highest number `count` goes to.
pub const COUNT_LIMIT: u32 = 20;
/// Pause after each number, in seconds.
pub const COUNT_PAUSE: f32 = 1.0;

pub struct CountHandler {
    pub locale: Arc<LocalizationProvider>,
    numbers: Vec<String>,
}

impl CountHandler {
    pub fn new(locale: Arc<LocalizationProvider>) -> Self {
        let numbers = locale.phrases("count.numbers").iter().map(|n| fold(n)).collect();
        Self { locale, numbers }
    }

    /// Digits or a number word from the locale table.
    fn parse(&self, word: &str) -> Option<u32> {
        word.parse().ok().or_else(|| {
            self.numbers
                .iter()
                .position(|n| n == word)
                .and_then(|i| u32::try_from(i).ok())
        })
    }
}

impl Handler for CountHandler {
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        let target = call.remainder.split_whitespace().next().and_then(|w| self.parse(w));
        let Some(n) = target.filter(|n| (1..=COUNT_LIMIT).contains(n)) else {
            return Ok(Outcome::say(self.locale.text("count.bad")));
        };
        let numbers = (1..=n).map(|i| (i.to_string(), COUNT_PAUSE));
        Ok(Outcome::say(self.locale.format("count.start", &[&n]))
            .then(Effect::SayLow(numbers.collect())))
    }
}

pub struct RepeatHandler {
    pub locale: Arc<LocalizationProvider>,
}

impl Handler for RepeatHandler {
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        if call.remainder.is_empty() {
            return Ok(Outcome::say(self.locale.text("repeat.empty")));
        }
        Ok(Outcome::say(call.remainder))
    }
}
