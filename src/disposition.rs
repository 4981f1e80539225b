use crate::debug::{DebugLogger, Field};
use crate::error::ProtocolError;
use crate::unit::UnitIdentity;
use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, Write};

/// Synchronous yes/no decision provider, asked once per prompt.
pub trait DecisionSource {
    fn ask_yes_no(&mut self, prompt: &str, default: bool) -> bool;
}

impl<F> DecisionSource for F
where
    F: FnMut(&str, bool) -> bool,
{
    fn ask_yes_no(&mut self, prompt: &str, default: bool) -> bool {
        self(prompt, default)
    }
}

/// Answers from a fixed script, falling back to the prompt default once the
/// script runs out. Every prompt is kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDecisions {
    answers: VecDeque<bool>,
    asked: Vec<String>,
}

impl ScriptedDecisions {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: Vec::new(),
        }
    }

    pub fn asked(&self) -> &[String] {
        &self.asked
    }
}

impl DecisionSource for ScriptedDecisions {
    fn ask_yes_no(&mut self, prompt: &str, default: bool) -> bool {
        self.asked.push(prompt.to_string());
        self.answers.pop_front().unwrap_or(default)
    }
}

/// Line-oriented prompt: `[Y/n]` or `[y/N]`, empty input takes the default,
/// anything but y/yes/n/no asks again. End of input takes the default.
pub struct ConsoleDecisions<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleDecisions<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> DecisionSource for ConsoleDecisions<R, W> {
    fn ask_yes_no(&mut self, prompt: &str, default: bool) -> bool {
        let options = if default { "Y/n" } else { "y/N" };
        loop {
            let _ = write!(self.output, "{prompt} [{options}]: ");
            let _ = self.output.flush();
            let mut line = String::new();
            match self.input.read_line(&mut line) {
                Ok(0) | Err(_) => return default,
                Ok(_) => {}
            }
            match line.trim().to_lowercase().as_str() {
                "" => return default,
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => {
                    let _ = writeln!(self.output, "Please enter 'y' or 'n'");
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Repairable,
    Unrepairable,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Repairable => "repairable",
            Disposition::Unrepairable => "unrepairable",
        }
    }
}

pub fn continue_prompt(unit: UnitIdentity) -> String {
    format!("Unit {unit} failed some tests. Continue anyway?")
}

pub fn classify_prompt(unit: UnitIdentity) -> String {
    format!("Repairable defect? - {unit}")
}

/// Per-run bookkeeping of failing units. Each unit is classified at most once;
/// the counts are the list lengths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispositionTracker {
    repairable: Vec<UnitIdentity>,
    unrepairable: Vec<UnitIdentity>,
    classified: BTreeMap<UnitIdentity, Disposition>,
}

impl DispositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks whether to continue past the failing `unit` (default: no) and, if so,
    /// whether the defect is repairable (default: yes). Declining to continue
    /// aborts the batch.
    pub fn handle_failure(
        &mut self,
        unit: UnitIdentity,
        decisions: &mut dyn DecisionSource,
    ) -> Result<Disposition, ProtocolError> {
        self.handle_failure_with(unit, decisions, None)
    }

    pub(crate) fn handle_failure_with(
        &mut self,
        unit: UnitIdentity,
        decisions: &mut dyn DecisionSource,
        debug: Option<&DebugLogger>,
    ) -> Result<Disposition, ProtocolError> {
        if let Some(existing) = self.classified.get(&unit) {
            return Ok(*existing);
        }
        if !decisions.ask_yes_no(&continue_prompt(unit), false) {
            if let Some(logger) = debug {
                logger.event(
                    "disposition.abort",
                    &[("unit", Field::Str(&unit.to_string()))],
                );
            }
            return Err(ProtocolError::UserAborted(unit));
        }
        let disposition = if decisions.ask_yes_no(&classify_prompt(unit), true) {
            self.repairable.push(unit);
            Disposition::Repairable
        } else {
            self.unrepairable.push(unit);
            Disposition::Unrepairable
        };
        self.classified.insert(unit, disposition);
        if let Some(logger) = debug {
            logger.event(
                "disposition.decision",
                &[
                    ("unit", Field::Str(&unit.to_string())),
                    ("disposition", Field::Str(disposition.as_str())),
                ],
            );
        }
        Ok(disposition)
    }

    pub fn disposition(&self, unit: UnitIdentity) -> Option<Disposition> {
        self.classified.get(&unit).copied()
    }

    pub fn repairable(&self) -> &[UnitIdentity] {
        &self.repairable
    }

    pub fn unrepairable(&self) -> &[UnitIdentity] {
        &self.unrepairable
    }

    pub fn repairable_count(&self) -> usize {
        self.repairable.len()
    }

    pub fn unrepairable_count(&self) -> usize {
        self.unrepairable.len()
    }

    pub(crate) fn into_lists(self) -> (Vec<UnitIdentity>, Vec<UnitIdentity>) {
        (self.repairable, self.unrepairable)
    }
}
