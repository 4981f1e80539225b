use crate::disposition::DecisionSource;
use chrono::NaiveDate;

pub const CHECK_DATE_FORMAT: &str = "%d.%m.%Y";
pub const DEFAULT_PRODUCTION_DOC: &str = "XXXXYYYY_YYMMDD";
pub const DEFAULT_WORKER: &str = "XXXX";

/// Manufacturing steps listed in section B1 of the header page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationStep {
    InputCheck,
    AdditionalAssembly,
    CableProduction,
    CableCheck,
    IsolationMeasurement,
    Programming,
    ElectricalTest,
    Coating,
    ComponentFixing,
    StructuralAssembly,
    Calibration,
    ProductMarking,
    FinishingWork,
}

impl OperationStep {
    pub const ALL: [OperationStep; 13] = [
        OperationStep::InputCheck,
        OperationStep::AdditionalAssembly,
        OperationStep::CableProduction,
        OperationStep::CableCheck,
        OperationStep::IsolationMeasurement,
        OperationStep::Programming,
        OperationStep::ElectricalTest,
        OperationStep::Coating,
        OperationStep::ComponentFixing,
        OperationStep::StructuralAssembly,
        OperationStep::Calibration,
        OperationStep::ProductMarking,
        OperationStep::FinishingWork,
    ];

    pub fn label(self) -> &'static str {
        match self {
            OperationStep::InputCheck => "Input check",
            OperationStep::AdditionalAssembly => "Additional assembly, PCB rework",
            OperationStep::CableProduction => "Electrical interconnections - production",
            OperationStep::CableCheck => "Electrical interconnections - check",
            OperationStep::IsolationMeasurement => "Insulation strength measurement",
            OperationStep::Programming => "Programming and configuration",
            OperationStep::ElectricalTest => "PCB electrical test",
            OperationStep::Coating => "PCB coating and UV check",
            OperationStep::ComponentFixing => "Component fixing on PCB",
            OperationStep::StructuralAssembly => "Structural parts assembly",
            OperationStep::Calibration => "Calibration",
            OperationStep::ProductMarking => "Semi-product marking",
            OperationStep::FinishingWork => "Finishing work",
        }
    }

    /// Whether the step is usually performed for a batch.
    pub fn default_checked(self) -> bool {
        !matches!(
            self,
            OperationStep::CableProduction
                | OperationStep::CableCheck
                | OperationStep::StructuralAssembly
                | OperationStep::Calibration
        )
    }

    pub fn prompt(self) -> String {
        format!("{}?", self.label())
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationChecklist {
    checked: [bool; 13],
}

impl Default for OperationChecklist {
    fn default() -> Self {
        Self::defaults()
    }
}

impl OperationChecklist {
    pub fn defaults() -> Self {
        Self {
            checked: OperationStep::ALL.map(OperationStep::default_checked),
        }
    }

    pub fn none() -> Self {
        Self {
            checked: [false; 13],
        }
    }

    /// Asks for every step in order, offering the step default.
    pub fn from_decisions(decisions: &mut dyn DecisionSource) -> Self {
        let mut list = Self::none();
        for step in OperationStep::ALL {
            let checked = decisions.ask_yes_no(&step.prompt(), step.default_checked());
            list.set(step, checked);
        }
        list
    }

    pub fn with(mut self, step: OperationStep, checked: bool) -> Self {
        self.set(step, checked);
        self
    }

    pub fn set(&mut self, step: OperationStep, checked: bool) {
        self.checked[step.index()] = checked;
    }

    pub fn is_checked(&self, step: OperationStep) -> bool {
        self.checked[step.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (OperationStep, bool)> + '_ {
        OperationStep::ALL
            .into_iter()
            .map(|step| (step, self.is_checked(step)))
    }
}

/// Operator-supplied fields of the header page.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolHeader {
    pub protocol_number: String,
    pub production_doc: String,
    pub worker: String,
    pub check_date: NaiveDate,
    pub note: String,
    pub operations: OperationChecklist,
}

impl ProtocolHeader {
    /// Header dated today with placeholder documentation and worker fields.
    pub fn new(protocol_number: impl Into<String>) -> Self {
        Self {
            protocol_number: protocol_number.into(),
            production_doc: DEFAULT_PRODUCTION_DOC.to_string(),
            worker: DEFAULT_WORKER.to_string(),
            check_date: chrono::Local::now().date_naive(),
            note: String::new(),
            operations: OperationChecklist::defaults(),
        }
    }

    pub fn with_production_doc(mut self, doc: impl Into<String>) -> Self {
        self.production_doc = doc.into();
        self
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = worker.into();
        self
    }

    pub fn with_check_date(mut self, date: NaiveDate) -> Self {
        self.check_date = date;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn with_operations(mut self, operations: OperationChecklist) -> Self {
        self.operations = operations;
        self
    }

    pub fn check_date_label(&self) -> String {
        self.check_date.format(CHECK_DATE_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposition::ScriptedDecisions;

    #[test]
    fn defaults_skip_cabling_assembly_and_calibration() {
        let list = OperationChecklist::defaults();
        let unchecked: Vec<OperationStep> = list
            .iter()
            .filter(|(_, checked)| !checked)
            .map(|(step, _)| step)
            .collect();
        assert_eq!(
            unchecked,
            vec![
                OperationStep::CableProduction,
                OperationStep::CableCheck,
                OperationStep::StructuralAssembly,
                OperationStep::Calibration,
            ]
        );
    }

    #[test]
    fn checklist_prompts_every_step_in_order() {
        let mut script = ScriptedDecisions::new([false]);
        let list = OperationChecklist::from_decisions(&mut script);
        assert_eq!(script.asked().len(), 13);
        assert_eq!(script.asked()[0], "Input check?");
        assert!(!list.is_checked(OperationStep::InputCheck));
        // The rest fell back to their defaults.
        assert_eq!(
            list.with(OperationStep::InputCheck, true),
            OperationChecklist::defaults()
        );
    }

    #[test]
    fn check_date_uses_day_month_year() {
        let header = ProtocolHeader::new("17")
            .with_check_date(NaiveDate::from_ymd_opt(2024, 3, 5).expect("date"));
        assert_eq!(header.check_date_label(), "05.03.2024");
    }
}
