use crate::power::CycleReport;
use crate::switch::SwitchConfigError;

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum CycleError {
    #[display("Invalid monitor configuration: {_0}")]
    Config(SwitchConfigError),

    #[display("Another monitoring cycle is in progress")]
    Busy,

    //the report is kept so a computed but unsaved cycle can still be logged
    #[display("Error persisting {operation}: {message}")]
    Persistence {
        operation: &'static str,
        message: String,
        #[error(not(source))]
        report: Option<Box<CycleReport>>,
    },
}

impl CycleError {
    pub(super) fn persistence(operation: &'static str, error: anyhow::Error, report: Option<&CycleReport>) -> Self {
        CycleError::Persistence {
            operation,
            message: format!("{:#}", error),
            report: report.map(|r| Box::new(r.clone())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Config(_) => "config",
            CycleError::Busy => "busy",
            CycleError::Persistence { .. } => "persistence",
        }
    }
}
