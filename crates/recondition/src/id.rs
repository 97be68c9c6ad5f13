use polwatch_core::{Fnv64, Report, ReportResult, RESULT_ID_KEY};

use crate::field::{Field, FieldError};

/// Deterministic id assignment for results that carry no identity of their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdGenerator {
    /// Resource name and uid, policy, rule, status, category, message.
    #[default]
    Default,
    /// Fields folded in the configured order.
    Custom(Vec<Field>),
}

impl IdGenerator {
    /// An empty list selects the default composition.
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self, FieldError> {
        if fields.is_empty() {
            return Ok(IdGenerator::Default);
        }
        let fields = fields.iter().map(|f| f.as_ref().parse()).collect::<Result<Vec<Field>, _>>()?;
        Ok(IdGenerator::Custom(fields))
    }

    pub fn generate(&self, report: &Report, result: &ReportResult) -> String {
        if let Some(id) = result.property(RESULT_ID_KEY) {
            return id.to_string();
        }

        let h = match self {
            IdGenerator::Default => {
                let mut h = Fnv64::new();
                if let Some(res) = report.scope.as_ref().or(result.resource.as_ref()) {
                    h = h.add_str(&res.name).add_str(&res.uid);
                }
                h.add_str(&result.policy)
                    .add_str(&result.rule)
                    .add_str(result.status.as_str())
                    .add_str(&result.category)
                    .add_str(&result.message)
            }
            IdGenerator::Custom(fields) => {
                fields.iter().fold(Fnv64::new(), |h, f| f.fold(h, report, result))
            }
        };
        h.finish().to_string()
    }
}
