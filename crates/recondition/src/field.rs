use std::str::FromStr;

use polwatch_core::{Fnv64, Report, ReportResult, Resource};

const PROPERTY_PREFIX: &str = "property:";
const LABEL_PREFIX: &str = "label:";
const ANNOTATION_PREFIX: &str = "annotation:";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("unknown id field: {0}")]
    Unknown(String),
    #[error("empty key in field selector: {0}")]
    EmptyKey(String),
}

/// One input of a custom result-id composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Resource,
    Namespace,
    Policy,
    Rule,
    Status,
    Category,
    Message,
    Created,
    Property(String),
    Label(String),
    Annotation(String),
}

impl FromStr for Field {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let keyed = |prefix: &str, make: fn(String) -> Field| -> Option<Result<Field, FieldError>> {
            let key = s.strip_prefix(prefix)?;
            if key.is_empty() {
                return Some(Err(FieldError::EmptyKey(s.to_string())));
            }
            Some(Ok(make(key.to_string())))
        };
        if let Some(f) = keyed(PROPERTY_PREFIX, Field::Property) {
            return f;
        }
        if let Some(f) = keyed(LABEL_PREFIX, Field::Label) {
            return f;
        }
        if let Some(f) = keyed(ANNOTATION_PREFIX, Field::Annotation) {
            return f;
        }
        match s {
            "resource" => Ok(Field::Resource),
            "namespace" => Ok(Field::Namespace),
            "policy" => Ok(Field::Policy),
            "rule" => Ok(Field::Rule),
            "result" | "status" => Ok(Field::Status),
            "category" => Ok(Field::Category),
            "message" => Ok(Field::Message),
            "created" => Ok(Field::Created),
            other => Err(FieldError::Unknown(other.to_string())),
        }
    }
}

/// Subject of a result: its own resource, else the report scope.
pub(crate) fn subject<'a>(report: &'a Report, result: &'a ReportResult) -> Option<&'a Resource> {
    result.resource.as_ref().or(report.scope.as_ref())
}

impl Field {
    pub(crate) fn fold(&self, h: Fnv64, report: &Report, result: &ReportResult) -> Fnv64 {
        match self {
            Field::Resource => match subject(report, result) {
                Some(res) => h.add_str(&res.uid).add_str(&res.name),
                None => h,
            },
            Field::Namespace => h.add_str(&report.namespace),
            Field::Policy => h.add_str(&result.policy),
            Field::Rule => h.add_str(&result.rule),
            Field::Status => h.add_str(result.status.as_str()),
            Field::Category => h.add_str(&result.category),
            Field::Message => h.add_str(&result.message),
            Field::Created => match result.timestamp {
                Some(ts) => h.add_str(&ts.to_rfc3339()),
                None => h,
            },
            Field::Property(key) => h.add_str(result.property(key).unwrap_or("")),
            Field::Label(key) => h.add_str(report.label(key).unwrap_or("")),
            Field::Annotation(key) => h.add_str(report.annotation(key).unwrap_or("")),
        }
    }
}
