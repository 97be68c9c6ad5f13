use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use kube::core::DynamicObject;
use polwatch_core::{Report, ReportResult, Resource, Severity, Status, Summary};
use serde::Deserialize;
use smallvec::SmallVec;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawReport {
    source: String,
    scope: Option<Resource>,
    summary: Summary,
    results: Vec<RawResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawResult {
    source: String,
    policy: String,
    rule: String,
    result: String,
    severity: String,
    category: String,
    #[serde(alias = "description")]
    message: String,
    timestamp: Option<RawTimestamp>,
    properties: BTreeMap<String, String>,
    subjects: Vec<Resource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTimestamp {
    seconds: i64,
    nanos: u32,
}

/// Map an openreports `Report`/`ClusterReport` object onto the internal model.
///
/// Results with an unknown status are skipped; a result about several subjects
/// is attributed to the first one.
pub fn report_from_object(obj: &DynamicObject) -> Result<Report> {
    let name = obj.metadata.name.clone().ok_or_else(|| anyhow!("object missing metadata.name"))?;
    let namespace = obj.metadata.namespace.clone().unwrap_or_default();
    let raw: RawReport = serde_json::from_value(obj.data.clone()).with_context(|| format!("decoding report {}", name))?;

    let mut report = Report::new(name, namespace);
    report.creation_timestamp = obj.metadata.creation_timestamp.as_ref().map(|t| t.0).unwrap_or_default();
    report.source = raw.source;
    report.scope = raw.scope;
    report.summary = raw.summary;
    report.labels = sorted_pairs(obj.metadata.labels.as_ref());
    report.annotations = sorted_pairs(obj.metadata.annotations.as_ref());
    report.results = raw.results.into_iter().filter_map(result_from_raw).collect();
    Ok(report)
}

fn result_from_raw(raw: RawResult) -> Option<ReportResult> {
    let status = Status::parse(&raw.result)?;
    Some(ReportResult {
        policy: raw.policy,
        rule: raw.rule,
        status,
        severity: Severity::parse(&raw.severity),
        category: raw.category,
        source: raw.source,
        message: raw.message,
        timestamp: raw.timestamp.and_then(|t| to_time(&t)),
        properties: raw.properties,
        resource: raw.subjects.into_iter().next(),
        ..Default::default()
    })
}

fn to_time(t: &RawTimestamp) -> Option<DateTime<Utc>> {
    if t.seconds == 0 && t.nanos == 0 {
        return None;
    }
    Utc.timestamp_opt(t.seconds, t.nanos).single()
}

fn sorted_pairs<A>(m: Option<&BTreeMap<String, String>>) -> SmallVec<A>
where
    A: smallvec::Array<Item = (String, String)>,
{
    m.map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).unwrap_or_default()
}
