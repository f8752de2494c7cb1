//! Boundary between the OCR/LLM collaborator and the ledger.
//!
//! The collaborator answers with a flat JSON object (optionally wrapped in a
//! ```json fence). Everything in it is best effort: missing keys, nulls and
//! unparseable dates or numbers simply leave the field empty.

use std::str::FromStr;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{BillDraft, Source, UsageRecord};

#[derive(Error, Debug)]
pub enum ExtractionError {
    /// The collaborator reported its own failure
    #[error("extraction failed upstream: {0}")]
    Upstream(String),

    /// Response body was not valid JSON
    #[error("failed to parse extraction response: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Response was JSON but not an object
    #[error("extraction response must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

pub fn parse_llm_response(text: &str) -> Result<BillDraft, ExtractionError> {
    let body = strip_json_fence(text);
    let value: Value = serde_json::from_str(body)?;

    let fields = match value {
        Value::Object(fields) => fields,
        other => return Err(ExtractionError::NotAnObject(json_kind(&other))),
    };

    if let Some(message) = fields.get("error").and_then(Value::as_str) {
        return Err(ExtractionError::Upstream(message.to_string()));
    }

    Ok(draft_from_fields(&fields))
}

fn strip_json_fence(text: &str) -> &str {
    match text.split_once("```json") {
        Some((_, rest)) => rest.split("```").next().unwrap_or(rest).trim(),
        None => text.trim(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Builds a draft from flat `<prefix>_value` / `<prefix>_unit` style fields.
pub fn draft_from_fields(fields: &Map<String, Value>) -> BillDraft {
    let mut usage = UsageRecord::new();
    for source in Source::ALL {
        let value = fields.get(&source.value_key()).and_then(number_field);
        let unit = source
            .unit_key()
            .and_then(|key| fields.get(&key))
            .and_then(text_field);
        usage.set(source, value, unit);
    }

    BillDraft {
        bill_date: fields.get("bill_date").and_then(date_field),
        bill_number: fields.get("bill_number").and_then(text_field),
        usage,
        billing_period_start: fields.get("billing_period_start").and_then(date_field),
        billing_period_end: fields.get("billing_period_end").and_then(date_field),
        bill_file_path: fields.get("bill_file_path").and_then(text_field),
    }
}

fn number_field(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn text_field(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn date_field(value: &Value) -> Option<NaiveDate> {
    value
        .as_str()
        .and_then(|text| NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok())
}

/// Manual correction applied when saving a draft: `electricity=120:kWh`,
/// `trade-co2=3`.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageOverride {
    pub source: Source,
    pub value: f64,
    pub unit: Option<String>,
}

impl FromStr for UsageOverride {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((source, rest)) = s.split_once('=') else {
            bail!("expected <source>=<value>[:<unit>], got '{s}'");
        };
        let source: Source = source.parse()?;
        let (value, unit) = match rest.split_once(':') {
            Some((value, unit)) => (value, Some(unit.trim().to_string())),
            None => (rest, None),
        };
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("invalid usage value in '{s}'"))?;

        if source.has_unit_field() && unit.as_deref().map_or(true, str::is_empty) {
            bail!("{} needs a unit, e.g. {}={value}:<unit>", source, source.cli_name());
        }

        Ok(UsageOverride {
            source,
            value,
            unit: unit.filter(|_| source.has_unit_field()),
        })
    }
}

impl UsageOverride {
    pub fn apply(&self, usage: &mut UsageRecord) {
        usage.set(self.source, Some(self.value), self.unit.clone());
    }
}

/// Corrections made to a staged draft before it is saved. Fields left as
/// `None` keep whatever the extraction produced.
#[derive(Debug, Clone, Default)]
pub struct DraftEdits {
    pub bill_date: Option<NaiveDate>,
    pub bill_number: Option<String>,
    pub billing_period_start: Option<NaiveDate>,
    pub billing_period_end: Option<NaiveDate>,
    pub bill_file_path: Option<String>,
    pub cleared: Vec<Source>,
    pub overrides: Vec<UsageOverride>,
}

impl DraftEdits {
    pub fn apply(&self, draft: &mut BillDraft) {
        if let Some(date) = self.bill_date {
            draft.bill_date = Some(date);
        }
        if let Some(number) = &self.bill_number {
            draft.bill_number = Some(number.clone());
        }
        if let Some(start) = self.billing_period_start {
            draft.billing_period_start = Some(start);
        }
        if let Some(end) = self.billing_period_end {
            draft.billing_period_end = Some(end);
        }
        if let Some(path) = &self.bill_file_path {
            draft.bill_file_path = Some(path.clone());
        }
        for source in &self.cleared {
            draft.usage.clear(*source);
        }
        for correction in &self.overrides {
            correction.apply(&mut draft.usage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_response() {
        let text = r#"Here you go:
```json
{
  "bill_date": "2024-03-15",
  "bill_number": "INV-991",
  "electricity_usage_value": 1250.5,
  "electricity_usage_unit": "kWh",
  "water_usage_value": null,
  "water_usage_unit": "",
  "trade_co2_value": 2
}
```
"#;
        let draft = parse_llm_response(text).unwrap();
        assert_eq!(draft.bill_date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(draft.bill_number.as_deref(), Some("INV-991"));

        let electricity = draft.usage.get(Source::Electricity).unwrap();
        assert_eq!(electricity.value, Some(1250.5));
        assert_eq!(electricity.unit.as_deref(), Some("kWh"));
        assert!(draft.usage.get(Source::Water).is_none());

        let trade = draft.usage.get(Source::TradeCo2).unwrap();
        assert_eq!(trade.value, Some(2.0));
        assert_eq!(trade.unit, None);
    }

    #[test]
    fn parses_bare_response_with_lenient_fields() {
        let text = r#"{
            "bill_date": "15/03/2024",
            "billing_period_start": "2024-02-01",
            "diesel_usage_value": "40.5",
            "diesel_usage_unit": " liters ",
            "coal_usage_value": "a lot",
            "bill_number": 12345
        }"#;
        let draft = parse_llm_response(text).unwrap();
        assert_eq!(draft.bill_date, None);
        assert_eq!(draft.billing_period_start, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(draft.bill_number.as_deref(), Some("12345"));

        let diesel = draft.usage.get(Source::Diesel).unwrap();
        assert_eq!(diesel.value, Some(40.5));
        assert_eq!(diesel.unit.as_deref(), Some("liters"));
        assert!(draft.usage.get(Source::Coal).is_none());
    }

    #[test]
    fn all_null_response_gives_empty_draft() {
        let draft = parse_llm_response("{}").unwrap();
        assert_eq!(draft, BillDraft::default());
    }

    #[test]
    fn upstream_error_is_surfaced() {
        let err = parse_llm_response(r#"{"error": "quota exceeded"}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::Upstream(ref msg) if msg == "quota exceeded"));
    }

    #[test]
    fn rejects_non_json_and_non_objects() {
        assert!(matches!(
            parse_llm_response("I could not read this bill"),
            Err(ExtractionError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_llm_response("[1, 2]"),
            Err(ExtractionError::NotAnObject("an array"))
        ));
    }

    #[test]
    fn parses_usage_overrides() {
        let electricity: UsageOverride = "electricity=120:kWh".parse().unwrap();
        assert_eq!(electricity.source, Source::Electricity);
        assert_eq!(electricity.value, 120.0);
        assert_eq!(electricity.unit.as_deref(), Some("kWh"));

        let trade: UsageOverride = "trade-co2=3".parse().unwrap();
        assert_eq!(trade.source, Source::TradeCo2);
        assert_eq!(trade.unit, None);

        assert!("electricity=120".parse::<UsageOverride>().is_err());
        assert!("electricity=many:kWh".parse::<UsageOverride>().is_err());
        assert!("steam=1:kg".parse::<UsageOverride>().is_err());
    }

    #[test]
    fn edits_replace_only_the_fields_given() {
        let mut draft = parse_llm_response(
            r#"{
                "bill_date": "2024-03-15",
                "bill_number": "INV-1",
                "billing_period_start": "2024-02-01",
                "electricity_usage_value": 100,
                "electricity_usage_unit": "kWh",
                "coal_usage_value": 3,
                "coal_usage_unit": "tons"
            }"#,
        )
        .unwrap();

        let edits = DraftEdits {
            billing_period_start: NaiveDate::from_ymd_opt(2024, 2, 2),
            billing_period_end: NaiveDate::from_ymd_opt(2024, 2, 29),
            bill_file_path: Some("uploads/bills/inv-1.pdf".to_string()),
            cleared: vec![Source::Coal],
            overrides: vec!["water=12:m3".parse().unwrap()],
            ..DraftEdits::default()
        };
        edits.apply(&mut draft);

        assert_eq!(draft.bill_date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(draft.bill_number.as_deref(), Some("INV-1"));
        assert_eq!(draft.billing_period_start, NaiveDate::from_ymd_opt(2024, 2, 2));
        assert_eq!(draft.billing_period_end, NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(draft.bill_file_path.as_deref(), Some("uploads/bills/inv-1.pdf"));
        assert!(draft.usage.get(Source::Coal).is_none());
        assert_eq!(draft.usage.get(Source::Water).unwrap().value, Some(12.0));
        assert_eq!(draft.usage.get(Source::Electricity).unwrap().value, Some(100.0));
    }

    #[test]
    fn override_replaces_existing_entry() {
        let mut usage = UsageRecord::new().with(Source::Water, 5.0, "liters");
        let fix: UsageOverride = "water=5:m3".parse().unwrap();
        fix.apply(&mut usage);
        assert_eq!(usage.get(Source::Water).unwrap().unit.as_deref(), Some("m3"));
    }
}
