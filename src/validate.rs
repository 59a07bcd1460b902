//! Strict runtime schema validation for plan payloads.
//!
//! Input arrives as untyped JSON; every field is checked against an
//! explicit per-field rule. Type checks are strict: an integer field
//! rejects floats, booleans, and numeric strings; a string field
//! rejects anything that is not a JSON string. Unknown fields are
//! dropped. In partial mode, top-level fields are optional but any
//! nested object that is present must validate in full.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::error::{Error, Result, ValidationErrors};

/// Wire format accepted for `creationDate`; normalized to ISO on output.
const DATE_INPUT_FORMAT: &str = "%d-%m-%Y";

enum FieldKind {
    Text,
    Integer,
    Date,
    Object(&'static [FieldRule]),
    List(&'static [FieldRule]),
}

struct FieldRule {
    name: &'static str,
    kind: FieldKind,
}

const COST_SHARE_RULES: &[FieldRule] = &[
    FieldRule { name: "deductible", kind: FieldKind::Integer },
    FieldRule { name: "_org", kind: FieldKind::Text },
    FieldRule { name: "copay", kind: FieldKind::Integer },
    FieldRule { name: "objectId", kind: FieldKind::Text },
    FieldRule { name: "objectType", kind: FieldKind::Text },
];

const SERVICE_RULES: &[FieldRule] = &[
    FieldRule { name: "_org", kind: FieldKind::Text },
    FieldRule { name: "objectId", kind: FieldKind::Text },
    FieldRule { name: "objectType", kind: FieldKind::Text },
    FieldRule { name: "name", kind: FieldKind::Text },
];

const LINKED_PLAN_SERVICE_RULES: &[FieldRule] = &[
    FieldRule { name: "linkedService", kind: FieldKind::Object(SERVICE_RULES) },
    FieldRule {
        name: "planserviceCostShares",
        kind: FieldKind::Object(COST_SHARE_RULES),
    },
    FieldRule { name: "_org", kind: FieldKind::Text },
    FieldRule { name: "objectId", kind: FieldKind::Text },
    FieldRule { name: "objectType", kind: FieldKind::Text },
];

const PLAN_RULES: &[FieldRule] = &[
    FieldRule { name: "planCostShares", kind: FieldKind::Object(COST_SHARE_RULES) },
    FieldRule {
        name: "linkedPlanServices",
        kind: FieldKind::List(LINKED_PLAN_SERVICE_RULES),
    },
    FieldRule { name: "_org", kind: FieldKind::Text },
    FieldRule { name: "objectId", kind: FieldKind::Text },
    FieldRule { name: "objectType", kind: FieldKind::Text },
    FieldRule { name: "planType", kind: FieldKind::Text },
    FieldRule { name: "creationDate", kind: FieldKind::Date },
];

/// Validate a full plan payload. Every field is required.
pub fn validate_plan(body: &Value) -> Result<Map<String, Value>> {
    validate_with(body, false)
}

/// Validate a partial plan payload. Absent top-level fields are left to
/// the caller's merge; present fields follow the full rules.
pub fn validate_plan_partial(body: &Value) -> Result<Map<String, Value>> {
    validate_with(body, true)
}

fn validate_with(body: &Value, partial: bool) -> Result<Map<String, Value>> {
    let Some(object) = body.as_object() else {
        return Err(Error::Validation(ValidationErrors::single(
            "",
            "expected a JSON object",
        )));
    };

    let mut errors = ValidationErrors::new();
    let out = validate_object(object, PLAN_RULES, "", partial, &mut errors);
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(Error::Validation(errors))
    }
}

fn validate_object(
    object: &Map<String, Value>,
    rules: &'static [FieldRule],
    path: &str,
    partial: bool,
    errors: &mut ValidationErrors,
) -> Map<String, Value> {
    let mut out = Map::new();
    for rule in rules {
        let field_path = join_path(path, rule.name);
        match object.get(rule.name) {
            None => {
                if !partial {
                    errors.push(field_path, "this field is required");
                }
            }
            Some(value) => {
                if let Some(normalized) = validate_field(value, &rule.kind, &field_path, errors) {
                    out.insert(rule.name.to_string(), normalized);
                }
            }
        }
    }
    out
}

fn validate_field(
    value: &Value,
    kind: &FieldKind,
    path: &str,
    errors: &mut ValidationErrors,
) -> Option<Value> {
    match kind {
        FieldKind::Text => match value {
            Value::String(s) => Some(Value::String(s.clone())),
            _ => {
                errors.push(path, "expected a string");
                None
            }
        },
        FieldKind::Integer => match value.as_i64() {
            Some(n) => Some(Value::Number(n.into())),
            None => {
                errors.push(path, "expected an integer");
                None
            }
        },
        FieldKind::Date => match value {
            Value::String(s) => match NaiveDate::parse_from_str(s, DATE_INPUT_FORMAT) {
                Ok(date) => Some(Value::String(date.format("%Y-%m-%d").to_string())),
                Err(_) => {
                    errors.push(path, "expected a date in dd-mm-yyyy format");
                    None
                }
            },
            _ => {
                errors.push(path, "expected a date in dd-mm-yyyy format");
                None
            }
        },
        FieldKind::Object(rules) => match value.as_object() {
            // Nested objects are always validated in full, even in
            // partial mode (only top-level fields may be omitted).
            Some(object) => Some(Value::Object(validate_object(
                object, rules, path, false, errors,
            ))),
            None => {
                errors.push(path, "expected an object");
                None
            }
        },
        FieldKind::List(rules) => match value.as_array() {
            Some(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{i}]");
                    match item.as_object() {
                        Some(object) => out.push(Value::Object(validate_object(
                            object, rules, &item_path, false, errors,
                        ))),
                        None => errors.push(item_path, "expected an object"),
                    }
                }
                Some(Value::Array(out))
            }
            None => {
                errors.push(path, "expected an array");
                None
            }
        },
    }
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}
