use serde_json::{Map, Value};

pub const REQUIRED_SECTIONS: [&str; 4] = ["vod", "iptv", "radios", "webcams"];

/// Every structural problem found in a submitted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .violations.join("; "))]
pub struct SchemaError {
    pub violations: Vec<String>,
}

pub fn validate(document: &Value) -> Result<(), SchemaError> {
    let mut violations = Vec::new();

    let Some(object) = document.as_object() else {
        return Err(SchemaError {
            violations: vec![format!(
                "document must be an object, got {}",
                type_name(document)
            )],
        });
    };

    for section in REQUIRED_SECTIONS {
        check_section(object, section, &mut violations);
    }

    if let Some(generated_at) = object.get("generated_at") {
        if generated_at.as_u64().is_none() {
            violations.push(format!(
                "generated_at must be a non-negative integer, got {}",
                describe(generated_at)
            ));
        }
    }

    if let Some(adapters) = object.get("adapters") {
        match adapters.as_object() {
            Some(adapters) => {
                for (id, record) in adapters {
                    if !record.is_object() {
                        violations.push(format!(
                            "adapters.{id} must be an object, got {}",
                            type_name(record)
                        ));
                    }
                }
            }
            None => violations.push(format!(
                "adapters must be an object, got {}",
                type_name(adapters)
            )),
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(SchemaError { violations })
    }
}

fn check_section(object: &Map<String, Value>, section: &str, violations: &mut Vec<String>) {
    match object.get(section) {
        None => violations.push(format!("{section} is required")),
        Some(Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                if !item.is_object() {
                    violations.push(format!(
                        "{section}[{index}] must be an object, got {}",
                        type_name(item)
                    ));
                }
            }
        }
        Some(other) => violations.push(format!(
            "{section} must be an array, got {}",
            type_name(other)
        )),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Number(number) => number.to_string(),
        other => type_name(other).to_string(),
    }
}
