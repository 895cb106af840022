use serde_json::Value;

/// Pull the first JSON object out of free-form model text.
///
/// Accepts a bare object, an object inside a fenced block, or an object
/// embedded in prose (matched by brace depth).
pub fn extract_json_object(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return Some(strip_fences(trimmed));
    }

    const FENCE: &str = "```";
    if let Some(start) = raw.find(FENCE) {
        let body = raw[start + FENCE.len()..]
            .trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
        if let Some(end) = body.find(FENCE) {
            let block = &body[..end];
            if block.contains('{') {
                return Some(strip_fences(block));
            }
        }
    }

    let open = raw.find('{')?;
    let mut depth = 0i32;
    for (idx, ch) in raw[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[open..=open + idx].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode model text into JSON, tolerating prose around the object.
pub fn parse_json_payload(raw: &str) -> Option<Value> {
    extract_json_object(raw).and_then(|object| serde_json::from_str(&object).ok())
}

/// Read a field that models return as either a string or a number.
pub fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Read a list of arguments, stringifying scalars and accepting a lone scalar.
pub fn coerce_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(coerce_string).collect(),
        Value::Null => Vec::new(),
        other => coerce_string(other).into_iter().collect(),
    }
}

fn strip_fences(value: &str) -> String {
    value.trim().trim_matches('`').trim().to_string()
}
