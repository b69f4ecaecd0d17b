//! Sensitive-value masking for text parameters.
//!
//! Secrets are replaced longest-first so a value that is a substring of
//! another can never corrupt the longer value's marker.

use std::collections::HashMap;

use serde_json::Value;

/// Replace occurrences of each secret in every string inside `params`
/// with its `<key>` marker.
pub fn mask_params(params: &mut Value, masked: &HashMap<String, String>) {
    if masked.is_empty() {
        return;
    }
    // Longest value first; ties broken by key for determinism.
    let mut ordered: Vec<(&String, &String)> = masked.iter().collect();
    ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

    mask_value(params, &ordered);
}

fn mask_value(value: &mut Value, ordered: &[(&String, &String)]) {
    match value {
        Value::String(text) => {
            for (key, secret) in ordered {
                if secret.is_empty() {
                    continue;
                }
                if text.contains(secret.as_str()) {
                    *text = text.replace(secret.as_str(), &format!("<{key}>"));
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                mask_value(item, ordered);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                mask_value(item, ordered);
            }
        }
        _ => {}
    }
}

/// Restore markers back into real values, used by handlers right before
/// text reaches the browser.
pub fn unmask_text(text: &str, masked: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (key, secret) in masked {
        let marker = format!("<{key}>");
        if out.contains(&marker) {
            out = out.replace(&marker, secret);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secrets() -> HashMap<String, String> {
        HashMap::from([
            ("password".to_string(), "hunter2".to_string()),
            ("token".to_string(), "hunter2-extended".to_string()),
        ])
    }

    #[test]
    fn masks_longest_value_first() {
        let mut params = json!({ "text": "use hunter2-extended then hunter2" });
        mask_params(&mut params, &secrets());
        assert_eq!(params["text"], "use <token> then <password>");
    }

    #[test]
    fn masks_nested_structures() {
        let mut params = json!({
            "fields": [{ "value": "hunter2" }],
            "note": 42
        });
        mask_params(&mut params, &secrets());
        assert_eq!(params["fields"][0]["value"], "<password>");
        assert_eq!(params["note"], 42);
    }

    #[test]
    fn unmask_restores_secrets() {
        let masked = secrets();
        assert_eq!(unmask_text("<password>!", &masked), "hunter2!");
        assert_eq!(
            unmask_text("<token> stays intact", &masked),
            "hunter2-extended stays intact"
        );
    }

    #[test]
    fn substring_secret_never_corrupts_longer_marker() {
        // hunter2 is a prefix of hunter2-extended; masking the shorter one
        // first would split the longer secret. Longest-first ordering
        // guarantees both survive intact.
        let mut params = json!({ "a": "hunter2-extended", "b": "hunter2" });
        mask_params(&mut params, &secrets());
        assert_eq!(params["a"], "<token>");
        assert_eq!(params["b"], "<password>");
    }
}
