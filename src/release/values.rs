//! Value override rendering.
//!
//! Overrides are declared as ordered `name=value` pairs with dotted names.
//! The backend takes a nested YAML document, so the pairs are folded into
//! one here. Later pairs win over earlier ones with the same name.

use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::error::{ReleaseError, ReleaseResult};
use crate::resource::ValuePair;

/// Renders value overrides into a YAML document.
///
/// # Errors
///
/// Returns an error if a name has an empty path segment or the document
/// cannot be serialized.
pub fn render_values(values: &[ValuePair]) -> ReleaseResult<String> {
    if values.is_empty() {
        return Ok(String::new());
    }

    let root = fold_values(values)?;
    let yaml = serde_yaml::to_string(&Value::Mapping(root))
        .map_err(|e| ReleaseError::rejected(400, format!("Failed to render values: {e}")))?;

    debug!("Rendered {} value overrides", values.len());
    Ok(yaml)
}

/// Folds pairs into a nested mapping.
fn fold_values(values: &[ValuePair]) -> ReleaseResult<Mapping> {
    let mut root = Mapping::new();

    for pair in values {
        let segments: Vec<&str> = pair.name.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ReleaseError::rejected(
                400,
                format!("Invalid value name '{}': empty path segment", pair.name),
            ));
        }
        insert_path(&mut root, &segments, typed_value(&pair.value), &pair.name);
    }

    Ok(root)
}

fn insert_path(map: &mut Mapping, segments: &[&str], value: Value, full_name: &str) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let key = Value::String((*head).to_string());

    if rest.is_empty() {
        map.insert(key, value);
        return;
    }

    let entry = map
        .entry(key)
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !entry.is_mapping() {
        warn!("Value '{full_name}' replaces a scalar set by an earlier override");
        *entry = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(child) = entry {
        insert_path(child, rest, value, full_name);
    }
}

/// Infers booleans, integers and null the way the backend's own parser does.
fn typed_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => raw
            .parse::<i64>()
            .map_or_else(|_| Value::String(raw.to_string()), |n| Value::Number(n.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(name: &str, value: &str) -> ValuePair {
        ValuePair {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn parse(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).expect("rendered YAML should parse")
    }

    #[test]
    fn test_nested_names() {
        let yaml = render_values(&[pair("image.tag", "1.2"), pair("image.pullPolicy", "Always")])
            .expect("values should render");
        let doc = parse(&yaml);
        assert_eq!(doc["image"]["tag"], Value::String(String::from("1.2")));
        assert_eq!(doc["image"]["pullPolicy"], Value::String(String::from("Always")));
    }

    #[test]
    fn test_types_inferred() {
        let yaml = render_values(&[
            pair("replicaCount", "3"),
            pair("ingress.enabled", "true"),
            pair("name", "web"),
        ])
        .expect("values should render");
        let doc = parse(&yaml);
        assert_eq!(doc["replicaCount"], Value::Number(3.into()));
        assert_eq!(doc["ingress"]["enabled"], Value::Bool(true));
        assert_eq!(doc["name"], Value::String(String::from("web")));
    }

    #[test]
    fn test_later_duplicate_wins() {
        let yaml = render_values(&[pair("replicaCount", "1"), pair("replicaCount", "5")])
            .expect("values should render");
        assert_eq!(parse(&yaml)["replicaCount"], Value::Number(5.into()));
    }

    #[test]
    fn test_nested_replaces_scalar() {
        let yaml = render_values(&[pair("image", "nginx"), pair("image.tag", "1.2")])
            .expect("values should render");
        assert_eq!(parse(&yaml)["image"]["tag"], Value::String(String::from("1.2")));
    }

    #[test]
    fn test_empty_segment_rejected() {
        assert!(render_values(&[pair("image..tag", "1")]).is_err());
    }

    #[test]
    fn test_no_values_renders_empty() {
        assert_eq!(render_values(&[]).expect("empty render"), "");
    }
}
