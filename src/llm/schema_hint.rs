//! Schema-shape hint assembly (§4.3, Design Note §9 "Dynamic typing / schema
//! coaching"). Implemented as a declarative mapping from response types to a
//! shape descriptor via `schemars`'s derive macro — the type's shape is
//! walked once per call, not reflected over at arbitrary runtime values, the
//! same derive-first approach the teacher uses for MCP tool schemas.

use schemars::{JsonSchema, Schema, schema_for};

/// Required field names and a flattened hint for nested object fields,
/// derived from `T`'s JSON schema.
pub fn build_schema_prompt<T: JsonSchema>() -> String {
    let schema = schema_for!(T);
    let mut lines = Vec::new();
    lines.push("Respond with a JSON object matching this shape:".to_string());
    describe(&schema, &mut lines, 0);
    lines.push(
        "Return actual content, not the schema definition itself.".to_string(),
    );
    lines.join("\n")
}

fn describe(schema: &Schema, lines: &mut Vec<String>, depth: usize) {
    let indent = "  ".repeat(depth);
    let obj = schema.as_object();
    let Some(obj) = obj else { return };

    let required: Vec<String> = obj
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    if let Some(props) = obj.get("properties").and_then(|v| v.as_object()) {
        for (name, prop_schema) in props {
            let is_required = required.contains(name);
            let marker = if is_required { "required" } else { "optional" };
            let type_hint = prop_schema
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("object");
            lines.push(format!("{indent}- {name} ({type_hint}, {marker})"));
            if type_hint == "object"
                && let Ok(nested) = serde_json::from_value::<Schema>(prop_schema.clone())
            {
                describe(&nested, lines, depth + 1);
            }
        }
    }
}

/// Schema-echo detection (§4.3): the well-known key set a model emits when
/// it returns its own schema definition instead of content.
const SCHEMA_DEFINITION_KEYS: [&str; 5] = ["properties", "type", "required", "$schema", "$defs"];

pub fn looks_like_schema_echo(value: &serde_json::Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if obj.is_empty() {
        return false;
    }
    obj.keys().all(|k| SCHEMA_DEFINITION_KEYS.contains(&k.as_str()))
}
