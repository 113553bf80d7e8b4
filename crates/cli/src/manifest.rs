//! Multi-document YAML manifests into `DynamicObject`s.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use keel_core::{DynamicObject, ResourceIdentity};
use serde::Deserialize;
use serde_json::Value as Json;

fn max_yaml_bytes() -> usize {
    std::env::var("KEEL_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_048_576)
}

fn max_yaml_nodes() -> usize {
    std::env::var("KEEL_MAX_YAML_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

fn node_count_exceeds(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur > max {
            return;
        }
        *cur += 1;
        match v {
            Json::Object(map) => map.values().for_each(|vv| walk(vv, cur, max)),
            Json::Array(arr) => arr.iter().for_each(|vv| walk(vv, cur, max)),
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count > max
}

/// Parse every document in `yaml`. Empty documents are skipped; `List` kinds
/// are flattened into their items.
pub fn parse_objects(yaml: &str, source: &str) -> Result<Vec<DynamicObject>> {
    if yaml.len() > max_yaml_bytes() {
        return Err(anyhow!("{source}: YAML payload too large (>{} bytes)", max_yaml_bytes()));
    }
    let mut out = Vec::new();
    for (idx, doc) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let val = serde_yaml::Value::deserialize(doc).with_context(|| format!("{source}: parsing document {idx}"))?;
        if val.is_null() {
            continue;
        }
        let json = serde_json::to_value(val).with_context(|| format!("{source}: converting document {idx} to JSON"))?;
        if node_count_exceeds(&json, max_yaml_nodes()) {
            return Err(anyhow!("{source}: document {idx} exceeds node budget ({})", max_yaml_nodes()));
        }
        let items = match json.get("kind").and_then(Json::as_str) {
            Some(kind) if kind.ends_with("List") => json.get("items").and_then(Json::as_array).cloned().unwrap_or_default(),
            _ => vec![json],
        };
        for item in items {
            let obj: DynamicObject =
                serde_json::from_value(item).with_context(|| format!("{source}: document {idx} is not an object"))?;
            ResourceIdentity::of(&obj).with_context(|| format!("{source}: document {idx}"))?;
            out.push(obj);
        }
    }
    Ok(out)
}

pub fn load_files(paths: &[impl AsRef<Path>]) -> Result<Vec<DynamicObject>> {
    let mut out = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        out.extend(parse_objects(&yaml, &path.display().to_string())?);
    }
    Ok(out)
}
