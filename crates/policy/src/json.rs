//! Path helpers over object payloads. Paths are `/`-separated keys; a `*`
//! segment fans out over every element of an array.

use serde_json::{Map, Value as Json};

pub(crate) fn select_mut<'a>(root: &'a mut Json, path: &str) -> Vec<&'a mut Json> {
    fn walk<'a>(v: &'a mut Json, segs: &[&str], out: &mut Vec<&'a mut Json>) {
        match segs.split_first() {
            None => out.push(v),
            Some((&"*", rest)) => {
                if let Json::Array(items) = v {
                    for item in items.iter_mut() {
                        walk(item, rest, out);
                    }
                }
            }
            Some((seg, rest)) => {
                if let Some(next) = v.get_mut(*seg) {
                    walk(next, rest, out);
                }
            }
        }
    }
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = Vec::new();
    walk(root, &segs, &mut out);
    out
}

/// Value at a plain (wildcard-free) path.
pub(crate) fn at<'a>(root: &'a Json, path: &str) -> Option<&'a Json> {
    path.split('/').filter(|s| !s.is_empty()).try_fold(root, |v, seg| v.get(seg)).filter(|v| !v.is_null())
}

/// Object stored under `key`, created (or replacing a non-object) when needed.
pub(crate) fn child_object<'a>(v: &'a mut Json, key: &str) -> Option<&'a mut Map<String, Json>> {
    let parent = v.as_object_mut()?;
    let slot = parent.entry(key.to_string()).or_insert_with(|| Json::Object(Map::new()));
    if !slot.is_object() {
        *slot = Json::Object(Map::new());
    }
    slot.as_object_mut()
}

/// Set `path` to `value`, creating intermediate objects. `None` removes the leaf.
pub(crate) fn set_at(root: &mut Json, path: &str, value: Option<Json>) {
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((leaf, parents)) = segs.split_last() else { return };
    let mut cur = root;
    for seg in parents {
        match value {
            Some(_) => {
                let Some(parent) = cur.as_object_mut() else { return };
                let slot = parent.entry(seg.to_string()).or_insert_with(|| Json::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Json::Object(Map::new());
                }
                cur = slot;
            }
            None => match cur.get_mut(*seg) {
                Some(next) => cur = next,
                None => return,
            },
        }
    }
    let Some(obj) = cur.as_object_mut() else { return };
    match value {
        Some(v) => {
            obj.insert(leaf.to_string(), v);
        }
        None => {
            obj.remove(*leaf);
        }
    }
}

/// Union of two string maps with `desired` winning on conflicts. Returns `None`
/// when both sides are absent so untouched objects keep their shape.
pub(crate) fn merge_maps(current: Option<&Json>, desired: Option<&Json>) -> Option<Json> {
    let current = current.and_then(Json::as_object);
    let desired = desired.and_then(Json::as_object);
    if current.is_none() && desired.is_none() {
        return None;
    }
    let mut merged = current.cloned().unwrap_or_default();
    for (k, v) in desired.into_iter().flatten() {
        merged.insert(k.clone(), v.clone());
    }
    Some(Json::Object(merged))
}

pub(crate) fn name_of(v: &Json) -> &str {
    v.get("name").and_then(Json::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wildcard_selects_every_element() {
        let mut v = json!({ "spec": { "nodeSets": [ { "podTemplate": { "spec": { "a": 1 } } }, { "podTemplate": { "spec": { "a": 2 } } } ] } });
        let got = select_mut(&mut v, "spec/nodeSets/*/podTemplate/spec");
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn missing_path_selects_nothing() {
        let mut v = json!({ "spec": {} });
        assert!(select_mut(&mut v, "spec/template/spec").is_empty());
        assert!(at(&v, "spec/template").is_none());
    }

    #[test]
    fn set_at_creates_and_removes() {
        let mut v = json!({});
        set_at(&mut v, "spec/template/metadata/labels", Some(json!({ "a": "b" })));
        assert_eq!(v["spec"]["template"]["metadata"]["labels"]["a"], "b");
        set_at(&mut v, "spec/template/metadata/labels", None);
        assert!(at(&v, "spec/template/metadata/labels").is_none());
        set_at(&mut v, "spec/absent/leaf", None);
        assert!(at(&v, "spec/absent").is_none());
    }

    #[test]
    fn merge_maps_prefers_desired() {
        let merged = merge_maps(Some(&json!({ "a": "1", "b": "1" })), Some(&json!({ "b": "2" }))).unwrap();
        assert_eq!(merged, json!({ "a": "1", "b": "2" }));
        assert!(merge_maps(None, None).is_none());
    }
}
