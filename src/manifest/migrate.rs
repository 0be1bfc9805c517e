//! Schema migrations, applied to the raw JSON before deserialising.
use serde_json::{Map, Value, json};

use super::CURRENT_VERSION;

/// Versions this build can read.
pub const SUPPORTED_VERSIONS: &[&str] = &["1", CURRENT_VERSION];

/// Declared version of a raw document. A missing version is `"1"`.
#[must_use]
pub fn version_of(doc: &Value) -> String {
    match doc.get("version") {
        Some(Value::String(v)) => v.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "1".to_string(),
    }
}

/// Bring a supported document up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns a description of the problem when the document is not an
/// object or its version is not supported.
pub fn migrate(mut doc: Value) -> Result<Value, String> {
    loop {
        let version = version_of(&doc);
        doc = match version.as_str() {
            CURRENT_VERSION => return Ok(doc),
            "1" => v1_to_v2(doc)?,
            other => return Err(format!("unsupported manifest version {other}")),
        };
    }
}

/// v1 stored `files` per package, `checksums` and `updated` at the top
/// level together with the `target` and `dir` roots, and a `tool` marker.
fn v1_to_v2(doc: Value) -> Result<Value, String> {
    let Value::Object(mut root) = doc else {
        return Err("manifest is not a JSON object".to_string());
    };

    root.remove("tool");
    let target = root.remove("target");
    let dir = root.remove("dir");
    let updated = root
        .remove("updated")
        .or_else(|| root.remove("updated_at"))
        .unwrap_or_else(|| json!(chrono::Utc::now()));
    let hashes = root
        .remove("checksums")
        .or_else(|| root.remove("hashes"))
        .unwrap_or_else(|| json!({}));

    let mut packages = match root.remove("packages") {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => Map::new(),
        Some(_) => return Err("'packages' is not an object".to_string()),
    };
    for (name, pkg) in &mut packages {
        let Value::Object(fields) = pkg else {
            return Err(format!("package '{name}' is not an object"));
        };
        if let Some(files) = fields.remove("files") {
            fields.entry("links").or_insert(files);
        }
        let links = fields.entry("links").or_insert_with(|| json!([]));
        let count = links.as_array().map_or(0, Vec::len);
        fields.insert("link_count".to_string(), json!(count));
        fields.entry("name").or_insert_with(|| json!(name));
        fields
            .entry("installed_at")
            .or_insert_with(|| updated.clone());
        fields.entry("source").or_insert_with(|| json!("managed"));
        fields
            .entry("target_dir")
            .or_insert_with(|| target.clone().unwrap_or_else(|| json!("")));
        fields
            .entry("package_dir")
            .or_insert_with(|| dir.clone().unwrap_or_else(|| json!("")));
    }

    root.insert("version".to_string(), json!(CURRENT_VERSION));
    root.insert("updated_at".to_string(), updated);
    root.insert("hashes".to_string(), hashes);
    root.insert("packages".to_string(), Value::Object(packages));
    Ok(Value::Object(root))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn v1() -> Value {
        json!({
            "version": "1",
            "tool": "dot",
            "updated": "2024-03-01T10:00:00Z",
            "target": "/home/u",
            "dir": "/home/u/dotfiles",
            "packages": {
                "vim": {
                    "name": "vim",
                    "installed_at": "2024-02-01T09:00:00Z",
                    "files": [".vimrc", ".vim"]
                }
            },
            "checksums": { "vim": "abc" }
        })
    }

    #[test]
    fn v1_becomes_a_valid_v2_manifest() {
        let doc = migrate(v1()).unwrap();
        assert_eq!(doc["version"], "2");
        assert!(doc.get("tool").is_none());
        assert!(doc.get("checksums").is_none());
        assert_eq!(doc["hashes"]["vim"], "abc");

        let manifest: Manifest = serde_json::from_value(doc).unwrap();
        let vim = &manifest.packages["vim"];
        assert_eq!(vim.link_count, 2);
        assert_eq!(vim.target_dir, std::path::PathBuf::from("/home/u"));
        assert_eq!(vim.package_dir, std::path::PathBuf::from("/home/u/dotfiles"));
        assert!(manifest.validate().is_empty());
    }

    #[test]
    fn missing_version_is_treated_as_v1() {
        let mut doc = v1();
        doc.as_object_mut().unwrap().remove("version");
        assert_eq!(version_of(&doc), "1");
        assert_eq!(migrate(doc).unwrap()["version"], "2");
    }

    #[test]
    fn current_version_is_untouched() {
        let doc = json!({"version": "2", "updated_at": "2024-01-01T00:00:00Z"});
        assert_eq!(migrate(doc.clone()).unwrap(), doc);
    }

    #[test]
    fn unknown_version_is_rejected() {
        assert!(migrate(json!({"version": "9"})).is_err());
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(migrate(json!([1, 2])).is_err());
    }
}
