use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use jsonschema::Validator;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};
use crate::validator::validate_params;

const SCHEMA_SUFFIX: &str = ".schema.json";

/// Method-keyed registry of compiled JSON Schema validators.
pub struct SchemaRegistry {
    validators: HashMap<String, Validator>,
    config: RegistryConfig,
}

impl SchemaRegistry {
    /// Create an empty registry with default config.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            validators: HashMap::new(),
            config,
        }
    }

    /// Register a schema for a method from a JSON string.
    pub fn register(&mut self, method: impl Into<String>, schema_json: &str) -> Result<()> {
        let schema: Value = serde_json::from_str(schema_json)?;
        self.register_value(method, &schema)
    }

    /// Register a schema for a method from a JSON value. Replaces any previous schema.
    pub fn register_value(&mut self, method: impl Into<String>, schema: &Value) -> Result<()> {
        let mut schema = schema.clone();
        if self.config.strict_mode {
            apply_strict_mode(&mut schema);
        }

        let compiled = jsonschema::validator_for(&schema)
            .map_err(|err| SchemaError::CompileFailed(err.to_string()))?;

        self.validators.insert(method.into(), compiled);
        Ok(())
    }

    /// Load `<method>.schema.json` files from a directory.
    pub fn from_directory(path: &Path) -> Result<Self> {
        Self::from_directory_with_config(path, RegistryConfig::default())
    }

    /// Load `<method>.schema.json` files from a directory with explicit config.
    ///
    /// Other files are ignored. Symlinked schema files, files replaced while
    /// being opened, and files over `max_schema_file_size` are refused.
    pub fn from_directory_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let mut registry = Self::with_config(config);
        let mut loaded = 0usize;

        let entries = std::fs::read_dir(path)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;

        for entry in entries {
            let entry = entry.map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(method) = method_from_file_name(&file_name) else {
                continue;
            };
            if method.is_empty() {
                return Err(SchemaError::LoadFailed(format!(
                    "schema filename has no method name: {file_name}"
                )));
            }

            let entry_path = entry.path();
            let path_metadata = std::fs::symlink_metadata(&entry_path)
                .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            let file_type = path_metadata.file_type();
            if file_type.is_symlink() {
                return Err(SchemaError::LoadFailed(format!(
                    "refusing to load schema symlink: {file_name}"
                )));
            }
            if !file_type.is_file() {
                continue;
            }

            loaded = loaded.saturating_add(1);
            if loaded > registry.config.max_schemas_from_directory {
                return Err(SchemaError::LoadFailed(format!(
                    "schema count exceeds configured max ({})",
                    registry.config.max_schemas_from_directory
                )));
            }

            let content = read_limited(
                &entry_path,
                &path_metadata,
                registry.config.max_schema_file_size,
            )?;
            registry.register(method, &content)?;
            debug!(method, path = %entry_path.display(), "loaded schema");
        }

        Ok(registry)
    }

    /// Load from embedded `(method, schema)` strings.
    pub fn from_embedded(schemas: &[(&str, &str)]) -> Result<Self> {
        let mut registry = Self::new();
        for (method, schema) in schemas {
            registry.register(*method, schema)?;
        }
        Ok(registry)
    }

    /// Validate params of `method` against its schema.
    ///
    /// Absent params should be passed as `Value::Null`.
    pub fn validate(&self, method: &str, params: &Value) -> Result<()> {
        match self.validators.get(method) {
            Some(validator) => validate_params(method, params, validator),
            None if self.config.fail_on_missing_schema => {
                Err(SchemaError::NoSchema(method.to_string()))
            }
            None => Ok(()),
        }
    }

    /// Check if a method has a registered schema.
    pub fn has_schema(&self, method: &str) -> bool {
        self.validators.contains_key(method)
    }

    /// Methods that have registered schemas, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.validators.keys().cloned().collect();
        methods.sort_unstable();
        methods
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Get registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("methods", &self.methods())
            .field("config", &self.config)
            .finish()
    }
}

fn method_from_file_name(file_name: &str) -> Option<&str> {
    file_name.strip_suffix(SCHEMA_SUFFIX)
}

fn read_limited(path: &Path, path_metadata: &std::fs::Metadata, max_bytes: usize) -> Result<String> {
    let file = std::fs::File::open(path).map_err(|err| {
        SchemaError::LoadFailed(format!("failed opening schema {}: {err}", path.display()))
    })?;
    let opened_metadata = file
        .metadata()
        .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;

    #[cfg(unix)]
    {
        if !same_file_identity(path_metadata, &opened_metadata) {
            return Err(SchemaError::LoadFailed(format!(
                "schema file changed during load: {}",
                path.display()
            )));
        }
    }
    #[cfg(not(unix))]
    let _ = path_metadata;

    if opened_metadata.len() > max_bytes as u64 {
        return Err(SchemaError::LoadFailed(format!(
            "schema file too large ({} bytes): {}",
            opened_metadata.len(),
            path.display()
        )));
    }

    let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
    let mut content = String::new();
    file.take(read_limit)
        .read_to_string(&mut content)
        .map_err(|err| {
            SchemaError::LoadFailed(format!("failed reading schema {}: {err}", path.display()))
        })?;
    if content.len() > max_bytes {
        return Err(SchemaError::LoadFailed(format!(
            "schema file too large while reading: {}",
            path.display()
        )));
    }
    Ok(content)
}

/// Subschema locations, by shape of the keyword's value.
const MAP_KEYWORDS: [&str; 5] = [
    "properties",
    "patternProperties",
    "dependentSchemas",
    "$defs",
    "definitions",
];
const SINGLE_KEYWORDS: [&str; 11] = [
    "propertyNames",
    "additionalProperties",
    "unevaluatedProperties",
    "items",
    "contains",
    "additionalItems",
    "unevaluatedItems",
    "not",
    "if",
    "then",
    "else",
];
const ARRAY_KEYWORDS: [&str; 4] = ["prefixItems", "allOf", "anyOf", "oneOf"];

/// Close every object schema that does not say otherwise.
fn apply_strict_mode(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if is_object_schema(map) && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }

            for key in MAP_KEYWORDS {
                if let Some(Value::Object(children)) = map.get_mut(key) {
                    children.values_mut().for_each(apply_strict_mode);
                }
            }
            for key in SINGLE_KEYWORDS {
                if let Some(child) = map.get_mut(key) {
                    apply_strict_mode(child);
                }
            }
            for key in ARRAY_KEYWORDS {
                if let Some(Value::Array(children)) = map.get_mut(key) {
                    children.iter_mut().for_each(apply_strict_mode);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(apply_strict_mode),
        _ => {}
    }
}

fn is_object_schema(map: &Map<String, Value>) -> bool {
    const OBJECT_KEYWORDS: [&str; 8] = [
        "properties",
        "patternProperties",
        "additionalProperties",
        "unevaluatedProperties",
        "required",
        "dependentRequired",
        "dependentSchemas",
        "propertyNames",
    ];

    match map.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(kinds)) => kinds.iter().any(|kind| kind.as_str() == Some("object")),
        _ => OBJECT_KEYWORDS.iter().any(|keyword| map.contains_key(*keyword)),
    }
}

#[cfg(unix)]
fn same_file_identity(
    path_metadata: &std::fs::Metadata,
    opened_metadata: &std::fs::Metadata,
) -> bool {
    use std::os::unix::fs::MetadataExt;
    path_metadata.dev() == opened_metadata.dev() && path_metadata.ino() == opened_metadata.ino()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;

    const SUM_SCHEMA: &str = r#"{
        "type": "object",
        "properties": {
            "a": { "type": "integer" },
            "b": { "type": "integer" }
        },
        "required": ["a", "b"]
    }"#;

    #[test]
    fn register_and_validate() {
        let mut registry = SchemaRegistry::new();
        registry.register("sum", SUM_SCHEMA).unwrap();

        assert!(registry.validate("sum", &json!({"a": 1, "b": 2})).is_ok());
        assert!(matches!(
            registry.validate("sum", &json!({"a": "x", "b": 2})),
            Err(SchemaError::ValidationFailed { method, .. }) if method == "sum"
        ));
    }

    #[test]
    fn absent_params_validate_as_null() {
        let mut registry = SchemaRegistry::new();
        registry.register("sum", SUM_SCHEMA).unwrap();
        registry.register("ping", r#"{"type":["object","null"]}"#).unwrap();

        assert!(registry.validate("sum", &Value::Null).is_err());
        assert!(registry.validate("ping", &Value::Null).is_ok());
    }

    #[test]
    fn methods_validate_independently() {
        let mut registry = SchemaRegistry::new();
        registry.register("sum", SUM_SCHEMA).unwrap();
        registry
            .register("flags", r#"{"type":"array","items":{"type":"boolean"}}"#)
            .unwrap();

        assert!(registry.validate("flags", &json!([true, false])).is_ok());
        assert!(registry.validate("flags", &json!([true, 1])).is_err());
        assert!(registry.validate("sum", &json!([true])).is_err());
    }

    #[test]
    fn method_names_are_case_sensitive() {
        let mut registry = SchemaRegistry::new();
        registry.register("PING", r#"{"type":"object"}"#).unwrap();

        assert!(registry.has_schema("PING"));
        assert!(!registry.has_schema("ping"));
        assert!(registry.validate("ping", &json!(5)).is_ok());
    }

    #[test]
    fn missing_schema_permissive_passes() {
        let registry = SchemaRegistry::new();
        assert!(registry.validate("anything", &json!({"any": "thing"})).is_ok());
    }

    #[test]
    fn missing_schema_strict_fails() {
        let registry = SchemaRegistry::with_config(
            RegistryConfig::default().with_fail_on_missing_schema(true),
        );

        assert!(matches!(
            registry.validate("nope", &json!({})),
            Err(SchemaError::NoSchema(method)) if method == "nope"
        ));
    }

    #[test]
    fn strict_mode_rejects_additional_properties() {
        let mut permissive = SchemaRegistry::new();
        permissive.register("sum", SUM_SCHEMA).unwrap();

        let mut strict = SchemaRegistry::with_config(RegistryConfig::default().with_strict_mode(true));
        strict.register("sum", SUM_SCHEMA).unwrap();

        let params = json!({"a": 1, "b": 2, "c": 3});
        assert!(permissive.validate("sum", &params).is_ok());
        assert!(matches!(
            strict.validate("sum", &params),
            Err(SchemaError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn strict_mode_applies_nested_and_keyword_only_objects() {
        let schema = r#"{
            "properties": {
                "nested": {
                    "type": "object",
                    "properties": { "v": { "type": "integer" } }
                }
            },
            "required": ["nested"]
        }"#;

        let mut strict = SchemaRegistry::with_config(RegistryConfig::default().with_strict_mode(true));
        strict.register("m", schema).unwrap();

        assert!(strict.validate("m", &json!({"nested": {"v": 1}})).is_ok());
        assert!(strict.validate("m", &json!({"nested": {"v": 1}, "x": 1})).is_err());
        assert!(strict.validate("m", &json!({"nested": {"v": 1, "x": 1}})).is_err());
    }

    #[test]
    fn invalid_schema_text_and_schema_fail() {
        let mut registry = SchemaRegistry::new();
        assert!(matches!(
            registry.register("m", "{not json"),
            Err(SchemaError::InvalidJson(_))
        ));
        assert!(matches!(
            registry.register("m", r#"{"type":"definitely-not-a-type"}"#),
            Err(SchemaError::CompileFailed(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn from_embedded_loads_schemas() {
        let registry = SchemaRegistry::from_embedded(&[
            ("sum", SUM_SCHEMA),
            ("log", r#"{"type":"object","required":["line"]}"#),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.methods(), vec!["log".to_string(), "sum".to_string()]);
    }

    #[test]
    fn from_directory_loads_and_validates() {
        let dir = make_temp_schema_dir("from-directory");
        write_schema(&dir, "sum.schema.json", SUM_SCHEMA);
        write_schema(&dir, "ETC.INIT.schema.json", r#"{"type":"null"}"#);
        write_schema(&dir, "README.md", "not a schema");

        let registry = SchemaRegistry::from_directory(&dir).unwrap();
        assert_eq!(
            registry.methods(),
            vec!["ETC.INIT".to_string(), "sum".to_string()]
        );
        assert!(registry.validate("sum", &json!({"a": 5, "b": 6})).is_ok());
        assert!(registry.validate("ETC.INIT", &json!(1)).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_rejects_nameless_schema_file() {
        let dir = make_temp_schema_dir("nameless");
        write_schema(&dir, ".schema.json", SUM_SCHEMA);

        let result = SchemaRegistry::from_directory(&dir);
        assert!(matches!(result, Err(SchemaError::LoadFailed(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_directory_fails() {
        let result = SchemaRegistry::from_directory(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(SchemaError::LoadFailed(_))));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_schema_is_rejected() {
        let dir = make_temp_schema_dir("symlink-schema");
        let target = dir.join("target.json");
        std::fs::write(&target, SUM_SCHEMA.as_bytes()).unwrap();
        std::os::unix::fs::symlink(&target, dir.join("sum.schema.json")).unwrap();

        let result = SchemaRegistry::from_directory(&dir);
        assert!(matches!(result, Err(SchemaError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn schema_count_limit_is_enforced() {
        let dir = make_temp_schema_dir("schema-count-limit");
        write_schema(&dir, "a.schema.json", SUM_SCHEMA);
        write_schema(&dir, "b.schema.json", SUM_SCHEMA);

        let config = RegistryConfig {
            max_schemas_from_directory: 1,
            ..RegistryConfig::default()
        };
        let result = SchemaRegistry::from_directory_with_config(&dir, config);
        assert!(matches!(result, Err(SchemaError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn schema_file_size_limit_is_enforced() {
        let dir = make_temp_schema_dir("schema-size-limit");
        write_schema(&dir, "sum.schema.json", SUM_SCHEMA);

        let config = RegistryConfig {
            max_schema_file_size: 8,
            ..RegistryConfig::default()
        };
        let result = SchemaRegistry::from_directory_with_config(&dir, config);
        assert!(matches!(result, Err(SchemaError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn same_file_identity_distinguishes_replaced_file() {
        let dir = make_temp_schema_dir("identity-check");
        let first = dir.join("first.json");
        let second = dir.join("second.json");
        std::fs::write(&first, SUM_SCHEMA).unwrap();
        std::fs::write(&second, SUM_SCHEMA).unwrap();

        let first_meta = std::fs::symlink_metadata(&first).unwrap();
        let opened_first = std::fs::File::open(&first).unwrap().metadata().unwrap();
        let opened_second = std::fs::File::open(&second).unwrap().metadata().unwrap();

        assert!(same_file_identity(&first_meta, &opened_first));
        assert!(!same_file_identity(&first_meta, &opened_second));

        let _ = std::fs::remove_dir_all(&dir);
    }

    fn make_temp_schema_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ezrpc-schema-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_schema(dir: &Path, file_name: &str, contents: &str) {
        std::fs::write(dir.join(file_name), contents.as_bytes()).unwrap();
    }
}
