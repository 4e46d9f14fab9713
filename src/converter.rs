//! Per-format converter adapters.
//!
//! Formats that are neither paginated nor raster (Office, HTML, CSV, …) are
//! handled by a [`Converter`] looked up by format tag in a
//! [`ConverterRegistry`]. The registry is built once and injected into the
//! orchestrator; there is no runtime type sniffing.
//!
//! Adapters must be pure over the bytes they are given and must fail with a
//! [`ConversionError`] rather than return partial text.

use crate::config::ProcessingParameters;
use crate::error::ConversionError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// What an adapter extracts from one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertedDocument {
    pub text: String,
    /// Tables as row-major cell grids.
    pub tables: Vec<Vec<Vec<String>>>,
    pub metadata: BTreeMap<String, String>,
}

/// A format adapter.
pub trait Converter: Send + Sync {
    /// Format tags (lower-case, no dot) this adapter handles.
    fn formats(&self) -> &[&str];

    fn convert(
        &self,
        bytes: &[u8],
        params: &ProcessingParameters,
    ) -> Result<ConvertedDocument, ConversionError>;
}

/// Format tag → adapter.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    by_format: HashMap<String, Arc<dyn Converter>>,
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&String> = self.by_format.keys().collect();
        tags.sort();
        f.debug_struct("ConverterRegistry").field("formats", &tags).finish()
    }
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in plain-text and JSON adapters.
    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        r.register(Arc::new(PlainTextConverter));
        r.register(Arc::new(JsonConverter));
        r
    }

    /// Register an adapter for every tag it declares. A later adapter
    /// replaces an earlier one for the same tag.
    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        for tag in converter.formats() {
            debug!("Converter registered for '{}'", tag);
            self.by_format
                .insert(tag.to_ascii_lowercase(), Arc::clone(&converter));
        }
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Converter>> {
        self.by_format.get(&tag.to_ascii_lowercase()).cloned()
    }

    /// The adapter for `tag`, or [`ConversionError::Unsupported`].
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn Converter>, ConversionError> {
        self.get(tag)
            .ok_or_else(|| ConversionError::Unsupported(tag.to_string()))
    }
}

/// UTF-8 text (`txt`, `text`, `md`, `csv`).
///
/// CSV is passed through as text; splitting it into a table grid is a job
/// for a dedicated adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextConverter;

impl Converter for PlainTextConverter {
    fn formats(&self) -> &[&str] {
        &["txt", "text", "md", "csv"]
    }

    fn convert(
        &self,
        bytes: &[u8],
        _params: &ProcessingParameters,
    ) -> Result<ConvertedDocument, ConversionError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ConversionError::Malformed(format!("not UTF-8: {e}")))?;
        let mut metadata = BTreeMap::new();
        metadata.insert("lines".to_string(), text.lines().count().to_string());
        Ok(ConvertedDocument {
            text: text.to_string(),
            tables: Vec::new(),
            metadata,
        })
    }
}

/// JSON exports (lab systems, EHR dumps).
///
/// Text is one `path: value` line per scalar leaf; object keys are visited in
/// sorted order, array items in index order. A top-level array of objects
/// also becomes a table: a header row with the union of keys in first-seen
/// order, then one row per object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl Converter for JsonConverter {
    fn formats(&self) -> &[&str] {
        &["json"]
    }

    fn convert(
        &self,
        bytes: &[u8],
        _params: &ProcessingParameters,
    ) -> Result<ConvertedDocument, ConversionError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ConversionError::Malformed(format!("invalid JSON: {e}")))?;

        let mut lines = Vec::new();
        flatten("", &value, &mut lines);
        let tables: Vec<Vec<Vec<String>>> = records_table(&value).into_iter().collect();

        let mut metadata = BTreeMap::new();
        metadata.insert("leaves".to_string(), lines.len().to_string());
        Ok(ConvertedDocument {
            text: lines.join("\n"),
            tables,
            metadata,
        })
    }
}

fn flatten(path: &str, value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let child = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                flatten(&child, v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten(&format!("{path}[{i}]"), v, out);
            }
        }
        scalar => out.push(format!("{path}: {}", scalar_text(scalar))),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn records_table(value: &Value) -> Option<Vec<Vec<String>>> {
    let items = value.as_array()?;
    if items.is_empty() || !items.iter().all(Value::is_object) {
        return None;
    }
    let mut header: Vec<String> = Vec::new();
    for obj in items.iter().filter_map(Value::as_object) {
        for k in obj.keys() {
            if !header.contains(k) {
                header.push(k.clone());
            }
        }
    }
    let mut rows = vec![header.clone()];
    for obj in items.iter().filter_map(Value::as_object) {
        rows.push(
            header
                .iter()
                .map(|k| match obj.get(k) {
                    Some(v @ (Value::Object(_) | Value::Array(_))) => v.to_string(),
                    Some(scalar) => scalar_text(scalar),
                    None => String::new(),
                })
                .collect(),
        );
    }
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_strips_bom() {
        let out = PlainTextConverter
            .convert(b"\xEF\xBB\xBFhello\nworld", &ProcessingParameters::default())
            .unwrap();
        assert_eq!(out.text, "hello\nworld");
        assert_eq!(out.metadata["lines"], "2");
    }

    #[test]
    fn plain_text_rejects_invalid_utf8() {
        let err = PlainTextConverter
            .convert(&[0xff, 0xfe, 0x00], &ProcessingParameters::default())
            .unwrap_err();
        assert!(matches!(err, ConversionError::Malformed(_)));
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        let r = ConverterRegistry::with_defaults();
        assert!(r.resolve("TXT").is_ok());
        assert!(r.get("md").is_some());
        assert!(r.get("docx").is_none());
        assert!(r.resolve("json").is_ok());
    }

    #[test]
    fn resolve_unknown_tag_is_unsupported() {
        let r = ConverterRegistry::with_defaults();
        match r.resolve("docx") {
            Err(ConversionError::Unsupported(tag)) => assert_eq!(tag, "docx"),
            Err(e) => panic!("expected Unsupported, got {e:?}"),
            Ok(_) => panic!("docx must not resolve"),
        }
    }

    #[test]
    fn json_flattens_leaves_in_key_order() {
        let out = JsonConverter
            .convert(
                br#"{"patient":{"name":"Ivanova","age":54},"dx":["bronchitis",null]}"#,
                &ProcessingParameters::default(),
            )
            .unwrap();
        assert_eq!(
            out.text,
            "dx[0]: bronchitis\ndx[1]: \npatient.age: 54\npatient.name: Ivanova"
        );
        assert!(out.tables.is_empty());
        assert_eq!(out.metadata["leaves"], "4");
    }

    #[test]
    fn json_record_array_becomes_table() {
        let out = JsonConverter
            .convert(
                br#"[{"test":"WBC","value":7.1},{"test":"CRP","unit":"mg/L"}]"#,
                &ProcessingParameters::default(),
            )
            .unwrap();
        assert_eq!(out.tables.len(), 1);
        assert_eq!(
            out.tables[0],
            vec![
                vec!["test", "value", "unit"],
                vec!["WBC", "7.1", ""],
                vec!["CRP", "", "mg/L"],
            ]
        );
    }

    #[test]
    fn json_rejects_malformed() {
        let err = JsonConverter
            .convert(b"{not json", &ProcessingParameters::default())
            .unwrap_err();
        assert!(matches!(err, ConversionError::Malformed(_)));
    }
}
