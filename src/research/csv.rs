//! Minimal CSV rendering: comma-delimited, header row, RFC 4180 quoting.

use anyhow::Result;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Quote a field if it contains a comma, quote or line break.
pub fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn render(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut csv = String::new();
    csv.push_str(&headers.join(","));
    csv.push('\n');
    for row in rows {
        let values: Vec<String> = row.iter().map(|v| escape_field(v)).collect();
        csv.push_str(&values.join(","));
        csv.push('\n');
    }
    csv
}

/// Render and write, creating parent directories. Overwrites existing files.
pub fn write_csv(path: &Path, headers: &[&str], rows: &[Vec<String>]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render(headers, rows))?;
    Ok(())
}

/// Metadata value as a cell; missing and null are empty.
pub fn meta_field(metadata: &Map<String, Value>, key: &str) -> String {
    match metadata.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn render_writes_header_even_without_rows() {
        assert_eq!(render(&["a", "b"], &[]), "a,b\n");
        let rows = vec![vec!["1".to_string(), "x,y".to_string()]];
        assert_eq!(render(&["a", "b"], &rows), "a,b\n1,\"x,y\"\n");
    }

    #[test]
    fn meta_field_formats_values() {
        let meta = json!({ "task_id": 7, "name": "n", "gone": null })
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(meta_field(&meta, "task_id"), "7");
        assert_eq!(meta_field(&meta, "name"), "n");
        assert_eq!(meta_field(&meta, "gone"), "");
        assert_eq!(meta_field(&meta, "missing"), "");
    }
}
