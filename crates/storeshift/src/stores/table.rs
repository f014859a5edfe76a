//! Relational table references and rows

use serde::{Deserialize, Serialize};

/// One row as the JSON object text produced by the source
///
/// The text travels unparsed from read to write. Decoding it into a
/// `serde_json::Value` would round `numeric` values to `f64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row(String);

impl Row {
    pub fn from_json_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_json_text(&self) -> &str {
        &self.0
    }

    /// Parsed view of the row, for inspection only
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.0)
    }
}

impl From<serde_json::Value> for Row {
    fn from(value: serde_json::Value) -> Self {
        Self(value.to_string())
    }
}

/// JSON array of rows built from their original text
pub fn json_array(rows: &[Row]) -> String {
    let mut array = String::with_capacity(rows.iter().map(|row| row.0.len() + 1).sum::<usize>() + 2);
    array.push('[');
    for (index, row) in rows.iter().enumerate() {
        if index > 0 {
            array.push(',');
        }
        array.push_str(&row.0);
    }
    array.push(']');
    array
}

/// Schema-qualified base table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `"schema"."name"` with embedded quotes doubled, safe to splice into SQL
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
