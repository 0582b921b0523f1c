//! Literal values bound into migration statements

use std::fmt;

use serde::{Deserialize, Serialize};

/// A literal value used by data primitives (insert / update / delete / seed).
///
/// Deserializes untagged so JSON seed files map `null`, booleans, integers,
/// floats and strings directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    /// Interpret a raw CSV field.
    ///
    /// Empty fields are NULL, `true`/`false` are booleans, integers and plain
    /// decimal numbers are numeric, everything else is text.
    pub fn from_csv_field(field: &str) -> Self {
        if field.is_empty() {
            return SqlValue::Null;
        }
        match field {
            "true" => return SqlValue::Bool(true),
            "false" => return SqlValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = field.parse::<i64>() {
            return SqlValue::Int(i);
        }
        let numeric = field.chars().any(|c| c.is_ascii_digit())
            && field
                .chars()
                .all(|c| c.is_ascii_digit() || c == '.' || c == '-');
        if numeric {
            if let Ok(f) = field.parse::<f64>() {
                return SqlValue::Float(f);
            }
        }
        SqlValue::Text(field.to_string())
    }

    /// Render as an inline SQL literal (used for generated scripts only;
    /// executed statements always bind parameters)
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => {
                let s = f.to_string();
                if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
                    s
                } else {
                    format!("{}.0", s)
                }
            }
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_literal())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_typing() {
        assert_eq!(SqlValue::from_csv_field(""), SqlValue::Null);
        assert_eq!(SqlValue::from_csv_field("25000000"), SqlValue::Int(25000000));
        assert_eq!(SqlValue::from_csv_field("-3"), SqlValue::Int(-3));
        assert_eq!(SqlValue::from_csv_field("12.5"), SqlValue::Float(12.5));
        assert_eq!(SqlValue::from_csv_field("true"), SqlValue::Bool(true));
        assert_eq!(SqlValue::from_csv_field("NaN"), SqlValue::Text("NaN".to_string()));
        assert_eq!(
            SqlValue::from_csv_field("Kies, sandig"),
            SqlValue::Text("Kies, sandig".to_string())
        );
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(SqlValue::from("l'argile").to_literal(), "'l''argile'");
        assert_eq!(SqlValue::Null.to_literal(), "NULL");
        assert_eq!(SqlValue::Float(2.0).to_literal(), "2.0");
        assert_eq!(SqlValue::from(Option::<i64>::None), SqlValue::Null);
    }

    #[test]
    fn test_json_untagged() {
        let values: Vec<SqlValue> = serde_json::from_str(r#"[null, true, 7, 1.5, "gravel"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                SqlValue::Null,
                SqlValue::Bool(true),
                SqlValue::Int(7),
                SqlValue::Float(1.5),
                SqlValue::Text("gravel".to_string()),
            ]
        );
    }
}
