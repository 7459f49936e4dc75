//! Output formatting shared by the lenses
//!
//! Summary rows (`FamilyStats`, `FamilyCheck`) are rendered either as tables
//! or as JSON.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output format for lens summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Pretty table with borders (default)
    #[default]
    Table,
    /// Markdown table format
    Markdown,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON with indentation
    JsonPretty,
}

impl OutputFormat {
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json | Self::JsonPretty)
    }

    pub fn all_names() -> &'static [&'static str] {
        &["table", "markdown", "json", "json-pretty"]
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
            Self::JsonPretty => write!(f, "json-pretty"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" | "pretty" => Ok(Self::Table),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "json-pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            _ => Err(format!(
                "Unknown output format '{}'. Valid formats: {}",
                s,
                Self::all_names().join(", ")
            )),
        }
    }
}

/// Render JSON output of any serializable summary.
pub fn render_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    Ok(match pretty {
        true => serde_json::to_string_pretty(value)?,
        false => serde_json::to_string(value)?,
    })
}

/// Render summary rows in the requested format.
#[cfg(feature = "display")]
pub fn render_rows<T>(rows: &[T], format: OutputFormat) -> Result<String>
where
    T: tabled::Tabled + Serialize,
{
    use tabled::settings::Style;
    use tabled::Table;

    Ok(match format {
        OutputFormat::Table => Table::new(rows).with(Style::rounded()).to_string(),
        OutputFormat::Markdown => Table::new(rows).with(Style::markdown()).to_string(),
        OutputFormat::Json => render_json(&rows, false)?,
        OutputFormat::JsonPretty => render_json(&rows, true)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("table").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str("md").unwrap(), OutputFormat::Markdown);
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert_eq!(
            OutputFormat::from_str("json-pretty").unwrap(),
            OutputFormat::JsonPretty
        );
        let err = OutputFormat::from_str("psv").unwrap_err();
        assert!(err.contains("table, markdown, json, json-pretty"));
    }

    #[test]
    fn test_output_format_display() {
        for name in OutputFormat::all_names() {
            assert_eq!(OutputFormat::from_str(name).unwrap().to_string(), *name);
        }
        assert!(OutputFormat::JsonPretty.is_json());
        assert!(!OutputFormat::Markdown.is_json());
    }

    #[cfg(feature = "display")]
    #[test]
    fn test_render_rows() {
        #[derive(Serialize, tabled::Tabled)]
        struct Row {
            family: &'static str,
            lines: u64,
        }
        let rows = [Row {
            family: "ipv4",
            lines: 3,
        }];

        let table = render_rows(&rows, OutputFormat::Markdown).unwrap();
        assert!(table.contains("| family | lines |"));
        assert!(table.contains("| ipv4   | 3     |"));

        let json = render_rows(&rows, OutputFormat::Json).unwrap();
        assert_eq!(json, r#"[{"family":"ipv4","lines":3}]"#);
    }
}
