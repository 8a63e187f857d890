use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::{DatasetId, ModifiedDate};
use crate::error::SyncError;

/// One catalog entry from the manifest. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DatasetRecord {
    #[serde(rename = "landingPage", default)]
    pub landing_page: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub modified: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub distribution: Vec<Distribution>,
    #[serde(default)]
    pub theme: Option<ThemeField>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Distribution {
    #[serde(rename = "downloadURL", default)]
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ThemeField {
    List(Vec<String>),
    Text(String),
}

impl ThemeField {
    /// Exact membership for a list, substring match for a plain string.
    pub fn contains(&self, theme: &str) -> bool {
        match self {
            ThemeField::List(values) => values.iter().any(|value| value == theme),
            ThemeField::Text(value) => value.contains(theme),
        }
    }
}

impl DatasetRecord {
    pub fn identifier(&self) -> Result<DatasetId, SyncError> {
        let landing_page = self
            .landing_page
            .as_deref()
            .ok_or_else(|| SyncError::InvalidLandingPage("missing landingPage".to_string()))?;
        DatasetId::from_landing_page(landing_page)
    }

    /// URL of the first distribution; later distributions are never used.
    pub fn download_url(&self) -> Option<&str> {
        self.distribution
            .first()
            .and_then(|dist| dist.download_url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }

    pub fn modified(&self) -> ModifiedDate {
        ModifiedDate::new(self.modified.clone())
    }

    pub fn has_theme(&self, theme: &str) -> bool {
        self.theme
            .as_ref()
            .map(|field| field.contains(theme))
            .unwrap_or(false)
    }
}

/// Treats an explicit `null` like an absent key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    dataset: Vec<DatasetRecord>,
}

pub struct ManifestLoader;

impl ManifestLoader {
    pub fn load(path: &Utf8Path) -> Result<Vec<DatasetRecord>, SyncError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| SyncError::ManifestRead(path.as_std_path().to_path_buf()))?;
        Self::parse(&content)
    }

    /// Accepts a bare JSON array of records or a catalog object with a `dataset` array.
    pub fn parse(content: &str) -> Result<Vec<DatasetRecord>, SyncError> {
        let parse_error = |err: serde_json::Error| SyncError::ManifestParse(err.to_string());
        // Peek at the shape first, then parse the text again so record errors
        // keep their line and column.
        match serde_json::from_str::<Value>(content).map_err(parse_error)? {
            Value::Array(_) => serde_json::from_str(content).map_err(parse_error),
            Value::Object(_) => serde_json::from_str::<CatalogDocument>(content)
                .map(|catalog| catalog.dataset)
                .map_err(parse_error),
            _ => Err(SyncError::ManifestParse(
                "expected an array of records or an object with a \"dataset\" array".to_string(),
            )),
        }
    }
}

/// Records whose theme contains `theme`, in manifest order.
pub fn filter_by_theme(records: Vec<DatasetRecord>, theme: &str) -> Vec<DatasetRecord> {
    records
        .into_iter()
        .filter(|record| record.has_theme(theme))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_record_fields() {
        let records = ManifestLoader::parse(
            r#"[{
                "landingPage": "https://data.example.gov/dataset/xubh-q36u",
                "modified": "2024-05-08",
                "distribution": [{"downloadURL": "https://data.example.gov/a.csv"}],
                "theme": ["Hospitals"],
                "title": "Hospital General Information"
            }]"#,
        )
        .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.identifier().unwrap().as_str(), "xubh-q36u");
        assert_eq!(record.download_url(), Some("https://data.example.gov/a.csv"));
        assert_eq!(record.modified().as_str(), "2024-05-08");
        assert!(record.has_theme("Hospitals"));
    }

    #[test]
    fn null_fields_do_not_reject_the_manifest() {
        let records = ManifestLoader::parse(
            r#"[
                {
                    "landingPage": "https://data.example.gov/dataset/xubh-q36u",
                    "modified": "2024-05-08",
                    "distribution": [{"downloadURL": "https://data.example.gov/a.csv"}],
                    "theme": ["Hospitals"]
                },
                {
                    "landingPage": "https://data.example.gov/dataset/b",
                    "modified": null,
                    "distribution": null,
                    "theme": ["Finance"]
                }
            ]"#,
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].modified, "");
        assert_eq!(records[1].download_url(), None);
        let matched = filter_by_theme(records, "Hospitals");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].identifier().unwrap().as_str(), "xubh-q36u");
    }

    #[test]
    fn record_errors_keep_their_position() {
        let err = ManifestLoader::parse(
            "{\"dataset\": [\n  {\"modified\": 20240508, \"theme\": [\"Hospitals\"]}\n]}",
        )
        .unwrap_err();

        let message = match err {
            SyncError::ManifestParse(message) => message,
            other => panic!("unexpected error: {other:?}"),
        };
        assert!(message.contains("line 2"), "{message}");
        assert!(!message.contains("untagged"), "{message}");
    }

    #[test]
    fn theme_string_matches_substring() {
        let field = ThemeField::Text("Hospitals; Physicians".to_string());
        assert!(field.contains("Hospitals"));
        assert!(!field.contains("Nursing homes"));
    }
}
