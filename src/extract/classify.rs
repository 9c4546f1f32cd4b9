//! Section title classification
//!
//! Route pages carry free-text sections (`<h2 class="mt-2">` title followed by
//! a `<div class="fr-view">` body). Each title is looked up in a label table
//! and the section lands in one of four buckets; unknown titles go to `misc`.

use crate::config::ClassifyConfig;
use crate::extract::collapse_whitespace;
use crate::ConfigResult;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Description,
    Directions,
    Protection,
    Misc,
}

impl Bucket {
    /// Parses a bucket name; anything unrecognised is `Misc`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "description" => Self::Description,
            "directions" => Self::Directions,
            "protection" => Self::Protection,
            _ => Self::Misc,
        }
    }
}

/// Classified sections of one page, each entry rendered `"{title} - {text}"`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections {
    pub description: Vec<String>,
    pub directions: Vec<String>,
    pub protection: Vec<String>,
    pub misc: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LabelRow {
    #[serde(rename = "Title")]
    title: String,

    #[serde(rename = "Process As")]
    process_as: String,
}

/// Title to bucket lookup
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    labels: HashMap<String, Bucket>,
}

impl LabelTable {
    /// Builds the table from the `[classify]` lists plus the optional CSV
    ///
    /// CSV rows override list entries with the same title.
    pub fn from_config(config: &ClassifyConfig) -> ConfigResult<Self> {
        let mut table = Self::default();

        for title in &config.description {
            table.insert(title, Bucket::Description);
        }
        for title in &config.directions {
            table.insert(title, Bucket::Directions);
        }
        for title in &config.protection {
            table.insert(title, Bucket::Protection);
        }

        if let Some(path) = &config.csv_path {
            let loaded = table.load_csv(Path::new(path))?;
            tracing::debug!("Loaded {} section labels from {}", loaded, path);
        }

        Ok(table)
    }

    pub fn insert(&mut self, title: &str, bucket: Bucket) {
        self.labels.insert(title.trim().to_string(), bucket);
    }

    /// Reads `Title`,`Process As` rows; returns the number of rows read
    pub fn load_csv(&mut self, path: &Path) -> ConfigResult<usize> {
        let mut reader = csv::Reader::from_path(path)?;
        self.load_rows(&mut reader)
    }

    fn load_rows<R: std::io::Read>(&mut self, reader: &mut csv::Reader<R>) -> ConfigResult<usize> {
        let mut count = 0;
        for row in reader.deserialize::<LabelRow>() {
            let row = row?;
            self.insert(&row.title, Bucket::from_label(&row.process_as));
            count += 1;
        }
        Ok(count)
    }

    pub fn bucket(&self, title: &str) -> Bucket {
        self.labels.get(title.trim()).copied().unwrap_or(Bucket::Misc)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Sorts `(title, text)` pairs into buckets, preserving page order
    pub fn classify<'a, I>(&self, blocks: I) -> Sections
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut sections = Sections::default();

        for (title, text) in blocks {
            let title = collapse_whitespace(title);
            let entry = format!("{} - {}", title, collapse_whitespace(text));

            match self.bucket(&title) {
                Bucket::Description => sections.description.push(entry),
                Bucket::Directions => sections.directions.push(entry),
                Bucket::Protection => sections.protection.push(entry),
                Bucket::Misc => sections.misc.push(entry),
            }
        }

        sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn table() -> LabelTable {
        LabelTable::from_config(&ClassifyConfig {
            description: vec!["Description".to_string()],
            directions: vec!["Location".to_string()],
            protection: vec!["Protection".to_string()],
            csv_path: None,
        })
        .unwrap()
    }

    #[test]
    fn test_classify_buckets_and_misc() {
        let sections = table().classify(vec![
            ("Description", "Climb the\n   obvious crack."),
            ("Location", "Left of the big tree."),
            ("Protection", "Standard rack."),
            ("Route History", "First climbed in 1970."),
        ]);

        assert_eq!(sections.description, vec!["Description - Climb the obvious crack."]);
        assert_eq!(sections.directions, vec!["Location - Left of the big tree."]);
        assert_eq!(sections.protection, vec!["Protection - Standard rack."]);
        assert_eq!(sections.misc, vec!["Route History - First climbed in 1970."]);
    }

    #[test]
    fn test_csv_rows_extend_and_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Title,Process As").unwrap();
        writeln!(file, "Approach,Directions").unwrap();
        writeln!(file, "Gear,protection").unwrap();
        writeln!(file, "Location,Misc").unwrap();
        file.flush().unwrap();

        let config = ClassifyConfig {
            description: vec![],
            directions: vec!["Location".to_string()],
            protection: vec![],
            csv_path: Some(file.path().to_string_lossy().to_string()),
        };
        let table = LabelTable::from_config(&config).unwrap();

        assert_eq!(table.bucket("Approach"), Bucket::Directions);
        assert_eq!(table.bucket("Gear"), Bucket::Protection);
        assert_eq!(table.bucket("Location"), Bucket::Misc);
        assert_eq!(table.bucket("Unknown"), Bucket::Misc);
    }

    #[test]
    fn test_missing_csv_is_an_error() {
        let config = ClassifyConfig {
            csv_path: Some("/nonexistent/titles.csv".to_string()),
            ..ClassifyConfig::default()
        };
        assert!(LabelTable::from_config(&config).is_err());
    }
}
