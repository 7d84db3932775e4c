use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::FatalError;

/// Category used when no keyword matches.
pub const DEFAULT_CATEGORY: &str = "Lain-lain";

/// Built-in keyword table, scanned top to bottom. The first keyword found
/// as a case-insensitive substring of the item name wins, so when several
/// keywords would match ("makan_bensin"), the earlier table entry decides.
const KEYWORD_TABLE: &[(&str, &str)] = &[
    ("makan", "Makanan"),
    ("minum", "Makanan"),
    ("gojek", "Transport"),
    ("grab", "Transport"),
    ("maxim", "Transport"),
    ("bensin", "Transport"),
    ("token", "Token Listrik"),
    ("listrik", "Token Listrik"),
    ("rokok", "Sahabat Sebat"),
    ("internet", "Entertaiment"),
    ("pulsa", "Komunikasi"),
    ("kuota", "Komunikasi"),
];

/// Serializable keyword table so deployments can swap the mapping without
/// touching code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordTable {
    /// Ordered (keyword, category) pairs
    pub keywords: Vec<(String, String)>,
    /// Category used when no keyword matches
    #[serde(default = "default_category")]
    pub default: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// Maps item names onto spending categories.
pub struct Classifier {
    table: KeywordTable,
}

impl Classifier {
    /// Classifier over the built-in keyword table.
    pub fn builtin() -> Self {
        Self {
            table: KeywordTable {
                keywords: KEYWORD_TABLE
                    .iter()
                    .map(|(keyword, category)| (keyword.to_string(), category.to_string()))
                    .collect(),
                default: default_category(),
            },
        }
    }

    /// Classifier loaded from a YAML keyword table.
    pub fn from_yaml_file(path: &Path) -> Result<Self, FatalError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FatalError::Startup(format!("cannot read {:?}: {}", path, e)))?;
        let table: KeywordTable = serde_yaml::from_str(&content)
            .map_err(|e| FatalError::Startup(format!("cannot parse {:?}: {}", path, e)))?;
        Ok(Self { table })
    }

    /// Category of the first keyword contained in `name`, or the default.
    pub fn classify(&self, name: &str) -> &str {
        let lower = name.to_lowercase();
        for (keyword, category) in &self.table.keywords {
            if lower.contains(&keyword.to_lowercase()) {
                return category;
            }
        }
        &self.table.default
    }

    pub fn default_category(&self) -> &str {
        &self.table.default
    }
}
