use std::{fmt::Display, str::FromStr};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use thiserror::Error;

/// The fixed municipal taxonomy a dataset can be filed under. This enum is
/// the single authoritative list; validation and the `/categories` endpoint
/// both read from it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum Category {
    Administrative,
    Business,
    Community,
    Education,
    Environment,
    Finance,
    Health,
    Housing,
    #[serde(rename = "Public Safety")]
    #[strum(serialize = "Public Safety")]
    PublicSafety,
    Recreation,
    Transportation,
    Utilities,
}

impl Category {
    pub fn all_names() -> Vec<&'static str> {
        Self::iter().map(|c| c.into()).collect()
    }

    /// Parses a category form value. The empty string means "no category",
    /// which is valid and distinct from an unknown value.
    pub fn parse(value: &str) -> Result<Option<Category>, InventoryError> {
        if value.is_empty() {
            return Ok(None);
        }
        Category::from_str(value).map(Some).map_err(|_| {
            InventoryError::Validation(format!(
                "invalid category {:?}, valid categories: {}",
                value,
                Self::all_names().join(", ")
            ))
        })
    }
}

/// One metadata record per uploaded file, keyed by the normalized file name
/// shared with the blob store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Builder)]
#[builder(setter(into))]
pub struct DatasetRecord {
    pub file_name: String,
    #[builder(default)]
    pub category: Option<Category>,
    #[builder(default)]
    #[serde(default)]
    pub dataset_title: String,
    #[builder(default)]
    #[serde(default)]
    pub description: String,
    #[builder(default)]
    #[serde(default)]
    pub tags: String,
    #[builder(default)]
    #[serde(default)]
    pub row_labels: String,
    #[builder(default)]
    #[serde(default)]
    pub update_frequency: String,
    #[builder(default)]
    #[serde(default)]
    pub data_provided_by: String,
    #[builder(default)]
    #[serde(default)]
    pub contact_email: String,
    #[builder(default)]
    #[serde(default)]
    pub licensing: String,
    #[builder(default)]
    #[serde(default)]
    pub data_dictionary: String,
    #[builder(default)]
    #[serde(default)]
    pub resource_name: String,
    #[builder(default)]
    #[serde(default)]
    pub last_updated_date: String,
    #[builder(default)]
    #[serde(default)]
    pub file_type: String,
    #[builder(default)]
    #[serde(default)]
    pub file_size_kb: f64,
    /// Epoch millis, set once at creation by the store. Never client
    /// supplied, never mutated.
    pub uploaded_at: u64,
    /// Store-assigned creation sequence; drives listing order.
    #[builder(default)]
    #[serde(default)]
    pub sequence: u64,
}

impl DatasetRecord {
    /// A record with all descriptive fields empty, as created by an upload
    /// that has no metadata yet.
    pub fn empty(file_name: &str, uploaded_at: u64) -> Self {
        Self {
            file_name: file_name.to_string(),
            category: None,
            dataset_title: String::new(),
            description: String::new(),
            tags: String::new(),
            row_labels: String::new(),
            update_frequency: String::new(),
            data_provided_by: String::new(),
            contact_email: String::new(),
            licensing: String::new(),
            data_dictionary: String::new(),
            resource_name: String::new(),
            last_updated_date: String::new(),
            file_type: String::new(),
            file_size_kb: 0.0,
            uploaded_at,
            sequence: 0,
        }
    }

    pub fn category_name(&self) -> &str {
        self.category.map(<&str>::from).unwrap_or("")
    }
}

/// A partial metadata update. Fields left as `None` keep their current
/// value on an existing record. `category` is the raw form value: empty
/// clears it, anything else must be a member of [`Category`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetPatch {
    pub category: Option<String>,
    pub dataset_title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub row_labels: Option<String>,
    pub update_frequency: Option<String>,
    pub data_provided_by: Option<String>,
    pub contact_email: Option<String>,
    pub licensing: Option<String>,
    pub data_dictionary: Option<String>,
    pub resource_name: Option<String>,
    pub last_updated_date: Option<String>,
}

impl DatasetPatch {
    pub fn category(value: &str) -> Self {
        Self {
            category: Some(value.to_string()),
            ..Default::default()
        }
    }

    /// Validates the patch against the record it would produce. Called
    /// before any write so an invalid patch never partially applies.
    pub fn validate(&self) -> Result<(), InventoryError> {
        if let Some(category) = &self.category {
            Category::parse(category)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, record: &mut DatasetRecord) -> Result<(), InventoryError> {
        if let Some(category) = &self.category {
            record.category = Category::parse(category)?;
        }
        let fields = [
            (&self.dataset_title, &mut record.dataset_title),
            (&self.description, &mut record.description),
            (&self.tags, &mut record.tags),
            (&self.row_labels, &mut record.row_labels),
            (&self.update_frequency, &mut record.update_frequency),
            (&self.data_provided_by, &mut record.data_provided_by),
            (&self.contact_email, &mut record.contact_email),
            (&self.licensing, &mut record.licensing),
            (&self.data_dictionary, &mut record.data_dictionary),
            (&self.resource_name, &mut record.resource_name),
            (&self.last_updated_date, &mut record.last_updated_date),
        ];
        for (patch_field, record_field) in fields {
            if let Some(value) = patch_field {
                *record_field = value.clone();
            }
        }
        Ok(())
    }
}

/// Reduces an uploaded file name to a form that is safe as a storage key
/// and URL path segment: final path component only, control characters
/// stripped, surrounding whitespace trimmed.
pub fn normalize_file_name(raw: &str) -> Result<String, InventoryError> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let name = name.trim().to_string();
    if name.is_empty() || name == "." || name == ".." {
        return Err(InventoryError::Validation(format!(
            "invalid file name {:?}",
            raw
        )));
    }
    Ok(name)
}

/// Extension of a file name, lower-cased, empty if there is none.
pub fn file_extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("no dataset named {0:?}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Storage(anyhow::Error),
    #[error("file {file_name:?} was removed but its metadata record could not be deleted: {cause}")]
    PartialDelete { file_name: String, cause: String },
    #[error("{op} timed out after {after_ms}ms")]
    Timeout { op: String, after_ms: u64 },
}

impl From<anyhow::Error> for InventoryError {
    fn from(err: anyhow::Error) -> Self {
        InventoryError::Storage(err)
    }
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::NotFound(_) => ErrorKind::NotFound,
            InventoryError::Validation(_) => ErrorKind::ValidationError,
            InventoryError::Storage(_) => ErrorKind::StorageError,
            InventoryError::PartialDelete { .. } => ErrorKind::PartialDeleteError,
            InventoryError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ErrorKind {
    NotFound,
    ValidationError,
    StorageError,
    PartialDeleteError,
    Timeout,
}

impl Display for DatasetRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DatasetRecord(file_name: {})", self.file_name)
    }
}
