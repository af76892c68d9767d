use std::collections::HashMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use data_model::{self, InventoryError};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, ToSchema, Serialize, Deserialize)]
pub struct InventoryAPIError {
    #[serde(skip)]
    status_code: StatusCode,
    message: String,
}

impl InventoryAPIError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn internal_error_str(e: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for InventoryAPIError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status_code, self.message);
        (self.status_code, self.message).into_response()
    }
}

impl From<InventoryError> for InventoryAPIError {
    fn from(err: InventoryError) -> Self {
        match &err {
            InventoryError::NotFound(_) => Self::not_found(&err.to_string()),
            InventoryError::Validation(_) => Self::bad_request(&err.to_string()),
            // storage detail is logged, not leaked
            InventoryError::Storage(cause) => {
                error!("storage failure: {:?}", cause);
                Self::internal_error_str("internal storage error")
            }
            InventoryError::PartialDelete { .. } => Self::internal_error_str(&err.to_string()),
            InventoryError::Timeout { .. } => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, &err.to_string())
            }
        }
    }
}

/// Wire form of a dataset record. The store-internal sequence number is
/// not part of the API surface.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatasetRecord {
    pub file_name: String,
    pub category: Option<String>,
    pub dataset_title: String,
    pub description: String,
    pub tags: String,
    pub row_labels: String,
    pub update_frequency: String,
    pub data_provided_by: String,
    pub contact_email: String,
    pub licensing: String,
    pub data_dictionary: String,
    pub resource_name: String,
    pub last_updated_date: String,
    pub file_type: String,
    pub file_size_kb: f64,
    pub uploaded_at: u64,
}

impl From<data_model::DatasetRecord> for DatasetRecord {
    fn from(record: data_model::DatasetRecord) -> Self {
        Self {
            category: record.category.map(|c| c.to_string()),
            file_name: record.file_name,
            dataset_title: record.dataset_title,
            description: record.description,
            tags: record.tags,
            row_labels: record.row_labels,
            update_frequency: record.update_frequency,
            data_provided_by: record.data_provided_by,
            contact_email: record.contact_email,
            licensing: record.licensing,
            data_dictionary: record.data_dictionary,
            resource_name: record.resource_name,
            last_updated_date: record.last_updated_date,
            file_type: record.file_type,
            file_size_kb: record.file_size_kb,
            uploaded_at: record.uploaded_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CategoryList {
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, IntoParams)]
pub struct InventoryListParams {
    /// Exact category to filter on; absent or empty returns everything.
    pub category: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkDeleteRequest {
    pub file_names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkCategoryRequest {
    pub file_names: Vec<String>,
    pub category: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkItemError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: HashMap<String, BulkItemError>,
}

impl From<crate::inventory::BulkOutcome> for BulkOutcome {
    fn from(outcome: crate::inventory::BulkOutcome) -> Self {
        Self {
            succeeded: outcome.succeeded,
            failed: outcome
                .failed
                .into_iter()
                .map(|(name, err)| {
                    (
                        name,
                        BulkItemError {
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_delete_maps_to_internal_error_naming_the_file() {
        let err = InventoryError::PartialDelete {
            file_name: "a.csv".to_string(),
            cause: "db unavailable".to_string(),
        };
        let api_err = InventoryAPIError::from(err);
        assert_eq!(api_err.status_code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(api_err.message.contains("a.csv"));
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err = InventoryError::Timeout {
            op: "blob put".to_string(),
            after_ms: 50,
        };
        let api_err = InventoryAPIError::from(err);
        assert_eq!(api_err.status_code, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_storage_detail_is_not_leaked() {
        let err = InventoryError::Storage(anyhow::anyhow!("rocksdb path /var/db"));
        let api_err = InventoryAPIError::from(err);
        assert_eq!(api_err.status_code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api_err.message.contains("/var/db"));
    }
}
