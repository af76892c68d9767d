use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, Multipart, Path, Query, Request, State},
    http::{Method, Response},
    routing::{delete, get, post},
    Json,
    Router,
};
use data_model::DatasetPatch;
use futures::StreamExt;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    export::EXPORT_FILE_NAME,
    http_objects::{
        BulkCategoryRequest,
        BulkDeleteRequest,
        BulkOutcome,
        CategoryList,
        DatasetRecord,
        InventoryAPIError,
        InventoryListParams,
    },
    inventory::Inventory,
};

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(OpenApi)]
#[openapi(
        paths(
            get_inventory,
            list_categories,
            upload_file,
            update_metadata,
            download_file,
            export_single_record,
            delete_file,
            bulk_delete,
            bulk_update_category,
            export_inventory,
        ),
        components(
            schemas(
                InventoryAPIError,
                DatasetRecord,
                CategoryList,
                BulkDeleteRequest,
                BulkCategoryRequest,
                BulkOutcome,
            )
        ),
        tags(
            (name = "inventory", description = "Municipal Data Inventory API")
        )
    )]
struct ApiDoc;

#[derive(Clone)]
pub struct RouteState {
    pub inventory: Arc<Inventory>,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/docs/swagger").url("/docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(index))
        .route(
            "/inventory",
            get(get_inventory).with_state(route_state.clone()),
        )
        .route(
            "/categories",
            get(list_categories).with_state(route_state.clone()),
        )
        .route("/upload", post(upload_file).with_state(route_state.clone()))
        .route(
            "/metadata",
            post(update_metadata).with_state(route_state.clone()),
        )
        .route(
            "/files/{file_name}",
            get(download_file).with_state(route_state.clone()),
        )
        .route(
            "/metadata/{file_name}",
            get(export_single_record).with_state(route_state.clone()),
        )
        .route(
            "/delete/{file_name}",
            delete(delete_file).with_state(route_state.clone()),
        )
        .route(
            "/bulk/delete",
            post(bulk_delete).with_state(route_state.clone()),
        )
        .route(
            "/bulk/category",
            post(bulk_update_category).with_state(route_state.clone()),
        )
        .route(
            "/export",
            get(export_inventory).with_state(route_state.clone()),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();

                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::debug_span!("request", %method, %uri, matched_path)
                })
                .on_failure(()),
        )
        .layer(cors)
        .layer(DefaultBodyLimit::max(usize::MAX))
}

async fn index() -> &'static str {
    "Municipal Data Inventory Server"
}

/// List all dataset records
#[utoipa::path(
    get,
    path = "/inventory",
    tag = "inventory",
    params(InventoryListParams),
    responses(
        (status = 200, description = "All dataset records, upload order", body = Vec<DatasetRecord>),
        (status = INTERNAL_SERVER_ERROR, description = "Unable to list records")
    ),
)]
async fn get_inventory(
    Query(params): Query<InventoryListParams>,
    State(state): State<RouteState>,
) -> Result<Json<Vec<DatasetRecord>>, InventoryAPIError> {
    let records = state.inventory.list(params.category.as_deref())?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

/// List valid categories
#[utoipa::path(
    get,
    path = "/categories",
    tag = "inventory",
    responses(
        (status = 200, description = "The fixed category taxonomy", body = CategoryList),
    ),
)]
async fn list_categories(
    State(state): State<RouteState>,
) -> Result<Json<CategoryList>, InventoryAPIError> {
    let categories = state
        .inventory
        .list_categories()
        .into_iter()
        .map(|c| c.to_string())
        .collect();
    Ok(Json(CategoryList { categories }))
}

/// Upload a file
#[utoipa::path(
    post,
    path = "/upload",
    tag = "inventory",
    request_body(content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File stored, record created or kept", body = DatasetRecord),
        (status = BAD_REQUEST, description = "No file field in the form"),
        (status = INTERNAL_SERVER_ERROR, description = "Unable to store the file")
    ),
)]
async fn upload_file(
    State(state): State<RouteState>,
    mut form: Multipart,
) -> Result<Json<DatasetRecord>, InventoryAPIError> {
    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| InventoryAPIError::bad_request(&e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(|n| n.to_string())
            .ok_or_else(|| InventoryAPIError::bad_request("file field has no filename"))?;
        let stream = field.map(|res| res.map_err(|err| anyhow::anyhow!(err)));
        let record = state.inventory.upload(&file_name, stream).await?;
        return Ok(Json(record.into()));
    }
    Err(InventoryAPIError::bad_request("file field is required"))
}

/// Upsert metadata for an uploaded file
#[utoipa::path(
    post,
    path = "/metadata",
    tag = "inventory",
    request_body(content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Updated record", body = DatasetRecord),
        (status = BAD_REQUEST, description = "Invalid category or missing file_name"),
        (status = NOT_FOUND, description = "No uploaded file with that name")
    ),
)]
async fn update_metadata(
    State(state): State<RouteState>,
    mut form: Multipart,
) -> Result<Json<DatasetRecord>, InventoryAPIError> {
    let mut file_name: Option<String> = None;
    let mut patch = DatasetPatch::default();
    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| InventoryAPIError::bad_request(&e.to_string()))?
    {
        let Some(name) = field.name().map(|n| n.to_string()) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| InventoryAPIError::bad_request(&e.to_string()))?;
        match name.as_str() {
            "file_name" => file_name = Some(value),
            "category" => patch.category = Some(value),
            "dataset_title" => patch.dataset_title = Some(value),
            "description" => patch.description = Some(value),
            "tags" => patch.tags = Some(value),
            "row_labels" => patch.row_labels = Some(value),
            "update_frequency" => patch.update_frequency = Some(value),
            "data_provided_by" => patch.data_provided_by = Some(value),
            "contact_email" => patch.contact_email = Some(value),
            "licensing" => patch.licensing = Some(value),
            "data_dictionary" => patch.data_dictionary = Some(value),
            "resource_name" => patch.resource_name = Some(value),
            "last_updated_date" => patch.last_updated_date = Some(value),
            _ => {}
        }
    }
    let file_name =
        file_name.ok_or_else(|| InventoryAPIError::bad_request("file_name is required"))?;
    let record = state.inventory.update_metadata(&file_name, &patch).await?;
    Ok(Json(record.into()))
}

/// Download the raw file
#[utoipa::path(
    get,
    path = "/files/{file_name}",
    tag = "inventory",
    responses(
        (status = 200, description = "Raw file bytes"),
        (status = NOT_FOUND, description = "No uploaded file with that name")
    ),
)]
async fn download_file(
    Path(file_name): Path<String>,
    State(state): State<RouteState>,
) -> Result<Response<Body>, InventoryAPIError> {
    let (size, stream) = state.inventory.get_file(&file_name).await?;
    Response::builder()
        .header("Content-Type", "application/octet-stream")
        .header("Content-Length", size.to_string())
        .header(
            "Content-Disposition",
            attachment_disposition(&file_name),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| InventoryAPIError::internal_error_str(&e.to_string()))
}

/// Export one record as a spreadsheet
#[utoipa::path(
    get,
    path = "/metadata/{file_name}",
    tag = "inventory",
    responses(
        (status = 200, description = "Single-record Field/Value workbook"),
        (status = NOT_FOUND, description = "No dataset record with that name")
    ),
)]
async fn export_single_record(
    Path(file_name): Path<String>,
    State(state): State<RouteState>,
) -> Result<Response<Body>, InventoryAPIError> {
    let (file_name, workbook) = state.inventory.export_single(&file_name)?;
    workbook_response(&metadata_export_name(&file_name), workbook)
}

/// Delete a file and its metadata record
#[utoipa::path(
    delete,
    path = "/delete/{file_name}",
    tag = "inventory",
    responses(
        (status = 200, description = "Blob and record removed"),
        (status = NOT_FOUND, description = "Nothing stored under that name"),
        (status = INTERNAL_SERVER_ERROR, description = "Blob removed but record deletion failed")
    ),
)]
async fn delete_file(
    Path(file_name): Path<String>,
    State(state): State<RouteState>,
) -> Result<(), InventoryAPIError> {
    state.inventory.delete(&file_name).await?;
    Ok(())
}

/// Delete many files, reporting per-name results
#[utoipa::path(
    post,
    path = "/bulk/delete",
    tag = "inventory",
    request_body = BulkDeleteRequest,
    responses(
        (status = 200, description = "Per-name success/failure map", body = BulkOutcome),
    ),
)]
async fn bulk_delete(
    State(state): State<RouteState>,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<Json<BulkOutcome>, InventoryAPIError> {
    let outcome = state.inventory.bulk_delete(request.file_names).await;
    Ok(Json(outcome.into()))
}

/// Reassign a category on many files, reporting per-name results
#[utoipa::path(
    post,
    path = "/bulk/category",
    tag = "inventory",
    request_body = BulkCategoryRequest,
    responses(
        (status = 200, description = "Per-name success/failure map", body = BulkOutcome),
    ),
)]
async fn bulk_update_category(
    State(state): State<RouteState>,
    Json(request): Json<BulkCategoryRequest>,
) -> Result<Json<BulkOutcome>, InventoryAPIError> {
    let outcome = state
        .inventory
        .bulk_update_category(request.file_names, &request.category)
        .await;
    Ok(Json(outcome.into()))
}

/// Export the whole inventory as a spreadsheet
#[utoipa::path(
    get,
    path = "/export",
    tag = "inventory",
    responses(
        (status = 200, description = "Full-inventory workbook"),
        (status = INTERNAL_SERVER_ERROR, description = "Unable to render the workbook")
    ),
)]
async fn export_inventory(
    State(state): State<RouteState>,
) -> Result<Response<Body>, InventoryAPIError> {
    let workbook = state.inventory.export()?;
    workbook_response(EXPORT_FILE_NAME, workbook)
}

/// Suggested download name for a single-record workbook: the file name
/// with its extension replaced by `_metadata.xlsx`.
fn metadata_export_name(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    format!("{}_metadata.xlsx", stem)
}

fn attachment_disposition(file_name: &str) -> String {
    // double quotes would break the header quoting
    format!(
        "attachment; filename=\"{}\"",
        file_name.replace('"', "")
    )
}

fn workbook_response(
    file_name: &str,
    workbook: Vec<u8>,
) -> Result<Response<Body>, InventoryAPIError> {
    Response::builder()
        .header("Content-Type", XLSX_CONTENT_TYPE)
        .header("Content-Length", workbook.len().to_string())
        .header("Content-Disposition", attachment_disposition(file_name))
        .body(Body::from(workbook))
        .map_err(|e| InventoryAPIError::internal_error_str(&e.to_string()))
}
