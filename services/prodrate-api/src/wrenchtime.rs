//! Wrenchtime (setup time) endpoints.
//!
//! Same surface as the rate-of-operations mount, bound to the setup-time
//! table. The endpoint paths match the rate-of-operations mount so clients
//! switch datasets by prefix alone.

use axum::Router;
use axum::extract::{OriginalUri, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Json;
use serde_json::Value;

use crate::AppState;
use crate::dataset::{self, Dataset};
use crate::error::ApiError;

pub static WRENCHTIME: Dataset = Dataset {
    table: "[dbo].[T_NA_PRODRATE_SETUPTIME]",
    key_column: "SETUP_TIME_KEY",
    base_predicate: "RECIPE_NUMBER IS NOT NULL",
    filter_columns: &[
        "INTERFACE",
        "SETUP_MATRIX",
        "LOCATION",
        "FROM_SETUP_GROUP",
        "TO_SETUP_GROUP",
        "FROM_MACHINE",
        "TO_MACHINE",
        "FROM_PRODUCT_SIZE",
        "TO_PRODUCT_SIZE",
        "FROM_PRODUCT_VARIANT",
        "TO_PRODUCT_VARIANT",
        "BUSINESS_UNIT",
    ],
    // BUSINESS_UNIT is filterable but not offered as a drop-down facet.
    facet_columns: &[
        "INTERFACE",
        "SETUP_MATRIX",
        "LOCATION",
        "FROM_SETUP_GROUP",
        "TO_SETUP_GROUP",
        "FROM_MACHINE",
        "TO_MACHINE",
        "FROM_PRODUCT_SIZE",
        "TO_PRODUCT_SIZE",
        "FROM_PRODUCT_VARIANT",
        "TO_PRODUCT_VARIANT",
    ],
    search_columns: &[
        "SETUP_TIME_KEY",
        "INTERFACE",
        "SETUP_MATRIX",
        "LOCATION",
        "FROM_SETUP_GROUP",
        "TO_SETUP_GROUP",
        "FROM_MACHINE",
        "TO_MACHINE",
        "FROM_PRODUCT_SIZE",
        "TO_PRODUCT_SIZE",
        "FROM_PRODUCT_VARIANT",
        "TO_PRODUCT_VARIANT",
        "REVIEWED",
        "UPDATED_BY",
    ],
    pct_filter_key: "SETUPTIME_PCT_CHANGE",
    pct_column: "SETUPTIME_PCT_CHANGE",
    required_update_numbers: &["NEW_SETUPTIME_MINUTES", "SETUPTIME_PCT_CHANGE"],
    optional_update_numbers: &["NEW_SETUPTIME_SECONDS"],
    update_label: "wrenchtime",
    download_prefix: "wrenchtime",
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/getRecipies", post(get_wrenchtime))
        .route("/getCategories", get(get_categories))
        .route("/getFilters", get(get_filters))
        .route("/getReviewedStatus", get(get_reviewed_status))
        .route("/search", post(search_wrenchtime))
        .route("/updateRecipies", post(update_wrenchtime))
        .route("/downloadRecipes", post(download_wrenchtime))
}

async fn get_wrenchtime(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    dataset::page(&WRENCHTIME, &state, &uri, &body).await
}

async fn get_categories() -> Response {
    dataset::categories()
}

async fn get_filters(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, ApiError> {
    dataset::facets(&WRENCHTIME, &state, &uri).await
}

async fn get_reviewed_status(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, ApiError> {
    dataset::reviewed_statuses(&WRENCHTIME, &state, &uri).await
}

async fn search_wrenchtime(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    dataset::search(&WRENCHTIME, &state, &uri, &body).await
}

async fn update_wrenchtime(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    dataset::update(&WRENCHTIME, &state, &uri, &body).await
}

async fn download_wrenchtime(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    dataset::download(&WRENCHTIME, &state, &uri, &body).await
}
