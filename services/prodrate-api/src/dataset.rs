//! Shared behavior of the two reviewable production-planning datasets.
//!
//! The rate-of-operations and wrenchtime mounts serve the same seven
//! operations over different tables and column sets. `Dataset` captures the
//! per-table facts; the functions here implement each operation once and the
//! route modules bind them to paths.

use axum::Json;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use mssql_driver::{SqlParam, param};
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::filters::{Where, build_where};
use crate::validate::{self, UpdateItem};
use crate::{AppState, export, metrics};

/// Static description of one reviewable dataset.
pub struct Dataset {
    pub table: &'static str,
    pub key_column: &'static str,
    /// Predicate every query carries; keeps half-loaded snapshot rows out.
    pub base_predicate: &'static str,
    /// Columns that may appear as equality filters.
    pub filter_columns: &'static [&'static str],
    /// Columns returned by the filter-options endpoint.
    pub facet_columns: &'static [&'static str],
    /// Columns matched by free-text search.
    pub search_columns: &'static [&'static str],
    /// Request key selecting percentage buckets, e.g. "tro_change".
    pub pct_filter_key: &'static str,
    /// Column the percentage buckets compare against.
    pub pct_column: &'static str,
    pub required_update_numbers: &'static [&'static str],
    pub optional_update_numbers: &'static [&'static str],
    /// Noun used in update messages and the array validation message.
    pub update_label: &'static str,
    /// Label used for download filenames and metrics.
    pub download_prefix: &'static str,
}

/// The category list is fixed; there is no backing table for it.
const CATEGORIES: [&str; 1] = ["Personal Care"];

/// Paginated listing: one page of rows plus the unpaginated count.
pub async fn page(
    dataset: &'static Dataset,
    state: &AppState,
    uri: &Uri,
    body: &Value,
) -> Result<Response, ApiError> {
    let query = validate::page_request(dataset, body)
        .map_err(|details| ApiError::validation(details, "body").at(uri))?;
    let clause = build_where(dataset, &query.reviewed_status, &query.filters, None);
    let result = fetch_page(dataset, state, &clause, query.page_number, query.rows_per_page)
        .await
        .map_err(|err| err.at(uri))?;
    Ok(Json(result).into_response())
}

/// Free-text search over the dataset's searchable columns, paginated like
/// `page`. Whitespace-only text short-circuits to an empty result without
/// touching the database.
pub async fn search(
    dataset: &'static Dataset,
    state: &AppState,
    uri: &Uri,
    body: &Value,
) -> Result<Response, ApiError> {
    let query = validate::search_request(dataset, body)
        .map_err(|details| ApiError::validation(details, "body").at(uri))?;
    let needle = query.search_text.trim().to_string();
    if needle.is_empty() {
        return Ok(Json(json!({ "rows": [], "rowsCount": 0 })).into_response());
    }
    let clause = build_where(
        dataset,
        &query.page.reviewed_status,
        &query.page.filters,
        Some(&needle),
    );
    let result = fetch_page(
        dataset,
        state,
        &clause,
        query.page.page_number,
        query.page.rows_per_page,
    )
    .await
    .map_err(|err| err.at(uri))?;
    Ok(Json(result).into_response())
}

/// Distinct combinations of the facet columns, for populating filter
/// drop-downs.
pub async fn facets(
    dataset: &'static Dataset,
    state: &AppState,
    uri: &Uri,
) -> Result<Response, ApiError> {
    let sql = format!(
        "SELECT DISTINCT {} FROM {}",
        dataset.facet_columns.join(", "),
        dataset.table
    );
    let rows = state
        .manager
        .execute_query(sql, Vec::new())
        .await
        .map_err(|err| ApiError::from(err).at(uri))?;
    Ok(Json(json!(rows)).into_response())
}

/// Distinct REVIEWED values present in the table.
pub async fn reviewed_statuses(
    dataset: &'static Dataset,
    state: &AppState,
    uri: &Uri,
) -> Result<Response, ApiError> {
    let sql = format!(
        "SELECT DISTINCT REVIEWED FROM {} WHERE REVIEWED IS NOT NULL",
        dataset.table
    );
    let rows = state
        .manager
        .execute_query(sql, Vec::new())
        .await
        .map_err(|err| ApiError::from(err).at(uri))?;
    let statuses: Vec<Value> = rows
        .iter()
        .filter_map(|row| row.get("REVIEWED"))
        .filter(|value| !value.is_null())
        .cloned()
        .collect();
    Ok(Json(Value::Array(statuses)).into_response())
}

pub fn categories() -> Response {
    Json(json!(CATEGORIES)).into_response()
}

/// Apply a batch of row updates. Each row is guarded with REVIEWED = 'N' so
/// a row someone else already reviewed is skipped, not overwritten; the
/// response accounts for every item individually.
pub async fn update(
    dataset: &'static Dataset,
    state: &AppState,
    uri: &Uri,
    body: &Value,
) -> Result<Response, ApiError> {
    let items = validate::update_request(dataset, body)
        .map_err(|details| ApiError::validation(details, "body").at(uri))?;

    let mut results = Vec::new();
    let mut total_updated = 0u64;
    let mut total_skipped = 0u64;
    let mut total_failed = 0u64;

    for item in &items {
        match apply_update(dataset, state, item).await {
            Ok(0) => {
                total_skipped += 1;
                metrics::record_update_outcome(dataset.download_prefix, "skipped");
                results.push(json!({
                    "success": false,
                    "key": item.key,
                    "error": "Update skipped! Possibly updated by another user while you were working on it.",
                }));
            }
            Ok(rows_affected) => {
                total_updated += 1;
                metrics::record_update_outcome(dataset.download_prefix, "updated");
                results.push(json!({
                    "success": true,
                    "key": item.key,
                    "rowsAffected": rows_affected,
                }));
            }
            Err(err) => {
                total_failed += 1;
                metrics::record_update_outcome(dataset.download_prefix, "failed");
                tracing::warn!(key = %item.key, error = %err, "row update failed");
                results.push(json!({
                    "success": false,
                    "key": item.key,
                    "error": err.to_string(),
                }));
            }
        }
    }

    Ok(Json(json!({
        "success": total_failed == 0,
        "results": results,
        "totalUpdated": total_updated,
        "totalSkipped": total_skipped,
        "totalFailed": total_failed,
        "message": update_message(dataset, total_updated, total_skipped, total_failed),
    }))
    .into_response())
}

/// Filtered export of the whole dataset as a CSV attachment.
pub async fn download(
    dataset: &'static Dataset,
    state: &AppState,
    uri: &Uri,
    body: &Value,
) -> Result<Response, ApiError> {
    let query = validate::download_request(dataset, body)
        .map_err(|details| ApiError::validation(details, "body").at(uri))?;
    if query.file_type != "csv" {
        return Err(ApiError::bad_request("Unsupported file type. Please choose 'csv'").at(uri));
    }

    let clause = build_where(dataset, &query.reviewed_status, &query.filters, None);
    let sql = format!(
        "SELECT * FROM {} {} ORDER BY SNAPSHOT_DATE DESC",
        dataset.table, clause.text
    );
    let rows = state
        .manager
        .execute_query(sql, clause.params)
        .await
        .map_err(|err| ApiError::from(err).at(uri))?;
    if rows.is_empty() {
        return Err(ApiError::not_found("No data available for download").at(uri));
    }

    let filename = export::attachment_filename(dataset.download_prefix);
    let csv = export::to_csv(&rows);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    )
        .into_response())
}

async fn fetch_page(
    dataset: &Dataset,
    state: &AppState,
    clause: &Where,
    page_number: i64,
    rows_per_page: i64,
) -> Result<Value, ApiError> {
    let offset = (page_number - 1) * rows_per_page;
    let sql = format!(
        "SELECT * FROM {} {} ORDER BY SNAPSHOT_DATE DESC OFFSET @offset ROWS FETCH NEXT @rowsPerPage ROWS ONLY",
        dataset.table, clause.text
    );
    let mut params = clause.params.clone();
    params.push(param("offset", offset));
    params.push(param("rowsPerPage", rows_per_page));
    let rows = state.manager.execute_query(sql, params).await?;

    let count_sql = format!(
        "SELECT COUNT(*) AS totalCount FROM {} {}",
        dataset.table, clause.text
    );
    let count_rows = state
        .manager
        .execute_query(count_sql, clause.params.clone())
        .await?;
    let rows_count = count_rows
        .first()
        .and_then(|row| row.get("totalCount"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    Ok(json!({ "rows": rows, "rowsCount": rows_count }))
}

async fn apply_update(
    dataset: &Dataset,
    state: &AppState,
    item: &UpdateItem,
) -> azsql_pool::Result<u64> {
    let mut sets = Vec::new();
    let mut params: Vec<SqlParam> = Vec::new();
    for &(column, value) in &item.numbers {
        sets.push(format!("{column} = @{column}"));
        params.push(param(column, value));
    }
    sets.push("REVIEWED = @REVIEWED".to_string());
    params.push(param("REVIEWED", item.reviewed.as_str()));
    sets.push("UPDATED_BY = @UPDATED_BY".to_string());
    params.push(param("UPDATED_BY", item.updated_by.as_str()));
    sets.push("UPDATED_ON = @UPDATED_ON".to_string());
    params.push(param(
        "UPDATED_ON",
        item.updated_on.unwrap_or_else(|| Utc::now().naive_utc()),
    ));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = @key AND REVIEWED = 'N'",
        dataset.table,
        sets.join(", "),
        dataset.key_column
    );
    params.push(param("key", item.key.as_str()));
    state.manager.execute_non_query(sql, params).await
}

fn update_message(dataset: &Dataset, updated: u64, skipped: u64, failed: u64) -> String {
    if updated > 0 {
        format!("{updated} {}(s) updated successfully.", dataset.update_label)
    } else if skipped > 0 {
        format!("{skipped} skipped due to REVIEWED not being 'N'.")
    } else if failed > 0 {
        format!("{failed} failed due to errors.")
    } else {
        String::new()
    }
}
