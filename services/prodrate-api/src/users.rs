//! User-management endpoints backed by the USER_MANAGEMENT table.
//!
//! These respond with the `{ success, data?, message }` shape the web app
//! binds to; the error envelope is reserved for validation and SQL failures.
//! The category and interface columns hold JSON-encoded string arrays.

use axum::Json;
use axum::Router;
use axum::extract::{OriginalUri, Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::Utc;
use mssql_driver::{SqlRow, param};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;
use crate::validate::{self, NewUser, UserPatch};

const USER_COLUMNS: &str = "email, role, category, interface, updated_by, updated_on";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/user", post(create_user))
        .route("/{email}", get(get_user).put(update_user).delete(delete_user))
}

async fn list_users(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, ApiError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM USER_MANAGEMENT ORDER BY updated_on DESC");
    let rows = state
        .manager
        .execute_query(sql, Vec::new())
        .await
        .map_err(|err| ApiError::from(err).at(&uri))?;
    let users: Vec<Value> = rows.into_iter().map(decode_user).collect();
    Ok(reply(
        StatusCode::OK,
        true,
        Some(json!(users)),
        "Users retrieved successfully",
    ))
}

async fn get_user(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(email): Path<String>,
) -> Result<Response, ApiError> {
    validate::email_param(&email)
        .map_err(|details| ApiError::validation(details, "params").at(&uri))?;
    match fetch_one(&state, &uri, &email).await? {
        Some(row) => Ok(reply(
            StatusCode::OK,
            true,
            Some(decode_user(row)),
            "User retrieved successfully",
        )),
        None => Ok(reply(StatusCode::NOT_FOUND, false, None, "User not found")),
    }
}

async fn create_user(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let user = validate::create_user(&body)
        .map_err(|details| ApiError::validation(details, "body").at(&uri))?;
    if fetch_one(&state, &uri, &user.email).await?.is_some() {
        return Ok(reply(
            StatusCode::CONFLICT,
            false,
            None,
            "User with this email already exists",
        ));
    }
    insert_user(&state, &uri, &user).await?;
    let data = fetch_one(&state, &uri, &user.email)
        .await?
        .map(decode_user)
        .unwrap_or(Value::Null);
    Ok(reply(
        StatusCode::CREATED,
        true,
        Some(data),
        "User created successfully",
    ))
}

async fn update_user(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(email): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    validate::email_param(&email)
        .map_err(|details| ApiError::validation(details, "params").at(&uri))?;
    let patch = validate::update_user(&body)
        .map_err(|details| ApiError::validation(details, "body").at(&uri))?;
    if fetch_one(&state, &uri, &email).await?.is_none() {
        return Ok(reply(StatusCode::NOT_FOUND, false, None, "User not found"));
    }
    // A body holding only unrecognized fields validates (it is non-empty)
    // but leaves nothing to set.
    if patch.is_empty() {
        return Err(ApiError::internal("No fields to update").at(&uri));
    }
    apply_patch(&state, &uri, &email, &patch).await?;
    let data = fetch_one(&state, &uri, &email)
        .await?
        .map(decode_user)
        .unwrap_or(Value::Null);
    Ok(reply(
        StatusCode::OK,
        true,
        Some(data),
        "User updated successfully",
    ))
}

async fn delete_user(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(email): Path<String>,
) -> Result<Response, ApiError> {
    validate::email_param(&email)
        .map_err(|details| ApiError::validation(details, "params").at(&uri))?;
    if fetch_one(&state, &uri, &email).await?.is_none() {
        return Ok(reply(StatusCode::NOT_FOUND, false, None, "User not found"));
    }
    state
        .manager
        .execute_non_query(
            "DELETE FROM USER_MANAGEMENT WHERE email = @email",
            vec![param("email", email.as_str())],
        )
        .await
        .map_err(|err| ApiError::from(err).at(&uri))?;
    Ok(reply(StatusCode::OK, true, None, "User deleted successfully"))
}

async fn fetch_one(
    state: &AppState,
    uri: &Uri,
    email: &str,
) -> Result<Option<SqlRow>, ApiError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM USER_MANAGEMENT WHERE email = @email");
    let rows = state
        .manager
        .execute_query(sql, vec![param("email", email)])
        .await
        .map_err(|err| ApiError::from(err).at(uri))?;
    Ok(rows.into_iter().next())
}

async fn insert_user(state: &AppState, uri: &Uri, user: &NewUser) -> Result<(), ApiError> {
    let category = encode_list(&user.category, uri)?;
    let interface = encode_list(&user.interface, uri)?;
    let sql = "INSERT INTO USER_MANAGEMENT \
               (email, role, category, interface, updated_by, updated_on) \
               VALUES (@email, @role, @category, @interface, @updated_by, @updated_on)";
    let params = vec![
        param("email", user.email.as_str()),
        param("role", user.role.as_str()),
        param("category", category),
        param("interface", interface),
        param("updated_by", user.updated_by.as_str()),
        param("updated_on", Utc::now().naive_utc()),
    ];
    state
        .manager
        .execute_non_query(sql, params)
        .await
        .map_err(|err| ApiError::from(err).at(uri))?;
    Ok(())
}

async fn apply_patch(
    state: &AppState,
    uri: &Uri,
    email: &str,
    patch: &UserPatch,
) -> Result<(), ApiError> {
    let mut sets = Vec::new();
    let mut params = Vec::new();
    if let Some(role) = &patch.role {
        sets.push("role = @role");
        params.push(param("role", role.as_str()));
    }
    if let Some(category) = &patch.category {
        sets.push("category = @category");
        params.push(param("category", encode_list(category, uri)?));
    }
    if let Some(interface) = &patch.interface {
        sets.push("interface = @interface");
        params.push(param("interface", encode_list(interface, uri)?));
    }
    if let Some(updated_by) = &patch.updated_by {
        sets.push("updated_by = @updated_by");
        params.push(param("updated_by", updated_by.as_str()));
    }
    let sql = format!(
        "UPDATE USER_MANAGEMENT SET {} WHERE email = @email",
        sets.join(", ")
    );
    params.push(param("email", email));
    state
        .manager
        .execute_non_query(sql, params)
        .await
        .map_err(|err| ApiError::from(err).at(uri))?;
    Ok(())
}

/// Rows store category/interface as JSON text; clients expect arrays.
fn decode_user(mut row: SqlRow) -> Value {
    for column in ["category", "interface"] {
        let parsed = match row.get(column) {
            Some(Value::String(text)) => serde_json::from_str::<Value>(text).ok(),
            _ => None,
        };
        if let Some(value @ Value::Array(_)) = parsed {
            row.insert(column.to_string(), value);
        }
    }
    Value::Object(row)
}

fn reply(status: StatusCode, success: bool, data: Option<Value>, message: &str) -> Response {
    let mut body = serde_json::Map::new();
    body.insert("success".into(), json!(success));
    if let Some(data) = data {
        body.insert("data".into(), data);
    }
    body.insert("message".into(), json!(message));
    (status, Json(Value::Object(body))).into_response()
}

fn encode_list(values: &[String], uri: &Uri) -> Result<String, ApiError> {
    serde_json::to_string(values).map_err(|err| ApiError::internal(err.to_string()).at(uri))
}
