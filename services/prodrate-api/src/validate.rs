//! Request validation for the dataset and user endpoints.
//!
//! Failures are collected and reported together rather than stopping at the
//! first, numeric fields accept number-typed strings, and pagination fields
//! fall back to defaults when absent. Filter keys must sit on the dataset's
//! allow-list; anything else is rejected before SQL assembly ever sees it.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::dataset::Dataset;

/// Percentage buckets accepted by the change filters.
pub const ALLOWED_PCT_RANGES: [&str; 4] = ["0% to 5%", "5% to 10%", "10% to 15%", "above 15%"];

const DEFAULT_PAGE_NUMBER: i64 = 1;
const DEFAULT_ROWS_PER_PAGE: i64 = 10;

#[derive(Debug, PartialEq)]
pub struct PageQuery {
    pub page_number: i64,
    pub rows_per_page: i64,
    pub reviewed_status: String,
    pub filters: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, PartialEq)]
pub struct SearchQuery {
    pub search_text: String,
    pub page: PageQuery,
}

#[derive(Debug, PartialEq)]
pub struct DownloadQuery {
    pub reviewed_status: String,
    pub filters: BTreeMap<String, Vec<String>>,
    pub file_type: String,
}

/// One validated row update. `numbers` carries the numeric columns in the
/// order the dataset declares them, required columns first.
#[derive(Debug, PartialEq)]
pub struct UpdateItem {
    pub key: String,
    pub numbers: Vec<(&'static str, f64)>,
    pub reviewed: String,
    pub updated_by: String,
    pub updated_on: Option<NaiveDateTime>,
}

#[derive(Debug, PartialEq)]
pub struct NewUser {
    pub email: String,
    pub role: String,
    pub category: Vec<String>,
    pub interface: Vec<String>,
    pub updated_by: String,
}

#[derive(Debug, Default, PartialEq)]
pub struct UserPatch {
    pub role: Option<String>,
    pub category: Option<Vec<String>>,
    pub interface: Option<Vec<String>>,
    pub updated_by: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.role.is_none()
            && self.category.is_none()
            && self.interface.is_none()
            && self.updated_by.is_none()
    }
}

pub fn page_request(dataset: &Dataset, body: &Value) -> Result<PageQuery, Vec<String>> {
    if !body.is_object() {
        return Err(vec!["\"value\" must be of type object".to_string()]);
    }
    let mut errors = Vec::new();
    let page_number = page_param(body, "pageNumber", DEFAULT_PAGE_NUMBER, &mut errors);
    let rows_per_page = page_param(body, "rowsPerPage", DEFAULT_ROWS_PER_PAGE, &mut errors);
    let reviewed_status = required_string(body, "reviewedStatus", "reviewedStatus must be a string", &mut errors);
    let filters = filters_field(dataset, body, &mut errors);
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(PageQuery {
        page_number,
        rows_per_page,
        reviewed_status: reviewed_status.unwrap_or_default(),
        filters,
    })
}

pub fn search_request(dataset: &Dataset, body: &Value) -> Result<SearchQuery, Vec<String>> {
    if !body.is_object() {
        return Err(vec!["\"value\" must be of type object".to_string()]);
    }
    let mut errors = Vec::new();
    let search_text = match body.get("searchText") {
        None => {
            errors.push("searchText is a required field".to_string());
            None
        }
        Some(Value::String(s)) if s.is_empty() => {
            errors.push("searchText is required and cannot be empty".to_string());
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push("\"searchText\" must be a string".to_string());
            None
        }
    };
    let page_number = page_param(body, "pageNumber", DEFAULT_PAGE_NUMBER, &mut errors);
    let rows_per_page = page_param(body, "rowsPerPage", DEFAULT_ROWS_PER_PAGE, &mut errors);
    let reviewed_status = required_string(body, "reviewedStatus", "reviewedStatus must be a string", &mut errors);
    let filters = filters_field(dataset, body, &mut errors);
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(SearchQuery {
        search_text: search_text.unwrap_or_default(),
        page: PageQuery {
            page_number,
            rows_per_page,
            reviewed_status: reviewed_status.unwrap_or_default(),
            filters,
        },
    })
}

pub fn download_request(dataset: &Dataset, body: &Value) -> Result<DownloadQuery, Vec<String>> {
    if !body.is_object() {
        return Err(vec!["\"value\" must be of type object".to_string()]);
    }
    let mut errors = Vec::new();
    let reviewed_status = required_string(body, "reviewedStatus", "reviewedStatus must be a string", &mut errors);
    let filters = filters_field(dataset, body, &mut errors);
    let file_type = match body.get("fileType") {
        None => "csv".to_string(),
        Some(Value::String(s)) if s.is_empty() => {
            errors.push("\"fileType\" is not allowed to be empty".to_string());
            String::new()
        }
        Some(Value::String(s)) if s == "xlsx" || s == "csv" => s.clone(),
        Some(Value::String(_)) => {
            errors.push("fileType must be either 'xlsx' or 'csv'".to_string());
            String::new()
        }
        Some(_) => {
            errors.push("fileType must be a string".to_string());
            String::new()
        }
    };
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(DownloadQuery {
        reviewed_status: reviewed_status.unwrap_or_default(),
        filters,
        file_type,
    })
}

pub fn update_request(dataset: &Dataset, body: &Value) -> Result<Vec<UpdateItem>, Vec<String>> {
    let Some(items) = body.as_array() else {
        return Err(vec![format!(
            "Request body must be an array of {} updates",
            dataset.update_label
        )]);
    };

    let mut errors = Vec::new();
    let mut out = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let before = errors.len();
        if !item.is_object() {
            errors.push(format!("\"[{index}]\" must be of type object"));
            continue;
        }

        let key = match item.get(dataset.key_column) {
            None => {
                errors.push(format!("{} is a required field", dataset.key_column));
                None
            }
            Some(Value::String(s)) if s.is_empty() => {
                errors.push(format!("{} is required and cannot be empty", dataset.key_column));
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                errors.push(format!("\"{}\" must be a string", dataset.key_column));
                None
            }
        };

        let mut numbers = Vec::new();
        for col in dataset.required_update_numbers {
            match item.get(*col) {
                None => errors.push(format!("\"{col}\" is required")),
                Some(value) => match coerce_number(value) {
                    Some(n) => numbers.push((*col, n)),
                    None => errors.push(format!("{col} must be a valid number")),
                },
            }
        }
        for col in dataset.optional_update_numbers {
            if let Some(value) = item.get(*col) {
                match coerce_number(value) {
                    Some(n) => numbers.push((*col, n)),
                    None => errors.push(format!("{col} must be a valid number")),
                }
            }
        }

        let reviewed = required_string(item, "REVIEWED", "REVIEWED must be a string value", &mut errors);
        let updated_by = required_string(item, "UPDATED_BY", "UPDATED_BY must be a string value", &mut errors);
        let updated_on = match item.get("UPDATED_ON") {
            None => None,
            Some(value) => match coerce_datetime(value) {
                Some(dt) => Some(dt),
                None => {
                    errors.push("UPDATED_ON must be a valid date".to_string());
                    None
                }
            },
        };

        if errors.len() == before {
            out.push(UpdateItem {
                key: key.unwrap_or_default(),
                numbers,
                reviewed: reviewed.unwrap_or_default(),
                updated_by: updated_by.unwrap_or_default(),
                updated_on,
            });
        }
    }

    if errors.is_empty() { Ok(out) } else { Err(errors) }
}

pub fn email_param(email: &str) -> Result<(), Vec<String>> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(vec!["Please provide a valid email address".to_string()])
    }
}

pub fn create_user(body: &Value) -> Result<NewUser, Vec<String>> {
    if !body.is_object() {
        return Err(vec!["\"value\" must be of type object".to_string()]);
    }
    let mut errors = Vec::new();

    let email = match body.get("email") {
        None => {
            errors.push("Email is required".to_string());
            None
        }
        Some(Value::String(s)) if is_valid_email(s) => Some(s.clone()),
        Some(Value::String(_)) => {
            errors.push("Please provide a valid email address".to_string());
            None
        }
        Some(_) => {
            errors.push("\"email\" must be a string".to_string());
            None
        }
    };

    let role = match body.get("role") {
        None => {
            errors.push("Role is required".to_string());
            None
        }
        Some(Value::String(s)) if s.is_empty() => {
            errors.push("\"role\" is not allowed to be empty".to_string());
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push("\"role\" must be a string".to_string());
            None
        }
    };

    let category = string_list(body, "category", "Category is required", "At least one category is required", &mut errors);
    let interface = string_list(body, "interface", "Interface is required", "At least one interface is required", &mut errors);

    let updated_by = match body.get("updated_by") {
        None => {
            errors.push("Updated by is required".to_string());
            None
        }
        Some(Value::String(s)) if s.is_empty() => {
            errors.push("\"updated_by\" is not allowed to be empty".to_string());
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push("\"updated_by\" must be a string".to_string());
            None
        }
    };

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(NewUser {
        email: email.unwrap_or_default(),
        role: role.unwrap_or_default(),
        category: category.unwrap_or_default(),
        interface: interface.unwrap_or_default(),
        updated_by: updated_by.unwrap_or_default(),
    })
}

pub fn update_user(body: &Value) -> Result<UserPatch, Vec<String>> {
    let Some(object) = body.as_object() else {
        return Err(vec!["\"value\" must be of type object".to_string()]);
    };
    if object.is_empty() {
        return Err(vec!["At least one field is required for update".to_string()]);
    }

    let mut errors = Vec::new();
    let mut patch = UserPatch::default();

    if let Some(value) = body.get("role") {
        match value {
            Value::String(s) if s.is_empty() => {
                errors.push("\"role\" is not allowed to be empty".to_string())
            }
            Value::String(s) => patch.role = Some(s.clone()),
            _ => errors.push("\"role\" must be a string".to_string()),
        }
    }
    if body.get("category").is_some() {
        patch.category = string_list(body, "category", "", "At least one category is required", &mut errors);
    }
    if body.get("interface").is_some() {
        patch.interface = string_list(body, "interface", "", "At least one interface is required", &mut errors);
    }
    if let Some(value) = body.get("updated_by") {
        match value {
            Value::String(s) if s.is_empty() => {
                errors.push("\"updated_by\" is not allowed to be empty".to_string())
            }
            Value::String(s) => patch.updated_by = Some(s.clone()),
            _ => errors.push("\"updated_by\" must be a string".to_string()),
        }
    }

    if errors.is_empty() { Ok(patch) } else { Err(errors) }
}

/// `pageNumber` / `rowsPerPage`: absent falls back to the default, anything
/// present must coerce to an integer.
fn page_param(body: &Value, name: &str, default: i64, errors: &mut Vec<String>) -> i64 {
    let Some(value) = body.get(name) else {
        return default;
    };
    match coerce_number(value) {
        None => {
            errors.push(format!("{name} must be a number"));
            default
        }
        Some(n) if n.fract() != 0.0 => {
            errors.push(format!("{name} must be an integer"));
            default
        }
        Some(n) => n as i64,
    }
}

fn required_string(
    body: &Value,
    name: &str,
    base_message: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match body.get(name) {
        None => {
            errors.push(format!("\"{name}\" is required"));
            None
        }
        Some(Value::String(s)) if s.is_empty() => {
            errors.push(format!("\"{name}\" is not allowed to be empty"));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(base_message.to_string());
            None
        }
    }
}

fn string_list(
    body: &Value,
    name: &str,
    required_message: &str,
    min_message: &str,
    errors: &mut Vec<String>,
) -> Option<Vec<String>> {
    let Some(value) = body.get(name) else {
        if !required_message.is_empty() {
            errors.push(required_message.to_string());
        }
        return None;
    };
    let Some(items) = value.as_array() else {
        errors.push(format!("\"{name}\" must be an array"));
        return None;
    };
    if items.is_empty() {
        errors.push(min_message.to_string());
        return None;
    }
    let mut out = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match item {
            Value::String(s) if s.is_empty() => {
                errors.push(format!("\"{name}[{index}]\" is not allowed to be empty"))
            }
            Value::String(s) => out.push(s.clone()),
            _ => errors.push(format!("\"{name}[{index}]\" must be a string")),
        }
    }
    Some(out)
}

fn filters_field(
    dataset: &Dataset,
    body: &Value,
    errors: &mut Vec<String>,
) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    let Some(value) = body.get("filters") else {
        return out;
    };
    let Some(object) = value.as_object() else {
        errors.push("\"filters\" must be of type object".to_string());
        return out;
    };
    for (key, raw) in object {
        if key != dataset.pct_filter_key && !dataset.filter_columns.contains(&key.as_str()) {
            errors.push(format!("\"filters.{key}\" is not allowed"));
            continue;
        }
        let Some(items) = raw.as_array() else {
            errors.push(format!("\"filters.{key}\" must be an array"));
            continue;
        };
        let mut values = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let Some(s) = item.as_str() else {
                errors.push(format!("\"filters.{key}[{index}]\" must be a string"));
                continue;
            };
            if key == dataset.pct_filter_key && !ALLOWED_PCT_RANGES.contains(&s) {
                errors.push(format!(
                    "{} must be one of the allowed values: 0% to 5%, 5% to 10%, 10% to 15%, above 15%",
                    dataset.pct_filter_key
                ));
                continue;
            }
            values.push(s.to_string());
        }
        if !values.is_empty() {
            out.insert(key.clone(), values);
        }
    }
    out
}

/// Numbers arrive either as JSON numbers or as numeric strings.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() { None } else { trimmed.parse().ok() }
        }
        _ => None,
    }
}

/// Dates arrive as ISO-8601 strings, plain dates, or epoch milliseconds.
fn coerce_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_utc());
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(dt);
            }
            if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return d.and_hms_opt(0, 0, 0);
            }
            None
        }
        Value::Number(n) => {
            let ms = n.as_i64()?;
            chrono::DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
        }
        _ => None,
    }
}

fn is_valid_email(raw: &str) -> bool {
    let Some((local, domain)) = raw.split_once('@') else {
        return false;
    };
    if local.is_empty() || raw.contains(' ') || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}
