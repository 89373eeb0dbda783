//! Parameterized WHERE-clause assembly for the dataset endpoints.
//!
//! Every user-supplied value travels as a named bind; the SQL text is built
//! only from column names that sit on the dataset's allow-list. Validation
//! rejects unknown filter keys upstream, and this builder skips them as a
//! second line of defence.

use std::collections::BTreeMap;

use mssql_driver::{SqlParam, param};

use crate::dataset::Dataset;

/// Assembled WHERE clause plus the binds it references.
#[derive(Debug, Clone)]
pub struct Where {
    pub text: String,
    pub params: Vec<SqlParam>,
}

/// Percentage-change bucket parsed from a filter value like "5% to 10%".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PctRange {
    Between(f64, f64),
    Above(f64),
}

pub fn parse_pct_range(raw: &str) -> Option<PctRange> {
    if let Some(rest) = raw.strip_prefix("above ") {
        let limit = rest.trim().strip_suffix('%')?.parse().ok()?;
        return Some(PctRange::Above(limit));
    }
    let (low, high) = raw.split_once(" to ")?;
    let low = low.trim().strip_suffix('%')?.parse().ok()?;
    let high = high.trim().strip_suffix('%')?.parse().ok()?;
    Some(PctRange::Between(low, high))
}

/// Build the WHERE clause for a dataset query.
///
/// The clause always carries the dataset's base predicate. A reviewed
/// status other than "All" narrows on REVIEWED, filter values become
/// per-column OR groups, percentage buckets compare against the absolute
/// change column, and a search term LIKE-matches every searchable column
/// through one shared bind.
pub fn build_where(
    dataset: &Dataset,
    reviewed_status: &str,
    filters: &BTreeMap<String, Vec<String>>,
    search_text: Option<&str>,
) -> Where {
    let mut text = format!("WHERE {}", dataset.base_predicate);
    let mut params = Vec::new();

    if reviewed_status != "All" {
        text.push_str(" AND REVIEWED = @reviewed");
        params.push(param("reviewed", reviewed_status));
    }

    let mut bind = 0usize;
    for (key, values) in filters {
        if values.is_empty() {
            continue;
        }
        if key == dataset.pct_filter_key {
            let mut ranges = Vec::new();
            for value in values {
                let Some(range) = parse_pct_range(value) else {
                    continue;
                };
                match range {
                    PctRange::Between(low, high) => {
                        ranges.push(format!(
                            "(ABS({col}) >= @f{a} AND ABS({col}) <= @f{b})",
                            col = dataset.pct_column,
                            a = bind,
                            b = bind + 1
                        ));
                        params.push(param(&format!("f{bind}"), low));
                        params.push(param(&format!("f{}", bind + 1), high));
                        bind += 2;
                    }
                    PctRange::Above(limit) => {
                        ranges.push(format!("(ABS({}) > @f{bind})", dataset.pct_column));
                        params.push(param(&format!("f{bind}"), limit));
                        bind += 1;
                    }
                }
            }
            if !ranges.is_empty() {
                text.push_str(&format!(" AND ({})", ranges.join(" OR ")));
            }
        } else if dataset.filter_columns.contains(&key.as_str()) {
            let mut terms = Vec::new();
            for value in values {
                terms.push(format!("{key} = @f{bind}"));
                params.push(param(&format!("f{bind}"), value.as_str()));
                bind += 1;
            }
            text.push_str(&format!(" AND ({})", terms.join(" OR ")));
        }
    }

    if let Some(needle) = search_text {
        let needle = needle.trim();
        if !needle.is_empty() {
            let likes: Vec<String> = dataset
                .search_columns
                .iter()
                .map(|col| format!("{col} LIKE @search"))
                .collect();
            text.push_str(&format!(" AND ({})", likes.join(" OR ")));
            params.push(param("search", format!("%{needle}%")));
        }
    }

    Where { text, params }
}
