//! CSV rendering for the dataset download endpoints.

use mssql_driver::SqlRow;
use serde_json::Value;

/// Render rows as CSV with a CRLF line terminator.
///
/// The header order follows the first row's column order, which in turn
/// follows the SELECT column order. NULLs render as empty fields.
pub fn to_csv(rows: &[SqlRow]) -> String {
    let mut out = String::new();
    let Some(first) = rows.first() else {
        return out;
    };
    let columns: Vec<&str> = first.keys().map(String::as_str).collect();

    for (i, col) in columns.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(&mut out, col);
    }
    out.push_str("\r\n");

    for row in rows {
        for (i, col) in columns.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            match row.get(*col) {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) => push_field(&mut out, s),
                Some(other) => push_field(&mut out, &other.to_string()),
            }
        }
        out.push_str("\r\n");
    }
    out
}

/// Quote only when the field contains a comma, quote or line break;
/// embedded quotes are doubled.
fn push_field(out: &mut String, field: &str) {
    let needs_quoting = field.contains(',')
        || field.contains('"')
        || field.contains('\n')
        || field.contains('\r');

    if needs_quoting {
        out.push('"');
        for ch in field.chars() {
            if ch == '"' {
                out.push('"');
            }
            out.push(ch);
        }
        out.push('"');
    } else {
        out.push_str(field);
    }
}

/// Attachment filename like "wrenchtime-1712345678901.csv".
pub fn attachment_filename(prefix: &str) -> String {
    format!("{prefix}-{}.csv", chrono::Utc::now().timestamp_millis())
}
