//! Rate-of-operations endpoints.
//!
//! Route handlers are thin: per-table facts live in [`RATE_OF_OPERATIONS`]
//! and the behavior in [`crate::dataset`].

use axum::Router;
use axum::extract::{OriginalUri, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Json;
use serde_json::Value;

use crate::AppState;
use crate::dataset::{self, Dataset};
use crate::error::ApiError;

pub static RATE_OF_OPERATIONS: Dataset = Dataset {
    table: "[dbo].[T_NA_PRODRATE_RATEOFOPERATION]",
    key_column: "RATE_OF_OPERATION_KEY",
    base_predicate: "RECIPE_NUMBER IS NOT NULL",
    filter_columns: &[
        "INTERFACE",
        "RECIPE_TYPE",
        "MAKER_RESOURCE",
        "PACKER_RESOURCE",
        "PRODUCT_CODE",
        "PROD_DESC",
        "PRODUCT_VARIANT",
        "PRODUCT_SIZE",
        "SETUP_GROUP",
    ],
    facet_columns: &[
        "INTERFACE",
        "RECIPE_TYPE",
        "MAKER_RESOURCE",
        "PACKER_RESOURCE",
        "PRODUCT_CODE",
        "PROD_DESC",
        "PRODUCT_VARIANT",
        "PRODUCT_SIZE",
        "SETUP_GROUP",
    ],
    search_columns: &[
        "RATE_OF_OPERATION_KEY",
        "RECIPE_NUMBER",
        "MAKER_RESOURCE",
        "PACKER_RESOURCE",
        "BUSINESS_UNIT",
        "INTERFACE",
        "RECIPE_TYPE",
        "SAP_PRODUCT",
        "PROD_DESC",
        "PRODUCT_CODE",
        "TRADE_CODE",
        "PRODUCT_VARIANT",
        "PRODUCT_SIZE",
        "BASE_QTY_UOM",
        "PLANNING_UOM",
        "SETUP_GROUP",
        "RECOMMENDED_RO_SOURCE",
        "RULEBASED_RO_SOURCE",
        "REVIEWED",
        "ERROR_REPORT",
        "COMMENT",
        "CONSTRAINING_RESOURCE",
        "CONSTRAINING_RESOURCE_2",
        "CONSTRAINING_RESOURCE_3",
        "UPDATED_BY",
    ],
    pct_filter_key: "tro_change",
    pct_column: "RO_PCT_CHANGE",
    required_update_numbers: &["NEW_RO", "RO_PCT_CHANGE"],
    optional_update_numbers: &["NEW_PLANNING_TIME"],
    update_label: "recipe",
    download_prefix: "rate-of-operations",
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/getRecipies", post(get_recipes))
        .route("/getCategories", get(get_categories))
        .route("/getFilters", get(get_filters))
        .route("/getReviewedStatus", get(get_reviewed_status))
        .route("/search", post(search_recipes))
        .route("/updateRecipies", post(update_recipes))
        .route("/downloadRecipes", post(download_recipes))
}

async fn get_recipes(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    dataset::page(&RATE_OF_OPERATIONS, &state, &uri, &body).await
}

async fn get_categories() -> Response {
    dataset::categories()
}

async fn get_filters(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, ApiError> {
    dataset::facets(&RATE_OF_OPERATIONS, &state, &uri).await
}

async fn get_reviewed_status(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, ApiError> {
    dataset::reviewed_statuses(&RATE_OF_OPERATIONS, &state, &uri).await
}

async fn search_recipes(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    dataset::search(&RATE_OF_OPERATIONS, &state, &uri, &body).await
}

async fn update_recipes(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    dataset::update(&RATE_OF_OPERATIONS, &state, &uri, &body).await
}

async fn download_recipes(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    dataset::download(&RATE_OF_OPERATIONS, &state, &uri, &body).await
}

#[cfg(test)]
mod tests {
    use crate::testutil::{ScriptedPool, bearer, param_value, row, state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use mssql_driver::{DriverError, SqlValue};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(pool: Arc<ScriptedPool>) -> axum::Router {
        crate::build_router(state(pool), 16, &[])
    }

    fn post(path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("authorization", bearer())
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("authorization", bearer())
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn page_returns_rows_and_count() {
        let pool = Arc::new(ScriptedPool::default());
        pool.push_query(Ok(vec![row(&[("RECIPE_NUMBER", json!("R1"))])]));
        pool.push_query(Ok(vec![row(&[("totalCount", json!(42))])]));

        let (status, body) = send(
            app(pool.clone()),
            post("/rate-of-operations/getRecipies", json!({"reviewedStatus": "All"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows"], json!([{"RECIPE_NUMBER": "R1"}]));
        assert_eq!(body["rowsCount"], json!(42));

        let calls = pool.captured();
        assert_eq!(
            calls[0].0,
            "SELECT * FROM [dbo].[T_NA_PRODRATE_RATEOFOPERATION] \
             WHERE RECIPE_NUMBER IS NOT NULL \
             ORDER BY SNAPSHOT_DATE DESC OFFSET @offset ROWS FETCH NEXT @rowsPerPage ROWS ONLY"
        );
        assert_eq!(param_value(&calls[0].1, "offset"), SqlValue::Int(0));
        assert_eq!(param_value(&calls[0].1, "rowsPerPage"), SqlValue::Int(10));
        assert_eq!(
            calls[1].0,
            "SELECT COUNT(*) AS totalCount FROM [dbo].[T_NA_PRODRATE_RATEOFOPERATION] WHERE RECIPE_NUMBER IS NOT NULL"
        );
    }

    #[tokio::test]
    async fn page_applies_filters_and_pct_buckets() {
        let pool = Arc::new(ScriptedPool::default());

        let (status, _) = send(
            app(pool.clone()),
            post(
                "/rate-of-operations/getRecipies",
                json!({
                    "reviewedStatus": "N",
                    "pageNumber": 2,
                    "rowsPerPage": 25,
                    "filters": {
                        "INTERFACE": ["A", "B"],
                        "tro_change": ["above 15%"]
                    }
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let calls = pool.captured();
        assert!(calls[0].0.contains(
            "WHERE RECIPE_NUMBER IS NOT NULL AND REVIEWED = @reviewed \
             AND (INTERFACE = @f0 OR INTERFACE = @f1) \
             AND ((ABS(RO_PCT_CHANGE) > @f2))"
        ));
        assert_eq!(param_value(&calls[0].1, "reviewed"), SqlValue::Text("N".into()));
        assert_eq!(param_value(&calls[0].1, "f0"), SqlValue::Text("A".into()));
        assert_eq!(param_value(&calls[0].1, "f1"), SqlValue::Text("B".into()));
        assert_eq!(param_value(&calls[0].1, "f2"), SqlValue::Float(15.0));
        assert_eq!(param_value(&calls[0].1, "offset"), SqlValue::Int(25));
    }

    #[tokio::test]
    async fn page_rejects_bad_body_with_validation_envelope() {
        let pool = Arc::new(ScriptedPool::default());

        let (status, body) = send(
            app(pool.clone()),
            post(
                "/rate-of-operations/getRecipies",
                json!({"reviewedStatus": 5, "pageNumber": "x"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "ValidationError");
        assert_eq!(body["error"]["source"], "body");
        assert_eq!(body["error"]["instance"], "/rate-of-operations/getRecipies");
        assert_eq!(
            body["error"]["details"],
            json!(["pageNumber must be a number", "reviewedStatus must be a string"])
        );
        assert!(pool.captured().is_empty());
    }

    #[tokio::test]
    async fn search_trims_and_short_circuits_on_empty_text() {
        let pool = Arc::new(ScriptedPool::default());

        let (status, body) = send(
            app(pool.clone()),
            post(
                "/rate-of-operations/search",
                json!({"searchText": "   ", "reviewedStatus": "All"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"rows": [], "rowsCount": 0}));
        assert!(pool.captured().is_empty());
    }

    #[tokio::test]
    async fn search_matches_across_searchable_columns() {
        let pool = Arc::new(ScriptedPool::default());
        pool.push_query(Ok(vec![row(&[("RECIPE_NUMBER", json!("R7"))])]));
        pool.push_query(Ok(vec![row(&[("totalCount", json!(1))])]));

        let (status, body) = send(
            app(pool.clone()),
            post(
                "/rate-of-operations/search",
                json!({"searchText": " mixer ", "reviewedStatus": "All"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rowsCount"], json!(1));

        let calls = pool.captured();
        assert!(calls[0].0.contains("RATE_OF_OPERATION_KEY LIKE @search OR RECIPE_NUMBER LIKE @search"));
        assert!(calls[0].0.contains("UPDATED_BY LIKE @search"));
        assert_eq!(
            param_value(&calls[0].1, "search"),
            SqlValue::Text("%mixer%".into())
        );
    }

    #[tokio::test]
    async fn filter_options_select_distinct_facets() {
        let pool = Arc::new(ScriptedPool::default());
        pool.push_query(Ok(vec![row(&[
            ("INTERFACE", json!("SAP")),
            ("RECIPE_TYPE", json!("MAKER")),
        ])]));

        let (status, body) = send(app(pool.clone()), get("/rate-of-operations/getFilters")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{"INTERFACE": "SAP", "RECIPE_TYPE": "MAKER"}]));
        let calls = pool.captured();
        assert_eq!(
            calls[0].0,
            "SELECT DISTINCT INTERFACE, RECIPE_TYPE, MAKER_RESOURCE, PACKER_RESOURCE, \
             PRODUCT_CODE, PROD_DESC, PRODUCT_VARIANT, PRODUCT_SIZE, SETUP_GROUP \
             FROM [dbo].[T_NA_PRODRATE_RATEOFOPERATION]"
        );
    }

    #[tokio::test]
    async fn reviewed_status_lists_distinct_values() {
        let pool = Arc::new(ScriptedPool::default());
        pool.push_query(Ok(vec![
            row(&[("REVIEWED", json!("N"))]),
            row(&[("REVIEWED", json!("Y"))]),
        ]));

        let (status, body) =
            send(app(pool.clone()), get("/rate-of-operations/getReviewedStatus")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["N", "Y"]));
        assert_eq!(
            pool.captured()[0].0,
            "SELECT DISTINCT REVIEWED FROM [dbo].[T_NA_PRODRATE_RATEOFOPERATION] WHERE REVIEWED IS NOT NULL"
        );
    }

    #[tokio::test]
    async fn categories_are_static() {
        let pool = Arc::new(ScriptedPool::default());

        let (status, body) = send(app(pool.clone()), get("/rate-of-operations/getCategories")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["Personal Care"]));
        assert!(pool.captured().is_empty());
    }

    #[tokio::test]
    async fn update_accounts_for_each_row() {
        let pool = Arc::new(ScriptedPool::default());
        pool.push_exec(Ok(1));
        pool.push_exec(Ok(0));
        pool.push_exec(Err(DriverError::server(102, "Incorrect syntax near 'WHERE'.")));

        let item = |key: &str| {
            json!({
                "RATE_OF_OPERATION_KEY": key,
                "NEW_RO": 12.5,
                "RO_PCT_CHANGE": 3.2,
                "REVIEWED": "Y",
                "UPDATED_BY": "planner"
            })
        };
        let (status, body) = send(
            app(pool.clone()),
            post(
                "/rate-of-operations/updateRecipies",
                json!([item("K1"), item("K2"), item("K3")]),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["totalUpdated"], json!(1));
        assert_eq!(body["totalSkipped"], json!(1));
        assert_eq!(body["totalFailed"], json!(1));
        assert_eq!(body["message"], json!("1 recipe(s) updated successfully."));

        let results = body["results"].as_array().unwrap();
        assert_eq!(results[0], json!({"success": true, "key": "K1", "rowsAffected": 1}));
        assert_eq!(
            results[1],
            json!({
                "success": false,
                "key": "K2",
                "error": "Update skipped! Possibly updated by another user while you were working on it."
            })
        );
        assert_eq!(results[2]["success"], json!(false));
        assert!(results[2]["error"].as_str().unwrap().contains("Incorrect syntax"));

        let calls = pool.captured();
        assert_eq!(
            calls[0].0,
            "UPDATE [dbo].[T_NA_PRODRATE_RATEOFOPERATION] \
             SET NEW_RO = @NEW_RO, RO_PCT_CHANGE = @RO_PCT_CHANGE, REVIEWED = @REVIEWED, \
             UPDATED_BY = @UPDATED_BY, UPDATED_ON = @UPDATED_ON \
             WHERE RATE_OF_OPERATION_KEY = @key AND REVIEWED = 'N'"
        );
        assert_eq!(param_value(&calls[0].1, "NEW_RO"), SqlValue::Float(12.5));
        assert_eq!(param_value(&calls[0].1, "key"), SqlValue::Text("K1".into()));
    }

    #[tokio::test]
    async fn update_rejects_non_array_body() {
        let pool = Arc::new(ScriptedPool::default());

        let (status, body) = send(
            app(pool.clone()),
            post("/rate-of-operations/updateRecipies", json!({"k": 1})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"]["details"],
            json!(["Request body must be an array of recipe updates"])
        );
    }

    #[tokio::test]
    async fn download_streams_csv_attachment() {
        let pool = Arc::new(ScriptedPool::default());
        pool.push_query(Ok(vec![
            row(&[("RECIPE_NUMBER", json!("R1")), ("NEW_RO", json!(10.5))]),
            row(&[("RECIPE_NUMBER", json!("R2")), ("NEW_RO", json!(Value::Null))]),
        ]));

        let res = app(pool.clone())
            .oneshot(post(
                "/rate-of-operations/downloadRecipes",
                json!({"reviewedStatus": "All", "fileType": "csv"}),
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["content-type"], "text/csv");
        let disposition = res.headers()["content-disposition"].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"rate-of-operations-"));
        assert!(disposition.ends_with(".csv\""));

        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text, "RECIPE_NUMBER,NEW_RO\r\nR1,10.5\r\nR2,\r\n");

        let calls = pool.captured();
        assert_eq!(
            calls[0].0,
            "SELECT * FROM [dbo].[T_NA_PRODRATE_RATEOFOPERATION] WHERE RECIPE_NUMBER IS NOT NULL ORDER BY SNAPSHOT_DATE DESC"
        );
    }

    #[tokio::test]
    async fn download_with_no_rows_is_not_found() {
        let pool = Arc::new(ScriptedPool::default());
        pool.push_query(Ok(vec![]));

        let (status, body) = send(
            app(pool.clone()),
            post(
                "/rate-of-operations/downloadRecipes",
                json!({"reviewedStatus": "All"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "NotFound");
        assert_eq!(body["error"]["detail"], "No data available for download");
    }

    #[tokio::test]
    async fn download_rejects_xlsx() {
        let pool = Arc::new(ScriptedPool::default());

        let (status, body) = send(
            app(pool.clone()),
            post(
                "/rate-of-operations/downloadRecipes",
                json!({"reviewedStatus": "All", "fileType": "xlsx"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "BadRequest");
        assert_eq!(body["error"]["detail"], "Unsupported file type. Please choose 'csv'");
        assert!(pool.captured().is_empty());
    }

    #[tokio::test]
    async fn sql_error_maps_to_internal_envelope() {
        let pool = Arc::new(ScriptedPool::default());
        pool.push_query(Err(DriverError::server(208, "Invalid object name.")));

        let (status, body) = send(
            app(pool.clone()),
            post("/rate-of-operations/getRecipies", json!({"reviewedStatus": "All"})),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["type"], "InternalServerError");
        assert_eq!(body["error"]["status"], json!(500));
    }
}
