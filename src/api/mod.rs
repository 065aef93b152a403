//! JSON HTTP API over `Books`.
//!
//! Every response is either `{ "success": true, "data": ... }` or
//! `{ "success": false, "error", "code", "message" }`. Engine calls run on
//! the blocking pool; writes additionally pass through one gate so storage
//! transactions never interleave.

use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    auth::{auth_middleware, AuthState, CallerIdentity},
    books::Books,
    error::{friendly_message, BooksError},
    security::AuditLog,
};

mod handlers;

#[derive(Clone)]
pub struct AppState {
    pub books: Books,
    pub auth: Arc<AuthState>,
    write_gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(books: Books, auth: AuthState) -> Self {
        Self {
            books,
            auth: Arc::new(auth),
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Runs a read-only engine call on the blocking pool.
    pub async fn read<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Books) -> Result<T, BooksError> + Send + 'static,
        T: Send + 'static,
    {
        let books = self.books.clone();
        tokio::task::spawn_blocking(move || f(&books))
            .await
            .map_err(ApiError::internal)?
            .map_err(ApiError::from)
    }

    /// Like `read`, holding the write gate until the blocking call returns,
    /// even if the request future is dropped first.
    pub async fn write<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Books) -> Result<T, BooksError> + Send + 'static,
        T: Send + 'static,
    {
        let gate = self.write_gate.clone().lock_owned().await;
        let books = self.books.clone();
        tokio::task::spawn_blocking(move || {
            let _gate = gate;
            f(&books)
        })
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::from)
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse { success: true, data }))
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub error: String,
    pub message: String,
    pub fields: Option<BTreeMap<String, String>>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a BTreeMap<String, String>>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status,
            code,
            message: error.clone(),
            error,
            fields: None,
        }
    }

    pub fn internal(error: impl Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", error.to_string())
    }

    pub fn forbidden(role: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            format!("role {} may not perform this operation", role),
        )
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", error)
    }
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "DUPLICATE" | "IN_USE" | "DUPLICATE_PAYROLL" | "YEAR_CLOSED" | "BOOK_NOT_EMPTY"
        | "ALREADY_DEPRECIATED" | "PERIOD_LOCKED" => StatusCode::CONFLICT,
        "STORAGE_ERROR" => StatusCode::INTERNAL_SERVER_ERROR,
        "VALIDATION_ERROR" => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl From<BooksError> for ApiError {
    fn from(e: BooksError) -> Self {
        let code = e.code();
        let fields = match &e {
            BooksError::Validation(v) => Some(v.errors.clone()),
            _ => None,
        };
        ApiError {
            status: status_for(code),
            code,
            error: e.to_string(),
            message: friendly_message(&e, "تنفيذ العملية"),
            fields,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, error = %self.error, "request failed");
        } else {
            tracing::debug!(code = self.code, error = %self.error, "request rejected");
        }
        metrics::increment_counter!("tripro_api_errors", "code" => self.code);
        let body = ErrorBody {
            success: false,
            error: &self.error,
            code: self.code,
            message: &self.message,
            fields: self.fields.as_ref(),
        };
        (self.status, Json(body)).into_response()
    }
}

pub const READ: &[&str] = &["demo"];
pub const WRITE: &[&str] = &["user"];
pub const MANAGE: &[&str] = &["manager"];
pub const ADMIN: &[&str] = &["admin"];

pub fn require(caller: &CallerIdentity, roles: &[&str]) -> Result<(), ApiError> {
    if caller.can(roles) {
        Ok(())
    } else {
        tracing::warn!(caller = %caller.name, role = %caller.role, "permission denied");
        Err(ApiError::forbidden(&caller.role))
    }
}

pub fn audit(caller: &CallerIdentity, action: &str, resource: &str, changes: serde_json::Value) {
    AuditLog::new(&caller.name, action, resource, changes).emit();
}

/// All routes. `/health`, `/metrics` and `/api/login` stay open; the rest
/// go through the auth middleware.
pub fn router(state: AppState, metrics: Option<PrometheusHandle>) -> Router {
    use handlers::*;

    let protected = Router::new()
        .route("/api/logout", post(logout))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/accounts", get(list_accounts).post(create_account))
        .route("/api/accounts/tree", get(account_tree))
        .route("/api/accounts/system", get(missing_system_accounts))
        .route("/api/accounts/default-chart", post(install_default_chart))
        .route(
            "/api/accounts/:id",
            get(get_account).put(update_account).delete(delete_account),
        )
        .route("/api/journals", get(list_journals).post(post_journal))
        .route("/api/journals/:id", get(get_journal).delete(delete_journal))
        .route("/api/journals/:id/post", post(post_draft))
        .route("/api/journals/:id/restore", post(restore_journal))
        .route("/api/reports/trial-balance", get(trial_balance))
        .route("/api/reports/balance-sheet", get(balance_sheet))
        .route("/api/reports/income-statement", get(income_statement))
        .route("/api/reports/cash-flow", get(cash_flow))
        .route("/api/reports/general-ledger/:account_id", get(general_ledger))
        .route("/api/reports/aging", get(aging))
        .route("/api/treasury/:account_id/position", get(cash_position))
        .route("/api/treasury/closings", get(list_cash_closings).post(close_cash))
        .route("/api/treasury/rejected-closings", get(rejected_cash_closings))
        .route("/api/treasury/transfers", post(transfer_funds))
        .route("/api/expenses", post(record_expense))
        .route("/api/vouchers/:kind", post(record_voucher))
        .route("/api/customers", get(list_customers).post(create_customer))
        .route("/api/customers/:id", put(update_customer))
        .route("/api/suppliers", get(list_suppliers).post(create_supplier))
        .route("/api/suppliers/:id", put(update_supplier))
        .route("/api/products", get(list_products).post(create_product))
        .route("/api/products/low-stock", get(low_stock_products))
        .route("/api/products/:id", put(update_product))
        .route("/api/inventory/adjustments", post(adjust_stock))
        .route("/api/invoices", get(list_invoices).post(create_invoice))
        .route("/api/invoices/:id/approve", post(approve_invoice))
        .route("/api/returns", get(list_returns).post(record_return))
        .route("/api/notes", post(issue_note))
        .route("/api/assets", get(list_assets).post(register_asset))
        .route("/api/assets/depreciation-run", post(run_depreciation))
        .route("/api/assets/:id/depreciate", post(depreciate_asset))
        .route("/api/assets/:id/revalue", post(revalue_asset))
        .route("/api/employees", get(list_employees).post(create_employee))
        .route("/api/employees/:id", put(update_employee))
        .route("/api/employees/:id/advances", post(record_advance))
        .route("/api/payroll", get(list_payrolls).post(run_payroll))
        .route("/api/payroll/prepare", get(prepare_payroll))
        .route("/api/fiscal-years/:year/close", post(close_fiscal_year))
        .route("/api/records/:kind/:id", delete(delete_record))
        .route("/api/recycle-bin", get(recycle_bin))
        .route("/api/recycle-bin/:kind/:id/restore", post(restore_record))
        .route("/api/recycle-bin/:kind/:id", delete(purge_record))
        .route("/api/backup", get(export_backup))
        .route("/api/backup/restore", post(restore_backup))
        .route("/api/tafqeet", get(amount_in_words))
        .route_layer(middleware::from_fn(auth_middleware))
        .layer(Extension(state.auth.clone()));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login))
        .merge(protected);

    if let Some(handle) = metrics {
        app = app.route("/metrics", get(move || std::future::ready(handle.render())));
    }

    app.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use rust_decimal_macros::dec;
    use time::macros::date;
    use tripro_core::{JournalLine, NewJournalEntry};
    use tripro_memory::InMemoryStorage;

    use crate::config::AuthConfig;

    fn state() -> AppState {
        let books = Books::new(Arc::new(InMemoryStorage::new()));
        books.install_default_chart().unwrap();
        AppState::new(books, AuthState::new(AuthConfig::default()))
    }

    fn caller(role: &str) -> Extension<CallerIdentity> {
        Extension(CallerIdentity {
            name: "tester".to_string(),
            role: role.to_string(),
        })
    }

    fn entry(amount: rust_decimal::Decimal) -> NewJournalEntry {
        NewJournalEntry::new(
            date!(2024 - 02 - 01),
            "Owner funding",
            vec![
                JournalLine::debit("1231", amount),
                JournalLine::credit("3999", amount),
            ],
        )
    }

    #[tokio::test]
    async fn posting_and_reading_back_a_journal() {
        let state = state();
        let (status, Json(created)) = handlers::post_journal(State(state.clone()), caller("user"), Json(entry(dec!(250))))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(created.success);

        let Json(fetched) = handlers::get_journal(State(state), caller("demo"), Path(created.data.id))
            .await
            .unwrap();
        assert_eq!(fetched.data.reference, created.data.reference);
    }

    #[tokio::test]
    async fn engine_errors_map_to_status_codes() {
        let state = state();
        let mut unbalanced = entry(dec!(100));
        unbalanced.lines[1].credit = dec!(90);
        let err = handlers::post_journal(State(state.clone()), caller("user"), Json(unbalanced))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "UNBALANCED");

        let err = handlers::get_account(State(state), caller("user"), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn roles_gate_operations() {
        let state = state();
        let err = handlers::post_journal(State(state.clone()), caller("demo"), Json(entry(dec!(1))))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let err = handlers::close_fiscal_year(State(state), caller("manager"), Path(2023))
            .await
            .unwrap_err();
        assert_eq!(err.code, "FORBIDDEN");
    }

    #[tokio::test]
    async fn reports_render_as_text_on_request() {
        let state = state();
        handlers::post_journal(State(state.clone()), caller("user"), Json(entry(dec!(75))))
            .await
            .unwrap();
        let query = handlers::RangeQuery {
            format: Some("text".to_string()),
            ..Default::default()
        };
        let response = handlers::trial_balance(State(state), caller("demo"), Query(query))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(axum::http::header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    }

    #[tokio::test]
    async fn login_without_users_is_rejected() {
        let state = state();
        let err = handlers::login(
            State(state),
            Json(handlers::LoginRequest {
                username: "admin".to_string(),
                password: "x".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn transfer_to_the_same_treasury_is_unprocessable() {
        let state = state();
        let transfer = crate::validation::TransferInput {
            amount: dec!(10),
            date: date!(2024 - 02 - 01),
            source_account_id: "1231".to_string(),
            destination_account_id: "1231".to_string(),
            description: None,
        };
        let err = handlers::transfer_funds(State(state.clone()), caller("user"), Json(transfer))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.fields.unwrap().contains_key("destination_account_id"));

        handlers::post_journal(State(state.clone()), caller("user"), Json(entry(dec!(40))))
            .await
            .unwrap();
        let response = handlers::cash_flow(State(state), caller("demo"), Query(handlers::RangeQuery::default()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn dropped_write_keeps_the_gate_until_it_finishes() {
        let state = state();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let slow = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .write(move |_| {
                        started_tx.send(()).ok();
                        release_rx.recv().ok();
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::spawn_blocking(move || started_rx.recv()).await.unwrap().unwrap();
        slow.abort();

        let gate = state.write_gate.clone();
        assert!(gate.try_lock().is_err());
        release_tx.send(()).unwrap();
        state.write(|_| Ok(())).await.unwrap();
        assert!(gate.try_lock().is_ok());
    }

    #[test]
    fn validation_errors_carry_fields() {
        let err: ApiError = BooksError::Validation(crate::validation::ValidationError::single("name", "required")).into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.fields.unwrap()["name"], "required");
    }
}
