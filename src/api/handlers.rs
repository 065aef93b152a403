use std::fmt::Display;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::Date;
use uuid::Uuid;

use tripro_core::{
    models::records::{
        Customer, Employee, FixedAsset, Invoice, InvoiceKind, Payroll, PayrollItem, Product,
        RecordKind, ReturnKind, ReturnNote, Supplier,
    },
    Account, JournalEntry, NewJournalEntry, Settings, SystemAccount,
};

use super::{audit, ok, require, ApiError, ApiResult, AppState, ADMIN, MANAGE, READ, WRITE};
use crate::{
    auth::{CallerIdentity, LoginError, LoginGrant},
    backup::{BackupFile, RestoreSummary},
    books::today,
    documents::{
        ApprovedInvoice, AssetRegistration, DepreciationRun, FiscalYearClosing, PayrollRequest,
        PostedReturn, RecycleBin, StockAdjustment, StockAdjustmentRequest,
    },
    reports::{
        AccountNode, AccountTreeView, AgingReport, BalanceSheet, CashFlowStatement, GeneralLedger,
        IncomeStatement, TrialBalance,
    },
    tafqeet::{tafqeet, Currency},
    treasury::{
        CashClosingOutcome, CashClosingRequest, CashPosition, VoucherKind, VoucherOutcome,
    },
    validation::{
        AccountInput, AssetInput, CustomerInput, EmployeeInput, ExpenseInput, InvoiceInput,
        NoteInput, ProductInput, ReturnInput, SupplierInput, TransferInput, VoucherInput,
    },
};

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub from: Option<Date>,
    pub to: Option<Date>,
    pub as_of: Option<Date>,
    /// `text` renders the report as a table instead of JSON.
    pub format: Option<String>,
}

impl RangeQuery {
    fn wants_text(&self) -> bool {
        self.format.as_deref() == Some("text")
    }
}

fn report<T: Serialize + Display>(value: T, query: &RangeQuery) -> Response {
    if query.wants_text() {
        value.to_string().into_response()
    } else {
        ok(value).into_response()
    }
}

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> ApiResult<LoginGrant> {
    match state.auth.login(&body.username, &body.password) {
        Ok(grant) => ok(grant),
        Err(LoginError::InvalidCredentials { remaining }) => Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_CREDENTIALS",
            format!("invalid user name or password ({} attempts left)", remaining),
        )),
        Err(LoginError::RateLimited { retry_after_secs }) => Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            format!("too many attempts, retry in {} seconds", retry_after_secs),
        )),
        Err(LoginError::SessionStoreUnavailable) => {
            Err(ApiError::internal("session store is unavailable"))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub token: String,
}

pub async fn logout(State(state): State<AppState>, Json(body): Json<LogoutRequest>) -> ApiResult<bool> {
    ok(state.auth.logout(&body.token))
}

// Settings and chart of accounts

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Settings> {
    require(&caller, READ)?;
    ok(state.read(|books| books.settings()).await?)
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(settings): Json<Settings>,
) -> ApiResult<Settings> {
    require(&caller, ADMIN)?;
    let saved = state.write(move |books| books.update_settings(settings)).await?;
    audit(&caller, "update", "settings", json!(saved));
    ok(saved)
}

pub async fn list_accounts(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Vec<Account>> {
    require(&caller, READ)?;
    ok(state.read(|books| books.accounts()).await?)
}

pub async fn get_account(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> ApiResult<Account> {
    require(&caller, READ)?;
    ok(state.read(move |books| books.account(&id)).await?)
}

pub async fn create_account(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(input): Json<AccountInput>,
) -> ApiResult<Account> {
    require(&caller, MANAGE)?;
    let account = state.write(move |books| books.create_account(input)).await?;
    audit(&caller, "create", "account", json!({ "id": account.id, "code": account.code }));
    ok(account)
}

pub async fn update_account(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Json(input): Json<AccountInput>,
) -> ApiResult<Account> {
    require(&caller, MANAGE)?;
    let account = state.write(move |books| books.update_account(&id, input)).await?;
    audit(&caller, "update", "account", json!({ "id": account.id }));
    ok(account)
}

pub async fn delete_account(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    require(&caller, ADMIN)?;
    let resource = id.clone();
    state.write(move |books| books.delete_account(&id)).await?;
    audit(&caller, "delete", "account", json!({ "id": resource }));
    ok(())
}

pub async fn account_tree(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<RangeQuery>,
) -> Result<Response, ApiError> {
    require(&caller, READ)?;
    let as_of = query.as_of;
    let tree: Vec<AccountNode> = state.read(move |books| books.account_tree(as_of)).await?;
    if query.wants_text() {
        Ok(AccountTreeView(&tree).to_string().into_response())
    } else {
        Ok(ok(tree).into_response())
    }
}

pub async fn missing_system_accounts(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Vec<SystemAccount>> {
    require(&caller, READ)?;
    ok(state.read(|books| books.missing_system_accounts()).await?)
}

pub async fn install_default_chart(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<usize> {
    require(&caller, ADMIN)?;
    let created = state.write(|books| books.install_default_chart()).await?;
    audit(&caller, "install", "default_chart", json!({ "accounts": created }));
    ok(created)
}

// Journal entries

pub async fn list_journals(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Vec<JournalEntry>> {
    require(&caller, READ)?;
    let (from, to) = (query.from, query.to);
    ok(state.read(move |books| books.journals(from, to)).await?)
}

pub async fn get_journal(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
) -> ApiResult<JournalEntry> {
    require(&caller, READ)?;
    ok(state.read(move |books| books.journal(id)).await?)
}

pub async fn post_journal(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(entry): Json<NewJournalEntry>,
) -> Result<(StatusCode, Json<super::ApiResponse<JournalEntry>>), ApiError> {
    require(&caller, WRITE)?;
    let journal = state.write(move |books| books.post_entry(entry)).await?;
    audit(
        &caller,
        "create",
        "journal_entry",
        json!({ "id": journal.id, "reference": journal.reference }),
    );
    Ok((StatusCode::CREATED, ok(journal)?))
}

pub async fn post_draft(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
) -> ApiResult<JournalEntry> {
    require(&caller, MANAGE)?;
    let journal = state.write(move |books| books.post_draft(id)).await?;
    audit(&caller, "post", "journal_entry", json!({ "id": id }));
    ok(journal)
}

pub async fn delete_journal(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    require(&caller, MANAGE)?;
    state.write(move |books| books.delete_entry(id)).await?;
    audit(&caller, "delete", "journal_entry", json!({ "id": id }));
    ok(())
}

pub async fn restore_journal(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
) -> ApiResult<JournalEntry> {
    require(&caller, MANAGE)?;
    let journal = state.write(move |books| books.restore_entry(id)).await?;
    audit(&caller, "restore", "journal_entry", json!({ "id": id }));
    ok(journal)
}

// Reports

pub async fn trial_balance(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<RangeQuery>,
) -> Result<Response, ApiError> {
    require(&caller, READ)?;
    let as_of = query.as_of;
    let tb: TrialBalance = state.read(move |books| books.trial_balance(as_of)).await?;
    Ok(report(tb, &query))
}

pub async fn balance_sheet(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<RangeQuery>,
) -> Result<Response, ApiError> {
    require(&caller, READ)?;
    let as_of = query.as_of;
    let sheet: BalanceSheet = state.read(move |books| books.balance_sheet(as_of)).await?;
    Ok(report(sheet, &query))
}

pub async fn income_statement(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<RangeQuery>,
) -> Result<Response, ApiError> {
    require(&caller, READ)?;
    let (from, to) = (query.from, query.to);
    let statement: IncomeStatement = state.read(move |books| books.income_statement(from, to)).await?;
    Ok(report(statement, &query))
}

pub async fn cash_flow(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<RangeQuery>,
) -> Result<Response, ApiError> {
    require(&caller, READ)?;
    let (from, to) = (query.from, query.to);
    let statement: CashFlowStatement = state.read(move |books| books.cash_flow_statement(from, to)).await?;
    Ok(report(statement, &query))
}

pub async fn general_ledger(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(account_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Response, ApiError> {
    require(&caller, READ)?;
    let (from, to) = (query.from, query.to);
    let ledger: GeneralLedger = state
        .read(move |books| books.general_ledger(&account_id, from, to))
        .await?;
    Ok(report(ledger, &query))
}

#[derive(Debug, Deserialize)]
pub struct AgingQuery {
    #[serde(default = "sales")]
    pub kind: InvoiceKind,
    pub as_of: Option<Date>,
    pub format: Option<String>,
}

fn sales() -> InvoiceKind {
    InvoiceKind::Sales
}

pub async fn aging(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<AgingQuery>,
) -> Result<Response, ApiError> {
    require(&caller, READ)?;
    let kind = query.kind;
    let as_of = query.as_of.unwrap_or_else(today);
    let aging: AgingReport = state.read(move |books| books.aging(kind, as_of)).await?;
    let range = RangeQuery {
        format: query.format,
        ..RangeQuery::default()
    };
    Ok(report(aging, &range))
}

// Treasury

#[derive(Debug, Deserialize)]
pub struct PositionQuery {
    pub date: Option<Date>,
}

pub async fn cash_position(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(account_id): Path<String>,
    Query(query): Query<PositionQuery>,
) -> ApiResult<CashPosition> {
    require(&caller, READ)?;
    let day = query.date.unwrap_or_else(today);
    ok(state.read(move |books| books.cash_position(&account_id, day)).await?)
}

pub async fn close_cash(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<CashClosingRequest>,
) -> ApiResult<CashClosingOutcome> {
    require(&caller, WRITE)?;
    let user = caller.name.clone();
    let account = request.treasury_account_id.clone();
    let result = state.write(move |books| books.close_cash(request, Some(&user))).await;
    match &result {
        Ok(outcome) => audit(
            &caller,
            "close",
            "cash_closing",
            json!({ "account": account, "difference": outcome.closing.difference }),
        ),
        Err(e) => crate::security::AuditLog::new(&caller.name, "close", "cash_closing", json!({ "account": account }))
            .failed(e.error.clone())
            .emit(),
    }
    ok(result?)
}

#[derive(Debug, Deserialize)]
pub struct ClosingsQuery {
    pub account_id: Option<String>,
}

pub async fn list_cash_closings(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<ClosingsQuery>,
) -> ApiResult<Vec<tripro_core::models::records::CashClosing>> {
    require(&caller, READ)?;
    ok(state
        .read(move |books| books.cash_closings(query.account_id.as_deref()))
        .await?)
}

pub async fn rejected_cash_closings(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Vec<tripro_core::models::records::RejectedCashClosing>> {
    require(&caller, MANAGE)?;
    ok(state.read(|books| books.rejected_cash_closings()).await?)
}

pub async fn record_voucher(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(kind): Path<VoucherKind>,
    Json(input): Json<VoucherInput>,
) -> ApiResult<VoucherOutcome> {
    require(&caller, WRITE)?;
    let outcome = state.write(move |books| books.record_voucher(kind, input)).await?;
    audit(
        &caller,
        "create",
        "voucher",
        json!({ "reference": outcome.journal.reference, "amount": outcome.journal.total_debit() }),
    );
    ok(outcome)
}

pub async fn record_expense(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(input): Json<ExpenseInput>,
) -> ApiResult<JournalEntry> {
    require(&caller, WRITE)?;
    let journal = state.write(move |books| books.record_expense(input)).await?;
    audit(
        &caller,
        "create",
        "expense",
        json!({ "reference": journal.reference, "amount": journal.total_debit() }),
    );
    ok(journal)
}

pub async fn transfer_funds(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(input): Json<TransferInput>,
) -> ApiResult<JournalEntry> {
    require(&caller, WRITE)?;
    let journal = state.write(move |books| books.transfer_funds(input)).await?;
    audit(
        &caller,
        "create",
        "transfer",
        json!({ "reference": journal.reference, "amount": journal.total_debit() }),
    );
    ok(journal)
}

// Parties

#[derive(Debug, Deserialize)]
pub struct PartyRequest<T> {
    #[serde(flatten)]
    pub input: T,
    /// Date of the opening-balance entry; today when absent.
    pub opening_date: Option<Date>,
}

pub async fn list_customers(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Vec<Customer>> {
    require(&caller, READ)?;
    ok(state.read(|books| books.records::<Customer>()).await?)
}

pub async fn create_customer(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(body): Json<PartyRequest<CustomerInput>>,
) -> ApiResult<Customer> {
    require(&caller, WRITE)?;
    let date = body.opening_date.unwrap_or_else(today);
    let customer = state.write(move |books| books.create_customer(body.input, date)).await?;
    audit(&caller, "create", "customer", json!({ "id": customer.id }));
    ok(customer)
}

pub async fn update_customer(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    Json(input): Json<CustomerInput>,
) -> ApiResult<Customer> {
    require(&caller, WRITE)?;
    ok(state.write(move |books| books.update_customer(id, input)).await?)
}

pub async fn list_suppliers(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Vec<Supplier>> {
    require(&caller, READ)?;
    ok(state.read(|books| books.records::<Supplier>()).await?)
}

pub async fn create_supplier(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(body): Json<PartyRequest<SupplierInput>>,
) -> ApiResult<Supplier> {
    require(&caller, WRITE)?;
    let date = body.opening_date.unwrap_or_else(today);
    let supplier = state.write(move |books| books.create_supplier(body.input, date)).await?;
    audit(&caller, "create", "supplier", json!({ "id": supplier.id }));
    ok(supplier)
}

pub async fn update_supplier(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    Json(input): Json<SupplierInput>,
) -> ApiResult<Supplier> {
    require(&caller, WRITE)?;
    ok(state.write(move |books| books.update_supplier(id, input)).await?)
}

// Products and stock

pub async fn list_products(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Vec<Product>> {
    require(&caller, READ)?;
    ok(state.read(|books| books.records::<Product>()).await?)
}

pub async fn low_stock_products(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Vec<Product>> {
    require(&caller, READ)?;
    ok(state.read(|books| books.low_stock_products()).await?)
}

pub async fn create_product(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(input): Json<ProductInput>,
) -> ApiResult<Product> {
    require(&caller, WRITE)?;
    ok(state.write(move |books| books.create_product(input)).await?)
}

pub async fn update_product(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    Json(input): Json<ProductInput>,
) -> ApiResult<Product> {
    require(&caller, WRITE)?;
    ok(state.write(move |books| books.update_product(id, input)).await?)
}

pub async fn adjust_stock(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<StockAdjustmentRequest>,
) -> ApiResult<StockAdjustment> {
    require(&caller, MANAGE)?;
    let adjustment = state.write(move |books| books.adjust_stock(request)).await?;
    audit(&caller, "adjust", "inventory", json!({ "lines": adjustment.lines.len() }));
    ok(adjustment)
}

// Invoices

#[derive(Debug, Deserialize)]
pub struct InvoiceQuery {
    pub kind: Option<InvoiceKind>,
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<InvoiceQuery>,
) -> ApiResult<Vec<Invoice>> {
    require(&caller, READ)?;
    ok(state.read(move |books| books.invoices(query.kind)).await?)
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(input): Json<InvoiceInput>,
) -> ApiResult<Invoice> {
    require(&caller, WRITE)?;
    let invoice = state.write(move |books| books.create_invoice(input)).await?;
    audit(&caller, "create", "invoice", json!({ "id": invoice.id, "number": invoice.number }));
    ok(invoice)
}

pub async fn approve_invoice(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApprovedInvoice> {
    require(&caller, WRITE)?;
    let approved = state.write(move |books| books.approve_invoice(id)).await?;
    audit(
        &caller,
        "approve",
        "invoice",
        json!({ "id": id, "credit_limit_exceeded": approved.credit_limit_exceeded }),
    );
    ok(approved)
}

// Returns and notes

#[derive(Debug, Deserialize)]
pub struct ReturnQuery {
    pub kind: Option<ReturnKind>,
}

pub async fn list_returns(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<ReturnQuery>,
) -> ApiResult<Vec<ReturnNote>> {
    require(&caller, READ)?;
    ok(state.read(move |books| books.return_notes(query.kind)).await?)
}

pub async fn record_return(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(input): Json<ReturnInput>,
) -> ApiResult<PostedReturn> {
    require(&caller, WRITE)?;
    let posted = state.write(move |books| books.record_return(input)).await?;
    audit(
        &caller,
        "create",
        "return",
        json!({ "id": posted.note.id, "number": posted.note.number, "amount": posted.note.total_amount }),
    );
    ok(posted)
}

pub async fn issue_note(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(input): Json<NoteInput>,
) -> ApiResult<PostedReturn> {
    require(&caller, WRITE)?;
    let posted = state.write(move |books| books.issue_note(input)).await?;
    audit(
        &caller,
        "create",
        "note",
        json!({ "id": posted.note.id, "number": posted.note.number, "amount": posted.note.total_amount }),
    );
    ok(posted)
}

// Fixed assets

pub async fn list_assets(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Vec<FixedAsset>> {
    require(&caller, READ)?;
    ok(state.read(|books| books.records::<FixedAsset>()).await?)
}

pub async fn register_asset(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(input): Json<AssetInput>,
) -> ApiResult<AssetRegistration> {
    require(&caller, MANAGE)?;
    let registration = state.write(move |books| books.register_asset(input)).await?;
    audit(&caller, "create", "fixed_asset", json!({ "id": registration.asset.id }));
    ok(registration)
}

#[derive(Debug, Deserialize)]
pub struct DateRequest {
    pub date: Option<Date>,
}

pub async fn depreciate_asset(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    Json(body): Json<DateRequest>,
) -> ApiResult<JournalEntry> {
    require(&caller, MANAGE)?;
    let date = body.date.unwrap_or_else(today);
    ok(state.write(move |books| books.depreciate_asset(id, date)).await?)
}

pub async fn run_depreciation(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(body): Json<DateRequest>,
) -> ApiResult<DepreciationRun> {
    require(&caller, MANAGE)?;
    let date = body.date.unwrap_or_else(today);
    let run = state.write(move |books| books.run_depreciation(date)).await?;
    audit(
        &caller,
        "depreciate",
        "fixed_asset",
        json!({ "processed": run.processed.len(), "skipped": run.skipped.len() }),
    );
    ok(run)
}

#[derive(Debug, Deserialize)]
pub struct RevaluationRequest {
    pub new_value: Decimal,
    pub counter_account_id: String,
    pub date: Option<Date>,
}

pub async fn revalue_asset(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    Json(body): Json<RevaluationRequest>,
) -> ApiResult<JournalEntry> {
    require(&caller, MANAGE)?;
    let date = body.date.unwrap_or_else(today);
    let journal = state
        .write(move |books| books.revalue_asset(id, body.new_value, date, &body.counter_account_id))
        .await?;
    audit(&caller, "revalue", "fixed_asset", json!({ "id": id }));
    ok(journal)
}

// Employees and payroll

pub async fn list_employees(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Vec<Employee>> {
    require(&caller, MANAGE)?;
    ok(state.read(|books| books.records::<Employee>()).await?)
}

pub async fn create_employee(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(input): Json<EmployeeInput>,
) -> ApiResult<Employee> {
    require(&caller, MANAGE)?;
    ok(state.write(move |books| books.create_employee(input)).await?)
}

pub async fn update_employee(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    Json(input): Json<EmployeeInput>,
) -> ApiResult<Employee> {
    require(&caller, MANAGE)?;
    ok(state.write(move |books| books.update_employee(id, input)).await?)
}

#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    pub amount: Decimal,
    pub date: Option<Date>,
    pub treasury_account_id: String,
}

pub async fn record_advance(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    Json(body): Json<AdvanceRequest>,
) -> ApiResult<tripro_core::models::records::EmployeeAdvance> {
    require(&caller, MANAGE)?;
    let date = body.date.unwrap_or_else(today);
    let advance = state
        .write(move |books| books.record_advance(id, body.amount, date, &body.treasury_account_id))
        .await?;
    audit(&caller, "create", "employee_advance", json!({ "employee": id, "amount": advance.amount }));
    ok(advance)
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub month: u8,
    pub year: i32,
}

pub async fn prepare_payroll(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<Vec<PayrollItem>> {
    require(&caller, MANAGE)?;
    ok(state
        .read(move |books| books.prepare_payroll(query.month, query.year))
        .await?)
}

pub async fn list_payrolls(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Vec<Payroll>> {
    require(&caller, MANAGE)?;
    ok(state.read(|books| books.payrolls()).await?)
}

pub async fn run_payroll(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<PayrollRequest>,
) -> ApiResult<Payroll> {
    require(&caller, ADMIN)?;
    let payroll = state.write(move |books| books.run_payroll(request)).await?;
    audit(
        &caller,
        "run",
        "payroll",
        json!({ "month": payroll.month, "year": payroll.year, "total_net": payroll.total_net }),
    );
    ok(payroll)
}

// Year end, recycle bin, backup

pub async fn close_fiscal_year(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(year): Path<i32>,
) -> ApiResult<FiscalYearClosing> {
    require(&caller, ADMIN)?;
    let closing = state.write(move |books| books.close_fiscal_year(year)).await?;
    audit(
        &caller,
        "close",
        "fiscal_year",
        json!({ "year": year, "net_income": closing.net_income }),
    );
    ok(closing)
}

fn record_kind(kind: &str) -> Result<RecordKind, ApiError> {
    kind.parse::<RecordKind>().map_err(ApiError::bad_request)
}

pub async fn delete_record(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> ApiResult<()> {
    require(&caller, MANAGE)?;
    let kind = record_kind(&kind)?;
    state.write(move |books| books.delete_record(kind, id)).await?;
    audit(&caller, "delete", kind.as_str(), json!({ "id": id }));
    ok(())
}

pub async fn recycle_bin(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<RecycleBin> {
    require(&caller, MANAGE)?;
    ok(state.read(|books| books.recycle_bin()).await?)
}

pub async fn restore_record(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> ApiResult<()> {
    require(&caller, MANAGE)?;
    if kind == crate::documents::JOURNAL_ENTRY {
        state.write(move |books| books.restore_entry(id)).await?;
    } else {
        let kind = record_kind(&kind)?;
        state.write(move |books| books.restore_record(kind, id)).await?;
    }
    audit(&caller, "restore", &kind, json!({ "id": id }));
    ok(())
}

pub async fn purge_record(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> ApiResult<()> {
    require(&caller, ADMIN)?;
    let kind = record_kind(&kind)?;
    state.write(move |books| books.purge_record(kind, id)).await?;
    audit(&caller, "purge", kind.as_str(), json!({ "id": id }));
    ok(())
}

pub async fn export_backup(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<BackupFile> {
    require(&caller, ADMIN)?;
    let backup = state.read(|books| books.export_backup()).await?;
    audit(&caller, "export", "backup", json!({ "journals": backup.journals.len() }));
    ok(backup)
}

pub async fn restore_backup(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(file): Json<BackupFile>,
) -> ApiResult<RestoreSummary> {
    require(&caller, ADMIN)?;
    let summary = state.write(move |books| books.restore_backup(file)).await?;
    audit(&caller, "restore", "backup", json!(summary));
    ok(summary)
}

#[derive(Debug, Deserialize)]
pub struct WordsQuery {
    pub amount: Decimal,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AmountInWords {
    pub amount: Decimal,
    pub currency: Currency,
    pub words: String,
}

pub async fn amount_in_words(
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<WordsQuery>,
) -> ApiResult<AmountInWords> {
    require(&caller, READ)?;
    let currency = Currency::from_code(query.currency.as_deref().unwrap_or("EGP"));
    ok(AmountInWords {
        amount: query.amount,
        currency,
        words: tafqeet(query.amount, currency),
    })
}
