use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use time::{util::days_in_year_month, Date, Month};
use uuid::Uuid;

use tripro_core::{
    models::records::{
        AdvanceStatus, Employee, EmployeeAdvance, EmployeeStatus, Payroll, PayrollItem,
    },
    DocumentRef, JournalLine, NewJournalEntry, RecordKind, SystemAccount,
};

use super::push_line;
use crate::{
    books::{document_number, money, Books},
    error::BooksError,
    validation::{check_amount, EmployeeInput, ValidationError},
};

#[derive(Debug, Clone, Deserialize)]
pub struct PayrollRequest {
    pub month: u8,
    pub year: i32,
    pub date: Date,
    pub treasury_account_id: String,
    pub items: Vec<PayrollItem>,
}

fn payroll_reference(year: i32, month: u8) -> String {
    format!("PAY-{}-{:02}", year, month)
}

/// Last calendar day of the payroll month.
fn period_end(year: i32, month: u8) -> Result<Date, BooksError> {
    let invalid = || BooksError::from(ValidationError::single("month", "الشهر غير صالح."));
    let month = Month::try_from(month).map_err(|_| invalid())?;
    Date::from_calendar_date(year, month, days_in_year_month(year, month)).map_err(|_| invalid())
}

impl Books {
    pub fn create_employee(&self, input: EmployeeInput) -> Result<Employee, BooksError> {
        input.validate()?;
        let employee = Employee {
            id: Uuid::new_v4(),
            full_name: input.full_name.trim().to_string(),
            salary: money(input.salary),
            status: input.status,
        };
        self.save(&employee)?;
        tracing::info!(id = %employee.id, "employee created");
        Ok(employee)
    }

    pub fn update_employee(&self, id: Uuid, input: EmployeeInput) -> Result<Employee, BooksError> {
        input.validate()?;
        let mut employee: Employee = self.record(id)?;
        employee.full_name = input.full_name.trim().to_string();
        employee.salary = money(input.salary);
        employee.status = input.status;
        self.save(&employee)?;
        Ok(employee)
    }

    /// Pays an advance out of a treasury account. It stays open until a
    /// payroll run deducts it.
    pub fn record_advance(
        &self,
        employee_id: Uuid,
        amount: Decimal,
        date: Date,
        treasury_account_id: &str,
    ) -> Result<EmployeeAdvance, BooksError> {
        check_amount(amount, "مبلغ السلفة").map_err(|e| ValidationError::single("amount", e.message))?;
        let employee: Employee = self.record(employee_id)?;
        if employee.status != EmployeeStatus::Active {
            return Err(BooksError::InvalidState(format!(
                "{} is not an active employee",
                employee.full_name
            )));
        }
        let treasury = self.account(treasury_account_id)?;

        self.atomic(|books| {
            let advances = books.system_account(SystemAccount::EmployeeAdvances)?;
            let advance = EmployeeAdvance {
                id: Uuid::new_v4(),
                employee_id,
                amount: money(amount),
                date,
                status: AdvanceStatus::Paid,
                payroll_id: None,
            };
            books.post_entry(
                NewJournalEntry::new(
                    date,
                    &format!("Salary advance - {}", employee.full_name),
                    vec![
                        JournalLine::debit(&advances, advance.amount),
                        JournalLine::credit(&treasury.id, advance.amount),
                    ],
                )
                .with_reference(document_number("ADV"))
                .for_document(DocumentRef {
                    kind: RecordKind::EmployeeAdvance,
                    id: advance.id,
                }),
            )?;
            books.save(&advance)?;
            tracing::info!(employee = %employee_id, amount = %advance.amount, "advance paid");
            Ok(advance)
        })
    }

    /// Paid advances not yet taken back by a payroll run.
    pub fn open_advances(&self, employee_id: Uuid) -> Result<Vec<EmployeeAdvance>, BooksError> {
        Ok(self
            .records::<EmployeeAdvance>()?
            .into_iter()
            .filter(|a| a.employee_id == employee_id && a.status == AdvanceStatus::Paid)
            .collect())
    }

    /// Draft payroll lines for every active employee, with the advances
    /// open at the end of the month already deducted.
    pub fn prepare_payroll(&self, month: u8, year: i32) -> Result<Vec<PayrollItem>, BooksError> {
        let end = period_end(year, month)?;
        let advances = self.records::<EmployeeAdvance>()?;
        let mut items: Vec<PayrollItem> = self
            .records::<Employee>()?
            .into_iter()
            .filter(|e| e.status == EmployeeStatus::Active)
            .map(|employee| {
                let open: Vec<&EmployeeAdvance> = advances
                    .iter()
                    .filter(|a| {
                        a.employee_id == employee.id
                            && a.status == AdvanceStatus::Paid
                            && a.date <= end
                    })
                    .collect();
                PayrollItem {
                    employee_id: employee.id,
                    full_name: employee.full_name,
                    gross_salary: employee.salary,
                    additions: Decimal::ZERO,
                    advances_deducted: open.iter().map(|a| a.amount).sum(),
                    other_deductions: Decimal::ZERO,
                    advance_ids: open.iter().map(|a| a.id).collect(),
                }
            })
            .collect();
        items.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(items)
    }

    pub fn payrolls(&self) -> Result<Vec<Payroll>, BooksError> {
        let mut payrolls = self.records::<Payroll>()?;
        payrolls.sort_by_key(|p| (p.year, p.month));
        Ok(payrolls)
    }

    /// Posts one month's salaries, marks the deducted advances and stores the
    /// run. Each month can be run once. The advance deduction of every line
    /// is the sum of the advances it names, whatever the caller sent.
    pub fn run_payroll(&self, request: PayrollRequest) -> Result<Payroll, BooksError> {
        period_end(request.year, request.month)?;
        if request.items.is_empty() {
            return Err(BooksError::InvalidState("payroll has no employees".to_string()));
        }
        let duplicate = self
            .records::<Payroll>()?
            .iter()
            .any(|p| p.month == request.month && p.year == request.year);
        let reference = payroll_reference(request.year, request.month);
        if duplicate || self.storage().find_journal_by_reference(&reference)?.is_some() {
            return Err(BooksError::DuplicatePayroll {
                month: request.month,
                year: request.year,
            });
        }

        let mut items = request.items;
        let mut claimed: Vec<Uuid> = Vec::new();
        for item in items.iter_mut() {
            let mut deducted = Decimal::ZERO;
            for advance_id in &item.advance_ids {
                let advance: EmployeeAdvance = self.record(*advance_id)?;
                if advance.employee_id != item.employee_id
                    || advance.status != AdvanceStatus::Paid
                    || claimed.contains(advance_id)
                {
                    return Err(BooksError::InvalidState(format!(
                        "advance {} cannot be deducted for {}",
                        advance_id, item.full_name
                    )));
                }
                claimed.push(*advance_id);
                deducted += advance.amount;
            }
            item.gross_salary = money(item.gross_salary);
            item.additions = money(item.additions);
            item.advances_deducted = money(deducted);
            item.other_deductions = money(item.other_deductions);
            if [item.gross_salary, item.additions, item.advances_deducted, item.other_deductions]
                .iter()
                .any(|v| *v < Decimal::ZERO)
            {
                return Err(BooksError::InvalidState(format!(
                    "negative payroll amount for {}",
                    item.full_name
                )));
            }
            if item.net_salary() < Decimal::ZERO {
                return Err(BooksError::InvalidState(format!(
                    "net salary for {} is negative",
                    item.full_name
                )));
            }
        }
        let treasury = self.account(&request.treasury_account_id)?;

        let gross: Decimal = items.iter().map(|i| i.gross_salary).sum();
        let additions: Decimal = items.iter().map(|i| i.additions).sum();
        let advances: Decimal = items.iter().map(|i| i.advances_deducted).sum();
        let deductions: Decimal = items.iter().map(|i| i.other_deductions).sum();
        let total_net: Decimal = items.iter().map(|i| i.net_salary()).sum();

        self.atomic(|books| {
            let payroll_id = Uuid::new_v4();
            let mut lines = Vec::new();
            push_line(&mut lines, &books.system_account(SystemAccount::SalariesExpense)?, gross, Decimal::ZERO);
            push_line(&mut lines, &books.system_account(SystemAccount::EmployeeBonuses)?, additions, Decimal::ZERO);
            push_line(&mut lines, &books.system_account(SystemAccount::EmployeeAdvances)?, Decimal::ZERO, advances);
            push_line(&mut lines, &books.system_account(SystemAccount::EmployeeDeductions)?, Decimal::ZERO, deductions);
            push_line(&mut lines, &treasury.id, Decimal::ZERO, total_net);

            let journal = books.post_entry(
                NewJournalEntry::new(
                    request.date,
                    &format!("Payroll {:02}/{}", request.month, request.year),
                    lines,
                )
                .with_reference(reference.as_str())
                .for_document(DocumentRef {
                    kind: RecordKind::Payroll,
                    id: payroll_id,
                }),
            )?;

            for item in &items {
                for advance_id in &item.advance_ids {
                    let mut advance: EmployeeAdvance = books.record(*advance_id)?;
                    if advance.employee_id != item.employee_id || advance.status != AdvanceStatus::Paid {
                        return Err(BooksError::InvalidState(format!(
                            "advance {} cannot be deducted for {}",
                            advance_id, item.full_name
                        )));
                    }
                    advance.status = AdvanceStatus::Deducted;
                    advance.payroll_id = Some(payroll_id);
                    books.save(&advance)?;
                }
            }

            let payroll = Payroll {
                id: payroll_id,
                month: request.month,
                year: request.year,
                date: request.date,
                treasury_account_id: Arc::clone(&treasury.id),
                items: items.clone(),
                total_net,
                journal_id: journal.id,
            };
            books.save(&payroll)?;
            metrics::increment_counter!("tripro_payroll_runs");
            tracing::info!(
                month = request.month,
                year = request.year,
                employees = payroll.items.len(),
                %total_net,
                "payroll posted"
            );
            Ok(payroll)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::ops::Bound;
    use time::macros::date;
    use tripro_memory::InMemoryStorage;

    fn books() -> Books {
        let books = Books::new(Arc::new(InMemoryStorage::new()));
        books.install_default_chart().unwrap();
        books
    }

    fn hire(books: &Books, name: &str, salary: Decimal) -> Employee {
        books
            .create_employee(EmployeeInput {
                full_name: name.to_string(),
                salary,
                status: EmployeeStatus::Active,
            })
            .unwrap()
    }

    fn request(items: Vec<PayrollItem>) -> PayrollRequest {
        PayrollRequest {
            month: 3,
            year: 2024,
            date: date!(2024 - 03 - 31),
            treasury_account_id: "1231".to_string(),
            items,
        }
    }

    #[test]
    fn prepare_deducts_open_advances() {
        let books = books();
        let ahmed = hire(&books, "Ahmed Ali", dec!(5000));
        let mona = hire(&books, "Mona Hassan", dec!(4000));
        books
            .create_employee(EmployeeInput {
                full_name: "Former Staff".to_string(),
                salary: dec!(3000),
                status: EmployeeStatus::Inactive,
            })
            .unwrap();
        books.record_advance(ahmed.id, dec!(800), date!(2024 - 03 - 10), "1231").unwrap();

        let items = books.prepare_payroll(3, 2024).unwrap();
        assert_eq!(items.len(), 2);
        let ahmed_item = items.iter().find(|i| i.employee_id == ahmed.id).unwrap();
        assert_eq!(ahmed_item.advances_deducted, dec!(800));
        assert_eq!(ahmed_item.net_salary(), dec!(4200));
        let mona_item = items.iter().find(|i| i.employee_id == mona.id).unwrap();
        assert!(mona_item.advance_ids.is_empty());
    }

    #[test]
    fn run_posts_balanced_entry_and_marks_advances() {
        let books = books();
        let ahmed = hire(&books, "Ahmed Ali", dec!(5000));
        let advance = books.record_advance(ahmed.id, dec!(800), date!(2024 - 03 - 10), "1231").unwrap();

        let mut items = books.prepare_payroll(3, 2024).unwrap();
        items[0].additions = dec!(250);
        items[0].other_deductions = dec!(100);
        let payroll = books.run_payroll(request(items)).unwrap();
        assert_eq!(payroll.total_net, dec!(4350));

        let journal = books.journal(payroll.journal_id).unwrap();
        assert_eq!(journal.reference.as_ref(), "PAY-2024-03");
        assert!(journal.is_balanced());
        assert_eq!(books.storage().get_balance("531", Bound::Unbounded).unwrap(), dec!(5000));
        assert_eq!(books.storage().get_balance("5312", Bound::Unbounded).unwrap(), dec!(250));
        assert_eq!(books.storage().get_balance("1223", Bound::Unbounded).unwrap(), Decimal::ZERO);
        assert_eq!(books.storage().get_balance("422", Bound::Unbounded).unwrap(), dec!(-100));
        assert_eq!(books.storage().get_balance("1231", Bound::Unbounded).unwrap(), dec!(-5150));

        let advance: EmployeeAdvance = books.record(advance.id).unwrap();
        assert_eq!(advance.status, AdvanceStatus::Deducted);
        assert_eq!(advance.payroll_id, Some(payroll.id));
    }

    #[test]
    fn month_runs_once() {
        let books = books();
        hire(&books, "Ahmed Ali", dec!(5000));
        books.run_payroll(request(books.prepare_payroll(3, 2024).unwrap())).unwrap();
        let err = books
            .run_payroll(request(books.prepare_payroll(3, 2024).unwrap()))
            .unwrap_err();
        assert!(matches!(err, BooksError::DuplicatePayroll { month: 3, year: 2024 }));
    }

    #[test]
    fn negative_net_is_refused() {
        let books = books();
        hire(&books, "Ahmed Ali", dec!(1000));
        let mut items = books.prepare_payroll(3, 2024).unwrap();
        items[0].other_deductions = dec!(1500);
        let err = books.run_payroll(request(items)).unwrap_err();
        assert!(matches!(err, BooksError::InvalidState(_)));
        assert!(books.payrolls().unwrap().is_empty());
    }

    #[test]
    fn deduction_follows_the_named_advances() {
        let books = books();
        let ahmed = hire(&books, "Ahmed Ali", dec!(5000));
        let advance = books.record_advance(ahmed.id, dec!(800), date!(2024 - 03 - 10), "1231").unwrap();

        let mut items = books.prepare_payroll(3, 2024).unwrap();
        items[0].advances_deducted = Decimal::ZERO;
        let payroll = books.run_payroll(request(items)).unwrap();

        assert_eq!(payroll.items[0].advances_deducted, dec!(800));
        assert_eq!(payroll.total_net, dec!(4200));
        assert_eq!(books.storage().get_balance("1223", Bound::Unbounded).unwrap(), Decimal::ZERO);
        let advance: EmployeeAdvance = books.record(advance.id).unwrap();
        assert_eq!(advance.status, AdvanceStatus::Deducted);
    }

    #[test]
    fn deduction_without_advances_is_dropped() {
        let books = books();
        hire(&books, "Ahmed Ali", dec!(5000));
        let mut items = books.prepare_payroll(3, 2024).unwrap();
        items[0].advances_deducted = dec!(1000);
        let payroll = books.run_payroll(request(items)).unwrap();
        assert_eq!(payroll.total_net, dec!(5000));
        assert_eq!(books.storage().get_balance("1223", Bound::Unbounded).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn same_advance_twice_is_refused() {
        let books = books();
        let ahmed = hire(&books, "Ahmed Ali", dec!(5000));
        let advance = books.record_advance(ahmed.id, dec!(800), date!(2024 - 03 - 10), "1231").unwrap();
        let mut items = books.prepare_payroll(3, 2024).unwrap();
        items[0].advance_ids.push(advance.id);
        let err = books.run_payroll(request(items)).unwrap_err();
        assert!(matches!(err, BooksError::InvalidState(_)));
        assert!(books.payrolls().unwrap().is_empty());
    }

    #[test]
    fn later_advances_wait_for_their_month() {
        let books = books();
        let ahmed = hire(&books, "Ahmed Ali", dec!(5000));
        books.record_advance(ahmed.id, dec!(300), date!(2024 - 02 - 29), "1231").unwrap();
        books.record_advance(ahmed.id, dec!(500), date!(2024 - 04 - 02), "1231").unwrap();

        let february = books.prepare_payroll(2, 2024).unwrap();
        assert_eq!(february[0].advances_deducted, dec!(300));
        assert_eq!(february[0].advance_ids.len(), 1);

        let last_year = books.prepare_payroll(3, 2023).unwrap();
        assert_eq!(last_year[0].advances_deducted, Decimal::ZERO);

        let april = books.prepare_payroll(4, 2024).unwrap();
        assert_eq!(april[0].advances_deducted, dec!(800));
        assert!(books.prepare_payroll(13, 2024).is_err());
    }

    #[test]
    fn bad_advance_rolls_back_everything() {
        let books = books();
        let ahmed = hire(&books, "Ahmed Ali", dec!(5000));
        let mut items = books.prepare_payroll(3, 2024).unwrap();
        items[0].advance_ids.push(Uuid::new_v4());
        assert!(books.run_payroll(request(items)).is_err());
        assert!(books.payrolls().unwrap().is_empty());
        assert!(books.journals(None, None).unwrap().is_empty());
        assert_eq!(books.record::<Employee>(ahmed.id).unwrap().salary, dec!(5000));
    }
}
