use std::{collections::HashSet, sync::Arc};

use rand::Rng;
use rust_decimal::Decimal;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use tripro_core::{
    Account, AccountType, Settings, StorageBackend, StorageError, SubType, SystemAccount,
    TypedRecord,
};

use crate::{error::BooksError, validation::AccountInput};

/// Rounds a money amount to the two decimal places the ledger keeps.
pub fn money(amount: Decimal) -> Decimal {
    amount.round_dp(2)
}

pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

/// `PREFIX-` followed by six random digits, used for generated references.
pub fn document_number(prefix: &str) -> String {
    format!("{}-{:06}", prefix, rand::thread_rng().gen_range(0..1_000_000))
}

/// The bookkeeping service: posting engine, reports and document services
/// over one storage backend.
#[derive(Clone)]
pub struct Books {
    storage: Arc<dyn StorageBackend>,
}

impl Books {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &dyn StorageBackend {
        self.storage.as_ref()
    }

    /// Runs `f` inside one storage transaction. Any error rolls back every
    /// write `f` made.
    pub fn atomic<T>(&self, f: impl FnOnce(&Books) -> Result<T, BooksError>) -> Result<T, BooksError> {
        let tx_id = self.storage.begin_transaction()?;
        tracing::debug!(tx_id, "transaction started");
        match f(self) {
            Ok(value) => {
                self.storage.commit_transaction(tx_id)?;
                tracing::debug!(tx_id, "transaction committed");
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.storage.rollback_transaction(tx_id) {
                    tracing::error!(tx_id, error = %rollback_err, "rollback failed");
                } else {
                    tracing::debug!(tx_id, error = %e, "transaction rolled back");
                }
                Err(e)
            }
        }
    }

    pub fn settings(&self) -> Result<Settings, BooksError> {
        Ok(self.storage.get_settings()?)
    }

    pub fn update_settings(&self, settings: Settings) -> Result<Settings, BooksError> {
        if settings.vat_rate < Decimal::ZERO || settings.max_cash_deficit_limit < Decimal::ZERO {
            return Err(BooksError::InvalidState(
                "vat rate and deficit limit cannot be negative".to_string(),
            ));
        }
        for account_id in settings.account_mappings.values() {
            if self.storage.get_account(account_id)?.is_none() {
                return Err(BooksError::UnknownAccount(account_id.to_string()));
            }
        }
        self.storage.put_settings(&settings)?;
        tracing::info!(company = %settings.company_name, "settings updated");
        Ok(settings)
    }

    // Chart of accounts

    pub fn accounts(&self) -> Result<Vec<Account>, BooksError> {
        Ok(self.storage.list_accounts()?)
    }

    pub fn account(&self, id: &str) -> Result<Account, BooksError> {
        match self.storage.get_account(id)? {
            Some(account) if account.deleted_at.is_none() => Ok(account),
            _ => Err(StorageError::AccountNotFound(id.to_string()).into()),
        }
    }

    pub fn create_account(&self, input: AccountInput) -> Result<Account, BooksError> {
        input.validate()?;
        let account = input.into_account(&Uuid::new_v4().to_string());
        self.storage.create_account(&account)?;
        tracing::info!(id = %account.id, code = %account.code, "account created");
        Ok(account)
    }

    pub fn update_account(&self, id: &str, input: AccountInput) -> Result<Account, BooksError> {
        input.validate()?;
        let existing = self.account(id)?;
        let mut account = input.into_account(id);
        account.is_active = existing.is_active;
        if account.parent_id.as_deref() == Some(id) || self.is_descendant(id, account.parent_id.as_deref())? {
            return Err(BooksError::InvalidState(
                "an account cannot be moved under itself".to_string(),
            ));
        }
        self.storage.update_account(&account)?;
        Ok(account)
    }

    /// Whether `candidate` lies in the subtree rooted at `root`.
    fn is_descendant(&self, root: &str, candidate: Option<&str>) -> Result<bool, BooksError> {
        let accounts = self.storage.list_accounts()?;
        let mut seen = HashSet::new();
        let mut current = candidate.map(str::to_string);
        while let Some(id) = current {
            if id == root {
                return Ok(true);
            }
            if !seen.insert(id.clone()) {
                break;
            }
            current = accounts
                .iter()
                .find(|a| *a.id == *id)
                .and_then(|a| a.parent_id.as_deref().map(str::to_string));
        }
        Ok(false)
    }

    pub fn delete_account(&self, id: &str) -> Result<(), BooksError> {
        self.storage.delete_account(id, OffsetDateTime::now_utc())?;
        tracing::info!(id, "account deleted");
        Ok(())
    }

    /// Resolves a system account through the settings mappings, then by its
    /// default code.
    pub fn system_account(&self, which: SystemAccount) -> Result<Arc<str>, BooksError> {
        let settings = self.storage.get_settings()?;
        self.resolve_system_account(&settings, which)
    }

    pub(crate) fn resolve_system_account(
        &self,
        settings: &Settings,
        which: SystemAccount,
    ) -> Result<Arc<str>, BooksError> {
        if let Some(id) = settings.account_mappings.get(&which) {
            if let Some(account) = self.storage.get_account(id)? {
                if account.deleted_at.is_none() {
                    return Ok(account.id);
                }
            }
        }
        match self.storage.find_account_by_code(which.default_code())? {
            Some(account) => Ok(account.id),
            None => Err(BooksError::MissingSystemAccount(which)),
        }
    }

    /// System accounts that resolve to nothing.
    pub fn missing_system_accounts(&self) -> Result<Vec<SystemAccount>, BooksError> {
        let settings = self.storage.get_settings()?;
        let mut missing = Vec::new();
        for which in SystemAccount::ALL {
            match self.resolve_system_account(&settings, which) {
                Ok(_) => {}
                Err(BooksError::MissingSystemAccount(_)) => missing.push(which),
                Err(e) => return Err(e),
            }
        }
        Ok(missing)
    }

    /// Creates the five top-level groups and every system account that is
    /// not already present. Returns the number of accounts created.
    pub fn install_default_chart(&self) -> Result<usize, BooksError> {
        let groups = [
            ("1", "Assets", AccountType::Asset),
            ("2", "Liabilities", AccountType::Liability),
            ("3", "Equity", AccountType::Equity),
            ("4", "Revenue", AccountType::Revenue),
            ("5", "Expenses", AccountType::Expense),
        ];
        self.atomic(|books| {
            let mut created = 0;
            for (code, name, account_type) in groups {
                if books.storage.find_account_by_code(code)?.is_none() {
                    books
                        .storage
                        .create_account(&Account::new(code, code, name, account_type).group())?;
                    created += 1;
                }
            }
            for which in SystemAccount::ALL {
                let code = which.default_code();
                if books.storage.find_account_by_code(code)?.is_some() {
                    continue;
                }
                let account_type = which.account_type();
                let parent = groups
                    .iter()
                    .find(|(_, _, t)| *t == account_type)
                    .map(|(c, _, _)| *c)
                    .unwrap_or("1");
                let mut account = Account::new(code, code, which.label(), account_type).under(parent);
                account.sub_type = match which {
                    SystemAccount::AccumulatedDepreciation => Some(SubType::NonCurrent),
                    _ if matches!(account_type, AccountType::Asset | AccountType::Liability) => {
                        Some(SubType::Current)
                    }
                    _ => None,
                };
                books.storage.create_account(&account)?;
                created += 1;
            }
            tracing::info!(created, "default chart installed");
            Ok(created)
        })
    }

    // Generic record access

    pub fn find_record<T: TypedRecord>(&self, id: Uuid) -> Result<Option<T>, BooksError> {
        Ok(self
            .storage
            .get_record(T::KIND, id)?
            .and_then(T::from_record))
    }

    pub fn record<T: TypedRecord>(&self, id: Uuid) -> Result<T, BooksError> {
        self.find_record(id)?
            .ok_or(BooksError::NotFound(T::KIND, id))
    }

    pub fn records<T: TypedRecord>(&self) -> Result<Vec<T>, BooksError> {
        Ok(self
            .storage
            .list_records(T::KIND)?
            .into_iter()
            .filter_map(T::from_record)
            .collect())
    }

    pub fn save<T: TypedRecord + Clone>(&self, record: &T) -> Result<(), BooksError> {
        self.storage.put_record(&record.clone().into_record())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripro_memory::InMemoryStorage;

    fn books() -> Books {
        Books::new(Arc::new(InMemoryStorage::new()))
    }

    #[test]
    fn default_chart_resolves_every_system_account() {
        let books = books();
        assert_eq!(books.missing_system_accounts().unwrap().len(), SystemAccount::ALL.len());

        let created = books.install_default_chart().unwrap();
        assert_eq!(created, 5 + SystemAccount::ALL.len());
        assert!(books.missing_system_accounts().unwrap().is_empty());
        assert_eq!(&*books.system_account(SystemAccount::Cash).unwrap(), "1231");

        assert_eq!(books.install_default_chart().unwrap(), 0);
    }

    #[test]
    fn mappings_take_precedence_over_default_codes() {
        let books = books();
        books.install_default_chart().unwrap();
        books
            .storage()
            .create_account(&Account::new("vault", "1232", "Vault", AccountType::Asset).under("1"))
            .unwrap();

        let mut settings = books.settings().unwrap();
        settings.account_mappings.insert(SystemAccount::Cash, Arc::from("vault"));
        books.update_settings(settings).unwrap();

        assert_eq!(&*books.system_account(SystemAccount::Cash).unwrap(), "vault");
    }

    #[test]
    fn mapping_to_unknown_account_is_rejected() {
        let books = books();
        let mut settings = Settings::default();
        settings.account_mappings.insert(SystemAccount::Cash, Arc::from("ghost"));
        assert!(matches!(
            books.update_settings(settings),
            Err(BooksError::UnknownAccount(_))
        ));
    }

    #[test]
    fn account_cannot_move_under_its_own_child() {
        let books = books();
        books
            .storage()
            .create_account(&Account::new("a", "1", "Assets", AccountType::Asset).group())
            .unwrap();
        books
            .storage()
            .create_account(&Account::new("b", "11", "Current", AccountType::Asset).group().under("a"))
            .unwrap();

        let input = AccountInput {
            code: "1".to_string(),
            name: "Assets".to_string(),
            account_type: AccountType::Asset,
            is_group: true,
            parent_id: Some("b".to_string()),
            sub_type: None,
        };
        assert!(matches!(
            books.update_account("a", input),
            Err(BooksError::InvalidState(_))
        ));
    }

    #[test]
    fn atomic_rolls_back_on_error() {
        let books = books();
        let result: Result<(), BooksError> = books.atomic(|b| {
            b.storage()
                .create_account(&Account::new("cash", "1231", "Cash", AccountType::Asset))?;
            Err(BooksError::InvalidState("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(books.accounts().unwrap().is_empty());
    }
}
