//! Ledger configuration

use std::path::Path;

use serde::Deserialize;

use crate::types::{CashAccountType, LedgerError, LedgerResult};

/// Ledger configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LedgerConfig {
    /// Interest accrual settings
    #[serde(default)]
    pub interest: InterestConfig,
    /// Cash postings for loan transactions
    #[serde(default)]
    pub posting: PostingConfig,
}

/// Interest accrual settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InterestConfig {
    /// Length of the simple-interest year
    #[serde(default = "default_days_in_year")]
    pub days_in_year: u32,
    /// Decimal places accrued interest is rounded to
    #[serde(default = "default_scale")]
    pub scale: i64,
}

fn default_days_in_year() -> u32 {
    365
}

fn default_scale() -> i64 {
    2
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            days_in_year: default_days_in_year(),
            scale: default_scale(),
        }
    }
}

/// Where cash and bank effects of loan transactions are posted
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostingConfig {
    #[serde(default = "default_posting_enabled")]
    pub enabled: bool,
    /// Account for cash-mode postings; the oldest cash account when unset
    #[serde(default)]
    pub cash_account_id: Option<String>,
    /// Account for bank-mode postings; the oldest bank account when unset
    #[serde(default)]
    pub bank_account_id: Option<String>,
}

fn default_posting_enabled() -> bool {
    true
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            enabled: default_posting_enabled(),
            cash_account_id: None,
            bank_account_id: None,
        }
    }
}

impl PostingConfig {
    /// Explicitly configured account for a type, if any
    pub fn account_for(&self, account_type: CashAccountType) -> Option<&str> {
        match account_type {
            CashAccountType::Cash => self.cash_account_id.as_deref(),
            CashAccountType::Bank => self.bank_account_id.as_deref(),
        }
    }
}

impl LedgerConfig {
    /// Loads configuration from an optional TOML file and `LEDGER__*` environment variables.
    ///
    /// Environment variables use `__` as the section separator, e.g.
    /// `LEDGER__INTEREST__DAYS_IN_YEAR=360`.
    pub fn load(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("LEDGER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| LedgerError::Config(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the accrual engine cannot work with
    pub fn validate(&self) -> LedgerResult<()> {
        if self.interest.days_in_year == 0 {
            return Err(LedgerError::Config(
                "interest.days_in_year must be greater than zero".to_string(),
            ));
        }
        if self.interest.scale < 0 {
            return Err(LedgerError::Config(
                "interest.scale cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}
