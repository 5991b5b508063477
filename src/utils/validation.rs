//! Validation utilities

use bigdecimal::BigDecimal;

use crate::types::*;

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: &BigDecimal) -> LedgerResult<()> {
    if *amount <= BigDecimal::from(0) {
        Err(LedgerError::Validation(
            "Amount must be positive".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate that a signed balance change is not zero
pub fn validate_non_zero_amount(amount: &BigDecimal) -> LedgerResult<()> {
    if *amount == BigDecimal::from(0) {
        Err(LedgerError::Validation(
            "Balance change cannot be zero".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate an annual interest rate in percent
pub fn validate_rate(rate: &BigDecimal) -> LedgerResult<()> {
    if *rate < BigDecimal::from(0) {
        return Err(LedgerError::Validation(
            "Interest rate cannot be negative".to_string(),
        ));
    }

    Ok(())
}

/// Validate the actor performing a mutation
pub fn validate_actor(actor: &str) -> LedgerResult<()> {
    if actor.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Actor cannot be empty".to_string(),
        ));
    }

    if actor.len() > 100 {
        return Err(LedgerError::Validation(
            "Actor cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate that a cash account name is valid
pub fn validate_account_name(name: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(LedgerError::Validation(
            "Account name cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate free-text notes attached to a record
pub fn validate_notes(notes: Option<&str>) -> LedgerResult<()> {
    if notes.is_some_and(|n| n.len() > 500) {
        return Err(LedgerError::Validation(
            "Notes cannot exceed 500 characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_rules() {
        assert!(validate_positive_amount(&BigDecimal::from(1)).is_ok());
        assert!(validate_positive_amount(&BigDecimal::from(0)).is_err());
        assert!(validate_non_zero_amount(&BigDecimal::from(-5)).is_ok());
        assert!(validate_non_zero_amount(&BigDecimal::from(0)).is_err());
    }

    #[test]
    fn test_rate_bounds() {
        assert!(validate_rate(&BigDecimal::from(0)).is_ok());
        assert!(validate_rate(&"5.5".parse::<BigDecimal>().unwrap()).is_ok());
        assert!(validate_rate(&BigDecimal::from(-1)).is_err());
        assert!(validate_rate(&BigDecimal::from(120)).is_ok());
    }

    #[test]
    fn test_actor_required() {
        assert!(validate_actor("operator").is_ok());
        assert!(validate_actor("  ").is_err());
    }
}
