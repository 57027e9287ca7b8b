use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Cycle;
use crate::error::ValidationError;

/// A recurring payment tracked by the application.
///
/// Stored as camelCase JSON so records written by the application and by
/// the engine are interchangeable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligation {
    pub id: String,
    pub name: String,
    /// Day of month the payment is due (1-31). Clamped to the month's last
    /// day in shorter months.
    pub due_day: u8,
    /// First cycle this obligation is active in.
    pub created_cycle: Cycle,
    #[serde(default)]
    pub paid_months: BTreeMap<Cycle, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

impl Obligation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, due_day: u8, created_cycle: Cycle) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            due_day,
            created_cycle,
            paid_months: BTreeMap::new(),
            amount: None,
        }
    }

    pub fn is_paid(&self, cycle: Cycle) -> bool {
        self.paid_months.get(&cycle).copied().unwrap_or(false)
    }

    pub fn set_paid(&mut self, cycle: Cycle, paid: bool) {
        if paid {
            self.paid_months.insert(cycle, true);
        } else {
            self.paid_months.remove(&cycle);
        }
    }

    /// # Errors
    /// Returns an error if the id is empty or contains whitespace, or the
    /// due day is outside 1..=31.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() || self.id.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidValue {
                field: "id".into(),
                message: "must be non-empty and contain no whitespace".into(),
            });
        }
        if !(1..=31).contains(&self.due_day) {
            return Err(ValidationError::InvalidDueDay(self.due_day));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_application_record() {
        let json = r#"{
            "id": "A",
            "name": "Streaming",
            "dueDay": 15,
            "createdCycle": "2024-01",
            "paidMonths": {"2024-02": true, "2024-03": false}
        }"#;
        let ob: Obligation = serde_json::from_str(json).unwrap();
        assert_eq!(ob.due_day, 15);
        assert!(ob.is_paid(Cycle::new(2024, 2).unwrap()));
        assert!(!ob.is_paid(Cycle::new(2024, 3).unwrap()));
        assert!(!ob.is_paid(Cycle::new(2024, 4).unwrap()));
        assert_eq!(ob.amount, None);
    }

    #[test]
    fn missing_paid_months_defaults_to_empty() {
        let json = r#"{"id":"A","name":"Rent","dueDay":1,"createdCycle":"2024-01"}"#;
        let ob: Obligation = serde_json::from_str(json).unwrap();
        assert!(ob.paid_months.is_empty());
    }

    #[test]
    fn set_paid_false_removes_flag() {
        let cycle = Cycle::new(2024, 3).unwrap();
        let mut ob = Obligation::new("A", "Rent", 1, cycle);
        ob.set_paid(cycle, true);
        assert!(ob.is_paid(cycle));
        ob.set_paid(cycle, false);
        assert!(ob.paid_months.is_empty());
    }

    #[test]
    fn validate_rejects_bad_due_day_and_id() {
        let cycle = Cycle::new(2024, 3).unwrap();
        assert!(Obligation::new("A", "Rent", 0, cycle).validate().is_err());
        assert!(Obligation::new("A", "Rent", 32, cycle).validate().is_err());
        assert!(Obligation::new("", "Rent", 1, cycle).validate().is_err());
        assert!(Obligation::new("a b", "Rent", 1, cycle).validate().is_err());
        assert!(Obligation::new("A", "Rent", 31, cycle).validate().is_ok());
    }
}
