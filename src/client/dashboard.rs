//! Dashboard flow: today's summary, the entry form and the history list.

use super::{ApiClient, ClientError, EntryDraft};
use crate::models::{Entry, EntryType};
use crate::summary::{DailySummary, daily_summary};
use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

pub const EXPENSE_CATEGORIES: [&str; 7] = [
    "Combustible",
    "Lavados",
    "Peajes",
    "Reparaciones",
    "Repuestos",
    "Comida",
    "Otros",
];

/// Raw values as typed into the entry form.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryForm {
    pub entry_type: EntryType,
    pub amount: String,
    pub category: String,
}

impl EntryForm {
    pub fn income(amount: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Income,
            amount: amount.into(),
            category: String::new(),
        }
    }

    pub fn expense(amount: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Expense,
            amount: amount.into(),
            category: category.into(),
        }
    }

    pub fn submit(&self, now: DateTime<Utc>) -> Result<EntryDraft, ClientError> {
        let amount = self
            .amount
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|a| a.is_finite() && *a > 0.0)
            .ok_or_else(|| {
                ClientError::Validation("Por favor, introduce una cantidad válida.".to_string())
            })?;

        let category = match self.entry_type {
            EntryType::Income => None,
            EntryType::Expense => {
                let category = self.category.trim();
                if category.is_empty() {
                    return Err(ClientError::Validation(
                        "Selecciona una categoría".to_string(),
                    ));
                }
                Some(category.to_string())
            }
        };

        Ok(EntryDraft {
            date: now,
            entry_type: self.entry_type,
            amount,
            category,
        })
    }
}

pub async fn load_dashboard<Tz: TimeZone>(
    api: &ApiClient,
    reference: &DateTime<Tz>,
) -> Result<DailySummary, ClientError> {
    let entries = api.get_entries().await?;
    Ok(daily_summary(&entries, reference))
}

pub async fn add_and_reload<Tz: TimeZone>(
    api: &ApiClient,
    form: &EntryForm,
    reference: &DateTime<Tz>,
) -> Result<DailySummary, ClientError> {
    let draft = form.submit(Utc::now())?;
    let entry = api.add_entry(&draft).await?;
    info!(entry_id = entry.id, "entry saved");
    load_dashboard(api, reference).await
}

/// One row of the history list.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryItem {
    pub label: &'static str,
    pub badge: Option<String>,
    pub amount: String,
    pub date: DateTime<Utc>,
}

impl From<&Entry> for HistoryItem {
    fn from(entry: &Entry) -> Self {
        Self {
            label: match entry.entry_type {
                EntryType::Income => "Ingreso",
                EntryType::Expense => "Gasto",
            },
            badge: entry.category.clone(),
            amount: format_amount(entry.amount),
            date: entry.date,
        }
    }
}

pub fn format_amount(amount: f64) -> String {
    format!("${amount:.2}")
}
