use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Income,
    Expense,
}

impl EntryType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

/// A single income or expense record owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub user_id: String,
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Row payload handed to the provider on insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEntry {
    pub user_id: String,
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateEntryRequest {
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
    pub amount: Option<f64>,
    pub category: Option<String>,
}

impl CreateEntryRequest {
    /// Checks the submitted fields and binds the row to `user_id`.
    ///
    /// A zero amount is rejected the same way as a missing one.
    pub fn into_new_entry(self, user_id: &str) -> Result<NewEntry, AppError> {
        let date = self.date.as_deref().map(str::trim).filter(|d| !d.is_empty());
        let entry_type = self
            .entry_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let amount = self.amount.filter(|a| *a != 0.0);

        let (Some(date), Some(entry_type), Some(amount)) = (date, entry_type, amount) else {
            return Err(AppError::bad_request(
                "Missing required fields: date, type, amount",
            ));
        };

        let date = DateTime::parse_from_rfc3339(date)
            .map_err(|_| AppError::bad_request("date must be an RFC 3339 timestamp"))?
            .with_timezone(&Utc);
        let entry_type = EntryType::parse(entry_type)
            .ok_or_else(|| AppError::bad_request("type must be 'income' or 'expense'"))?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(AppError::bad_request("amount must be a positive number"));
        }

        let category = match entry_type {
            EntryType::Expense => self
                .category
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            EntryType::Income => None,
        };

        Ok(NewEntry {
            user_id: user_id.to_string(),
            date,
            entry_type,
            amount,
            category,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Lifetime of `access_token` in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub session: SessionTokens,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignupResponse {
    pub user: User,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    pub at: Option<String>,
}
