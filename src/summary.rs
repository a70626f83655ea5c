use crate::models::{Entry, EntryType};
use chrono::{DateTime, Duration, Local, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub earnings: f64,
    pub expenses: f64,
    pub balance: f64,
    pub entries: Vec<Entry>,
}

pub fn daily_summary_now(entries: &[Entry]) -> DailySummary {
    daily_summary(entries, &Local::now())
}

/// Aggregates the entries dated within the calendar day of `reference`, in
/// the reference's own time zone. Both day bounds are inclusive at
/// millisecond precision.
pub fn daily_summary<Tz: TimeZone>(entries: &[Entry], reference: &DateTime<Tz>) -> DailySummary {
    let (start, end) = day_bounds(reference);

    let entries: Vec<Entry> = entries
        .iter()
        .filter(|entry| entry.date >= start && entry.date <= end)
        .cloned()
        .collect();

    let mut earnings = 0.0;
    let mut expenses = 0.0;
    for entry in &entries {
        match entry.entry_type {
            EntryType::Income => earnings += entry.amount,
            EntryType::Expense => expenses += entry.amount,
        }
    }

    DailySummary {
        earnings,
        expenses,
        balance: earnings - expenses,
        entries,
    }
}

/// First and last millisecond of the local day containing `reference`, as UTC instants.
pub fn day_bounds<Tz: TimeZone>(reference: &DateTime<Tz>) -> (DateTime<Utc>, DateTime<Utc>) {
    let tz = reference.timezone();
    let day = reference.date_naive();
    let start = day.and_time(NaiveTime::MIN);
    let end = day.and_time(NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN));

    (
        resolve_local(&tz, start, true),
        resolve_local(&tz, end, false),
    )
}

// A wall-clock time skipped by a DST jump has no instant; read it with the
// offset in effect at that moment instead.
fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime, earliest: bool) -> DateTime<Utc> {
    let mapped = tz.from_local_datetime(&local);
    let resolved = if earliest {
        mapped.earliest()
    } else {
        mapped.latest()
    };
    match resolved {
        Some(instant) => instant.with_timezone(&Utc),
        None => {
            let offset = tz.offset_from_utc_datetime(&local).fix().local_minus_utc();
            local.and_utc() - Duration::seconds(i64::from(offset))
        }
    }
}
