use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Asia::Jakarta;
use chrono_tz::Tz;

use crate::store::{CategoryTotal, ExpenseRecord, parse_instant};

/// Display timezone. Storage is UTC; everything the user reads is Jakarta
/// local time, like the phone the bot talks to.
pub const DISPLAY_TZ: Tz = Jakarta;

/// 15000 -> "15.000" (id-ID digit grouping).
pub fn format_idr(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    if amount < 0 { format!("-{}", out) } else { out }
}

pub fn localized_date(t: DateTime<Utc>) -> String {
    t.with_timezone(&DISPLAY_TZ).format("%d/%m/%Y").to_string()
}

pub fn localized_stamp(t: DateTime<Utc>) -> String {
    t.with_timezone(&DISPLAY_TZ)
        .format("%d/%m/%Y %H:%M")
        .to_string()
}

/// Localized rendering of a stored `created_at`; malformed values come back
/// verbatim rather than hiding the record.
fn localized_created_at(created_at: &str) -> String {
    match parse_instant(created_at) {
        Some(t) => localized_stamp(t),
        None => created_at.to_string(),
    }
}

/// Group records by category and render the summary message. Categories
/// are sorted by total descending; equal totals keep first-encountered
/// order.
pub fn summarize(records: &[ExpenseRecord], title: &str) -> String {
    if records.is_empty() {
        return format!("📊 {}\n\nBelum ada pengeluaran.", title);
    }

    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, (i64, i64)> = HashMap::new();
    for record in records {
        if !totals.contains_key(&record.category) {
            order.push(record.category.clone());
        }
        let entry = totals.entry(record.category.clone()).or_insert((0, 0));
        entry.0 += record.amount;
        entry.1 += 1;
    }

    let mut categories: Vec<(String, i64, i64)> = order
        .into_iter()
        .map(|category| {
            let (total, count) = totals[&category];
            (category, total, count)
        })
        .collect();
    // Stable sort, so ties keep their first-encountered order.
    categories.sort_by(|a, b| b.1.cmp(&a.1));

    let grand_total: i64 = records.iter().map(|r| r.amount).sum();
    let mut message = format!("📊 {}\n\n", title);
    for (category, total, count) in &categories {
        message.push_str(&format!(
            "• {}: {} IDR ({} transaksi)\n",
            category,
            format_idr(*total),
            count
        ));
    }
    message.push_str(&format!(
        "\n💰 Total Pengeluaran: {} IDR",
        format_idr(grand_total)
    ));
    message
}

/// List records one per line, in the order the caller supplies them (the
/// store hands them over sorted by amount descending).
pub fn detail_report(records: &[ExpenseRecord], title: &str) -> String {
    if records.is_empty() {
        return format!("📊 {}\n\nBelum ada pengeluaran.", title);
    }

    let mut message = format!("📊 {}\n\n", title);
    for (i, record) in records.iter().enumerate() {
        message.push_str(&format!(
            "{}. {}: {} IDR ({})\n",
            i + 1,
            record.name,
            format_idr(record.amount),
            localized_created_at(&record.created_at)
        ));
    }
    let total: i64 = records.iter().map(|r| r.amount).sum();
    message.push_str(&format!("\n💰 Total Pengeluaran: {} IDR", format_idr(total)));
    message
}

/// Render the all-time category aggregate the store computed.
pub fn aggregate_summary(rows: &[CategoryTotal]) -> String {
    let mut message = String::from("📊 Ringkasan Pengeluaran:\n\n");
    let mut grand_total: i64 = 0;
    for row in rows {
        message.push_str(&format!(
            "• {}: {} IDR ({} transaksi)\n",
            row.category,
            format_idr(row.total),
            row.count
        ));
        grand_total += row.total;
    }
    message.push_str(&format!(
        "\n💰 Total Pengeluaran: {} IDR",
        format_idr(grand_total)
    ));
    message
}

fn local_midnight(date: NaiveDate) -> DateTime<Utc> {
    let naive = NaiveDateTime::new(date, NaiveTime::MIN);
    match DISPLAY_TZ.from_local_datetime(&naive) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
        LocalResult::None => Utc.from_utc_datetime(&naive),
    }
}

/// `[start, end)` of the local calendar day containing `now`.
pub fn today_range(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let local = now.with_timezone(&DISPLAY_TZ).date_naive();
    (local_midnight(local), local_midnight(local + Duration::days(1)))
}

/// `[start, end)` of the local Monday-based week containing `now`.
pub fn week_range(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let local = now.with_timezone(&DISPLAY_TZ).date_naive();
    let monday = local - Duration::days(local.weekday().num_days_from_monday() as i64);
    (local_midnight(monday), local_midnight(monday + Duration::days(7)))
}

/// `[start, end)` of the local calendar month containing `now`.
pub fn month_range(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let local = now.with_timezone(&DISPLAY_TZ).date_naive();
    let first = local.with_day(1).unwrap_or(local);
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    }
    .unwrap_or(first);
    (local_midnight(first), local_midnight(next))
}
