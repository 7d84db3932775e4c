use std::path::Path;

use chrono::Utc;
use csv::Writer;

use crate::error::ExportError;
use crate::report::localized_stamp;
use crate::store::{ExpenseRecord, parse_instant};

/// Write `records` into a timestamped CSV file under `download_dir` and
/// return the generated file name for URL construction.
///
/// The sheet has a header row, one row per record and a trailing total
/// row. A record whose stored timestamp no longer parses is skipped and
/// logged; it must not abort the rest of the export.
pub fn write_expense_sheet(
    records: &[ExpenseRecord],
    download_dir: &Path,
) -> Result<String, ExportError> {
    let file_name = format!("Pengeluaran_{}.csv", Utc::now().timestamp_millis());
    let path = download_dir.join(&file_name);
    let mut writer = Writer::from_path(&path)?;

    writer.write_record(["Tanggal", "Nama", "Kategori", "Harga"])?;

    let mut total: i64 = 0;
    for record in records {
        let Some(stamp) = parse_instant(&record.created_at) else {
            log::warn!(
                "skipping expense {} with malformed timestamp {:?}",
                record.id,
                record.created_at
            );
            continue;
        };
        let when = localized_stamp(stamp);
        let amount = record.amount.to_string();
        writer.write_record([
            when.as_str(),
            record.name.as_str(),
            record.category.as_str(),
            amount.as_str(),
        ])?;
        total += record.amount;
    }

    let total = total.to_string();
    writer.write_record(["", "TOTAL PENGELUARAN", "", total.as_str()])?;
    writer.flush()?;

    Ok(file_name)
}
