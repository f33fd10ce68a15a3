//! CSV export for recorded step outputs.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::run::StepRecord;

/// Exports step records to a CSV file at the given path.
///
/// Writes a `step,sim_time` header followed by every output id seen in
/// `records`, sorted, then one row per record. An id missing from a record
/// leaves its cell empty. Produces deterministic output for identical inputs.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(records: &[StepRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(records, buf)
}

/// Writes step records as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(records: &[StepRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    let ids: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.outputs.keys().map(String::as_str))
        .collect();

    let mut header = vec!["step", "sim_time"];
    header.extend(ids.iter().copied());
    wtr.write_record(&header)?;

    for r in records {
        let mut row = Vec::with_capacity(ids.len() + 2);
        row.push(r.step.to_string());
        row.push(format!("{:.1}", r.sim_time));
        for id in &ids {
            row.push(
                r.outputs
                    .get(*id)
                    .map(|v| format!("{v:.6}"))
                    .unwrap_or_default(),
            );
        }
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}
