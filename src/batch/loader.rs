//! Instrument table loading and command assembly

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tcm_shared::{Command, CommandKind};
use tracing::debug;

/// One row of an instrument table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstrumentRow {
    #[serde(rename = "Device")]
    pub device: String,
    #[serde(rename = "Module")]
    pub module: String,
    #[serde(rename = "Register")]
    pub register: String,
    #[serde(rename = "Type")]
    pub type_tag: String,
}

#[cfg(test)]
impl InstrumentRow {
    pub fn new(device: &str, module: &str, register: &str, type_tag: &str) -> Self {
        Self {
            device: device.into(),
            module: module.into(),
            register: register.into(),
            type_tag: type_tag.into(),
        }
    }
}

/// Assemble a row into a command, `None` if its tag is not recognized
///
/// Value rows become queries (`module:register?@device`); every other kind
/// is sent as `module:register@device`, with any `=value` assignment
/// carried in the register field.
pub fn assemble(row: &InstrumentRow) -> Option<Command> {
    let kind = CommandKind::from_tag(&row.type_tag)?;
    let (device, module, register) = (row.device.trim(), row.module.trim(), row.register.trim());

    Some(match kind {
        CommandKind::Value => Command::query(device, module, register),
        kind => Command::setting(device, module, register, kind),
    })
}

/// Assemble every recognized row, preserving order
pub fn assemble_batch(rows: &[InstrumentRow]) -> Vec<Command> {
    rows.iter()
        .filter_map(|row| {
            let command = assemble(row);
            if command.is_none() {
                debug!("Skipping row with unrecognized type {:?}: {:?}", row.type_tag, row);
            }
            command
        })
        .collect()
}

/// Read instrument rows from a CSV file with a `Device,Module,Register,Type` header
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<InstrumentRow>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open instrument table {}", path.display()))?;

    reader
        .deserialize::<InstrumentRow>()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("Invalid row {} in {}", i + 1, path.display())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_assemble_value_query() {
        let command = assemble(&InstrumentRow::new("0", "TC1", "TCACTUALTEMP", "V"))
            .expect("V is recognized");
        assert_eq!(command.text(), "TC1:TCACTUALTEMP?@0");
        assert_eq!(command.kind(), CommandKind::Value);
    }

    #[test]
    fn test_assemble_setting() {
        let command = assemble(&InstrumentRow::new("0", "TC1", "TCADJTEMP=50", "A"))
            .expect("A is recognized");
        assert_eq!(command.text(), "TC1:TCADJTEMP=50@0");
        assert_eq!(command.kind(), CommandKind::Ack);
    }

    #[test]
    fn test_unrecognized_rows_are_dropped() {
        let rows = vec![
            InstrumentRow::new("0", "TC1", "TCACTUALTEMP", "V"),
            InstrumentRow::new("0", "TC1", "COMMENT", "#"),
            InstrumentRow::new("0", "TC1", "TCSAVE", "S"),
            InstrumentRow::new("0", "TC1", "TCADJTEMP=50", ""),
        ];

        let batch = assemble_batch(&rows);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].kind(), CommandKind::Value);
        assert_eq!(batch[1].text(), "TC1:TCSAVE@0");
    }

    #[test]
    fn test_load_csv() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile failed");
        writeln!(file, "Device,Module,Register,Type").expect("write failed");
        writeln!(file, "0, TC1, TCACTUALTEMP, V").expect("write failed");
        writeln!(file, "0,TC1,TCPIDTUNE=1,P").expect("write failed");
        writeln!(file, "0,TC1,NOTE,X").expect("write failed");
        file.flush().expect("flush failed");

        let rows = load_csv(file.path()).expect("load failed");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], InstrumentRow::new("0", "TC1", "TCACTUALTEMP", "V"));

        let batch = assemble_batch(&rows);
        assert_eq!(
            batch,
            vec![
                Command::query("0", "TC1", "TCACTUALTEMP"),
                Command::setting("0", "TC1", "TCPIDTUNE=1", CommandKind::Percent),
            ]
        );
    }

    #[test]
    fn test_load_csv_missing_file() {
        assert!(load_csv("/nonexistent/instruments.csv").is_err());
    }
}
