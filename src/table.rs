//! Tolerant comma-delimited table parser.
//!
//! The first line is the header. Rows whose field count differs from the
//! header are dropped; nothing here ever fails. Values stay raw strings.

use std::collections::HashMap;

use crate::logging::{log, obj, v_num, Domain, Level};

pub const DELIMITER: char = ',';

/// One data row keyed by header name.
pub type RawRecord = HashMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRecord>,
    /// Data lines discarded for a field-count mismatch
    pub dropped_rows: usize,
}

impl ParsedTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parse delimited text into field-keyed records.
pub fn parse_table(text: &str) -> Vec<RawRecord> {
    parse_table_detailed(text).rows
}

/// Same as [`parse_table`], keeping the header and the dropped-row count.
pub fn parse_table_detailed(text: &str) -> ParsedTable {
    let lines: Vec<&str> = text.trim().split('\n').collect();
    if lines.len() < 2 {
        return ParsedTable::default();
    }

    let headers = split_line(lines[0]);
    let mut rows = Vec::with_capacity(lines.len() - 1);
    let mut dropped_rows = 0usize;

    for (idx, line) in lines.iter().enumerate().skip(1) {
        let values = split_line(line);
        if values.len() != headers.len() {
            dropped_rows += 1;
            log(
                Level::Debug,
                Domain::Parse,
                "row_dropped",
                obj(&[
                    ("line", v_num((idx + 1) as f64)),
                    ("fields", v_num(values.len() as f64)),
                    ("expected", v_num(headers.len() as f64)),
                ]),
            );
            continue;
        }
        rows.push(headers.iter().cloned().zip(values).collect());
    }

    ParsedTable {
        headers,
        rows,
        dropped_rows,
    }
}

fn split_line(line: &str) -> Vec<String> {
    line.split(DELIMITER).map(|s| s.trim().to_string()).collect()
}
