//! CSV rendering and multi-file merge

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use super::AssemblyError;
use crate::engine::ElementRecord;

/// Columns every element row starts with
pub const BASE_COLUMNS: [&str; 3] = ["type", "element_id", "text"];

/// A rectangular string table; empty strings are missing cells
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// One row per element.
    ///
    /// Columns are the base columns followed by the sorted union of the
    /// metadata keys present in `elements`.
    pub fn from_elements(elements: &[ElementRecord]) -> Self {
        let metadata_keys: BTreeSet<&str> = elements
            .iter()
            .flat_map(|e| e.metadata.keys().map(String::as_str))
            .collect();

        let headers: Vec<String> = BASE_COLUMNS
            .iter()
            .copied()
            .chain(metadata_keys.iter().copied())
            .map(str::to_string)
            .collect();

        let rows = elements
            .iter()
            .map(|element| {
                let mut row = vec![element.element_type.clone(), element.id.clone(), element.text.clone()];
                row.extend(
                    metadata_keys
                        .iter()
                        .map(|key| element.metadata.get(*key).map(cell).unwrap_or_default()),
                );
                row
            })
            .collect();

        Self { headers, rows }
    }

    pub fn parse(text: &str) -> Result<Self, AssemblyError> {
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| AssemblyError::Csv(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();

        let rows = reader
            .records()
            .map(|record| {
                record
                    .map(|r| r.iter().map(str::to_string).collect())
                    .map_err(|e| AssemblyError::Csv(e.to_string()))
            })
            .collect::<Result<_, _>>()?;

        Ok(Self { headers, rows })
    }

    pub fn to_csv_string(&self) -> Result<String, AssemblyError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.headers)
            .map_err(|e| AssemblyError::Csv(e.to_string()))?;
        for row in &self.rows {
            writer.write_record(row).map_err(|e| AssemblyError::Csv(e.to_string()))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| AssemblyError::Csv(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| AssemblyError::Csv(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Full outer join on every column the two tables share.
    ///
    /// Matching rows are combined, unmatched rows from either side are kept
    /// with blanks for the other side's columns. Left rows keep their order,
    /// unmatched right rows follow. With no shared columns nothing matches
    /// and the result is a plain union.
    pub fn outer_merge(&self, other: &CsvTable) -> CsvTable {
        let left_index: HashMap<&str, usize> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_str(), i))
            .collect();

        let shared: Vec<(usize, usize)> = other
            .headers
            .iter()
            .enumerate()
            .filter_map(|(j, h)| left_index.get(h.as_str()).map(|i| (*i, j)))
            .collect();
        let right_only: Vec<usize> = (0..other.headers.len())
            .filter(|j| !shared.iter().any(|(_, sj)| sj == j))
            .collect();

        let mut headers = self.headers.clone();
        headers.extend(right_only.iter().map(|j| other.headers[*j].clone()));

        // Right rows grouped by their shared-column key
        let mut by_key: HashMap<Vec<&str>, Vec<usize>> = HashMap::new();
        if !shared.is_empty() {
            for (r, row) in other.rows.iter().enumerate() {
                let key = shared.iter().map(|(_, j)| field(row, *j)).collect();
                by_key.entry(key).or_default().push(r);
            }
        }

        let mut matched = vec![false; other.rows.len()];
        let mut rows = Vec::with_capacity(self.rows.len() + other.rows.len());

        for left in &self.rows {
            let key: Vec<&str> = shared.iter().map(|(i, _)| field(left, *i)).collect();
            let matches = if shared.is_empty() { None } else { by_key.get(&key) };

            match matches {
                Some(indices) => {
                    for r in indices {
                        matched[*r] = true;
                        let right = &other.rows[*r];
                        let mut row = padded(left, self.headers.len());
                        row.extend(right_only.iter().map(|j| field(right, *j).to_string()));
                        rows.push(row);
                    }
                }
                None => {
                    let mut row = padded(left, self.headers.len());
                    row.resize(headers.len(), String::new());
                    rows.push(row);
                }
            }
        }

        for (r, right) in other.rows.iter().enumerate() {
            if matched[r] {
                continue;
            }
            let mut row = vec![String::new(); headers.len()];
            for (i, j) in &shared {
                row[*i] = field(right, *j).to_string();
            }
            for (offset, j) in right_only.iter().enumerate() {
                row[self.headers.len() + offset] = field(right, *j).to_string();
            }
            rows.push(row);
        }

        CsvTable { headers, rows }
    }
}

/// Render one file's elements as CSV text
pub fn render_csv(elements: &[ElementRecord]) -> Result<String, AssemblyError> {
    CsvTable::from_elements(elements).to_csv_string()
}

/// Merge several files' CSV renderings into one table
pub fn merge_csv<S: AsRef<str>>(documents: &[S]) -> Result<String, AssemblyError> {
    let mut tables = documents.iter().map(|d| CsvTable::parse(d.as_ref()));
    let first = match tables.next() {
        Some(table) => table?,
        None => return Ok(String::new()),
    };

    let merged = tables.try_fold(first, |acc, table| table.map(|t| acc.outer_merge(&t)))?;
    merged.to_csv_string()
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or("")
}

fn padded(row: &[String], width: usize) -> Vec<String> {
    let mut row = row.to_vec();
    row.resize(width, String::new());
    row
}
