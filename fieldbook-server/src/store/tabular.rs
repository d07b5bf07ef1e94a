//! Columnar container format for tabular artifacts
//!
//! Tables are stored one file per artifact:
//!
//! ```text
//! bytes 0..8    magic "FBTAB\x01\x00\x00"
//! bytes 8..12   u32 LE header length H
//! bytes 12..12+H  header JSON: schema, row count, column chunk directory
//! remainder     column chunks, each a JSON array of values
//! ```
//!
//! Chunk offsets in the directory are relative to the end of the header, so
//! readers seek straight to the columns they need: sorting reads one column,
//! statistics read one column at a time, and a page materializes only the
//! requested rows. Files are immutable once committed.

use fieldbook_common::model::{ColumnSpec, ColumnType, TableSchema};
use fieldbook_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"FBTAB\x01\x00\x00";

/// In-memory column-major table
#[derive(Debug, Clone)]
pub struct TableData {
    pub schema: TableSchema,
    /// One vector per schema column, all of equal length
    pub columns: Vec<Vec<Value>>,
}

impl TableData {
    pub fn row_count(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    /// Build from an array of JSON objects (records orientation)
    ///
    /// Column order follows first appearance across the records; keys absent
    /// from a record become nulls.
    pub fn from_records(rows: &[Value]) -> Result<TableData> {
        let mut names: Vec<String> = Vec::new();
        for row in rows {
            let obj = row.as_object().ok_or_else(|| {
                Error::InvalidInput("table records must be JSON objects".to_string())
            })?;
            for key in obj.keys() {
                if !names.iter().any(|n| n == key) {
                    names.push(key.clone());
                }
            }
        }
        if names.is_empty() {
            return Err(Error::InvalidInput(
                "table has no columns".to_string(),
            ));
        }

        let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); names.len()];
        for row in rows {
            let obj = row.as_object().ok_or_else(|| {
                Error::InvalidInput("table records must be JSON objects".to_string())
            })?;
            for (i, name) in names.iter().enumerate() {
                columns[i].push(obj.get(name).cloned().unwrap_or(Value::Null));
            }
        }

        let schema = TableSchema {
            columns: names
                .iter()
                .zip(columns.iter())
                .map(|(name, values)| ColumnSpec {
                    name: name.clone(),
                    dtype: infer_dtype(values),
                })
                .collect(),
        };
        Ok(TableData { schema, columns })
    }

    /// Build from an object of equal-length arrays (columnar orientation)
    pub fn from_columns(obj: &serde_json::Map<String, Value>) -> Result<TableData> {
        let mut names = Vec::new();
        let mut columns: Vec<Vec<Value>> = Vec::new();
        let mut len: Option<usize> = None;
        for (name, value) in obj {
            let items = value.as_array().ok_or_else(|| {
                Error::InvalidInput(format!("column '{}' is not an array", name))
            })?;
            match len {
                None => len = Some(items.len()),
                Some(n) if n != items.len() => {
                    return Err(Error::InvalidInput(format!(
                        "column '{}' has {} values, expected {}",
                        name,
                        items.len(),
                        n
                    )))
                }
                Some(_) => {}
            }
            names.push(name.clone());
            columns.push(items.clone());
        }
        if names.is_empty() {
            return Err(Error::InvalidInput("table has no columns".to_string()));
        }
        let schema = TableSchema {
            columns: names
                .iter()
                .zip(columns.iter())
                .map(|(name, values)| ColumnSpec {
                    name: name.clone(),
                    dtype: infer_dtype(values),
                })
                .collect(),
        };
        Ok(TableData { schema, columns })
    }

    /// Drop rows beyond `max_rows`, returning true when rows were dropped
    pub fn truncate_rows(&mut self, max_rows: usize) -> bool {
        if self.row_count() <= max_rows {
            return false;
        }
        for column in &mut self.columns {
            column.truncate(max_rows);
        }
        true
    }

    /// Row `i` as a JSON object in schema column order
    pub fn row_object(&self, i: usize) -> Value {
        let mut obj = serde_json::Map::new();
        for (spec, column) in self.schema.columns.iter().zip(&self.columns) {
            obj.insert(
                spec.name.clone(),
                column.get(i).cloned().unwrap_or(Value::Null),
            );
        }
        Value::Object(obj)
    }
}

/// Infer a column type from its values, ignoring nulls
fn infer_dtype(values: &[Value]) -> ColumnType {
    let mut saw_any = false;
    let mut all_bool = true;
    let mut all_number = true;
    let mut all_int = true;
    let mut all_string = true;
    for value in values {
        match value {
            Value::Null => continue,
            Value::Bool(_) => {
                saw_any = true;
                all_number = false;
                all_int = false;
                all_string = false;
            }
            Value::Number(n) => {
                saw_any = true;
                all_bool = false;
                all_string = false;
                if !n.is_i64() && !n.is_u64() {
                    all_int = false;
                }
            }
            Value::String(_) => {
                saw_any = true;
                all_bool = false;
                all_number = false;
                all_int = false;
            }
            _ => {
                saw_any = true;
                all_bool = false;
                all_number = false;
                all_int = false;
                all_string = false;
            }
        }
    }
    if !saw_any {
        ColumnType::Json
    } else if all_bool {
        ColumnType::Bool
    } else if all_int {
        ColumnType::Int
    } else if all_number {
        ColumnType::Float
    } else if all_string {
        ColumnType::Text
    } else {
        ColumnType::Json
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColumnChunk {
    name: String,
    offset: u64,
    len: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableHeader {
    schema: TableSchema,
    row_count: u64,
    columns: Vec<ColumnChunk>,
}

/// Serialize a table into the container layout, returning the bytes
pub fn encode(table: &TableData) -> Result<Vec<u8>> {
    let mut chunks = Vec::with_capacity(table.columns.len());
    let mut data = Vec::new();
    for (spec, column) in table.schema.columns.iter().zip(&table.columns) {
        let blob = serde_json::to_vec(column)?;
        chunks.push(ColumnChunk {
            name: spec.name.clone(),
            offset: data.len() as u64,
            len: blob.len() as u64,
        });
        data.extend_from_slice(&blob);
    }
    let header = TableHeader {
        schema: table.schema.clone(),
        row_count: table.row_count() as u64,
        columns: chunks,
    };
    let header_bytes = serde_json::to_vec(&header)?;

    let mut out = Vec::with_capacity(12 + header_bytes.len() + data.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&data);
    Ok(out)
}

/// Write a table to `path` atomically (temp file + rename)
pub fn write(path: &Path, table: &TableData) -> Result<u64> {
    let bytes = encode(table)?;
    let tmp = temp_sibling(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_data()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(bytes.len() as u64)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".tmp-");
    if let Some(file_name) = path.file_name() {
        name.push(file_name);
    }
    path.with_file_name(name)
}

/// Open handle over a stored table; reads the header only
#[derive(Debug)]
pub struct TableFile {
    path: PathBuf,
    header: TableHeader,
    data_start: u64,
}

/// Per-column summary statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStats {
    pub name: String,
    pub dtype: ColumnType,
    pub count: u64,
    pub nulls: u64,
    pub distinct: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
}

impl TableFile {
    pub fn open(path: &Path) -> Result<TableFile> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::InvalidInput(format!(
                "{} is not a tabular artifact",
                path.display()
            )));
        }
        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let mut header_bytes = vec![0u8; header_len];
        file.read_exact(&mut header_bytes)?;
        let header: TableHeader = serde_json::from_slice(&header_bytes)?;
        Ok(TableFile {
            path: path.to_path_buf(),
            header,
            data_start: 12 + header_len as u64,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.header.schema
    }

    pub fn row_count(&self) -> u64 {
        self.header.row_count
    }

    /// Read one column's values by seeking to its chunk
    pub fn read_column(&self, name: &str) -> Result<Vec<Value>> {
        let chunk = self
            .header
            .columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::NotFound(format!("column '{}'", name)))?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.data_start + chunk.offset))?;
        let mut blob = vec![0u8; chunk.len as usize];
        file.read_exact(&mut blob)?;
        let values: Vec<Value> = serde_json::from_slice(&blob)?;
        if values.len() != self.header.row_count as usize {
            return Err(Error::InvalidInput(format!(
                "column '{}' length {} does not match row count {}",
                name,
                values.len(),
                self.header.row_count
            )));
        }
        Ok(values)
    }

    /// Row order for the given sort, as indices into the stored columns
    ///
    /// No sort column means canonical (insertion) order. Sorting is stable
    /// with the original index as tie-break, so identical `(offset, limit,
    /// sort)` requests always return the same slice.
    fn row_order(&self, sort: Option<&str>, ascending: bool) -> Result<Vec<usize>> {
        let n = self.header.row_count as usize;
        let mut order: Vec<usize> = (0..n).collect();
        if let Some(column_name) = sort {
            let values = self.read_column(column_name)?;
            order.sort_by(|&a, &b| {
                let cmp = cmp_values(&values[a], &values[b]);
                if ascending {
                    cmp
                } else {
                    cmp.reverse()
                }
            });
        }
        Ok(order)
    }

    /// Read a deterministic page of rows as JSON objects
    pub fn page(
        &self,
        offset: usize,
        limit: usize,
        sort: Option<&str>,
        ascending: bool,
    ) -> Result<Vec<Value>> {
        let order = self.row_order(sort, ascending)?;
        let slice: Vec<usize> = order.into_iter().skip(offset).take(limit).collect();
        if slice.is_empty() {
            return Ok(Vec::new());
        }

        let mut columns = Vec::with_capacity(self.header.schema.columns.len());
        for spec in &self.header.schema.columns {
            columns.push(self.read_column(&spec.name)?);
        }

        let mut rows = Vec::with_capacity(slice.len());
        for &i in &slice {
            let mut obj = serde_json::Map::new();
            for (spec, column) in self.header.schema.columns.iter().zip(&columns) {
                obj.insert(spec.name.clone(), column[i].clone());
            }
            rows.push(Value::Object(obj));
        }
        Ok(rows)
    }

    /// Per-column summaries, computed one column at a time
    pub fn stats(&self) -> Result<Vec<ColumnStats>> {
        let mut out = Vec::with_capacity(self.header.schema.columns.len());
        for spec in &self.header.schema.columns {
            let values = self.read_column(&spec.name)?;
            let mut count = 0u64;
            let mut nulls = 0u64;
            let mut distinct = HashSet::new();
            let mut min: Option<&Value> = None;
            let mut max: Option<&Value> = None;
            let mut sum = 0.0f64;
            let mut numeric = 0u64;
            for value in &values {
                if value.is_null() {
                    nulls += 1;
                    continue;
                }
                count += 1;
                distinct.insert(value.to_string());
                min = Some(match min {
                    Some(m) if cmp_values(m, value) != Ordering::Greater => m,
                    _ => value,
                });
                max = Some(match max {
                    Some(m) if cmp_values(m, value) != Ordering::Less => m,
                    _ => value,
                });
                if let Some(f) = value.as_f64() {
                    sum += f;
                    numeric += 1;
                }
            }
            out.push(ColumnStats {
                name: spec.name.clone(),
                dtype: spec.dtype,
                count,
                nulls,
                distinct: distinct.len() as u64,
                min: min.cloned(),
                max: max.cloned(),
                mean: if numeric > 0 {
                    Some(sum / numeric as f64)
                } else {
                    None
                },
            });
        }
        Ok(out)
    }

    /// Render the full table as CSV in canonical row order
    pub fn to_csv(&self) -> Result<String> {
        let mut columns = Vec::with_capacity(self.header.schema.columns.len());
        for spec in &self.header.schema.columns {
            columns.push(self.read_column(&spec.name)?);
        }
        let mut out = String::new();
        let names: Vec<&str> = self
            .header
            .schema
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        out.push_str(
            &names
                .iter()
                .map(|n| csv_field(n))
                .collect::<Vec<_>>()
                .join(","),
        );
        out.push('\n');
        for i in 0..self.header.row_count as usize {
            let row: Vec<String> = columns
                .iter()
                .map(|column| csv_value(&column[i]))
                .collect();
            out.push_str(&row.join(","));
            out.push('\n');
        }
        Ok(out)
    }
}

/// Total order over JSON values for sorting and min/max
///
/// Nulls sort after every non-null value; mixed types group by type rank.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Bool(_) => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Array(_) | Value::Object(_) => 3,
            Value::Null => 4,
        }
    }
    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Number(x), Value::Number(y)) => {
                let xf = x.as_f64().unwrap_or(f64::NAN);
                let yf = y.as_f64().unwrap_or(f64::NAN);
                xf.total_cmp(&yf)
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Null, Value::Null) => Ordering::Equal,
            _ => a.to_string().cmp(&b.to_string()),
        },
        other => other,
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') || raw.contains('\r') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => csv_field(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => csv_field(&other.to_string()),
    }
}
