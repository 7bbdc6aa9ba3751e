// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Page model and exchange wire codec.
//!
//! Responsibilities:
//! - Defines the immutable columnar page and the closed set of column types the
//!   exchange carries between fragments.
//! - Encodes/decodes runs of pages as Arrow IPC stream payloads, validating the
//!   decoded batches against the fragment schema contract.

use std::io::Cursor;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;

/// Physical encoding of one exchange column.
///
/// The ordered list of these is the schema contract between the producing and
/// consuming fragments; both sides must agree exactly, there is no negotiation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ColumnType {
    /// Fixed-width 64-bit signed integer.
    BigInt,
    /// Fixed-width 64-bit float.
    Double,
    /// Variable-length utf8 string.
    Varchar,
    /// Variable-length opaque bytes.
    VarBinary,
}

impl ColumnType {
    pub fn is_fixed_width(self) -> bool {
        matches!(self, ColumnType::BigInt | ColumnType::Double)
    }

    pub fn to_arrow(self) -> DataType {
        match self {
            ColumnType::BigInt => DataType::Int64,
            ColumnType::Double => DataType::Float64,
            ColumnType::Varchar => DataType::Utf8,
            ColumnType::VarBinary => DataType::Binary,
        }
    }

    pub fn from_arrow(data_type: &DataType) -> Result<Self, String> {
        match data_type {
            DataType::Int64 => Ok(ColumnType::BigInt),
            DataType::Float64 => Ok(ColumnType::Double),
            DataType::Utf8 => Ok(ColumnType::Varchar),
            DataType::Binary => Ok(ColumnType::VarBinary),
            other => Err(format!("unsupported exchange column type: {other:?}")),
        }
    }
}

/// Build the Arrow schema for an ordered exchange column list.
pub fn schema_to_arrow(columns: &[ColumnType]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| Field::new(format!("c{i}"), c.to_arrow(), true))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Check a decoded batch against the expected column list.
///
/// Field names carry no meaning on the wire; only arity and data types are the
/// contract. A mismatch is a configuration error on one side of the exchange.
pub fn validate_batch_schema(expected: &[ColumnType], batch: &RecordBatch) -> Result<(), String> {
    let schema = batch.schema();
    if schema.fields().len() != expected.len() {
        return Err(format!(
            "exchange schema mismatch: expected {} columns, payload has {}",
            expected.len(),
            schema.fields().len()
        ));
    }
    for (i, (field, column)) in schema.fields().iter().zip(expected.iter()).enumerate() {
        if field.data_type() != &column.to_arrow() {
            return Err(format!(
                "exchange schema mismatch at column {}: expected {:?}, payload has {:?}",
                i,
                column.to_arrow(),
                field.data_type()
            ));
        }
    }
    Ok(())
}

/// An immutable columnar batch of rows, the unit of exchange between operators
/// and across the network.
#[derive(Debug, Clone)]
pub struct Page {
    batch: RecordBatch,
    data_size: usize,
}

impl Page {
    /// Wrap a locally produced batch. `data_size` is the estimated in-memory
    /// Arrow size; pages decoded from the wire carry their serialized share
    /// instead (see [`decode_pages`]).
    pub fn new(batch: RecordBatch) -> Self {
        let data_size = batch.get_array_memory_size();
        Self { batch, data_size }
    }

    pub fn with_data_size(batch: RecordBatch, data_size: usize) -> Self {
        Self { batch, data_size }
    }

    pub fn position_count(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }
}

/// Encode pages to one Arrow IPC stream payload.
pub fn encode_pages(pages: &[Page]) -> Result<Vec<u8>, String> {
    if pages.is_empty() {
        return Ok(vec![]);
    }

    let mut buffer = Vec::new();

    // Use the schema from the first page.
    let schema = pages[0].schema();
    for (i, p) in pages.iter().enumerate().skip(1) {
        if p.schema().as_ref() != schema.as_ref() {
            return Err(format!(
                "exchange encode schema mismatch at page index {}: expected={:?} actual={:?}",
                i,
                schema,
                p.schema()
            ));
        }
    }
    let mut writer = StreamWriter::try_new(&mut buffer, &schema)
        .map_err(|e| format!("failed to create Arrow IPC writer: {e}"))?;

    for page in pages {
        writer
            .write(&page.batch)
            .map_err(|e| format!("failed to write batch: {e}"))?;
    }

    writer
        .finish()
        .map_err(|e| format!("failed to finish Arrow IPC writer: {e}"))?;

    Ok(buffer)
}

/// Decode an Arrow IPC stream payload into pages, validating every batch
/// against the expected column list.
///
/// The payload byte count is apportioned across the decoded pages by row count
/// so the pages' `data_size` sums back to the transferred bytes.
pub fn decode_pages(bytes: &[u8], expected: &[ColumnType]) -> Result<Vec<Page>, String> {
    if bytes.is_empty() {
        return Ok(vec![]);
    }

    let mut cursor = Cursor::new(bytes);
    let reader = StreamReader::try_new(&mut cursor, None)
        .map_err(|e| format!("failed to create Arrow IPC reader: {e}"))?;

    let mut batches = Vec::new();
    for batch_result in reader {
        let batch = batch_result.map_err(|e| format!("failed to read batch: {e}"))?;
        validate_batch_schema(expected, &batch)?;
        batches.push(batch);
    }

    let total_rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    let payload_bytes = bytes.len();
    let count = batches.len();
    let mut pages = Vec::with_capacity(count);
    let mut assigned = 0usize;
    for (i, batch) in batches.into_iter().enumerate() {
        let data_size = if i + 1 == count {
            payload_bytes - assigned
        } else if total_rows > 0 {
            payload_bytes * batch.num_rows() / total_rows
        } else {
            payload_bytes / count
        };
        assigned += data_size;
        pages.push(Page::with_data_size(batch, data_size));
    }

    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array, StringArray};

    fn test_page(values: &[i64], names: &[&str]) -> Page {
        let schema = schema_to_arrow(&[ColumnType::BigInt, ColumnType::Varchar]);
        let ids = Arc::new(Int64Array::from(values.to_vec())) as ArrayRef;
        let labels = Arc::new(StringArray::from(names.to_vec())) as ArrayRef;
        let batch = RecordBatch::try_new(schema, vec![ids, labels]).expect("build test batch");
        Page::new(batch)
    }

    #[test]
    fn decode_apportions_payload_bytes_by_rows() {
        let columns = [ColumnType::BigInt, ColumnType::Varchar];
        let pages = vec![
            test_page(&[1, 2, 3], &["a", "b", "c"]),
            test_page(&[4], &["d"]),
        ];
        let payload = encode_pages(&pages).expect("encode");
        let decoded = decode_pages(&payload, &columns).expect("decode");
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].position_count(), 3);
        assert_eq!(decoded[1].position_count(), 1);
        let total: usize = decoded.iter().map(|p| p.data_size()).sum();
        assert_eq!(total, payload.len());
        assert!(decoded[0].data_size() >= decoded[1].data_size());
    }

    #[test]
    fn decode_rejects_schema_mismatch() {
        let pages = vec![test_page(&[1], &["a"])];
        let payload = encode_pages(&pages).expect("encode");
        let err = decode_pages(&payload, &[ColumnType::Double, ColumnType::Varchar])
            .expect_err("mismatched column type must fail");
        assert!(err.contains("schema mismatch"), "unexpected error: {err}");

        let err = decode_pages(&payload, &[ColumnType::BigInt])
            .expect_err("mismatched column count must fail");
        assert!(err.contains("expected 1 columns"), "unexpected error: {err}");
    }

    #[test]
    fn column_type_families() {
        assert!(ColumnType::BigInt.is_fixed_width());
        assert!(ColumnType::Double.is_fixed_width());
        assert!(!ColumnType::Varchar.is_fixed_width());
        assert!(!ColumnType::VarBinary.is_fixed_width());
        assert!(ColumnType::from_arrow(&DataType::Int32).is_err());
    }
}
