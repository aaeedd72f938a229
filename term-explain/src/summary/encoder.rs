//! Dictionary encoding of categorical attribute columns.
//!
//! Every distinct `(column, value)` pair is mapped to a dense integer [`Code`].
//! Codes are unique across columns, so a single code is enough to identify a
//! predicate such as `region=EU`. Each input row becomes an [`EncodedRow`]: the
//! ascending list of codes for its non-null attributes.
//!
//! Columns are dictionary-encoded in parallel, each into its own local
//! dictionary in first-seen order. The local dictionaries are then merged in
//! column order, which makes the result identical to a sequential
//! column-major pass regardless of thread scheduling.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{ExplainError, Result};

/// Integer code identifying one `(column, value)` pair.
pub type Code = u32;

/// A named attribute column to be encoded.
#[derive(Debug, Clone)]
pub struct AttributeColumn<S> {
    /// Column name, used when decoding explanations.
    pub name: String,
    /// Raw values, `None` for nulls.
    pub values: Vec<Option<S>>,
}

impl<S: AsRef<str>> AttributeColumn<S> {
    /// Creates a new attribute column.
    pub fn new(name: impl Into<String>, values: Vec<Option<S>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Number of rows in this column.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One encoded row: ascending codes of the row's non-null attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodedRow {
    codes: Vec<Code>,
}

impl EncodedRow {
    /// Creates a row from codes, sorting them.
    pub fn new(mut codes: Vec<Code>) -> Self {
        codes.sort_unstable();
        codes.dedup();
        Self { codes }
    }

    /// The row's codes in ascending order.
    pub fn codes(&self) -> &[Code] {
        &self.codes
    }

    /// Number of non-null attributes in the row.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Returns true if every attribute of the row was null.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// The encoded dataset: one [`EncodedRow`] per input row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedMatrix {
    rows: Vec<EncodedRow>,
}

impl EncodedMatrix {
    /// Creates a matrix from already encoded rows.
    pub fn from_rows(rows: Vec<EncodedRow>) -> Self {
        Self { rows }
    }

    /// All rows.
    pub fn rows(&self) -> &[EncodedRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the matrix holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Largest code present plus one, i.e. the size of a code-indexed table.
    pub fn code_space(&self) -> usize {
        self.rows
            .iter()
            .filter_map(|row| row.codes().last())
            .max()
            .map(|max| *max as usize + 1)
            .unwrap_or(0)
    }
}

/// Per-column dictionary built in parallel before codes are assigned.
struct LocalDictionary<'a> {
    distinct: Vec<&'a str>,
    row_ids: Vec<Option<u32>>,
}

impl<'a> LocalDictionary<'a> {
    fn build<S: AsRef<str>>(values: &'a [Option<S>]) -> Self {
        let mut lookup: HashMap<&'a str, u32> = HashMap::new();
        let mut distinct = Vec::new();
        let row_ids = values
            .iter()
            .map(|value| {
                value.as_ref().map(|v| {
                    let v = v.as_ref();
                    *lookup.entry(v).or_insert_with(|| {
                        distinct.push(v);
                        (distinct.len() - 1) as u32
                    })
                })
            })
            .collect();
        Self { distinct, row_ids }
    }
}

/// Maps raw attribute values to dense, column-scoped integer codes.
///
/// The mapping is stable for the lifetime of the encoder: encoding a value
/// that has been seen before always returns the code it was first given.
#[derive(Debug, Clone, Default)]
pub struct AttributeEncoder {
    column_names: Vec<String>,
    dictionaries: Vec<HashMap<String, Code>>,
    reverse: Vec<(usize, String)>,
}

impl AttributeEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes the given columns into one [`EncodedRow`] per input row.
    ///
    /// Codes are assigned densely in first-seen order within each column,
    /// columns in input order. The first call fixes the column layout; later
    /// calls must supply the same columns and reuse existing codes.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::Encoding`] if no columns are supplied, if the
    /// columns have different row counts, or if the column layout differs
    /// from the one this encoder was first used with.
    #[instrument(skip_all, fields(columns = columns.len()))]
    pub fn encode_attributes<S>(&mut self, columns: &[AttributeColumn<S>]) -> Result<EncodedMatrix>
    where
        S: AsRef<str> + Sync,
    {
        let Some(first) = columns.first() else {
            return Err(ExplainError::encoding("no attribute columns supplied"));
        };
        let num_rows = first.len();
        if let Some(bad) = columns.iter().find(|c| c.len() != num_rows) {
            return Err(ExplainError::encoding(format!(
                "column '{}' has {} rows, expected {} (from column '{}')",
                bad.name,
                bad.len(),
                num_rows,
                first.name
            )));
        }
        self.bind_columns(columns)?;

        let locals: Vec<LocalDictionary<'_>> = columns
            .par_iter()
            .map(|column| LocalDictionary::build(&column.values))
            .collect();

        let mut translations: Vec<Vec<Code>> = Vec::with_capacity(locals.len());
        for (column_idx, local) in locals.iter().enumerate() {
            let mut translation = Vec::with_capacity(local.distinct.len());
            for value in &local.distinct {
                translation.push(self.code_for(column_idx, value)?);
            }
            translations.push(translation);
        }

        let rows: Vec<EncodedRow> = (0..num_rows)
            .into_par_iter()
            .map(|row_idx| {
                let codes = locals
                    .iter()
                    .zip(&translations)
                    .filter_map(|(local, translation)| {
                        local.row_ids[row_idx].map(|id| translation[id as usize])
                    })
                    .collect();
                EncodedRow::new(codes)
            })
            .collect();

        debug!(
            rows = num_rows,
            distinct_codes = self.num_codes(),
            "Encoded attribute columns"
        );
        Ok(EncodedMatrix { rows })
    }

    fn bind_columns<S>(&mut self, columns: &[AttributeColumn<S>]) -> Result<()> {
        if self.column_names.is_empty() {
            self.column_names = columns.iter().map(|c| c.name.clone()).collect();
            self.dictionaries = vec![HashMap::new(); columns.len()];
            return Ok(());
        }
        let same_layout = self.column_names.len() == columns.len()
            && self
                .column_names
                .iter()
                .zip(columns)
                .all(|(name, column)| *name == column.name);
        if same_layout {
            Ok(())
        } else {
            Err(ExplainError::encoding(format!(
                "encoder is bound to columns {:?}",
                self.column_names
            )))
        }
    }

    fn code_for(&mut self, column_idx: usize, value: &str) -> Result<Code> {
        if let Some(code) = self.dictionaries[column_idx].get(value) {
            return Ok(*code);
        }
        let code = Code::try_from(self.reverse.len())
            .map_err(|_| ExplainError::encoding("attribute code space exhausted"))?;
        self.dictionaries[column_idx].insert(value.to_string(), code);
        self.reverse.push((column_idx, value.to_string()));
        Ok(code)
    }

    /// Looks up the code of a value without assigning one.
    pub fn code_of(&self, column: &str, value: &str) -> Option<Code> {
        let idx = self.column_names.iter().position(|c| c == column)?;
        self.dictionaries[idx].get(value).copied()
    }

    /// Returns the `(column name, value)` pair for a code.
    pub fn decode(&self, code: Code) -> Option<(&str, &str)> {
        self.reverse
            .get(code as usize)
            .map(|(column, value)| (self.column_names[*column].as_str(), value.as_str()))
    }

    /// Returns the column index a code belongs to.
    pub fn column_of(&self, code: Code) -> Option<usize> {
        self.reverse.get(code as usize).map(|(column, _)| *column)
    }

    /// Column index for every code, indexed by code.
    pub fn code_columns(&self) -> Vec<usize> {
        self.reverse.iter().map(|(column, _)| *column).collect()
    }

    /// Names of the encoded columns, in input order.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of codes assigned so far.
    pub fn num_codes(&self) -> usize {
        self.reverse.len()
    }
}
