//! Row-membership index used by the candidate search.
//!
//! For every code the index holds the set of rows carrying it, either as a
//! sorted posting list or as a bitmap. A candidate's matching rows are the
//! intersection of its codes' row sets; the search computes them
//! incrementally by intersecting a parent's rows with one more code.

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::encoder::{Code, EncodedMatrix};

/// Bitmaps are only chosen automatically below this many bytes.
const AUTO_BITMAP_BUDGET_BYTES: usize = 64 * 1024 * 1024;

/// Posting lists spend 32 bits per entry, bitmaps one bit per row.
const POSTING_ENTRY_BITS: usize = 32;

/// Posting lists store row ids as `u32`; larger tables always use bitmaps.
const MAX_POSTING_ROWS: usize = u32::MAX as usize;

/// How row sets are represented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembershipStrategy {
    /// Pick based on row count, code count and density.
    #[default]
    Auto,
    /// Sorted row-id lists intersected by merge.
    Postings,
    /// One bitmap per code intersected word by word.
    Bitmap,
}

/// A set of row ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSet {
    /// Ascending row ids.
    Postings(Vec<u32>),
    /// Bit `i` set when row `i` is a member.
    Bitmap(BitVec<u64, Lsb0>),
}

impl RowSet {
    /// Number of rows in the set.
    pub fn len(&self) -> usize {
        match self {
            RowSet::Postings(rows) => rows.len(),
            RowSet::Bitmap(bits) => bits.count_ones(),
        }
    }

    /// Returns true if the set has no rows.
    pub fn is_empty(&self) -> bool {
        match self {
            RowSet::Postings(rows) => rows.is_empty(),
            RowSet::Bitmap(bits) => bits.not_any(),
        }
    }

    /// Intersects two sets of the same representation.
    pub fn intersect(&self, other: &RowSet) -> RowSet {
        match (self, other) {
            (RowSet::Postings(a), RowSet::Postings(b)) => RowSet::Postings(merge_intersect(a, b)),
            (RowSet::Bitmap(a), RowSet::Bitmap(b)) => {
                let mut out = a.clone();
                for (word, other) in out.as_raw_mut_slice().iter_mut().zip(b.as_raw_slice()) {
                    *word &= *other;
                }
                RowSet::Bitmap(out)
            }
            (RowSet::Postings(a), RowSet::Bitmap(b)) | (RowSet::Bitmap(b), RowSet::Postings(a)) => {
                RowSet::Postings(
                    a.iter()
                        .copied()
                        .filter(|row| b.get(*row as usize).is_some_and(|bit| *bit))
                        .collect(),
                )
            }
        }
    }

    /// Calls `f` with every row id in ascending order.
    pub fn for_each_row(&self, mut f: impl FnMut(usize)) {
        match self {
            RowSet::Postings(rows) => rows.iter().for_each(|row| f(*row as usize)),
            RowSet::Bitmap(bits) => bits.iter_ones().for_each(f),
        }
    }

    /// Row ids in ascending order.
    pub fn to_vec(&self) -> Vec<usize> {
        let mut rows = Vec::with_capacity(self.len());
        self.for_each_row(|row| rows.push(row));
        rows
    }
}

fn merge_intersect(a: &[u32], b: &[u32]) -> Vec<u32> {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut out = Vec::with_capacity(short.len());
    let (mut i, mut j) = (0, 0);
    while i < short.len() && j < long.len() {
        match short[i].cmp(&long[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(short[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Inverted index from code to the rows carrying it.
#[derive(Debug, Clone)]
pub struct MembershipIndex {
    strategy: MembershipStrategy,
    sets: Vec<RowSet>,
}

impl MembershipIndex {
    /// Builds the index over an encoded matrix with `code_space` codes.
    pub fn build(matrix: &EncodedMatrix, code_space: usize, strategy: MembershipStrategy) -> Self {
        let num_rows = matrix.num_rows();
        let entries: usize = matrix.rows().iter().map(|r| r.len()).sum();
        let mut strategy = Self::resolve(strategy, num_rows, code_space, entries);

        let sets = match strategy {
            MembershipStrategy::Bitmap => build_bitmaps(matrix, code_space),
            _ => build_postings(matrix, code_space).unwrap_or_else(|| {
                strategy = MembershipStrategy::Bitmap;
                build_bitmaps(matrix, code_space)
            }),
        };

        debug!(?strategy, num_rows, code_space, entries, "Built membership index");
        Self { strategy, sets }
    }

    fn resolve(
        strategy: MembershipStrategy,
        num_rows: usize,
        code_space: usize,
        entries: usize,
    ) -> MembershipStrategy {
        match strategy {
            _ if num_rows > MAX_POSTING_ROWS => MembershipStrategy::Bitmap,
            MembershipStrategy::Auto => {
                let bitmap_bits = num_rows.saturating_mul(code_space);
                let posting_bits = entries.saturating_mul(POSTING_ENTRY_BITS);
                if bitmap_bits / 8 <= AUTO_BITMAP_BUDGET_BYTES && bitmap_bits <= posting_bits {
                    MembershipStrategy::Bitmap
                } else {
                    MembershipStrategy::Postings
                }
            }
            explicit => explicit,
        }
    }

    /// The representation actually in use.
    pub fn strategy(&self) -> MembershipStrategy {
        self.strategy
    }

    /// Rows carrying `code`.
    pub fn rows_of(&self, code: Code) -> &RowSet {
        &self.sets[code as usize]
    }

    /// Number of indexed codes.
    pub fn code_space(&self) -> usize {
        self.sets.len()
    }
}

fn build_bitmaps(matrix: &EncodedMatrix, code_space: usize) -> Vec<RowSet> {
    let mut bitmaps = vec![bitvec![u64, Lsb0; 0; matrix.num_rows()]; code_space];
    for (row_idx, row) in matrix.rows().iter().enumerate() {
        for code in row.codes() {
            bitmaps[*code as usize].set(row_idx, true);
        }
    }
    bitmaps.into_iter().map(RowSet::Bitmap).collect()
}

/// Returns `None` if a row id does not fit in a posting entry.
fn build_postings(matrix: &EncodedMatrix, code_space: usize) -> Option<Vec<RowSet>> {
    let mut postings = vec![Vec::new(); code_space];
    for (row_idx, row) in matrix.rows().iter().enumerate() {
        let row_id = u32::try_from(row_idx).ok()?;
        for code in row.codes() {
            postings[*code as usize].push(row_id);
        }
    }
    Some(postings.into_iter().map(RowSet::Postings).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::encoder::EncodedRow;

    fn matrix() -> EncodedMatrix {
        EncodedMatrix::from_rows(vec![
            EncodedRow::new(vec![0, 2]),
            EncodedRow::new(vec![1, 2]),
            EncodedRow::new(vec![0, 3]),
            EncodedRow::new(vec![0, 2]),
        ])
    }

    #[test]
    fn test_postings_and_bitmaps_agree() {
        let postings = MembershipIndex::build(&matrix(), 4, MembershipStrategy::Postings);
        let bitmaps = MembershipIndex::build(&matrix(), 4, MembershipStrategy::Bitmap);
        assert_eq!(postings.strategy(), MembershipStrategy::Postings);
        assert_eq!(bitmaps.strategy(), MembershipStrategy::Bitmap);

        for code in 0..4 {
            assert_eq!(
                postings.rows_of(code).to_vec(),
                bitmaps.rows_of(code).to_vec()
            );
        }
        assert_eq!(postings.rows_of(0).to_vec(), vec![0, 2, 3]);

        let p = postings.rows_of(0).intersect(postings.rows_of(2));
        let b = bitmaps.rows_of(0).intersect(bitmaps.rows_of(2));
        assert_eq!(p.to_vec(), vec![0, 3]);
        assert_eq!(b.to_vec(), vec![0, 3]);
        assert_eq!(p.len(), 2);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_mixed_intersection_and_empty() {
        let postings = MembershipIndex::build(&matrix(), 4, MembershipStrategy::Postings);
        let bitmaps = MembershipIndex::build(&matrix(), 4, MembershipStrategy::Bitmap);
        let mixed = postings.rows_of(2).intersect(bitmaps.rows_of(0));
        assert_eq!(mixed.to_vec(), vec![0, 3]);

        let none = bitmaps.rows_of(1).intersect(bitmaps.rows_of(3));
        assert!(none.is_empty());
        assert_eq!(none.len(), 0);
    }

    #[test]
    fn test_auto_prefers_bitmaps_for_dense_small_data() {
        let index = MembershipIndex::build(&matrix(), 4, MembershipStrategy::Auto);
        assert_eq!(index.strategy(), MembershipStrategy::Bitmap);
        assert_eq!(
            MembershipIndex::resolve(MembershipStrategy::Auto, 1_000_000, 100_000, 2_000_000),
            MembershipStrategy::Postings
        );
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_tables_beyond_u32_row_ids_use_bitmaps() {
        let rows = u32::MAX as usize + 2;
        for strategy in [MembershipStrategy::Postings, MembershipStrategy::Auto] {
            assert_eq!(
                MembershipIndex::resolve(strategy, rows, 4, rows),
                MembershipStrategy::Bitmap
            );
        }
        assert_eq!(
            MembershipIndex::resolve(MembershipStrategy::Postings, u32::MAX as usize, 4, 8),
            MembershipStrategy::Postings
        );
    }

    #[test]
    fn test_postings_hold_every_row_id() {
        let sets = build_postings(&matrix(), 4).unwrap();
        assert_eq!(sets[2], RowSet::Postings(vec![0, 1, 3]));
        assert_eq!(sets[3], RowSet::Postings(vec![2]));
    }
}
