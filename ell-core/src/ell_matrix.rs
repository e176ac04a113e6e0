use crate::error::EllCoreError;
use crate::quantize::FIXED_POINT_SCALE;
use crate::traits::Matrix;
use bytemuck::{Pod, Zeroable};
use num_traits::AsPrimitive;
use std::fmt::Debug;
use std::mem;

/// Column index stored in slots that hold no entry.
pub const EMPTY_SLOT: u32 = u32::MAX;

/// Absolute tolerance used when comparing mirrored entries in [`EllMatrix::is_symmetric`].
pub const SYMMETRY_TOLERANCE: f32 = 1e-6;

/// Element types an [`EllMatrix`] can store.
pub trait EllValue:
    Copy + Debug + Default + PartialEq + Pod + Zeroable + AsPrimitive<f32> + Send + Sync
{
    /// The real number a stored element stands for.
    fn to_real(self) -> f32;

    /// One SpMV term, `to_real(self) * x`, rounded the way the kernels compute it.
    fn mul_real(self, x: f32) -> f32;
}

impl EllValue for f32 {
    fn to_real(self) -> f32 {
        self
    }

    fn mul_real(self, x: f32) -> f32 {
        self * x
    }
}

impl EllValue for i16 {
    fn to_real(self) -> f32 {
        self as f32 / FIXED_POINT_SCALE
    }

    // Scale after the product, as in the fixed-point kernel.
    fn mul_real(self, x: f32) -> f32 {
        (self as f32 * x) / FIXED_POINT_SCALE
    }
}

/// Sparse matrix in ELL (Ellpack) format: every row owns exactly
/// `num_cols_per_row` slots, stored row-major in two parallel buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct EllMatrix<T: EllValue> {
    num_rows: usize,
    num_cols: usize,
    num_cols_per_row: usize,
    /// Slot values, `num_rows * num_cols_per_row` entries.
    values: Vec<T>,
    /// Slot column indices, [`EMPTY_SLOT`] for unused slots.
    indices: Vec<u32>,
}

impl<T: EllValue> EllMatrix<T> {
    /// Creates a matrix with every slot empty.
    pub fn new(num_rows: usize, num_cols: usize, num_cols_per_row: usize) -> Self {
        let slots = num_rows * num_cols_per_row;
        Self {
            num_rows,
            num_cols,
            num_cols_per_row,
            values: vec![T::default(); slots],
            indices: vec![EMPTY_SLOT; slots],
        }
    }

    /// Builds a matrix from `(row, col, value)` entries, placing each one with
    /// [`EllMatrix::set_value`]. Later duplicates overwrite earlier ones.
    pub fn from_entries(
        num_rows: usize,
        num_cols: usize,
        num_cols_per_row: usize,
        entries: &[(usize, usize, T)],
    ) -> Result<Self, EllCoreError> {
        let mut matrix = Self::new(num_rows, num_cols, num_cols_per_row);
        for &(row, col, value) in entries {
            matrix.set_value(row, col, value)?;
        }
        Ok(matrix)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn num_cols_per_row(&self) -> usize {
        self.num_cols_per_row
    }

    pub fn is_square(&self) -> bool {
        self.num_rows == self.num_cols
    }

    /// Number of occupied slots.
    pub fn nnz(&self) -> usize {
        self.indices.iter().filter(|&&c| c != EMPTY_SLOT).count()
    }

    /// Row-major slot values.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Mutable access to the slot values. Column indices stay untouched.
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Row-major slot column indices.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Size in bytes of the value buffer as transferred to the accelerator.
    pub fn matrix_buffer_size(&self) -> usize {
        self.values.len() * mem::size_of::<T>()
    }

    /// Size in bytes of the column index buffer as transferred to the accelerator.
    pub fn indices_buffer_size(&self) -> usize {
        self.indices.len() * mem::size_of::<u32>()
    }

    fn row_range(&self, row: usize) -> std::ops::Range<usize> {
        let start = row * self.num_cols_per_row;
        start..start + self.num_cols_per_row
    }

    fn check_bounds(&self, row: usize, col: usize) -> Result<(), EllCoreError> {
        if row >= self.num_rows || col >= self.num_cols {
            return Err(EllCoreError::InvalidDimensions(format!(
                "Entry ({}, {}) outside of {}x{} matrix",
                row, col, self.num_rows, self.num_cols
            )));
        }
        Ok(())
    }

    /// Returns the value at `(row, col)`, zero if the entry is absent or out of range.
    pub fn get_value(&self, row: usize, col: usize) -> T {
        if row >= self.num_rows || col >= self.num_cols {
            return T::default();
        }
        let range = self.row_range(row);
        self.indices[range.clone()]
            .iter()
            .position(|&c| c == col as u32)
            .map_or(T::default(), |slot| self.values[range.start + slot])
    }

    /// Stores `value` at `(row, col)`.
    ///
    /// Reuses the slot already holding `col`, otherwise occupies the first free
    /// slot of the row.
    ///
    /// # Errors
    /// `CapacityExceeded` if the column is new and every slot of the row is taken,
    /// `InvalidDimensions` if `(row, col)` lies outside the matrix.
    pub fn set_value(&mut self, row: usize, col: usize, value: T) -> Result<(), EllCoreError> {
        self.check_bounds(row, col)?;
        let range = self.row_range(row);
        let row_indices = &self.indices[range.clone()];
        let slot = row_indices
            .iter()
            .position(|&c| c == col as u32)
            .or_else(|| row_indices.iter().position(|&c| c == EMPTY_SLOT))
            .ok_or(EllCoreError::CapacityExceeded {
                row,
                col,
                capacity: self.num_cols_per_row,
            })?;
        self.indices[range.start + slot] = col as u32;
        self.values[range.start + slot] = value;
        Ok(())
    }

    /// Value stored in `slot` of `row`.
    ///
    /// # Panics
    /// If `row` or `slot` is out of range.
    pub fn get_value_by_index(&self, row: usize, slot: usize) -> T {
        assert!(slot < self.num_cols_per_row, "slot {} out of range", slot);
        self.values[row * self.num_cols_per_row + slot]
    }

    /// Column held by `slot` of `row`, `None` for an unused slot.
    ///
    /// # Panics
    /// If `row` or `slot` is out of range.
    pub fn get_column(&self, row: usize, slot: usize) -> Option<usize> {
        assert!(slot < self.num_cols_per_row, "slot {} out of range", slot);
        match self.indices[row * self.num_cols_per_row + slot] {
            EMPTY_SLOT => None,
            col => Some(col as usize),
        }
    }

    /// Writes `(col, value)` directly into `slot` of `row` without searching the row.
    /// Used for bulk construction; the caller keeps columns unique within a row.
    pub fn set_value_by_index(
        &mut self,
        row: usize,
        col: usize,
        slot: usize,
        value: T,
    ) -> Result<(), EllCoreError> {
        self.check_bounds(row, col)?;
        if slot >= self.num_cols_per_row {
            return Err(EllCoreError::InvalidDimensions(format!(
                "Slot {} exceeds {} columns per row",
                slot, self.num_cols_per_row
            )));
        }
        let index = row * self.num_cols_per_row + slot;
        self.indices[index] = col as u32;
        self.values[index] = value;
        Ok(())
    }

    /// Empties every slot.
    pub fn clear(&mut self) {
        self.indices.fill(EMPTY_SLOT);
        self.values.fill(T::default());
    }

    /// Iterates over the occupied slots of `row` as `(col, value)`.
    pub fn row_entries(&self, row: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let range = self.row_range(row);
        self.indices[range.clone()]
            .iter()
            .zip(&self.values[range])
            .filter(|(&c, _)| c != EMPTY_SLOT)
            .map(|(&c, &v)| (c as usize, v))
    }

    /// Checks `mat(i,j) == mat(j,i)` for every explicit entry, absent entries counting as zero.
    pub fn is_symmetric(&self) -> bool {
        if !self.is_square() {
            return false;
        }
        for row in 0..self.num_rows {
            for (col, value) in self.row_entries(row) {
                let mirror: f32 = self.get_value(col, row).as_();
                let value: f32 = value.as_();
                if (value - mirror).abs() > SYMMETRY_TOLERANCE {
                    log::debug!(
                        "Symmetry violated at ({}, {}): {} != {}",
                        row,
                        col,
                        value,
                        mirror
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Main diagonal `[mat(i,i)]` over `min(rows, cols)` entries.
    pub fn diagonal(&self) -> Vec<T> {
        (0..self.num_rows.min(self.num_cols))
            .map(|i| self.get_value(i, i))
            .collect()
    }
}

impl<T: EllValue> Matrix for EllMatrix<T> {
    type Value = T;

    fn dims(&self) -> (usize, usize) {
        (self.num_rows, self.num_cols)
    }
}
