// Wire format of the forecast protocol over TCP.
// Request: u32 LE rows, u32 LE cols, then rows * cols i32 LE cells in row-major order.
// Response: rows f64 LE values, one per row. There is no length prefix, the
// client knows the length from the rows it sent.
use anyhow::{anyhow, ensure};
use byteorder::{ByteOrder, LittleEndian};
use nalgebra::DMatrix;

use crate::constants::{CELL_SIZE, HEADER_SIZE, PREDICTION_SIZE};

/// One load history per row, one observation per column.
pub type Matrix = DMatrix<i32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub rows: u32,
    pub cols: u32,
}

impl Header {
    pub fn of(matrix: &Matrix) -> anyhow::Result<Self> {
        let rows = u32::try_from(matrix.nrows())
            .map_err(|_| anyhow!("{} rows do not fit in the header", matrix.nrows()))?;
        let cols = u32::try_from(matrix.ncols())
            .map_err(|_| anyhow!("{} columns do not fit in the header", matrix.ncols()))?;
        Ok(Self { rows, cols })
    }

    /// Number of cells following the header, `None` if it overflows `usize`.
    pub fn cells(&self) -> Option<usize> {
        (self.rows as usize).checked_mul(self.cols as usize)
    }
}

impl From<[u8; HEADER_SIZE]> for Header {
    fn from(bytes: [u8; HEADER_SIZE]) -> Self {
        Self {
            rows: LittleEndian::read_u32(&bytes[..4]),
            cols: LittleEndian::read_u32(&bytes[4..]),
        }
    }
}

impl From<Header> for [u8; HEADER_SIZE] {
    fn from(header: Header) -> Self {
        let mut bytes = [0; HEADER_SIZE];
        LittleEndian::write_u32(&mut bytes[..4], header.rows);
        LittleEndian::write_u32(&mut bytes[4..], header.cols);
        bytes
    }
}

/// Build a matrix from nested rows, rejecting ragged input.
pub fn matrix_from_rows(rows: Vec<Vec<i32>>) -> anyhow::Result<Matrix> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, Vec::len);
    let mut cells = Vec::with_capacity(nrows * ncols);
    for (i, row) in rows.into_iter().enumerate() {
        ensure!(
            row.len() == ncols,
            "not a matrix: row {} has {} columns, expected {}",
            i,
            row.len(),
            ncols
        );
        cells.extend(row);
    }
    Ok(Matrix::from_row_slice(nrows, ncols, &cells))
}

/// Header and all cells of `matrix`, ready to be written in one go.
pub fn encode_request(matrix: &Matrix) -> anyhow::Result<Vec<u8>> {
    let header: [u8; HEADER_SIZE] = Header::of(matrix)?.into();
    let mut bytes = Vec::with_capacity(HEADER_SIZE + matrix.len() * CELL_SIZE);
    bytes.extend_from_slice(&header);

    // nalgebra stores column-major, the wire is row-major
    let mut cell = [0; CELL_SIZE];
    for row in matrix.row_iter() {
        for value in row.iter() {
            LittleEndian::write_i32(&mut cell, *value);
            bytes.extend_from_slice(&cell);
        }
    }
    Ok(bytes)
}

pub fn encode_predictions(values: &[f64]) -> Vec<u8> {
    let mut bytes = vec![0; values.len() * PREDICTION_SIZE];
    LittleEndian::write_f64_into(values, &mut bytes);
    bytes
}

pub fn decode_predictions(bytes: &[u8]) -> anyhow::Result<Vec<f64>> {
    ensure!(
        bytes.len() % PREDICTION_SIZE == 0,
        "response of {} bytes is not a sequence of doubles",
        bytes.len()
    );
    let mut values = vec![0.0; bytes.len() / PREDICTION_SIZE];
    LittleEndian::read_f64_into(bytes, &mut values);
    Ok(values)
}
