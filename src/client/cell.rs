use crate::wire::params::Cell;

/// Coercion status, mirroring the pack's per-source-type decoding trait
/// pattern (one fallible conversion per wire type) but collapsed to the
/// five `Cell` variants and the four target shapes this facade needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// The cell was already the requested shape.
    Native,
    /// The cell was converted, possibly lossily.
    Coerced,
    /// No meaningful conversion exists.
    Impossible,
}

impl Coercion {
    pub fn code(self) -> i32 {
        match self {
            Self::Native => 0,
            Self::Coerced => 1,
            Self::Impossible => -1,
        }
    }
}

/// Coerces `cell` to an `i64`. FLOAT clamps to `i64::MIN`/`MAX` (NaN to
/// zero); TEXT parses decimal digits; BLOB and NULL are impossible.
pub fn to_i64(cell: &Cell) -> (Coercion, i64) {
    match cell {
        Cell::Int(v) => (Coercion::Native, *v),
        Cell::Double(v) => {
            let clamped = if v.is_nan() {
                0
            } else if *v >= i64::MAX as f64 {
                i64::MAX
            } else if *v <= i64::MIN as f64 {
                i64::MIN
            } else {
                *v as i64
            };
            (Coercion::Coerced, clamped)
        }
        Cell::Text(s) => match s.trim().parse::<i64>() {
            Ok(v) => (Coercion::Coerced, v),
            Err(_) => (Coercion::Impossible, 0),
        },
        Cell::Null | Cell::Blob(_) => (Coercion::Impossible, 0),
    }
}

/// Coerces `cell` to an `f64`. INT conversion is exact up to 2^53, lossy
/// beyond it (ordinary `as f64` rounding).
pub fn to_f64(cell: &Cell) -> (Coercion, f64) {
    match cell {
        Cell::Double(v) => (Coercion::Native, *v),
        Cell::Int(v) => (Coercion::Coerced, *v as f64),
        Cell::Text(s) => match s.trim().parse::<f64>() {
            Ok(v) => (Coercion::Coerced, v),
            Err(_) => (Coercion::Impossible, 0.0),
        },
        Cell::Null | Cell::Blob(_) => (Coercion::Impossible, 0.0),
    }
}

/// Coerces `cell` to a `String`. BLOB has no meaningful text rendering.
pub fn to_string(cell: &Cell) -> (Coercion, String) {
    match cell {
        Cell::Text(s) => (Coercion::Native, s.clone()),
        Cell::Int(v) => (Coercion::Coerced, v.to_string()),
        Cell::Double(v) => (Coercion::Coerced, v.to_string()),
        Cell::Null | Cell::Blob(_) => (Coercion::Impossible, String::new()),
    }
}

/// Coerces `cell` to raw bytes. TEXT is coerced to its UTF-8 bytes
/// (without a trailing NUL); numeric types and NULL have no blob form.
pub fn to_bytes(cell: &Cell) -> (Coercion, Vec<u8>) {
    match cell {
        Cell::Blob(b) => (Coercion::Native, b.clone()),
        Cell::Text(s) => (Coercion::Coerced, s.clone().into_bytes()),
        Cell::Null | Cell::Int(_) | Cell::Double(_) => (Coercion::Impossible, Vec::new()),
    }
}
