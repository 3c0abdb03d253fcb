//! The input vector: the left operand of the per-pixel matrix multiply.
//! Positions 0 and 1 always evaluate to the pixel's x and y; the remaining
//! positions are writable by the client.

use crate::error::{NddiError, Result};

pub struct InputVector {
    size: usize,
    user: Vec<i32>,
}

impl InputVector {
    pub fn new(size: u32) -> Result<Self> {
        if size < 2 {
            return Err(NddiError::InvalidArgument(format!(
                "input vector size {size} must be at least 2"
            )));
        }
        Ok(Self {
            size: size as usize,
            user: vec![0; size as usize - 2],
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false // size >= 2 is checked at construction
    }

    /// Replaces positions 2.. with `values`.
    pub fn update(&mut self, values: &[i32]) -> Result<()> {
        if values.len() != self.size - 2 {
            return Err(NddiError::InvalidArgument(format!(
                "input vector update holds {} values, expected {}",
                values.len(),
                self.size - 2
            )));
        }
        self.user.copy_from_slice(values);
        Ok(())
    }

    /// Value at `position` for the pixel at (x, y).
    #[must_use]
    pub fn value(&self, position: usize, x: u32, y: u32) -> i64 {
        match position {
            0 => i64::from(x),
            1 => i64::from(y),
            _ => i64::from(self.user[position - 2]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fixed_positions_track_the_pixel() {
        let iv = InputVector::new(3).unwrap();
        assert_eq!(iv.value(0, 7, 9), 7);
        assert_eq!(iv.value(1, 7, 9), 9);
        assert_eq!(iv.value(2, 7, 9), 0);
    }

    #[test]
    fn update_writes_only_the_tail() {
        let mut iv = InputVector::new(4).unwrap();
        iv.update(&[5, -6]).unwrap();
        assert_eq!(iv.value(2, 0, 0), 5);
        assert_eq!(iv.value(3, 0, 0), -6);
        assert!(iv.update(&[1]).is_err());
    }

    #[test]
    fn size_below_two_is_rejected() {
        assert!(InputVector::new(1).is_err());
    }
}
