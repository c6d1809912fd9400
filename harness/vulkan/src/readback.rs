//! Result verification and timestamp conversion after a completed dispatch.

use std::time::Duration;

use tracing::{error, info};

use crate::error::{Result, VulkanError};
use crate::memory::StorageBuffer;

/// Output word the XOR kernel produces for an input filled with `fill`.
pub fn expected_word(fill: u8, mask: u32) -> u32 {
    u32::from_ne_bytes([fill; 4]) ^ mask
}

/// Check that every word equals `expected`.
pub fn verify_words(words: &[u32], expected: u32) -> Result<()> {
    let mut mismatches = words.iter().enumerate().filter(|&(_, &w)| w != expected);
    let Some((first_index, &got)) = mismatches.next() else {
        return Ok(());
    };
    Err(VulkanError::Mismatch {
        mismatches: 1 + mismatches.count(),
        total: words.len(),
        first_index,
        got,
        expected,
    })
}

/// Map `buffer`, compare its words against `expected`, and unmap.
///
/// Only call after the dispatch writing `buffer` has reached `Complete`.
pub fn read_and_verify(buffer: &mut StorageBuffer<'_>, expected: u32) -> Result<usize> {
    let mapped = buffer.map()?;
    let words = mapped.words()?;
    match verify_words(words, expected) {
        Ok(()) => {
            info!(words = words.len(), expected = format_args!("{:#010x}", expected), "PASS");
            Ok(words.len())
        }
        Err(e) => {
            error!("FAIL: {}", e);
            Err(e)
        }
    }
}

/// Start and end device ticks of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampPair {
    pub start: u64,
    pub end: u64,
    /// Nanoseconds per tick.
    pub period_ns: f32,
}

impl TimestampPair {
    /// Build from raw query results, keeping only the `valid_bits` low bits.
    pub fn from_raw(start: u64, end: u64, valid_bits: u32, period_ns: f32) -> Self {
        let mask = match valid_bits {
            bits if bits == 0 || bits >= 64 => u64::MAX,
            bits => (1u64 << bits) - 1,
        };
        Self { start: start & mask, end: end & mask, period_ns }
    }

    /// Elapsed ticks; errors when the end sample precedes the start.
    pub fn ticks(&self) -> Result<u64> {
        self.end
            .checked_sub(self.start)
            .ok_or(VulkanError::TimestampOrder { start: self.start, end: self.end })
    }

    /// `(end - start) * period_ns`, in nanoseconds.
    pub fn elapsed_ns(&self) -> Result<f64> {
        Ok(self.ticks()? as f64 * f64::from(self.period_ns))
    }

    /// Elapsed time rounded to whole nanoseconds.
    pub fn elapsed(&self) -> Result<Duration> {
        Ok(Duration::from_nanos(self.elapsed_ns()?.round() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_xor_pattern() {
        assert_eq!(expected_word(0x55, 0xFF0000FF), 0xAA5555AA);
        assert_eq!(expected_word(0x55, 0), 0x55555555);
        assert_eq!(expected_word(0x00, 0xDEADBEEF), 0xDEADBEEF);
    }

    #[test]
    fn test_verify_all_match() {
        let words = vec![0xAA5555AAu32; 1 << 18];
        assert!(verify_words(&words, 0xAA5555AA).is_ok());
        assert!(verify_words(&[], 0).is_ok());
    }

    #[test]
    fn test_verify_reports_first_mismatch() {
        let mut words = vec![0x55555555u32; 16];
        words[5] = 0;
        words[9] = 1;
        match verify_words(&words, 0x55555555).unwrap_err() {
            VulkanError::Mismatch { mismatches, total, first_index, got, expected } => {
                assert_eq!(mismatches, 2);
                assert_eq!(total, 16);
                assert_eq!(first_index, 5);
                assert_eq!(got, 0);
                assert_eq!(expected, 0x55555555);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_elapsed_scales_by_period() {
        let ts = TimestampPair::from_raw(1_000, 3_500, 64, 2.0);
        assert_eq!(ts.ticks().unwrap(), 2_500);
        assert_eq!(ts.elapsed_ns().unwrap(), 5_000.0);
        assert_eq!(ts.elapsed().unwrap(), Duration::from_micros(5));
    }

    #[test]
    fn test_equal_timestamps_are_zero() {
        let ts = TimestampPair::from_raw(42, 42, 64, 83.333);
        assert_eq!(ts.elapsed_ns().unwrap(), 0.0);
    }

    #[test]
    fn test_backwards_timestamps_rejected() {
        let ts = TimestampPair::from_raw(10, 9, 64, 1.0);
        assert!(matches!(
            ts.elapsed_ns().unwrap_err(),
            VulkanError::TimestampOrder { start: 10, end: 9 }
        ));
    }

    #[test]
    fn test_valid_bits_mask_garbage() {
        let ts = TimestampPair::from_raw(0xFFFF_0000_0000_0010, 0xABCD_0000_0000_0020, 36, 1.0);
        assert_eq!(ts.start, 0x10);
        assert_eq!(ts.end, 0x20);
        assert_eq!(ts.ticks().unwrap(), 0x10);
    }
}
