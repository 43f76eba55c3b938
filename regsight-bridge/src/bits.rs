//! Single-bit extraction from a register block.

use crate::config::ConfigError;

/// Check at configuration time that `bit` falls inside `count` registers.
pub fn validate_bit(name: &str, bit: u32, count: u16) -> Result<(), ConfigError> {
    if count == 0 {
        return Err(ConfigError::ZeroCount {
            name: name.to_string(),
        });
    }
    if bit >= u32::from(count) * 16 {
        return Err(ConfigError::BitOutOfRange {
            name: name.to_string(),
            bit,
            count,
        });
    }
    Ok(())
}

/// Read bit `bit` of the block; bit 0 is the least significant bit of the first word.
///
/// `bit` must have passed [`validate_bit`] for a block of this length.
pub fn extract_bit(words: &[u16], bit: u32) -> bool {
    let index = (bit / 16) as usize;
    let mask = 1u16 << (bit % 16);
    words[index] & mask != 0
}
