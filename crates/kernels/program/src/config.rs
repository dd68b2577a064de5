//! Heap configuration.

use serde::Deserialize;

use crate::error::{ProgramError, Result};

/// Number of words the heap grows by when its buffer is full.
pub const DEFAULT_PAGE_SIZE: usize = 0x10_0000;

/// Instruction heap configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Growth increment of the instruction buffer, in 32-bit words.
    pub page_size: usize,
}

impl HeapConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(ProgramError::InvalidConfig(
                "page_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}
