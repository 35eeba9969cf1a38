use crate::{Error, Result};

/// Tracks how many words the current routine has on the machine stack
/// below its frame base (locals plus expression temporaries).
#[derive(Debug, Default)]
pub struct StackDepth {
    depth: usize,
    max_depth: usize,
}

impl StackDepth {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            depth: 0,
            max_depth: 0,
        }
    }

    pub fn push(&mut self, words: usize) {
        self.depth += words;
        if self.depth > self.max_depth {
            self.max_depth = self.depth;
        }
    }

    pub fn pop(&mut self, words: usize) -> Result<()> {
        let Some(depth) = self.depth.checked_sub(words) else {
            return Err(Error::Internal(format!(
                "operand stack underflow: popping {words} word(s) at depth {}",
                self.depth
            )));
        };
        self.depth = depth;
        Ok(())
    }

    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Resets for a new routine.
    pub fn reset(&mut self) {
        self.depth = 0;
        self.max_depth = 0;
    }
}
