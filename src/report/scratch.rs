// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Fixed-capacity truncating format buffer.
// Author: Lukas Bower

use core::fmt::{self, Write};

use heapless::String as HeaplessString;

/// Formatting target of at most `N` bytes.
///
/// Output past the capacity is dropped at a character boundary; writes never
/// fail because of it.
pub struct Scratch<const N: usize> {
    buf: HeaplessString<N>,
    truncated: bool,
}

impl<const N: usize> Scratch<N> {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: HeaplessString::new(),
            truncated: false,
        }
    }

    /// Format `args` into a fresh buffer.
    #[must_use]
    pub fn format(args: fmt::Arguments<'_>) -> Self {
        let mut scratch = Self::new();
        let _ = scratch.write_fmt(args);
        scratch
    }

    /// Formatted text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.buf.as_str()
    }

    /// Whether any output was dropped.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<const N: usize> Default for Scratch<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Write for Scratch<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.truncated {
            return Ok(());
        }
        for ch in s.chars() {
            if self.buf.push(ch).is_err() {
                self.truncated = true;
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_kept() {
        let scratch = Scratch::<16>::format(format_args!("\"rate\": {}", 42));
        assert_eq!(scratch.as_str(), "\"rate\": 42");
        assert!(!scratch.truncated());
    }

    #[test]
    fn long_text_is_truncated() {
        let scratch = Scratch::<8>::format(format_args!("{}", "0123456789"));
        assert_eq!(scratch.as_str(), "01234567");
        assert!(scratch.truncated());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let scratch = Scratch::<5>::format(format_args!("ab\u{00e9}\u{00e9}"));
        assert_eq!(scratch.as_str(), "ab\u{00e9}");
        assert!(scratch.truncated());
    }

    #[test]
    fn later_writes_after_truncation_are_dropped() {
        let mut scratch = Scratch::<3>::new();
        let _ = scratch.write_str("ab\u{00e9}");
        let _ = scratch.write_str("c");
        assert_eq!(scratch.as_str(), "ab");
    }
}
