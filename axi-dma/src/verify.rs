// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Test patterns and post-transfer comparison

use crate::error::{Error, Result};

/// Number of mismatches recorded individually in a report.
pub const MAX_REPORTED_MISMATCHES: usize = 6;

/// Word-addressed storage the verifier can read and the pattern
/// generator can fill.
pub trait WordBuffer {
    fn word_count(&self) -> usize;
    fn read_word(&self, index: usize) -> u32;
    fn write_word(&mut self, index: usize, value: u32);
}

impl WordBuffer for [u32] {
    fn word_count(&self) -> usize {
        self.len()
    }

    fn read_word(&self, index: usize) -> u32 {
        self[index]
    }

    fn write_word(&mut self, index: usize, value: u32) {
        self[index] = value;
    }
}

impl WordBuffer for Vec<u32> {
    fn word_count(&self) -> usize {
        self.len()
    }

    fn read_word(&self, index: usize) -> u32 {
        self[index]
    }

    fn write_word(&mut self, index: usize, value: u32) {
        self[index] = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub index: usize,
    pub expected: u32,
    pub actual: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Words compared
    pub words: usize,
    /// Words that differ, counted over the whole range
    pub mismatches: usize,
    /// The first `MAX_REPORTED_MISMATCHES` differences
    pub first: Vec<Mismatch>,
}

impl VerifyReport {
    pub fn is_success(&self) -> bool {
        self.mismatches == 0
    }

    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Verification(self))
        }
    }
}

/// Writes `base + i` to word `i`.
pub fn fill_pattern<W: WordBuffer + ?Sized>(buf: &mut W, base: u32) {
    for i in 0..buf.word_count() {
        buf.write_word(i, base.wrapping_add(i as u32));
    }
}

pub fn fill<W: WordBuffer + ?Sized>(buf: &mut W, value: u32) {
    for i in 0..buf.word_count() {
        buf.write_word(i, value);
    }
}

/// Compares the first `words` words of both buffers.
///
/// # Panics
///
/// If either buffer is shorter than `words`.
pub fn compare<E, A>(expected: &E, actual: &A, words: usize) -> VerifyReport
where
    E: WordBuffer + ?Sized,
    A: WordBuffer + ?Sized,
{
    assert!(
        words <= expected.word_count() && words <= actual.word_count(),
        "compare of {} words exceeds buffer",
        words
    );

    let mut report = VerifyReport {
        words,
        ..VerifyReport::default()
    };
    for index in 0..words {
        let want = expected.read_word(index);
        let got = actual.read_word(index);
        if want != got {
            report.mismatches += 1;
            if report.first.len() < MAX_REPORTED_MISMATCHES {
                report.first.push(Mismatch {
                    index,
                    expected: want,
                    actual: got,
                });
            }
        }
    }
    report
}
