// Copyright 2026 The Dictamd Project
// SPDX-License-Identifier: Apache-2.0

// Batch accumulation — groups consecutive sentences into bounded units.
//
// Responsibilities:
// - Concatenate runs of `size` consecutive sentences into one Batch
// - Flag the final (possibly short) batch so the orchestrator can mark the
//   terminal stream record

/// One unit of work for the completion client: the concatenation of up to
/// `size` consecutive sentences, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position in the batch sequence.
    pub index: usize,
    /// Concatenated sentence text, exactly as it appeared in the source.
    pub text: String,
    /// True for the final batch of the request.
    pub is_last: bool,
}

/// Group `sentences` into batches of at most `size` sentences each.
///
/// Every sentence lands in exactly one batch and batch order follows
/// sentence order. Only the last batch may hold fewer than `size`
/// sentences. `size` must be non-zero (enforced by config validation).
pub fn batch_sentences(sentences: &[&str], size: usize) -> Vec<Batch> {
    let total = sentences.chunks(size.max(1)).count();

    sentences
        .chunks(size.max(1))
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            text: chunk.concat(),
            is_last: index + 1 == total,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
