// Copyright 2026 The Dictamd Project
// SPDX-License-Identifier: Apache-2.0

// Sentence segmentation — the first stage of the processing pipeline.
//
// Responsibilities:
// - Cut raw transcript text into sentence units after terminal punctuation
//   or newlines
// - Keep every byte of the input: joining the output reproduces it exactly

/// Characters that end a sentence. Covers CJK and ASCII terminal
/// punctuation plus newline; dictated text frequently mixes both.
const SENTENCE_TERMINATORS: [char; 7] = ['。', '！', '？', '.', '!', '?', '\n'];

/// Split `text` into sentence-like units.
///
/// Each returned slice ends with its terminating character, except a final
/// unterminated remainder which is returned as-is. Whitespace following a
/// terminator is attached to the *next* sentence, never dropped, so
/// concatenating the slices in order yields `text` unchanged.
///
/// This is a boundary scan, not NLP: abbreviations, decimal points, and
/// quoted punctuation all cut. Mis-segmentation is tolerable because
/// downstream batches are concatenations of consecutive sentences.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for (idx, ch) in text.char_indices() {
        if SENTENCE_TERMINATORS.contains(&ch) {
            let end = idx + ch.len_utf8();
            sentences.push(&text[start..end]);
            start = end;
        }
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_punctuation_splits() {
        let text = "我今天很开心。我去了公园。天气很好。我看到了很多花。";
        let sentences = split_sentences(text);
        assert_eq!(
            sentences,
            vec!["我今天很开心。", "我去了公园。", "天气很好。", "我看到了很多花。"]
        );
    }

    #[test]
    fn ascii_punctuation_splits() {
        let sentences = split_sentences("First. Second! Third?");
        assert_eq!(sentences, vec!["First.", " Second!", " Third?"]);
    }

    #[test]
    fn newline_is_a_boundary() {
        let sentences = split_sentences("line one\nline two");
        assert_eq!(sentences, vec!["line one\n", "line two"]);
    }

    #[test]
    fn no_terminator_yields_single_sentence() {
        let sentences = split_sentences("Hello world");
        assert_eq!(sentences, vec!["Hello world"]);
    }

    #[test]
    fn empty_input_yields_no_sentences() {
        assert!(split_sentences("").is_empty());
    }

    #[test]
    fn consecutive_terminators_each_cut() {
        let sentences = split_sentences("真的吗！！？");
        assert_eq!(sentences, vec!["真的吗！", "！", "？"]);
    }

    #[test]
    fn whitespace_after_terminator_stays_with_next_sentence() {
        let sentences = split_sentences("A.  B.");
        assert_eq!(sentences, vec!["A.", "  B."]);
    }

    #[test]
    fn trailing_remainder_without_terminator_kept() {
        let sentences = split_sentences("完整的句子。没有结尾的");
        assert_eq!(sentences, vec!["完整的句子。", "没有结尾的"]);
    }

    // Known limitation, documented rather than fixed: decimal numbers and
    // abbreviations over-segment.
    #[test]
    fn decimal_numbers_over_segment() {
        let sentences = split_sentences("价格是3.5元");
        assert_eq!(sentences, vec!["价格是3.", "5元"]);
    }

    #[test]
    fn concatenation_reproduces_input_exactly() {
        let inputs = [
            "我今天很开心。我去了公园。天气很好。我看到了很多花。",
            "First. Second! Third?",
            "line one\nline two\n",
            "Hello world",
            "A.  B. \n C",
            "Mixed 中文 and English. 好的！Done",
            "...",
            " \n ",
            "价格是3.5元，大约 1.5kg。",
        ];
        for input in inputs {
            let rejoined: String = split_sentences(input).concat();
            assert_eq!(rejoined, input, "round-trip failed for {input:?}");
        }
    }
}
