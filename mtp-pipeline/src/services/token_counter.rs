//! Token length estimation
//!
//! Every budgeting decision in the pipeline goes through one
//! [`TokenCounter`], so counts only need to be internally consistent, not
//! identical to any provider's tokenizer.

use once_cell::sync::Lazy;
use std::str::FromStr;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// cl100k BPE, loaded once. `None` if the embedded ranks fail to load, in
/// which case OpenAI-family counting falls back to the word heuristic.
static CL100K: Lazy<Option<CoreBPE>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!(error = %e, "cl100k tokenizer unavailable, using word heuristic");
        None
    }
});

/// Tokenizer family used for estimates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelFamily {
    /// Each whitespace-separated word costs ceil(chars / 4) tokens
    #[default]
    Heuristic,
    /// cl100k BPE
    OpenAi,
    /// No public tokenizer; uses the word heuristic
    Anthropic,
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" | "" => Ok(ModelFamily::Heuristic),
            "openai" | "gpt" | "cl100k" => Ok(ModelFamily::OpenAi),
            "anthropic" | "claude" => Ok(ModelFamily::Anthropic),
            other => Err(format!("Unknown model family: {}", other)),
        }
    }
}

/// Deterministic token estimator bound to one model family
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter {
    family: ModelFamily,
}

impl TokenCounter {
    pub fn new(family: ModelFamily) -> Self {
        Self { family }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// Estimated tokens in `text`; empty text is zero
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        match self.family {
            ModelFamily::OpenAi => match CL100K.as_ref() {
                Some(bpe) => bpe.encode_with_special_tokens(text).len(),
                None => heuristic_count(text),
            },
            ModelFamily::Heuristic | ModelFamily::Anthropic => heuristic_count(text),
        }
    }

    /// Longest prefix of `text` that fits in `max_tokens`
    ///
    /// Cuts at the end of a word, preferring the last whole word that fits.
    /// If even the first word is over budget the cut falls on a char
    /// boundary inside it. Trailing whitespace is dropped.
    pub fn truncate_to_tokens<'a>(&self, text: &'a str, max_tokens: usize) -> &'a str {
        if max_tokens == 0 {
            return "";
        }
        if self.count(text) <= max_tokens {
            return text;
        }

        let ends = word_ends(text);
        let fitting = ends.partition_point(|&end| self.count(&text[..end]) <= max_tokens);
        if fitting > 0 {
            return text[..ends[fitting - 1]].trim_end();
        }

        // First word alone is over budget
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(idx, _)| idx)
            .skip(1)
            .chain(std::iter::once(text.len()))
            .collect();
        let fitting = boundaries.partition_point(|&end| self.count(&text[..end]) <= max_tokens);
        if fitting > 0 {
            text[..boundaries[fitting - 1]].trim_end()
        } else {
            ""
        }
    }
}

/// Count `text` with `family`; `None` counts as empty
pub fn count_tokens(text: Option<&str>, family: ModelFamily) -> usize {
    TokenCounter::new(family).count(text.unwrap_or_default())
}

fn heuristic_count(text: &str) -> usize {
    text.split_whitespace()
        .map(|word| word.chars().count().div_ceil(4))
        .sum()
}

/// Byte offsets just past the end of each word
fn word_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut in_word = false;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_word {
                ends.push(idx);
                in_word = false;
            }
        } else {
            in_word = true;
        }
    }
    if in_word {
        ends.push(text.len());
    }
    ends
}
