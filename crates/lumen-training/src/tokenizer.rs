//! Tokenizers and the closed tokenizer registry.

use crate::config::TokenizerConfig;
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};

pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, text: &str) -> Vec<u32>;

    fn vocab_size(&self) -> usize;

    fn eos_token_id(&self) -> u32;
}

/// Registered tokenizer types. Selected by the `tokenizer.type` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    Byte,
    WordHash,
}

pub const DEFAULT_WORD_HASH_VOCAB: usize = 512;

impl TokenizerConfig {
    pub fn build(&self) -> TrainingResult<Box<dyn Tokenizer>> {
        if self.args.max_seq_len < 2 {
            return Err(TrainingError::InvalidConfig("tokenizer.args.max_seq_len must be >= 2".to_string()));
        }

        match self.kind {
            TokenizerKind::Byte => {
                if self.args.vocab_size.is_some_and(|v| v != ByteTokenizer::VOCAB_SIZE) {
                    return Err(TrainingError::InvalidConfig(format!(
                        "byte tokenizer has a fixed vocab of {}",
                        ByteTokenizer::VOCAB_SIZE
                    )));
                }
                Ok(Box::new(ByteTokenizer))
            }
            TokenizerKind::WordHash => {
                let vocab = self.args.vocab_size.unwrap_or(DEFAULT_WORD_HASH_VOCAB);
                Ok(Box::new(WordHashTokenizer::new(vocab)?))
            }
        }
    }
}

/// UTF-8 bytes map to ids `0..=255`; `256` is end-of-sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    pub const VOCAB_SIZE: usize = 257;
}

impl Tokenizer for ByteTokenizer {
    fn name(&self) -> &'static str {
        "byte"
    }

    fn encode(&self, text: &str) -> Vec<u32> {
        text.bytes().map(u32::from).collect()
    }

    fn vocab_size(&self) -> usize {
        Self::VOCAB_SIZE
    }

    fn eos_token_id(&self) -> u32 {
        256
    }
}

/// Hashes whitespace and non-whitespace runs into a fixed vocabulary.
///
/// Collisions are expected; the last id is reserved for end-of-sequence.
#[derive(Debug, Clone)]
pub struct WordHashTokenizer {
    vocab_size: usize,
}

impl WordHashTokenizer {
    pub fn new(vocab_size: usize) -> TrainingResult<Self> {
        if vocab_size < 2 {
            return Err(TrainingError::InvalidConfig("word_hash vocab_size must be >= 2".to_string()));
        }
        Ok(Self { vocab_size })
    }

    fn hash_piece(&self, piece: &str) -> u32 {
        // FNV-1a
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in piece.bytes() {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % (self.vocab_size as u64 - 1)) as u32
    }
}

impl Tokenizer for WordHashTokenizer {
    fn name(&self) -> &'static str {
        "word_hash"
    }

    fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::new();
        let mut start = 0;
        let mut current: Option<bool> = None;

        for (pos, ch) in text.char_indices() {
            let is_space = ch.is_whitespace();
            match current {
                Some(kind) if kind != is_space => {
                    ids.push(self.hash_piece(&text[start..pos]));
                    start = pos;
                }
                _ => {}
            }
            current = Some(is_space);
        }
        if start < text.len() {
            ids.push(self.hash_piece(&text[start..]));
        }
        ids
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn eos_token_id(&self) -> u32 {
        (self.vocab_size - 1) as u32
    }
}
