use crate::error::{TrainingError, TrainingResult};
use crate::icl::dataset::parse_jsonl;
use crate::tokenizer::Tokenizer;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One pretraining row: `{"text": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRow {
    pub text: String,
}

/// Token batches for training.
///
/// Rows are tokenized, joined with EOS, and cut into windows of
/// `max_seq_len` tokens; trailing windows shorter than two tokens are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainData {
    batches: Vec<Vec<Vec<u32>>>,
}

impl TrainData {
    pub fn from_rows(
        rows: &[TextRow],
        tokenizer: &dyn Tokenizer,
        max_seq_len: usize,
        batch_size: usize,
    ) -> TrainingResult<Self> {
        if max_seq_len < 2 {
            return Err(TrainingError::Dataset("max_seq_len must be >= 2 for training".to_string()));
        }

        let mut stream = Vec::new();
        for row in rows {
            stream.extend(tokenizer.encode(&row.text));
            stream.push(tokenizer.eos_token_id());
        }

        let windows: Vec<Vec<u32>> = stream
            .chunks(max_seq_len)
            .filter(|c| c.len() >= 2)
            .map(<[u32]>::to_vec)
            .collect();
        if windows.is_empty() {
            return Err(TrainingError::Dataset("training data produced no token windows".to_string()));
        }

        let batches = windows.chunks(batch_size.max(1)).map(<[Vec<u32>]>::to_vec).collect();
        Ok(Self { batches })
    }

    pub fn from_jsonl(
        path: &Path,
        tokenizer: &dyn Tokenizer,
        max_seq_len: usize,
        batch_size: usize,
    ) -> TrainingResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TrainingError::Dataset(format!("failed to read {}: {}", path.display(), e)))?;
        let rows: Vec<TextRow> = parse_jsonl(&contents, path)?;
        Self::from_rows(&rows, tokenizer, max_seq_len, batch_size)
    }

    #[must_use]
    pub fn batches(&self) -> &[Vec<Vec<u32>>] {
        &self.batches
    }

    /// Batch for a global step; the data is cycled.
    #[must_use]
    pub fn batch_for_step(&self, step: u64) -> &[Vec<u32>] {
        &self.batches[(step % self.batches.len() as u64) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::ByteTokenizer;

    #[test]
    fn test_windows_and_batches() {
        let rows = vec![TextRow { text: "abcdef".to_string() }, TextRow { text: "gh".to_string() }];
        // 6 + eos + 2 + eos = 10 tokens -> windows of 4: [4, 4, 2]
        let data = TrainData::from_rows(&rows, &ByteTokenizer, 4, 2).unwrap();
        assert_eq!(data.batches().len(), 2);
        assert_eq!(data.batches()[0].len(), 2);
        assert_eq!(data.batches()[1][0].len(), 2);
        assert_eq!(data.batch_for_step(2), data.batch_for_step(0));
    }

    #[test]
    fn test_empty_rows_rejected() {
        assert!(TrainData::from_rows(&[], &ByteTokenizer, 4, 2).is_err());
    }
}
