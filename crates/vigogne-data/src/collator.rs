//! Data collation utilities.

use crate::TokenizedExample;
use ndarray::{s, Array2, ArrayView1, Zip};
use std::borrow::Borrow;
use vigogne_core::{Result, VigogneError, IGNORE_INDEX};

/// A padded batch ready for the model, all arrays `[batch_size, seq_len]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Input token IDs.
    pub input_ids: Array2<u32>,
    /// Loss targets, [`IGNORE_INDEX`] on prompt and padding positions.
    pub labels: Array2<i64>,
    /// `true` where `input_ids` differs from the pad ID.
    pub attention_mask: Array2<bool>,
}

impl Batch {
    /// Number of rows.
    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    /// Padded sequence length.
    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }

    /// Number of positions that contribute to the loss.
    pub fn num_label_tokens(&self) -> usize {
        self.labels.iter().filter(|&&l| l != IGNORE_INDEX).count()
    }

    /// Number of attended (non-pad) positions.
    pub fn num_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m).count()
    }
}

/// Pads tokenized examples into a [`Batch`].
#[derive(Debug, Clone)]
pub struct DataCollator {
    pad_token_id: u32,
    pad_to_multiple_of: Option<usize>,
}

impl DataCollator {
    /// Create a collator that pads to the longest example.
    pub fn new(pad_token_id: u32) -> Self {
        Self {
            pad_token_id,
            pad_to_multiple_of: None,
        }
    }

    /// Round the batch width up to a multiple of `multiple`.
    pub fn with_pad_to_multiple_of(mut self, multiple: Option<usize>) -> Self {
        self.pad_to_multiple_of = multiple;
        self
    }

    /// Padding token ID.
    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    /// Alignment of the batch width.
    pub fn pad_to_multiple_of(&self) -> Option<usize> {
        self.pad_to_multiple_of
    }

    /// Collate examples into a batch.
    ///
    /// With alignment, the first longest example is extended with pad IDs
    /// (and ignored labels) up to the next multiple; every row is then
    /// right-padded to that width. The attention mask is derived from the
    /// padded IDs, so a pad ID occurring inside real content is masked too.
    pub fn collate<E: Borrow<TokenizedExample>>(&self, examples: &[E]) -> Result<Batch> {
        if examples.is_empty() {
            return Err(VigogneError::InvalidArgument(
                "Cannot collate an empty batch".into(),
            ));
        }
        if self.pad_to_multiple_of == Some(0) {
            return Err(VigogneError::InvalidArgument(
                "pad_to_multiple_of must be > 0".into(),
            ));
        }

        let mut longest = 0;
        let mut natural_max = 0;
        for (i, example) in examples.iter().enumerate() {
            let example: &TokenizedExample = example.borrow();
            if example.labels.len() != example.input_ids.len() {
                return Err(VigogneError::InvalidArgument(format!(
                    "Example {i} has {} input ids but {} labels",
                    example.input_ids.len(),
                    example.labels.len()
                )));
            }
            if example.len() > natural_max {
                natural_max = example.len();
                longest = i;
            }
        }

        let extension = match self.pad_to_multiple_of {
            Some(m) => natural_max.div_ceil(m) * m - natural_max,
            None => 0,
        };

        // Working copy of the longest row; the caller's example is untouched.
        let mut extended: TokenizedExample = examples[longest].borrow().clone();
        extended
            .input_ids
            .extend(std::iter::repeat(self.pad_token_id).take(extension));
        extended
            .labels
            .extend(std::iter::repeat(IGNORE_INDEX).take(extension));

        let width = natural_max + extension;
        let mut input_ids = Array2::from_elem((examples.len(), width), self.pad_token_id);
        let mut labels = Array2::from_elem((examples.len(), width), IGNORE_INDEX);

        for (i, example) in examples.iter().enumerate() {
            let example: &TokenizedExample = if i == longest {
                &extended
            } else {
                example.borrow()
            };
            let len = example.len();
            input_ids
                .slice_mut(s![i, ..len])
                .assign(&ArrayView1::from(example.input_ids.as_slice()));
            labels
                .slice_mut(s![i, ..len])
                .assign(&ArrayView1::from(example.labels.as_slice()));
        }

        let mut attention_mask = Array2::from_elem((examples.len(), width), false);
        Zip::from(&mut attention_mask)
            .and(&input_ids)
            .for_each(|mask, &id| *mask = id != self.pad_token_id);

        Ok(Batch {
            input_ids,
            labels,
            attention_mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAD: u32 = 0;

    fn example(len: usize, prompt_len: usize) -> TokenizedExample {
        let input_ids: Vec<u32> = (1..=len as u32).collect();
        let labels = input_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| if i < prompt_len { IGNORE_INDEX } else { i64::from(id) })
            .collect();
        TokenizedExample { input_ids, labels }
    }

    #[test]
    fn test_shape_rounds_to_multiple() {
        let collator = DataCollator::new(PAD).with_pad_to_multiple_of(Some(8));

        let batch = collator
            .collate(&[example(3, 1), example(7, 2), example(5, 1)])
            .unwrap();
        assert_eq!(batch.input_ids.shape(), &[3, 8]);
        assert_eq!(batch.labels.shape(), &[3, 8]);
        assert_eq!(batch.attention_mask.shape(), &[3, 8]);

        let batch = collator
            .collate(&[example(3, 1), example(9, 2), example(5, 1)])
            .unwrap();
        assert_eq!(batch.input_ids.shape(), &[3, 16]);
    }

    #[test]
    fn test_no_alignment_pads_to_longest() {
        let collator = DataCollator::new(PAD);
        let batch = collator.collate(&[example(3, 1), example(7, 2)]).unwrap();
        assert_eq!(batch.seq_len(), 7);
        assert_eq!(batch.batch_size(), 2);
    }

    #[test]
    fn test_aligned_length_unchanged() {
        let collator = DataCollator::new(PAD).with_pad_to_multiple_of(Some(8));
        let batch = collator.collate(&[example(8, 1), example(2, 1)]).unwrap();
        assert_eq!(batch.seq_len(), 8);
    }

    #[test]
    fn test_mask_and_padding() {
        let collator = DataCollator::new(PAD).with_pad_to_multiple_of(Some(8));
        let rows = [example(3, 1), example(7, 2), example(5, 1)];
        let batch = collator.collate(&rows).unwrap();

        for (i, row) in rows.iter().enumerate() {
            for j in 0..batch.seq_len() {
                let real = j < row.len();
                assert_eq!(batch.attention_mask[[i, j]], real);
                if real {
                    assert_eq!(batch.input_ids[[i, j]], row.input_ids[j]);
                    assert_eq!(batch.labels[[i, j]], row.labels[j]);
                } else {
                    assert_eq!(batch.input_ids[[i, j]], PAD);
                    assert_eq!(batch.labels[[i, j]], IGNORE_INDEX);
                }
            }
        }
        assert_eq!(batch.num_tokens(), 15);
        assert_eq!(batch.num_label_tokens(), 2 + 5 + 4);
    }

    #[test]
    fn test_does_not_mutate_examples() {
        let collator = DataCollator::new(PAD).with_pad_to_multiple_of(Some(8));
        let rows = vec![example(3, 1), example(9, 2)];
        let before = rows.clone();
        collator.collate(&rows).unwrap();
        assert_eq!(rows, before);

        // Borrowed rows work too.
        let refs: Vec<&TokenizedExample> = rows.iter().collect();
        assert_eq!(collator.collate(&refs).unwrap().seq_len(), 16);
    }

    #[test]
    fn test_pad_collision_masks_content() {
        let collator = DataCollator::new(2);
        let batch = collator.collate(&[example(3, 0)]).unwrap();
        assert_eq!(
            batch.attention_mask.row(0).to_vec(),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_errors() {
        let collator = DataCollator::new(PAD);
        let empty: [TokenizedExample; 0] = [];
        assert!(matches!(
            collator.collate(&empty),
            Err(VigogneError::InvalidArgument(_))
        ));

        let zero = DataCollator::new(PAD).with_pad_to_multiple_of(Some(0));
        assert!(zero.collate(&[example(3, 1)]).is_err());

        let mismatched = TokenizedExample {
            input_ids: vec![1, 2],
            labels: vec![IGNORE_INDEX],
        };
        assert!(collator.collate(&[mismatched]).is_err());
    }
}
