use std::{borrow::Cow, fs, io, num::NonZeroUsize, path::Path, sync::Arc};

use ndarray::Array2;

use crate::config::DataFormat;

/// Reads a whole token file.
///
/// # Arguments
/// * `path` - The file to read.
/// * `format` - How the tokens are laid out.
///
/// # Returns
/// The token ids, or an io error if the file can't be read or is truncated.
pub fn read_tokens(path: impl AsRef<Path>, format: DataFormat) -> io::Result<Vec<u32>> {
    let bytes = fs::read(path)?;

    match format {
        DataFormat::Text => Ok(bytes.into_iter().map(u32::from).collect()),
        DataFormat::U16 => {
            if bytes.len() % 2 != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("u16 token file has an odd length of {} bytes", bytes.len()),
                ));
            }

            Ok(bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as u32)
                .collect())
        }
    }
}

/// A token stream cut into fixed-length, possibly overlapping, windows.
///
/// Sample `i` starts at token `i * stride`; its targets are the same window shifted by one.
/// Clones share the token buffer.
#[derive(Debug, Clone)]
pub struct TokenDataset {
    tokens: Arc<[u32]>,
    seq_len: usize,
    stride: usize,
}

impl TokenDataset {
    pub fn new(tokens: impl Into<Arc<[u32]>>, seq_len: NonZeroUsize, stride: NonZeroUsize) -> Self {
        Self {
            tokens: tokens.into(),
            seq_len: seq_len.get(),
            stride: stride.get(),
        }
    }

    /// The amount of complete windows in the stream.
    #[inline]
    pub fn len(&self) -> usize {
        match self.tokens.len().checked_sub(self.seq_len + 1) {
            Some(last_start) => last_start / self.stride + 1,
            None => 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    #[inline]
    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    #[inline]
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    /// Returns the input window and target window of sample `idx` (panics if out of bounds).
    #[inline]
    pub fn sample(&self, idx: usize) -> (&[u32], &[u32]) {
        let start = idx * self.stride;
        let end = start + self.seq_len;
        (&self.tokens[start..end], &self.tokens[start + 1..end + 1])
    }

    /// Splits the stream in two, the second part holding the last `fraction` of the tokens.
    pub fn split(&self, fraction: f32) -> (Self, Self) {
        let n = self.tokens.len();
        let tail = ((n as f64) * fraction.clamp(0., 1.) as f64).round() as usize;
        let cut = n - tail.min(n);

        let part = |tokens: &[u32]| Self {
            tokens: Arc::from(tokens),
            seq_len: self.seq_len,
            stride: self.stride,
        };

        (part(&self.tokens[..cut]), part(&self.tokens[cut..]))
    }

    /// Stacks the given samples into a batch (panics if any index is out of bounds).
    pub fn batch(&self, indices: &[usize]) -> Batch {
        let shape = (indices.len(), self.seq_len);
        let inputs = Array2::from_shape_fn(shape, |(r, c)| self.sample(indices[r]).0[c]);
        let targets = Array2::from_shape_fn(shape, |(r, c)| self.sample(indices[r]).1[c]);
        Batch { inputs, targets }
    }
}

/// An owned `[batch, seq_len]` block of inputs and next-token targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Array2<u32>,
    pub targets: Array2<u32>,
}

impl Batch {
    /// The amount of sequences in the batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    #[inline]
    pub fn num_tokens(&self) -> usize {
        self.targets.len()
    }

    /// The targets flattened over batch and time, in the same order as the model's logits.
    pub fn flat_targets(&self) -> Cow<'_, [u32]> {
        match self.targets.as_slice() {
            Some(flat) => Cow::Borrowed(flat),
            None => Cow::Owned(self.targets.iter().copied().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use ndarray::array;

    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn windows_and_shifted_targets() {
        let ds = TokenDataset::new((0..10).collect::<Vec<u32>>(), nz(3), nz(3));

        // starts 0, 3, 6; a window at 9 would need tokens up to 12
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.sample(0), (&[0, 1, 2][..], &[1, 2, 3][..]));
        assert_eq!(ds.sample(2), (&[6, 7, 8][..], &[7, 8, 9][..]));
    }

    #[test]
    fn overlapping_windows() {
        let ds = TokenDataset::new((0..6).collect::<Vec<u32>>(), nz(4), nz(1));
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.sample(1), (&[1, 2, 3, 4][..], &[2, 3, 4, 5][..]));
    }

    #[test]
    fn too_short_stream_is_empty() {
        let ds = TokenDataset::new(vec![1, 2, 3], nz(3), nz(3));
        assert!(ds.is_empty());
    }

    #[test]
    fn split_keeps_the_tail() {
        let ds = TokenDataset::new((0..20).collect::<Vec<u32>>(), nz(2), nz(2));
        let (train, val) = ds.split(0.25);

        assert_eq!(train.tokens(), &(0..15).collect::<Vec<u32>>()[..]);
        assert_eq!(val.tokens(), &[15, 16, 17, 18, 19]);
        assert_eq!(val.seq_len(), 2);
    }

    #[test]
    fn batch_stacks_samples() {
        let ds = TokenDataset::new((0..10).collect::<Vec<u32>>(), nz(3), nz(3));
        let batch = ds.batch(&[2, 0]);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.num_tokens(), 6);
        assert_eq!(batch.inputs, array![[6, 7, 8], [0, 1, 2]]);
        assert_eq!(batch.targets, array![[7, 8, 9], [1, 2, 3]]);
        assert_eq!(&*batch.flat_targets(), &[7, 8, 9, 1, 2, 3]);
    }

    #[test]
    fn read_u16_tokens() {
        let path = env::temp_dir().join(format!("tokens-u16-{}.bin", std::process::id()));
        fs::write(&path, [1u8, 0, 0, 1, 255, 255]).unwrap();

        let tokens = read_tokens(&path, DataFormat::U16).unwrap();
        assert_eq!(tokens, vec![1, 256, 65535]);

        fs::write(&path, [1u8, 0, 0]).unwrap();
        let err = read_tokens(&path, DataFormat::U16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn read_text_tokens_are_bytes() {
        let path = env::temp_dir().join(format!("tokens-text-{}.txt", std::process::id()));
        fs::write(&path, "ab").unwrap();

        assert_eq!(read_tokens(&path, DataFormat::Text).unwrap(), vec![97, 98]);

        fs::remove_file(path).unwrap();
    }
}
