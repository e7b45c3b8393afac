//! Block math: fixed-size spans over a file, block naming, block counts.

/// Default block size in bytes.
pub const BLOCK_SIZE: u64 = 100_000;

/// Number of blocks for a file of `total_len` bytes. Zero for an empty file;
/// the final block may be shorter than `block_size` but is never empty.
pub fn block_count(total_len: u64, block_size: u64) -> u64 {
    let size = if block_size == 0 { BLOCK_SIZE } else { block_size };
    total_len.div_ceil(size)
}

/// Byte spans `(start, end)` of each block in index order.
pub fn block_spans(total_len: u64, block_size: u64) -> Vec<(u64, u64)> {
    let size = if block_size == 0 { BLOCK_SIZE } else { block_size };
    let mut out = Vec::new();
    let mut start = 0u64;
    while start < total_len {
        let end = (start + size).min(total_len);
        out.push((start, end));
        start = end;
    }
    out
}

/// Wire name for one block of a file.
pub fn block_name(file_name: &str, index: u64) -> String {
    format!("{file_name}.block{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_with_short_tail() {
        let spans = block_spans(250_000, 100_000);
        assert_eq!(spans, vec![(0, 100_000), (100_000, 200_000), (200_000, 250_000)]);
        assert_eq!(block_count(250_000, 100_000), 3);
    }

    #[test]
    fn spans_exact_multiple() {
        let spans = block_spans(90, 30);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[2], (60, 90));
    }

    #[test]
    fn single_span() {
        assert_eq!(block_spans(10, 100), vec![(0, 10)]);
    }

    #[test]
    fn empty_file_has_no_blocks() {
        assert!(block_spans(0, 100_000).is_empty());
        assert_eq!(block_count(0, 100_000), 0);
    }

    #[test]
    fn zero_block_size_uses_default() {
        assert_eq!(block_count(BLOCK_SIZE * 2, 0), 2);
    }

    #[test]
    fn block_naming() {
        assert_eq!(block_name("a.bin", 2), "a.bin.block2");
    }
}
