//! Leading row-count detection.
//!
//! Payloads may start with a block holding only the number of rows. Nothing
//! marks it explicitly: a first block without a token separator is taken to
//! be the count. For a schema with a single field every block lacks a token
//! separator, so the first data row of an unprefixed payload is swallowed.
//! [`ResultCodec::encode`](super::ResultCodec::encode) therefore always writes
//! the prefix.

/// Outcome of looking for a row-count prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCountPrefix {
    Absent,
    /// A prefix block was found. `declared` is its value when it parses.
    Present { declared: Option<usize> },
}

/// Split off a leading row-count block.
///
/// Returns the detection outcome and the remaining data blocks.
pub fn strip_row_count_prefix<'a, 'b>(
    blocks: &'b [&'a str],
    token_separator: &str,
) -> (RowCountPrefix, &'b [&'a str]) {
    match blocks.split_first() {
        Some((first, rest)) if !first.contains(token_separator) => (
            RowCountPrefix::Present {
                declared: first.trim().parse().ok(),
            },
            rest,
        ),
        _ => (RowCountPrefix::Absent, blocks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_block_is_stripped() {
        let blocks = ["2", "a,1", "b,2"];
        let (prefix, rest) = strip_row_count_prefix(&blocks, ",");
        assert_eq!(prefix, RowCountPrefix::Present { declared: Some(2) });
        assert_eq!(rest, &["a,1", "b,2"]);
    }

    #[test]
    fn test_first_row_with_separator_is_data() {
        let blocks = ["a,1", "b,2"];
        let (prefix, rest) = strip_row_count_prefix(&blocks, ",");
        assert_eq!(prefix, RowCountPrefix::Absent);
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn test_non_numeric_prefix_still_stripped() {
        let blocks = ["header", "a,1"];
        let (prefix, rest) = strip_row_count_prefix(&blocks, ",");
        assert_eq!(prefix, RowCountPrefix::Present { declared: None });
        assert_eq!(rest, &["a,1"]);
    }

    #[test]
    fn test_single_field_rows_lose_first_block() {
        // Every block lacks the separator; the first one is read as a count.
        let blocks = ["5.2", "5.4"];
        let (_, rest) = strip_row_count_prefix(&blocks, ",");
        assert_eq!(rest, &["5.4"]);
    }

    #[test]
    fn test_empty_input() {
        let blocks: [&str; 0] = [];
        let (prefix, rest) = strip_row_count_prefix(&blocks, ",");
        assert_eq!(prefix, RowCountPrefix::Absent);
        assert!(rest.is_empty());
    }
}
