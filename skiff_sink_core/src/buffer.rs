use bytes::{Bytes, BytesMut};
use snafu::ensure;

use crate::error::{BatchTooLargeSnafu, Result};

/// Ceiling for one assembled batch buffer.
pub const MAX_BATCH_BYTES: u64 = u32::MAX as u64;

/// Concatenates an ordered list of buffers into one contiguous buffer.
///
/// Total length is computed up front so the [`MAX_BATCH_BYTES`] ceiling
/// fails before any allocation. An empty input yields an empty buffer.
pub fn concat_buffers(buffers: &[Bytes]) -> Result<Bytes> {
    let total_bytes = buffers.iter().fold(0u64, |acc, b| acc + b.len() as u64);
    ensure!(
        total_bytes <= MAX_BATCH_BYTES,
        BatchTooLargeSnafu { total_bytes }
    );

    if total_bytes == 0 {
        return Ok(Bytes::new());
    }

    let mut assembled = BytesMut::with_capacity(total_bytes as usize);
    for buffer in buffers {
        assembled.extend_from_slice(buffer);
    }

    Ok(assembled.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;

    #[test]
    fn concatenation_preserves_order_and_length() {
        let buffers = vec![
            Bytes::from_static(b"alpha"),
            Bytes::from_static(b"-"),
            Bytes::from_static(b"omega"),
        ];

        let assembled = concat_buffers(&buffers).unwrap();
        assert_eq!(11, assembled.len());
        assert_eq!(&b"alpha-omega"[..], &assembled[..]);
    }

    #[test]
    fn output_length_equals_sum_of_inputs() {
        let buffers = vec![
            Bytes::from(vec![1u8; 10]),
            Bytes::from(vec![2u8; 20]),
            Bytes::from(vec![3u8; 30]),
        ];

        let assembled = concat_buffers(&buffers).unwrap();
        assert_eq!(60, assembled.len());
        assert_eq!(&[1u8; 10][..], &assembled[..10]);
        assert_eq!(&[2u8; 20][..], &assembled[10..30]);
        assert_eq!(&[3u8; 30][..], &assembled[30..]);
    }

    #[test]
    fn empty_input_yields_empty_buffer() {
        let assembled = concat_buffers(&[]).unwrap();
        assert!(assembled.is_empty());
    }

    #[test]
    fn measurement_is_idempotent() {
        let buffers = vec![Bytes::from_static(b"same"), Bytes::from_static(b"bytes")];

        let first = concat_buffers(&buffers).unwrap();
        let second = concat_buffers(&buffers).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        // Zero-copy slices of one shared allocation; the total crosses the
        // ceiling without materializing it.
        let chunk = Bytes::from(vec![0u8; 1 << 20]);
        let chunks_needed = (MAX_BATCH_BYTES / (1 << 20) + 1) as usize;
        let buffers = vec![chunk; chunks_needed];

        let result = concat_buffers(&buffers);
        assert!(matches!(result, Err(SinkError::BatchTooLarge { .. })));
    }
}
