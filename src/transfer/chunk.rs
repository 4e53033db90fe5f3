// 分片规划
//
// 将对象总大小按固定分片大小切分为连续、无重叠的字节区间：
// - 区间左闭右开（`start..end`），Range 请求头使用 `bytes=start-(end-1)`
// - 整除时不产生末尾空分片，不整除时最后一个分片较短
// - 0 字节对象产生恰好一个空分片，保证空对象也能走完整个传输流程

use crate::transfer::error::TransferError;
use std::ops::Range;
use tracing::debug;

/// 默认分片大小: 5MB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 默认分片数上限
pub const DEFAULT_MAX_CHUNK_COUNT: u64 = 10_000;

/// 分片字节区间
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    /// 分片索引（0 起始，连续）
    pub index: u64,
    /// 字节范围（左闭右开）
    pub range: Range<u64>,
}

impl ChunkRange {
    pub fn new(index: u64, range: Range<u64>) -> Self {
        Self { index, range }
    }

    /// 分片大小
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.range.start == self.range.end
    }
}

/// 计算分片数量（0 字节对象计为 1 个分片）
pub fn chunk_count(total_size: u64, chunk_size: u64) -> u64 {
    if total_size == 0 || chunk_size == 0 {
        1
    } else {
        total_size.div_ceil(chunk_size)
    }
}

/// 规划分片
///
/// 纯函数，无 I/O。在任何网络请求之前调用一次作为预检。
///
/// # 参数
/// * `total_size` - 对象总大小
/// * `chunk_size` - 分片大小（必须大于 0）
/// * `max_chunk_count` - 允许的最大分片数
///
/// # 错误
/// - `InvalidSize`: 分片大小为 0
/// - `TooLarge`: 分片数超过 `max_chunk_count`
pub fn plan_chunks(
    total_size: u64,
    chunk_size: u64,
    max_chunk_count: u64,
) -> Result<Vec<ChunkRange>, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidSize(
            "分片大小必须大于 0".to_string(),
        ));
    }

    let count = chunk_count(total_size, chunk_size);
    if count > max_chunk_count {
        return Err(TransferError::TooLarge {
            chunks: count,
            max: max_chunk_count,
        });
    }

    let chunks: Vec<ChunkRange> = if total_size == 0 {
        vec![ChunkRange::new(0, 0..0)]
    } else {
        (0..count)
            .map(|index| {
                let start = index * chunk_size;
                let end = start.saturating_add(chunk_size).min(total_size);
                ChunkRange::new(index, start..end)
            })
            .collect()
    };

    debug!(
        "分片规划: 总大小={} bytes, 分片大小={} bytes, 分片数量={}",
        total_size,
        chunk_size,
        chunks.len()
    );

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_chunk_calculation() {
        // 整除：不产生末尾空分片
        let chunks = plan_chunks(16 * 1024 * 1024, 4 * 1024 * 1024, 100).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].range, 0..(4 * 1024 * 1024));
        assert_eq!(chunks[3].range, (12 * 1024 * 1024)..(16 * 1024 * 1024));

        // 不整除：最后一个分片较短
        let chunks = plan_chunks(17 * 1024 * 1024, 4 * 1024 * 1024, 100).unwrap();
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[4].range, (16 * 1024 * 1024)..(17 * 1024 * 1024));
        assert_eq!(chunks[4].len(), 1024 * 1024);
    }

    #[test]
    fn test_empty_object_single_chunk() {
        let chunks = plan_chunks(0, DEFAULT_CHUNK_SIZE, 1).unwrap();
        assert_eq!(chunks, vec![ChunkRange::new(0, 0..0)]);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_small_object_single_chunk() {
        let chunks = plan_chunks(1, DEFAULT_CHUNK_SIZE, 1).unwrap();
        assert_eq!(chunks, vec![ChunkRange::new(0, 0..1)]);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let err = plan_chunks(10, 0, 100).unwrap_err();
        assert!(matches!(err, TransferError::InvalidSize(_)));
    }

    #[test]
    fn test_too_many_chunks_rejected() {
        let err = plan_chunks(101, 10, 10).unwrap_err();
        assert!(matches!(err, TransferError::TooLarge { chunks: 11, max: 10 }));

        // 恰好等于上限允许
        assert_eq!(plan_chunks(100, 10, 10).unwrap().len(), 10);
    }

    proptest! {
        #[test]
        fn prop_chunks_partition_object(total in 0u64..50_000, chunk in 1u64..4_096) {
            let chunks = plan_chunks(total, chunk, u64::MAX).unwrap();

            prop_assert_eq!(chunks.len() as u64, chunk_count(total, chunk));
            prop_assert_eq!(chunks[0].range.start, 0);
            prop_assert_eq!(chunks.last().unwrap().range.end, total);

            for (i, c) in chunks.iter().enumerate() {
                prop_assert_eq!(c.index, i as u64);
                prop_assert!(c.len() <= chunk);
                if total > 0 {
                    prop_assert!(!c.is_empty());
                }
            }
            for pair in chunks.windows(2) {
                // 无缝隙、无重叠
                prop_assert_eq!(pair[0].range.end, pair[1].range.start);
                prop_assert_eq!(pair[0].len(), chunk);
            }
        }
    }
}
