use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;
use tracing::warn;

use crate::compression::{BytesCompression, CompressionBackend};

/// Monotonic clock for least-recently-touched ordering across all blocks.
static TOUCH_CLOCK: AtomicU64 = AtomicU64::new(1);

fn next_touch() -> u64 {
    TOUCH_CLOCK.fetch_add(1, Ordering::Relaxed)
}

enum BlockData {
    Uncompressed(Vec<u8>),
    Compressed(Vec<u8>),
}

struct BlockState {
    data: BlockData,
    retain_count: usize,
    touch: u64,
}

/// The voxel byte storage for one (region, layer) pair.
///
/// A block is either uncompressed (a plain byte buffer) or compressed. Access goes through
/// [`retain`](Self::retain), which decompresses as needed and pins the block: while any
/// [`VoxelBuffer`] is alive the block will not be compressed. The retain count tracks pinning
/// only; block lifetime is owned by the region.
pub struct VoxelBlock {
    layer_index: usize,
    voxel_byte_size: usize,
    uncompressed_size: usize,
    backend: Option<CompressionBackend>,
    state: Mutex<BlockState>,
}

impl VoxelBlock {
    /// Create an uncompressed block holding `voxel_count` voxels cleared to `clear_pattern`.
    pub fn new(
        layer_index: usize,
        clear_pattern: &[u8],
        voxel_count: usize,
        backend: Option<CompressionBackend>,
    ) -> Arc<Self> {
        let uncompressed_size = clear_pattern.len() * voxel_count;
        Arc::new(Self {
            layer_index,
            voxel_byte_size: clear_pattern.len(),
            uncompressed_size,
            backend,
            state: Mutex::new(BlockState {
                data: BlockData::Uncompressed(clear_pattern.repeat(voxel_count)),
                retain_count: 0,
                touch: next_touch(),
            }),
        })
    }

    #[inline]
    pub fn layer_index(&self) -> usize {
        self.layer_index
    }

    /// Byte size of one voxel in this block.
    #[inline]
    pub fn voxel_byte_size(&self) -> usize {
        self.voxel_byte_size
    }

    /// Byte size of the uncompressed buffer.
    #[inline]
    pub fn uncompressed_size(&self) -> usize {
        self.uncompressed_size
    }

    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.uncompressed_size / self.voxel_byte_size.max(1)
    }

    /// Pin the block uncompressed and return an accessor. Blocks while a compression worker holds
    /// the block's state lock.
    pub fn retain(self: &Arc<Self>) -> VoxelBuffer {
        let mut state = self.state.lock();
        if let BlockData::Compressed(compressed) = &state.data {
            let mut bytes = Vec::with_capacity(self.uncompressed_size);
            self.backend
                .as_ref()
                .expect("compressed block without a backend")
                .decompress_bytes(compressed.as_slice(), &mut bytes)
                .expect("voxel block decompression failed");
            state.data = BlockData::Uncompressed(bytes);
        }
        state.retain_count += 1;
        state.touch = next_touch();

        VoxelBuffer {
            block: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.retain_count > 0);
        state.retain_count -= 1;
    }

    /// Number of outstanding retains.
    pub fn retain_count(&self) -> usize {
        self.state.lock().retain_count
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        matches!(self.state.lock().data, BlockData::Compressed(_))
    }

    /// The last-touched stamp, for least-recently-touched eviction ordering.
    pub fn touch_stamp(&self) -> u64 {
        self.state.lock().touch
    }

    /// Bytes of uncompressed heap memory this block currently holds.
    pub fn heap_bytes(&self) -> usize {
        match self.state.lock().data {
            BlockData::Uncompressed(_) => self.uncompressed_size,
            BlockData::Compressed(_) => 0,
        }
    }

    /// Compress the block if it is uncompressed and unretained. Returns the number of
    /// uncompressed bytes released, or zero when the block was left as it was. A compression
    /// failure is logged and leaves the buffer uncompressed.
    pub fn try_compress(&self) -> usize {
        let backend = match self.backend.as_ref() {
            Some(backend) => backend,
            None => return 0,
        };

        let mut state = self.state.lock();
        if state.retain_count > 0 {
            return 0;
        }
        let bytes = match &state.data {
            BlockData::Uncompressed(bytes) => bytes,
            BlockData::Compressed(_) => return 0,
        };

        let mut compressed = Vec::new();
        match backend.compress_bytes(bytes.as_slice(), &mut compressed) {
            Ok(()) => {
                state.data = BlockData::Compressed(compressed);
                self.uncompressed_size
            }
            Err(error) => {
                warn!(layer = self.layer_index, %error, "voxel block compression failed");
                0
            }
        }
    }
}

/// A retained accessor over a [`VoxelBlock`]'s uncompressed bytes.
///
/// Holding a buffer pins the owning block against compression. Reads and writes of whole voxel
/// structs are serialised through the block lock, so no torn values are observable.
pub struct VoxelBuffer {
    block: Arc<VoxelBlock>,
}

impl VoxelBuffer {
    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.block.voxel_count()
    }

    #[inline]
    pub fn layer_index(&self) -> usize {
        self.block.layer_index()
    }

    /// Read the voxel struct at `index`.
    pub fn read<T: Pod>(&self, index: usize) -> T {
        debug_assert_eq!(core::mem::size_of::<T>(), self.block.voxel_byte_size());
        let offset = index * core::mem::size_of::<T>();
        let state = self.block.state.lock();
        match &state.data {
            BlockData::Uncompressed(bytes) => {
                bytemuck::pod_read_unaligned(&bytes[offset..offset + core::mem::size_of::<T>()])
            }
            BlockData::Compressed(_) => unreachable!("retained block is always uncompressed"),
        }
    }

    /// Write the voxel struct at `index`.
    pub fn write<T: Pod>(&self, index: usize, value: T) {
        debug_assert_eq!(core::mem::size_of::<T>(), self.block.voxel_byte_size());
        let offset = index * core::mem::size_of::<T>();
        let mut state = self.block.state.lock();
        match &mut state.data {
            BlockData::Uncompressed(bytes) => {
                bytes[offset..offset + core::mem::size_of::<T>()]
                    .copy_from_slice(bytemuck::bytes_of(&value));
            }
            BlockData::Compressed(_) => unreachable!("retained block is always uncompressed"),
        }
        state.touch = next_touch();
    }

    /// Run `f` over the whole uncompressed byte buffer.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let state = self.block.state.lock();
        match &state.data {
            BlockData::Uncompressed(bytes) => f(bytes),
            BlockData::Compressed(_) => unreachable!("retained block is always uncompressed"),
        }
    }

    /// Run `f` over the whole uncompressed byte buffer, mutably.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut state = self.block.state.lock();
        state.touch = next_touch();
        match &mut state.data {
            BlockData::Uncompressed(bytes) => f(bytes),
            BlockData::Compressed(_) => unreachable!("retained block is always uncompressed"),
        }
    }

    /// Reset every voxel to `clear_pattern`.
    pub fn fill_clear(&self, clear_pattern: &[u8]) {
        self.with_bytes_mut(|bytes| {
            for chunk in bytes.chunks_exact_mut(clear_pattern.len()) {
                chunk.copy_from_slice(clear_pattern);
            }
        });
    }
}

impl Clone for VoxelBuffer {
    fn clone(&self) -> Self {
        self.block.retain()
    }
}

impl Drop for VoxelBuffer {
    fn drop(&mut self) {
        self.block.release();
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod tests {
    use super::*;

    fn test_block() -> Arc<VoxelBlock> {
        VoxelBlock::new(
            0,
            &0f32.to_le_bytes(),
            64,
            CompressionBackend::preferred(),
        )
    }

    #[test]
    fn new_block_holds_the_clear_value() {
        let block = test_block();
        let buffer = block.retain();
        for i in 0..buffer.voxel_count() {
            assert_eq!(buffer.read::<f32>(i), 0.0);
        }
    }

    #[test]
    fn read_back_written_values() {
        let block = test_block();
        let buffer = block.retain();
        buffer.write(3, 1.5f32);
        buffer.write(63, -2.5f32);
        assert_eq!(buffer.read::<f32>(3), 1.5);
        assert_eq!(buffer.read::<f32>(63), -2.5);
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn retained_blocks_do_not_compress() {
        let block = test_block();
        let _buffer = block.retain();
        assert_eq!(block.try_compress(), 0);
        assert!(!block.is_compressed());
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn compression_round_trip_preserves_bytes() {
        let block = test_block();
        {
            let buffer = block.retain();
            for i in 0..buffer.voxel_count() {
                buffer.write(i, i as f32 * 0.25);
            }
        }

        assert!(block.try_compress() > 0);
        assert!(block.is_compressed());
        assert_eq!(block.heap_bytes(), 0);

        let buffer = block.retain();
        assert!(!block.is_compressed());
        for i in 0..buffer.voxel_count() {
            assert_eq!(buffer.read::<f32>(i), i as f32 * 0.25);
        }
    }

    #[test]
    fn release_unpins() {
        let block = test_block();
        let a = block.retain();
        let b = a.clone();
        assert_eq!(block.retain_count(), 2);
        drop(a);
        assert_eq!(block.retain_count(), 1);
        drop(b);
        assert_eq!(block.retain_count(), 0);
    }
}
