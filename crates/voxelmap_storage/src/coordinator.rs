use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use slab::Slab;
use tracing::{debug, trace};

use crate::block::VoxelBlock;

/// How often the worker sweeps when no messages arrive.
const SWEEP_INTERVAL: Duration = Duration::from_millis(200);

enum Msg {
    Register(Weak<VoxelBlock>),
    Check,
    Shutdown,
}

/// Background compression of voxel blocks against two tide watermarks.
///
/// The coordinator tracks every block of its map. Whenever the total uncompressed byte count
/// exceeds `high_tide`, the least-recently-touched unretained blocks are compressed until the
/// total falls below `low_tide`. Retained blocks are never touched; compression failures are
/// logged by the block and the sweep moves on.
pub struct CompressionCoordinator {
    tx: Sender<Msg>,
    handle: Option<JoinHandle<()>>,
    high_tide: usize,
    low_tide: usize,
}

impl CompressionCoordinator {
    /// Spawn the worker. `high_tide` must be greater than `low_tide`.
    pub fn start(high_tide: usize, low_tide: usize) -> Self {
        debug_assert!(high_tide > low_tide);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = std::thread::Builder::new()
            .name("voxelmap-compression".to_owned())
            .spawn(move || worker(rx, high_tide, low_tide))
            .expect("failed to spawn the compression worker");

        Self {
            tx,
            handle: Some(handle),
            high_tide,
            low_tide,
        }
    }

    #[inline]
    pub fn high_tide(&self) -> usize {
        self.high_tide
    }

    #[inline]
    pub fn low_tide(&self) -> usize {
        self.low_tide
    }

    /// Hand a newly allocated block to the worker for tracking.
    pub fn register_block(&self, block: &Arc<VoxelBlock>) {
        let _ = self.tx.send(Msg::Register(Arc::downgrade(block)));
    }

    /// Ask the worker to sweep now rather than at the next timer tick.
    pub fn notify(&self) {
        let _ = self.tx.send(Msg::Check);
    }
}

impl Drop for CompressionCoordinator {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker(rx: Receiver<Msg>, high_tide: usize, low_tide: usize) {
    let mut blocks: Slab<Weak<VoxelBlock>> = Slab::new();
    loop {
        match rx.recv_timeout(SWEEP_INTERVAL) {
            Ok(Msg::Register(block)) => {
                blocks.insert(block);
            }
            Ok(Msg::Check) | Err(RecvTimeoutError::Timeout) => sweep(&mut blocks, high_tide, low_tide),
            Ok(Msg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("compression worker stopped");
}

fn sweep(blocks: &mut Slab<Weak<VoxelBlock>>, high_tide: usize, low_tide: usize) {
    // Drop registry entries whose regions have been destroyed.
    blocks.retain(|_, weak| weak.strong_count() > 0);

    let live: Vec<Arc<VoxelBlock>> = blocks.iter().filter_map(|(_, weak)| weak.upgrade()).collect();
    let total: usize = live.iter().map(|block| block.heap_bytes()).sum();
    if total <= high_tide {
        return;
    }

    // Candidates are uncompressed and unretained; compress least-recently-touched first.
    let mut candidates: Vec<&Arc<VoxelBlock>> = live
        .iter()
        .filter(|block| block.heap_bytes() > 0 && block.retain_count() == 0)
        .collect();
    candidates.sort_by_key(|block| block.touch_stamp());

    let mut released = 0usize;
    for block in candidates {
        if total - released <= low_tide {
            break;
        }
        released += block.try_compress();
    }

    trace!(total, released, "compression sweep");
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
#[cfg(feature = "lz4")]
mod tests {
    use super::*;
    use crate::compression::CompressionBackend;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn sweeps_down_to_the_low_tide() {
        let block_bytes = 4096;
        // Room for two uncompressed blocks below high tide, one below low tide.
        let coordinator = CompressionCoordinator::start(2 * block_bytes + 1, block_bytes + 1);

        let backend = CompressionBackend::preferred();
        let blocks: Vec<_> = (0..4)
            .map(|_| VoxelBlock::new(0, &[0u8; 4], block_bytes / 4, backend))
            .collect();
        for block in &blocks {
            coordinator.register_block(block);
        }
        coordinator.notify();

        assert!(wait_for(|| {
            let total: usize = blocks.iter().map(|b| b.heap_bytes()).sum();
            total <= block_bytes + 1
        }));
    }

    #[test]
    fn retained_blocks_are_never_compressed() {
        let block_bytes = 4096;
        let coordinator = CompressionCoordinator::start(block_bytes / 2, block_bytes / 4);

        let block = VoxelBlock::new(0, &[0u8; 4], block_bytes / 4, CompressionBackend::preferred());
        let buffer = block.retain();
        coordinator.register_block(&block);
        coordinator.notify();

        std::thread::sleep(Duration::from_millis(100));
        assert!(!block.is_compressed());
        drop(buffer);

        coordinator.notify();
        assert!(wait_for(|| block.is_compressed()));
    }
}
