//! Active file sessions
//!
//! An [`ActiveFile`] is one worker's open handle on one file. It owns the
//! file's [`FileLease`] for as long as the file is open, knows where the next
//! transfer goes, and tracks how much of the per-file quota has been used.
//!
//! Sessions are never shared. Mixed read/write hands a session from one
//! sub-operation to the other by moving it.

use crate::blocked::BlockReason;
use crate::engine::{Handle, OpenMode};
use crate::error::FatalError;
use crate::namespace::{FileEntry, FileLease};
use crate::stats::{response_micros, OperationKind};
use crate::worker::WorkerCtx;
use crate::Result;
use rand::Rng;
use std::sync::Arc;

/// One open file and its transfer position
#[derive(Debug)]
pub struct ActiveFile {
    lease: FileLease,
    handle: Handle,
    mode: OpenMode,
    xfersize: u64,
    prev_xfer: u64,
    next_offset: u64,
    last_random: Option<u64>,
    /// Highest byte written through this session; reads may go up to here
    high_write: u64,
    blocks_done: u64,
    bytes_done: u64,
    blocks_to_do: u64,
    bytes_to_do: u64,
    done_enough: bool,
}

impl ActiveFile {
    /// Open the leased file
    ///
    /// The quota is the file's target size unless the workload sets
    /// `stop_after`: a positive value is a block count, a negative one a
    /// percentage of the target size.
    ///
    /// # Errors
    ///
    /// [`FatalError::OpenFailed`] when the provider rejects the open, and
    /// [`FatalError::DuplicateHandle`] if the handle is already registered.
    pub fn open(lease: FileLease, mode: OpenMode, ctx: &mut WorkerCtx) -> Result<Self> {
        let run = Arc::clone(&ctx.run);
        let start = run.io.now();
        let handle = run.io.open(lease.path(), mode).map_err(|e| FatalError::OpenFailed {
            path: lease.path().to_path_buf(),
            reason: e.to_string(),
        })?;
        let end = run.io.now();
        run.handles.register(handle, lease.path())?;
        ctx.stats
            .record(OperationKind::Open, response_micros(start, end, OperationKind::Open)?, 0);

        ctx.blocker.event(match mode {
            OpenMode::Read => BlockReason::ReadOpens,
            OpenMode::Write => BlockReason::WriteOpens,
        });

        let target = lease.entry().target_size();
        let (blocks_to_do, bytes_to_do) = match ctx.group.config.stop_after {
            None | Some(0) => (u64::MAX, target),
            Some(n) if n > 0 => (n as u64, u64::MAX),
            Some(n) => (u64::MAX, target.saturating_mul(n.unsigned_abs()) / 100),
        };

        Ok(Self {
            lease,
            handle,
            mode,
            xfersize: 0,
            prev_xfer: 0,
            next_offset: 0,
            last_random: None,
            high_write: 0,
            blocks_done: 0,
            bytes_done: 0,
            blocks_to_do,
            bytes_to_do,
            done_enough: false,
        })
    }

    pub fn lease(&self) -> &FileLease {
        &self.lease
    }

    pub fn entry(&self) -> &FileEntry {
        self.lease.entry()
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn xfersize(&self) -> u64 {
        self.xfersize
    }

    /// Transfer size for the next block; the advance calls may shorten it
    pub fn set_xfersize(&mut self, xfersize: u64) {
        self.xfersize = xfersize;
    }

    pub fn offset(&self) -> u64 {
        self.next_offset
    }

    /// Place the next transfer at `offset` with `length` bytes
    ///
    /// Used by copy to mirror the source position on the target.
    pub fn set_position(&mut self, offset: u64, length: u64) {
        self.next_offset = offset;
        self.xfersize = length;
        self.prev_xfer = length;
    }

    pub fn blocks_done(&self) -> u64 {
        self.blocks_done
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done
    }

    pub fn done_enough(&self) -> bool {
        self.done_enough
    }

    /// Highest offset a transfer may reach
    fn extent(&self, reading: bool) -> u64 {
        let entry = self.lease.entry();
        if reading {
            entry.current_size().max(self.high_write)
        } else {
            entry.target_size()
        }
    }

    /// Move to the next sequential block
    ///
    /// Returns false at the end of the file. The last block is shortened to
    /// fit. Sessions never wrap: reaching the end ends the session, and the
    /// operation moves on to the next file.
    pub fn advance_sequential(&mut self, reading: bool) -> bool {
        let max = self.extent(reading);
        self.next_offset += self.prev_xfer;
        if self.xfersize == 0 || self.next_offset >= max {
            return false;
        }
        if self.next_offset + self.xfersize > max {
            self.xfersize = max - self.next_offset;
        }
        self.prev_xfer = self.xfersize;
        true
    }

    /// Pick a random block aligned on the transfer size
    ///
    /// The previous random offset is never picked twice in a row while more
    /// than one block fits. A file shorter than the transfer size gets one
    /// shortened transfer at offset 0. Returns false only for an empty
    /// extent.
    pub fn advance_random<R: Rng + ?Sized>(&mut self, reading: bool, rng: &mut R) -> bool {
        let max = self.extent(reading);
        if self.xfersize == 0 || max == 0 {
            return false;
        }
        if max < self.xfersize {
            self.xfersize = max;
            self.next_offset = 0;
        } else {
            let blocks = max / self.xfersize;
            let previous = self
                .last_random
                .filter(|&offset| offset % self.xfersize == 0 && offset / self.xfersize < blocks)
                .map(|offset| offset / self.xfersize);
            let block = match previous {
                Some(skip) if blocks > 1 => {
                    let pick = rng.gen_range(0..blocks - 1);
                    if pick >= skip {
                        pick + 1
                    } else {
                        pick
                    }
                }
                _ => rng.gen_range(0..blocks),
            };
            self.next_offset = block * self.xfersize;
        }
        self.last_random = Some(self.next_offset);
        self.prev_xfer = self.xfersize;
        true
    }

    /// Set "done enough" once the block or byte quota is reached
    pub fn check_quota(&mut self) -> bool {
        if self.blocks_done >= self.blocks_to_do || self.bytes_done >= self.bytes_to_do {
            self.done_enough = true;
        }
        self.done_enough
    }

    /// Read the current block
    ///
    /// A failed read is counted, not returned. The caller should look at
    /// [`ActiveFile::done_enough`] afterwards; a file that just turned bad is
    /// marked done.
    ///
    /// # Errors
    ///
    /// Fatal when the block lies beyond the known end of the file, when the
    /// clock goes backwards, or when the data error ceiling is exceeded.
    pub fn read_block(&mut self, ctx: &mut WorkerCtx) -> Result<()> {
        let length = self.xfersize;
        let size = self.extent(true);
        if self.next_offset + length > size {
            return Err(FatalError::ReadBeyondEof {
                path: self.lease.path().to_path_buf(),
                offset: self.next_offset,
                length,
                size,
            }
            .into());
        }

        let run = Arc::clone(&ctx.run);
        let buf = ctx.buffer_for(length);
        let start = run.io.now();
        let result = run.io.read(self.handle, self.next_offset, buf);
        let end = run.io.now();
        let micros = response_micros(start, end, OperationKind::Read)?;

        self.blocks_done += 1;
        self.bytes_done += length;
        match result {
            Ok(()) => ctx.stats.record(OperationKind::Read, micros, length),
            Err(e) => self.transfer_failed(OperationKind::Read, &e, ctx)?,
        }
        Ok(())
    }

    /// Write the current block
    ///
    /// With validation enabled the key map learns about the block before it
    /// is written. Failures are handled as in [`ActiveFile::read_block`].
    pub fn write_block(&mut self, ctx: &mut WorkerCtx) -> Result<()> {
        let length = self.xfersize;
        let run = Arc::clone(&ctx.run);
        if let Some(key_map) = &run.key_map {
            key_map.store_block_info(self.lease.path(), self.next_offset, length);
        }
        self.high_write = self.high_write.max(self.next_offset + length);

        let buf = ctx.buffer_for(length);
        let start = run.io.now();
        let result = run.io.write(self.handle, self.next_offset, buf);
        let end = run.io.now();
        let micros = response_micros(start, end, OperationKind::Write)?;

        self.blocks_done += 1;
        self.bytes_done += length;
        match result {
            Ok(()) => ctx.stats.record(OperationKind::Write, micros, length),
            Err(e) => self.transfer_failed(OperationKind::Write, &e, ctx)?,
        }
        Ok(())
    }

    fn transfer_failed(&mut self, kind: OperationKind, err: &std::io::Error, ctx: &mut WorkerCtx) -> Result<()> {
        if self.lease.mark_block_bad(self.xfersize) {
            tracing::warn!(
                worker = ctx.id,
                path = %self.lease.path().display(),
                "too many failed blocks, file will be skipped"
            );
        }
        if self.lease.entry().is_bad() {
            self.done_enough = true;
        }
        ctx.data_error(kind, self.lease.path(), self.next_offset, self.xfersize, err)
    }

    /// Close the handle but keep the file locked
    ///
    /// Copy uses this to set the copied flag after the close. Records the
    /// close, and the creation if the file did not exist before.
    pub fn close_keep_lease(self, ctx: &mut WorkerCtx) -> Result<FileLease> {
        let run = Arc::clone(&ctx.run);
        let path = self.lease.path().to_path_buf();

        let size = match self.mode {
            OpenMode::Write => Some(run.io.size(self.handle).map_err(|e| FatalError::MetadataFailed {
                op: "size",
                path: path.clone(),
                reason: e.to_string(),
            })?),
            OpenMode::Read => None,
        };

        // Unregister first so a recycled handle number cannot collide
        run.handles.unregister(self.handle)?;
        let start = run.io.now();
        run.io.close(self.handle).map_err(|e| FatalError::MetadataFailed {
            op: "close",
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let end = run.io.now();
        ctx.stats
            .record(OperationKind::Close, response_micros(start, end, OperationKind::Close)?, 0);
        ctx.blocker.event(BlockReason::FileCloses);

        if !self.lease.entry().exists() {
            self.lease.set_exists(true)?;
            ctx.blocker.event(BlockReason::FileCreates);
        }
        if let Some(size) = size {
            self.lease.set_current_size(size);
        }
        Ok(self.lease)
    }

    /// Close the handle and release the file
    pub fn close(self, ctx: &mut WorkerCtx) -> Result<()> {
        self.close_keep_lease(ctx)?.release()
    }
}

/// Close whatever session `slot` holds; an empty slot is a no-op
pub fn close_session(slot: &mut Option<ActiveFile>, ctx: &mut WorkerCtx) -> Result<()> {
    match slot.take() {
        Some(session) => session.close(ctx),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileSizes, OperationType, WorkloadConfig};
    use crate::engine::mock::{IoCall, MockIo};
    use crate::engine::NativeIo;
    use crate::worker::testing::{anchor_with, ctx_for};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_sequential_position_strictly_increases() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(10_000), &[]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("w", "a", OperationType::Write));

        let lease = anchor.try_lock_file(0).unwrap();
        let mut afe = ActiveFile::open(lease, OpenMode::Write, &mut ctx).unwrap();
        afe.set_xfersize(4096);

        let mut offsets = Vec::new();
        let mut lengths = Vec::new();
        while afe.advance_sequential(false) {
            offsets.push(afe.offset());
            lengths.push(afe.xfersize());
            afe.write_block(&mut ctx).unwrap();
        }
        assert_eq!(offsets, vec![0, 4096, 8192]);
        assert_eq!(lengths, vec![4096, 4096, 10_000 - 8192]);
        // No wrap back to offset 0
        assert!(!afe.advance_sequential(false));
        assert!(afe.check_quota());

        afe.close(&mut ctx).unwrap();
        let entry = anchor.file(0);
        assert!(entry.exists());
        assert_eq!(entry.current_size(), 10_000);
        assert!(!entry.is_busy());
        assert_eq!(ctx.blocker.counters().get(BlockReason::FileCreates), 1);
        assert!(ctx.run.handles.is_empty());
    }

    #[test]
    fn test_random_in_short_file_uses_offset_zero() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(1000), &[0]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("w", "a", OperationType::Read));
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);

        let lease = anchor.try_lock_file(0).unwrap();
        let mut afe = ActiveFile::open(lease, OpenMode::Read, &mut ctx).unwrap();
        afe.set_xfersize(4096);
        assert!(afe.advance_random(true, &mut rng));
        assert_eq!((afe.offset(), afe.xfersize()), (0, 1000));
        afe.read_block(&mut ctx).unwrap();

        afe.set_xfersize(100);
        for _ in 0..50 {
            assert!(afe.advance_random(true, &mut rng));
            assert_eq!(afe.offset() % 100, 0);
            assert!(afe.offset() + 100 <= 1000);
        }
        afe.close(&mut ctx).unwrap();
        assert_eq!(ctx.stats.snapshot().counter(OperationKind::Read).operations, 1);
    }

    #[test]
    fn test_random_write_needs_a_target_size() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(0), &[]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("w", "a", OperationType::Write));
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);

        let mut afe = ActiveFile::open(anchor.try_lock_file(0).unwrap(), OpenMode::Write, &mut ctx).unwrap();
        afe.set_xfersize(4096);
        assert!(!afe.advance_random(false, &mut rng));
        afe.close(&mut ctx).unwrap();
    }

    #[test]
    fn test_random_never_repeats_previous_offset() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(4 * 4096), &[0]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("w", "a", OperationType::Read));
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);

        let mut afe = ActiveFile::open(anchor.try_lock_file(0).unwrap(), OpenMode::Read, &mut ctx).unwrap();
        afe.set_xfersize(4096);
        let mut seen = [0u32; 4];
        let mut previous = None;
        for _ in 0..4000 {
            assert!(afe.advance_random(true, &mut rng));
            let offset = afe.offset();
            assert_ne!(Some(offset), previous);
            seen[(offset / 4096) as usize] += 1;
            previous = Some(offset);
        }
        // Still spread over every block
        assert!(seen.iter().all(|&n| n > 700), "{:?}", seen);

        // With a single block the only offset is allowed to repeat
        afe.set_xfersize(4 * 4096);
        assert!(afe.advance_random(true, &mut rng));
        assert!(afe.advance_random(true, &mut rng));
        assert_eq!(afe.offset(), 0);
        afe.close(&mut ctx).unwrap();
    }

    #[test]
    fn test_stop_after_quota() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(100 * 1024), &[0]);

        let mut config = WorkloadConfig::new("w", "a", OperationType::Read);
        config.stop_after = Some(2);
        let mut ctx = ctx_for(&io, &anchor, config);
        let mut afe = ActiveFile::open(anchor.try_lock_file(0).unwrap(), OpenMode::Read, &mut ctx).unwrap();
        afe.set_xfersize(1024);
        for _ in 0..2 {
            assert!(!afe.check_quota());
            assert!(afe.advance_sequential(true));
            afe.read_block(&mut ctx).unwrap();
        }
        assert!(afe.check_quota());
        afe.close(&mut ctx).unwrap();

        let mut config = WorkloadConfig::new("w", "a", OperationType::Read);
        config.stop_after = Some(-10);
        let mut ctx = ctx_for(&io, &anchor, config);
        let mut afe = ActiveFile::open(anchor.try_lock_file(0).unwrap(), OpenMode::Read, &mut ctx).unwrap();
        afe.set_xfersize(1024);
        let mut blocks = 0;
        while !afe.check_quota() && afe.advance_sequential(true) {
            afe.read_block(&mut ctx).unwrap();
            blocks += 1;
        }
        assert_eq!(blocks, 10);
        afe.close(&mut ctx).unwrap();
    }

    #[test]
    fn test_read_error_is_counted() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(8192), &[0]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("w", "a", OperationType::Read));
        io.set_fail_reads(true);

        let mut afe = ActiveFile::open(anchor.try_lock_file(0).unwrap(), OpenMode::Read, &mut ctx).unwrap();
        afe.set_xfersize(4096);
        assert!(afe.advance_sequential(true));
        afe.read_block(&mut ctx).unwrap();
        afe.close(&mut ctx).unwrap();

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.counter(OperationKind::Read).errors, 1);
        assert_eq!(stats.counter(OperationKind::Read).operations, 0);
        // 4096 bytes of an 8192 byte file is well over 1%
        assert!(anchor.file(0).is_bad());
    }

    #[test]
    fn test_close_session_is_idempotent() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(4096), &[0]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("w", "a", OperationType::Read));

        let afe = ActiveFile::open(anchor.try_lock_file(0).unwrap(), OpenMode::Read, &mut ctx).unwrap();
        let mut slot = Some(afe);
        close_session(&mut slot, &mut ctx).unwrap();
        assert!(slot.is_none());
        close_session(&mut slot, &mut ctx).unwrap();
        assert_eq!(io.calls_of(IoCall::Close).len(), 1);
        assert_eq!(io.open_handles(), 0);
        assert!(!anchor.file(0).is_busy());
    }

    #[test]
    fn test_open_failure_is_fatal() {
        let io = Arc::new(MockIo::new());
        let anchor = anchor_with(&io, "a", 1, 1, 1, FileSizes::Fixed(4096), &[]);
        let mut ctx = ctx_for(&io, &anchor, WorkloadConfig::new("w", "a", OperationType::Read));

        let err = ActiveFile::open(anchor.try_lock_file(0).unwrap(), OpenMode::Read, &mut ctx).unwrap_err();
        assert!(matches!(
            crate::error::as_fatal(&err),
            Some(FatalError::OpenFailed { .. })
        ));
        // The lease was dropped with the error
        assert!(!anchor.file(0).is_busy());
        assert!(!io.exists(anchor.file(0).path()));
    }
}
