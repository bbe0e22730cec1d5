// src/cache/writer.rs
//
// Double-buffered compile cache (§3 "Page-locking invariant", §4.4 "Cache
// Writer"). Owns the region annotator (§4.3) because the annotation it
// performs — growing the base record's `sequence_time` in place — is only
// meaningful while that record still lives in an in-memory page, which is
// exactly the invariant this writer enforces.

use crate::config::AxisConfig;
use crate::error::FirmwareError;
use crate::ports::{BlockStore, SECTOR_SIZE};
use crate::record::{CommandRecord, MotionPayload, RECORD_SIZE};
use crate::region::RegionTracker;
use crate::timing;

use super::store::RECORDS_PER_SECTOR;

struct Page {
    bytes: [u8; SECTOR_SIZE],
    count: usize,
    sector: u32,
    finished: bool,
}

impl Page {
    fn new(sector: u32) -> Self {
        Self {
            bytes: [0u8; SECTOR_SIZE],
            count: 0,
            sector,
            finished: false,
        }
    }

    fn reset(&mut self, sector: u32) {
        self.bytes = [0u8; SECTOR_SIZE];
        self.count = 0;
        self.sector = sector;
        self.finished = false;
    }

    fn push(&mut self, record: CommandRecord) -> usize {
        let slot = self.count;
        let off = slot * RECORD_SIZE;
        self.bytes[off..off + RECORD_SIZE].copy_from_slice(&record.to_bytes());
        self.count += 1;
        if self.count == RECORDS_PER_SECTOR {
            self.finished = true;
        }
        slot
    }

    fn record_at(&self, slot: usize) -> CommandRecord {
        let off = slot * RECORD_SIZE;
        let chunk: [u8; RECORD_SIZE] = self.bytes[off..off + RECORD_SIZE].try_into().unwrap();
        CommandRecord::from_bytes(&chunk).expect("page holds only records this writer produced")
    }

    fn set_record_at(&mut self, slot: usize, record: CommandRecord) {
        let off = slot * RECORD_SIZE;
        self.bytes[off..off + RECORD_SIZE].copy_from_slice(&record.to_bytes());
    }
}

/// Location of a record still resident in a compile page: which page, and
/// which of its 16 slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    page: usize,
    index: usize,
}

pub struct CacheWriter {
    axis: AxisConfig,
    pages: [Page; 2],
    current: usize,
    locked: Option<Slot>,
    base: Option<Slot>,
    region: RegionTracker,
    next_sector: u32,
    total_records: u32,
    start_sector: u32,
    rotated_since_lock: bool,
}

impl CacheWriter {
    pub fn new(axis: AxisConfig, start_sector: u32) -> Self {
        Self {
            axis,
            pages: [Page::new(start_sector), Page::new(start_sector + 1)],
            current: 0,
            locked: None,
            base: None,
            region: RegionTracker::new(),
            next_sector: start_sector + 2,
            total_records: 0,
            start_sector,
            rotated_since_lock: false,
        }
    }

    pub fn start_sector(&self) -> u32 {
        self.start_sector
    }

    pub fn total_records(&self) -> u32 {
        self.total_records
    }

    /// Append one compiled record, running region annotation first
    /// (§4.3) and then the page-fill/flush bookkeeping (§4.4).
    pub fn append(
        &mut self,
        store: &mut impl BlockStore,
        record: CommandRecord,
    ) -> Result<(), FirmwareError> {
        let annotated = self.annotate(record);
        let slot = Slot {
            page: self.current,
            index: self.pages[self.current].push(annotated),
        };
        if record.is_move_like() && self.locked.is_none() {
            self.locked = Some(slot);
            self.base = Some(slot);
            self.rotated_since_lock = false;
        }
        self.total_records += 1;

        if self.pages[self.current].finished {
            self.cycle_pages(store)?;
        }
        Ok(())
    }

    /// Fills `segment_time`/`sequence_time` (§4.3 steps 1-4) and updates
    /// region-tracking state. Non-move records terminate the open region.
    fn annotate(&mut self, record: CommandRecord) -> CommandRecord {
        let CommandRecord::Motion(op, payload) = record else {
            self.region.reset();
            self.locked = None;
            self.base = None;
            self.rotated_since_lock = false;
            return record;
        };
        if !record.is_move_like() {
            self.region.reset();
            self.locked = None;
            self.base = None;
            self.rotated_since_lock = false;
            return record;
        }

        let seg_time = timing::segment_time(payload.x, payload.y, payload.z, payload.e, payload.fetch, &self.axis);
        let seg = (payload.x, payload.y, payload.z);
        let continuous = self.region.is_continuous(payload.fetch, op, seg);
        self.region.advance(payload.fetch, op, seg);

        let mut payload = payload;
        payload.segment_time = seg_time;
        if continuous {
            payload.sequence_time = 0;
            if let Some(base) = self.base {
                self.grow_base_sequence_time(base, seg_time);
            }
        } else {
            payload.sequence_time = seg_time;
            self.locked = None; // cleared; append() re-locks to the new slot
            self.base = None;
            self.rotated_since_lock = false;
        }
        CommandRecord::Motion(op, payload)
    }

    fn grow_base_sequence_time(&mut self, base: Slot, added: u32) {
        let page = &mut self.pages[base.page];
        if let CommandRecord::Motion(op, mut payload) = page.record_at(base.index) {
            payload.sequence_time += added;
            page.set_record_at(base.index, CommandRecord::Motion(op, payload));
        }
    }

    /// A page just filled. Flush every finished, unlocked page, then make
    /// sure a non-finished page is available to keep appending to
    /// (§3 "Page-locking invariant"). While a region's base record is
    /// locked, the other page may be flushed and rotated in only once —
    /// a second rotation would mean the open region has outgrown both
    /// physical pages (§4.4: a region longer than 32 records exhausts
    /// both pages), so that one is refused instead of flushed.
    fn cycle_pages(&mut self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        for i in 0..2 {
            let is_locked = self.locked.is_some_and(|s| s.page == i);
            if self.pages[i].finished && !is_locked {
                if self.locked.is_some() {
                    if self.rotated_since_lock {
                        return Err(FirmwareError::RamFailure);
                    }
                    self.rotated_since_lock = true;
                }
                store.write(self.pages[i].sector, &self.pages[i].bytes)?;
                let fresh_sector = self.next_sector;
                self.next_sector += 1;
                self.pages[i].reset(fresh_sector);
            }
        }

        if let Some(free) = (0..2).find(|&i| !self.pages[i].finished) {
            self.current = free;
            Ok(())
        } else {
            Err(FirmwareError::RamFailure)
        }
    }

    /// Flush both pages unconditionally, clearing `locked_page` first
    /// (§4.4 "Closing a file flushes both pages unconditionally").
    pub fn close(mut self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        self.locked = None;
        for i in 0..2 {
            if self.pages[i].count > 0 {
                store.write(self.pages[i].sector, &self.pages[i].bytes)?;
            }
        }
        Ok(())
    }
}

/// Convenience for building a bare move record's payload outside the
/// compiler (used by the executor's resume synthesis, §4.5).
pub fn move_payload(dx: i32, dy: i32, dz: i32, de: i32, fetch: u32, axis: &AxisConfig) -> MotionPayload {
    let segment_time = timing::segment_time(dx, dy, dz, de, fetch, axis);
    MotionPayload {
        x: dx,
        y: dy,
        z: dz,
        e: de,
        fetch,
        segment_time,
        sequence_time: segment_time,
    }
}
