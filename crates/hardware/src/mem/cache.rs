//! Cache blocks, tag array, MSHR table, and the data cache.
//!
//! Two block organizations exist as one closed tagged type:
//! 1. **Line blocks:** the whole line is the allocation unit.
//! 2. **Sector blocks:** each sector carries independent status bits and
//!    on-fill flags.
//!
//! Both walk the same state machine per allocation unit:
//! `INVALID → RESERVED → (VALID | MODIFIED) → INVALID` (evict). A RESERVED
//! unit always has a pending fill tracked by an MSHR entry, and VALID and
//! MODIFIED are mutually exclusive.

use std::collections::{HashMap, VecDeque};

use crate::common::masks::{ByteMask, SectorMask, SECTOR_CHUNK_SIZE, SECTOR_SIZE};
use crate::common::{Address, Cycle};
use crate::config::{AllocPolicy, CacheKind, CacheParams, ReplacementPolicy, WriteAllocPolicy, WritePolicy};
use crate::mem::fetch::{AccessKind, MemFetch};
use crate::stats::CacheStats;

/// Allocation-unit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockState {
    /// Holds nothing.
    #[default]
    Invalid,
    /// Allocated to a miss with the fill still outstanding.
    Reserved,
    /// Holds clean data.
    Valid,
    /// Holds dirty data.
    Modified,
}

/// Per-unit on-fill behavior flags, armed between allocate and fill.
#[derive(Debug, Clone, Copy, Default)]
struct FillFlags {
    ignore_on_fill: bool,
    set_modified_on_fill: bool,
    set_readable_on_fill: bool,
    set_byte_mask_on_fill: bool,
}

/// Whole-line cache block.
#[derive(Debug, Clone, Default)]
pub struct LineBlock {
    tag: Address,
    block_addr: Address,
    alloc_time: Cycle,
    last_access_time: Cycle,
    fill_time: Cycle,
    state: BlockState,
    flags: FillFlags,
    readable: bool,
    dirty_byte_mask: ByteMask,
}

/// Sectored cache block: independent status bits per sector.
#[derive(Debug, Clone, Default)]
pub struct SectorBlock {
    tag: Address,
    block_addr: Address,
    state: [BlockState; SECTOR_CHUNK_SIZE as usize],
    alloc_time: [Cycle; SECTOR_CHUNK_SIZE as usize],
    last_access_time: [Cycle; SECTOR_CHUNK_SIZE as usize],
    fill_time: [Cycle; SECTOR_CHUNK_SIZE as usize],
    flags: [FillFlags; SECTOR_CHUNK_SIZE as usize],
    readable: [bool; SECTOR_CHUNK_SIZE as usize],
    dirty_byte_mask: ByteMask,
}

/// One cache block, line- or sector-organized.
#[derive(Debug, Clone)]
pub enum CacheBlock {
    /// Whole-line allocation.
    Line(LineBlock),
    /// Per-sector allocation.
    Sector(SectorBlock),
}

impl CacheBlock {
    /// Creates an invalid block of the given organization.
    pub fn new(kind: CacheKind) -> Self {
        match kind {
            CacheKind::Normal => Self::Line(LineBlock {
                readable: true,
                ..LineBlock::default()
            }),
            CacheKind::Sector => Self::Sector(SectorBlock::default()),
        }
    }

    /// Tag of the held line (meaningless while fully invalid).
    pub const fn tag(&self) -> Address {
        match self {
            Self::Line(b) => b.tag,
            Self::Sector(b) => b.tag,
        }
    }

    /// Base address of the held line.
    pub const fn block_addr(&self) -> Address {
        match self {
            Self::Line(b) => b.block_addr,
            Self::Sector(b) => b.block_addr,
        }
    }

    /// Reserves the block (line caches) or the masked sectors (sector
    /// caches) for a pending fill, clearing the on-fill flags.
    pub fn allocate(
        &mut self,
        tag: Address,
        block_addr: Address,
        time: Cycle,
        sector_mask: SectorMask,
    ) {
        match self {
            Self::Line(b) => {
                b.tag = tag;
                b.block_addr = block_addr;
                b.alloc_time = time;
                b.last_access_time = time;
                b.fill_time = 0;
                b.state = BlockState::Reserved;
                b.flags = FillFlags::default();
                b.dirty_byte_mask = ByteMask::none();
            }
            Self::Sector(b) => {
                let fresh = b.state.iter().all(|&s| s == BlockState::Invalid);
                if fresh || b.tag != tag {
                    // the tag changes hands; stale sectors of the old line
                    // must not survive under the new tag
                    b.tag = tag;
                    b.block_addr = block_addr;
                    b.dirty_byte_mask = ByteMask::none();
                    b.state = [BlockState::Invalid; SECTOR_CHUNK_SIZE as usize];
                    b.readable = [false; SECTOR_CHUNK_SIZE as usize];
                }
                for s in 0..SECTOR_CHUNK_SIZE {
                    if sector_mask.get(s) {
                        let i = s as usize;
                        b.state[i] = BlockState::Reserved;
                        b.alloc_time[i] = time;
                        b.last_access_time[i] = time;
                        b.fill_time[i] = 0;
                        b.flags[i] = FillFlags::default();
                        b.readable[i] = false;
                    }
                }
            }
        }
    }

    /// Completes the pending fill: `RESERVED → MODIFIED` when
    /// `set_modified_on_fill` was armed, else `RESERVED → VALID`.
    pub fn fill(&mut self, time: Cycle, sector_mask: SectorMask, byte_mask: ByteMask) {
        match self {
            Self::Line(b) => {
                debug_assert!(
                    b.flags.ignore_on_fill || b.state == BlockState::Reserved,
                    "fill of a non-reserved line"
                );
                b.state = if b.flags.set_modified_on_fill {
                    BlockState::Modified
                } else {
                    BlockState::Valid
                };
                if b.flags.set_readable_on_fill {
                    b.readable = true;
                }
                if b.flags.set_byte_mask_on_fill {
                    b.dirty_byte_mask |= byte_mask;
                }
                b.fill_time = time;
            }
            Self::Sector(b) => {
                for s in 0..SECTOR_CHUNK_SIZE {
                    if !sector_mask.get(s) {
                        continue;
                    }
                    let i = s as usize;
                    debug_assert!(
                        b.flags[i].ignore_on_fill || b.state[i] == BlockState::Reserved,
                        "fill of a non-reserved sector"
                    );
                    b.state[i] = if b.flags[i].set_modified_on_fill {
                        BlockState::Modified
                    } else {
                        BlockState::Valid
                    };
                    if b.flags[i].set_readable_on_fill {
                        b.readable[i] = true;
                    } else if b.state[i] == BlockState::Valid {
                        b.readable[i] = true;
                    }
                    if b.flags[i].set_byte_mask_on_fill {
                        b.dirty_byte_mask |= byte_mask;
                    }
                    b.fill_time[i] = time;
                }
            }
        }
    }

    /// Whether every allocation unit is invalid.
    pub fn is_invalid_line(&self) -> bool {
        match self {
            Self::Line(b) => b.state == BlockState::Invalid,
            Self::Sector(b) => b.state.iter().all(|&s| s == BlockState::Invalid),
        }
    }

    /// Whether the line holds only clean data (no reservation, no dirt).
    pub fn is_valid_line(&self) -> bool {
        match self {
            Self::Line(b) => b.state == BlockState::Valid,
            Self::Sector(b) => {
                !self.is_invalid_line()
                    && b.state
                        .iter()
                        .all(|&s| !matches!(s, BlockState::Reserved | BlockState::Modified))
            }
        }
    }

    /// Whether any allocation unit has a fill outstanding.
    pub fn is_reserved_line(&self) -> bool {
        match self {
            Self::Line(b) => b.state == BlockState::Reserved,
            Self::Sector(b) => b.state.iter().any(|&s| s == BlockState::Reserved),
        }
    }

    /// Whether any allocation unit holds dirty data.
    pub fn is_modified_line(&self) -> bool {
        match self {
            Self::Line(b) => b.state == BlockState::Modified,
            Self::Sector(b) => b.state.iter().any(|&s| s == BlockState::Modified),
        }
    }

    /// State of the masked unit (line caches ignore the mask).
    pub fn state(&self, sector_mask: SectorMask) -> BlockState {
        match self {
            Self::Line(b) => b.state,
            Self::Sector(b) => {
                let s = sector_mask.first().unwrap_or(0) as usize;
                b.state[s]
            }
        }
    }

    /// Forces the masked unit's state. Used by eviction and flush paths.
    pub fn set_state(&mut self, state: BlockState, sector_mask: SectorMask) {
        match self {
            Self::Line(b) => b.state = state,
            Self::Sector(b) => {
                for s in 0..SECTOR_CHUNK_SIZE {
                    if sector_mask.get(s) {
                        b.state[s as usize] = state;
                    }
                }
            }
        }
    }

    /// ORs bytes into the dirty byte mask.
    pub fn set_byte_mask(&mut self, byte_mask: ByteMask) {
        match self {
            Self::Line(b) => b.dirty_byte_mask |= byte_mask,
            Self::Sector(b) => b.dirty_byte_mask |= byte_mask,
        }
    }

    /// The dirty byte mask.
    pub const fn dirty_byte_mask(&self) -> ByteMask {
        match self {
            Self::Line(b) => b.dirty_byte_mask,
            Self::Sector(b) => b.dirty_byte_mask,
        }
    }

    /// Sectors holding dirty data: all-set for a modified line block, the
    /// per-sector modified set for sector blocks.
    pub fn dirty_sector_mask(&self) -> SectorMask {
        match self {
            Self::Line(b) => {
                if b.state == BlockState::Modified {
                    SectorMask::all()
                } else {
                    SectorMask::default()
                }
            }
            Self::Sector(b) => {
                let mut mask = SectorMask::default();
                for s in 0..SECTOR_CHUNK_SIZE {
                    if b.state[s as usize] == BlockState::Modified {
                        mask.set(s);
                    }
                }
                mask
            }
        }
    }

    /// Bytes that would be written back on eviction.
    pub fn modified_size(&self) -> u32 {
        match self {
            Self::Line(_) => SECTOR_CHUNK_SIZE * SECTOR_SIZE,
            Self::Sector(_) => self.dirty_sector_mask().count() * SECTOR_SIZE,
        }
    }

    /// Most recent access time of the masked unit.
    pub fn last_access_time(&self) -> Cycle {
        match self {
            Self::Line(b) => b.last_access_time,
            Self::Sector(b) => b.last_access_time.iter().copied().max().unwrap_or(0),
        }
    }

    /// Stamps the masked unit's access time.
    pub fn set_last_access_time(&mut self, time: Cycle, sector_mask: SectorMask) {
        match self {
            Self::Line(b) => b.last_access_time = time,
            Self::Sector(b) => {
                for s in 0..SECTOR_CHUNK_SIZE {
                    if sector_mask.get(s) {
                        b.last_access_time[s as usize] = time;
                    }
                }
            }
        }
    }

    /// Allocation time (oldest sector for sector blocks).
    pub fn alloc_time(&self) -> Cycle {
        match self {
            Self::Line(b) => b.alloc_time,
            Self::Sector(b) => b.alloc_time.iter().copied().max().unwrap_or(0),
        }
    }

    /// Arms `set_modified_on_fill` for the masked unit.
    pub fn set_modified_on_fill(&mut self, value: bool, sector_mask: SectorMask) {
        self.for_flags(sector_mask, |f| f.set_modified_on_fill = value);
    }

    /// Arms `set_readable_on_fill` for the masked unit.
    pub fn set_readable_on_fill(&mut self, value: bool, sector_mask: SectorMask) {
        self.for_flags(sector_mask, |f| f.set_readable_on_fill = value);
    }

    /// Arms `set_byte_mask_on_fill` for the masked unit.
    pub fn set_byte_mask_on_fill(&mut self, value: bool) {
        self.for_flags(SectorMask::all(), |f| f.set_byte_mask_on_fill = value);
    }

    /// Arms `ignore_on_fill` for the masked unit.
    pub fn set_ignore_on_fill(&mut self, value: bool, sector_mask: SectorMask) {
        self.for_flags(sector_mask, |f| f.ignore_on_fill = value);
    }

    /// Readability of the masked unit.
    pub fn is_readable(&self, sector_mask: SectorMask) -> bool {
        match self {
            Self::Line(b) => b.readable,
            Self::Sector(b) => {
                let s = sector_mask.first().unwrap_or(0) as usize;
                b.readable[s]
            }
        }
    }

    /// Sets readability of the masked unit.
    pub fn set_readable(&mut self, readable: bool, sector_mask: SectorMask) {
        match self {
            Self::Line(b) => b.readable = readable,
            Self::Sector(b) => {
                for s in 0..SECTOR_CHUNK_SIZE {
                    if sector_mask.get(s) {
                        b.readable[s as usize] = readable;
                    }
                }
            }
        }
    }

    fn for_flags(&mut self, sector_mask: SectorMask, f: impl Fn(&mut FillFlags)) {
        match self {
            Self::Line(b) => f(&mut b.flags),
            Self::Sector(b) => {
                for s in 0..SECTOR_CHUNK_SIZE {
                    if sector_mask.get(s) {
                        f(&mut b.flags[s as usize]);
                    }
                }
            }
        }
    }
}

/// Outcome of a tag-array probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The masked unit is present and readable.
    Hit,
    /// The masked unit is reserved by an earlier miss; merge into its MSHR.
    HitReserved,
    /// The line (or sector) is absent.
    Miss,
    /// The line is present but the masked sector is absent.
    SectorMiss,
    /// No way can be victimized (all reserved).
    ReservationFail,
}

/// Dirty data displaced by an allocation; becomes writeback traffic.
#[derive(Debug, Clone)]
pub struct EvictedBlock {
    /// Base address of the evicted line.
    pub block_addr: Address,
    /// Bytes requiring writeback.
    pub modified_size: u32,
    /// Dirty byte mask at eviction.
    pub byte_mask: ByteMask,
    /// Dirty sector mask at eviction.
    pub sector_mask: SectorMask,
}

/// The set-associative tag array.
pub struct TagArray {
    params: CacheParams,
    blocks: Vec<CacheBlock>,
}

impl TagArray {
    /// Builds an array of invalid blocks per the parsed geometry.
    pub fn new(params: CacheParams) -> Self {
        let blocks = (0..params.num_lines())
            .map(|_| CacheBlock::new(params.kind))
            .collect();
        Self { params, blocks }
    }

    /// Geometry this array was built from.
    pub const fn params(&self) -> &CacheParams {
        &self.params
    }

    fn set_range(&self, addr: Address) -> std::ops::Range<usize> {
        let set = self.params.set_index_of(addr);
        let base = set * self.params.assoc;
        base..base + self.params.assoc
    }

    /// Probes without side effects.
    pub fn probe(&self, addr: Address, sector_mask: SectorMask) -> (ProbeOutcome, Option<usize>) {
        let block_addr = self.params.block_addr(addr);
        let tag = block_addr;

        let mut invalid_way: Option<usize> = None;
        let mut victim_way: Option<usize> = None;
        let mut victim_key = Cycle::MAX;
        let mut all_reserved = true;

        for idx in self.set_range(addr) {
            let block = &self.blocks[idx];
            if !block.is_invalid_line() && block.tag() == tag {
                return match block.state(sector_mask) {
                    BlockState::Reserved => (ProbeOutcome::HitReserved, Some(idx)),
                    BlockState::Valid | BlockState::Modified => {
                        if block.is_readable(sector_mask) {
                            (ProbeOutcome::Hit, Some(idx))
                        } else {
                            (ProbeOutcome::SectorMiss, Some(idx))
                        }
                    }
                    BlockState::Invalid => (ProbeOutcome::SectorMiss, Some(idx)),
                };
            }
            if !block.is_reserved_line() {
                all_reserved = false;
                if block.is_invalid_line() {
                    invalid_way = Some(idx);
                } else {
                    let key = match self.params.replacement {
                        ReplacementPolicy::Lru => block.last_access_time(),
                        ReplacementPolicy::Fifo => block.alloc_time(),
                    };
                    if key < victim_key {
                        victim_key = key;
                        victim_way = Some(idx);
                    }
                }
            }
        }

        if let Some(idx) = invalid_way.or(victim_way) {
            (ProbeOutcome::Miss, Some(idx))
        } else {
            debug_assert!(all_reserved);
            (ProbeOutcome::ReservationFail, None)
        }
    }

    /// Probes and, on a miss with on-miss allocation, reserves the chosen
    /// way; returns any dirty victim for writeback.
    pub fn access(
        &mut self,
        addr: Address,
        time: Cycle,
        sector_mask: SectorMask,
    ) -> (ProbeOutcome, Option<usize>, Option<EvictedBlock>) {
        let (outcome, way) = self.probe(addr, sector_mask);
        let block_addr = self.params.block_addr(addr);
        let mut evicted = None;

        match outcome {
            ProbeOutcome::Hit | ProbeOutcome::HitReserved => {
                if let Some(idx) = way {
                    self.blocks[idx].set_last_access_time(time, sector_mask);
                }
            }
            ProbeOutcome::Miss if self.params.alloc_policy == AllocPolicy::OnMiss => {
                if let Some(idx) = way {
                    let block = &mut self.blocks[idx];
                    if block.is_modified_line() {
                        evicted = Some(EvictedBlock {
                            block_addr: block.block_addr(),
                            modified_size: block.modified_size(),
                            byte_mask: block.dirty_byte_mask(),
                            sector_mask: block.dirty_sector_mask(),
                        });
                    }
                    block.allocate(block_addr, block_addr, time, sector_mask);
                }
            }
            ProbeOutcome::SectorMiss if self.params.alloc_policy == AllocPolicy::OnMiss => {
                if let Some(idx) = way {
                    self.blocks[idx].allocate(block_addr, block_addr, time, sector_mask);
                }
            }
            _ => {}
        }
        (outcome, way, evicted)
    }

    /// Fills the block holding `addr` (allocating first for on-fill
    /// policies).
    pub fn fill(
        &mut self,
        addr: Address,
        time: Cycle,
        sector_mask: SectorMask,
        byte_mask: ByteMask,
    ) {
        let block_addr = self.params.block_addr(addr);
        if self.params.alloc_policy == AllocPolicy::OnMiss {
            for idx in self.set_range(addr) {
                if !self.blocks[idx].is_invalid_line() && self.blocks[idx].tag() == block_addr {
                    self.blocks[idx].fill(time, sector_mask, byte_mask);
                    return;
                }
            }
            // The reservation was evicted by a flush; drop the fill.
        } else {
            let (_, way) = self.probe(addr, sector_mask);
            if let Some(idx) = way {
                self.blocks[idx].allocate(block_addr, block_addr, time, sector_mask);
                self.blocks[idx].fill(time, sector_mask, byte_mask);
            }
        }
    }

    /// Direct access to a way, for policy flag updates after `access`.
    pub fn block_mut(&mut self, idx: usize) -> &mut CacheBlock {
        &mut self.blocks[idx]
    }

    /// Invalidates every block; returns how many lines were dirty.
    pub fn flush(&mut self) -> usize {
        let mut dirty = 0;
        for block in &mut self.blocks {
            if block.is_modified_line() {
                dirty += 1;
            }
            block.set_state(BlockState::Invalid, SectorMask::all());
        }
        dirty
    }
}

/// Miss-status holding registers: outstanding misses keyed by the MSHR
/// coalescing address.
pub struct MshrTable {
    entries: usize,
    max_merge: usize,
    table: HashMap<Address, Vec<Box<MemFetch>>>,
}

impl MshrTable {
    /// Creates a table with `entries` slots merging at most `max_merge`
    /// requests each.
    pub fn new(entries: usize, max_merge: usize) -> Self {
        Self {
            entries,
            max_merge,
            table: HashMap::new(),
        }
    }

    /// Whether an entry for `addr` exists.
    pub fn probe(&self, addr: Address) -> bool {
        self.table.contains_key(&addr)
    }

    /// Whether a (new or merged) request for `addr` can be accepted.
    pub fn full(&self, addr: Address) -> bool {
        self.table.get(&addr).map_or_else(
            || self.table.len() >= self.entries,
            |merged| merged.len() >= self.max_merge,
        )
    }

    /// Registers a miss for `addr`. The fetch that traveled downstream is
    /// NOT stored; only merged followers wait here.
    pub fn allocate(&mut self, addr: Address) {
        debug_assert!(!self.full(addr));
        let _ = self.table.entry(addr).or_default();
    }

    /// Merges a follower into the entry for `addr`.
    pub fn merge(&mut self, addr: Address, fetch: Box<MemFetch>) {
        debug_assert!(self.probe(addr) && !self.full(addr));
        if let Some(list) = self.table.get_mut(&addr) {
            list.push(fetch);
        }
    }

    /// Completes the miss for `addr`, releasing the merged followers.
    pub fn fill(&mut self, addr: Address) -> Vec<Box<MemFetch>> {
        self.table.remove(&addr).unwrap_or_default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no miss is outstanding.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// What `DataCache::access` did with the request.
pub enum CacheAccessOutcome {
    /// Serviced by the array; the fetch is handed back to become a reply.
    Hit(Box<MemFetch>),
    /// Merged into an outstanding miss; a reply emerges on fill.
    PendingHit,
    /// New miss accepted; a lowered request sits on the miss queue.
    Miss,
    /// No line, MSHR, or miss-queue space; retry next cycle.
    ReservationFail(Box<MemFetch>),
}

/// A data cache: tag array + MSHRs + bounded miss queue.
///
/// Used both as the L2 slice of a memory sub-partition and as the per-core
/// L1 data cache; the owner drains `pop_downstream` into whatever sits
/// below it (the `L2→dram` FIFO, or the fabric).
pub struct DataCache {
    name: &'static str,
    tags: TagArray,
    mshrs: MshrTable,
    miss_queue: VecDeque<Box<MemFetch>>,
    miss_queue_size: usize,
    stats: CacheStats,
    /// Id namespace for writeback fetches minted by eviction.
    wb_id_next: u64,
}

impl DataCache {
    /// Builds a cache from parsed geometry. `wb_id_base` namespaces the ids
    /// of eviction writebacks so they stay globally unique.
    pub fn new(name: &'static str, params: CacheParams, wb_id_base: u64) -> Self {
        let mshrs = MshrTable::new(params.mshr_entries, params.mshr_max_merge);
        let miss_queue_size = params.miss_queue_size.max(1);
        Self {
            name,
            tags: TagArray::new(params),
            mshrs,
            miss_queue: VecDeque::new(),
            miss_queue_size,
            stats: CacheStats::default(),
            wb_id_next: wb_id_base,
        }
    }

    /// Cache name for diagnostics.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Geometry in force.
    pub const fn params(&self) -> &CacheParams {
        self.tags.params()
    }

    /// Accumulated statistics.
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Services one request against the array.
    pub fn access(&mut self, fetch: Box<MemFetch>, time: Cycle) -> CacheAccessOutcome {
        self.stats.accesses += 1;
        let params = self.tags.params().clone();
        let mshr_addr = params.mshr_addr(fetch.addr);
        let is_write = fetch.kind == AccessKind::WriteRequest;

        if is_write {
            return self.access_write(fetch, time, &params, mshr_addr);
        }

        let (outcome, way, evicted) = self.tags.access(fetch.addr, time, fetch.sector_mask);
        match outcome {
            ProbeOutcome::Hit => CacheAccessOutcome::Hit(fetch),
            ProbeOutcome::HitReserved => {
                if self.mshrs.probe(mshr_addr) && !self.mshrs.full(mshr_addr) {
                    self.stats.pending_hits += 1;
                    self.mshrs.merge(mshr_addr, fetch);
                    CacheAccessOutcome::PendingHit
                } else {
                    self.stats.res_fails += 1;
                    CacheAccessOutcome::ReservationFail(fetch)
                }
            }
            ProbeOutcome::Miss | ProbeOutcome::SectorMiss => {
                if self.mshrs.probe(mshr_addr) {
                    // merge behind the earlier miss for the same atom
                    if self.mshrs.full(mshr_addr) {
                        self.stats.res_fails += 1;
                        return CacheAccessOutcome::ReservationFail(fetch);
                    }
                    self.stats.pending_hits += 1;
                    self.mshrs.merge(mshr_addr, fetch);
                    return CacheAccessOutcome::PendingHit;
                }
                // headroom for the lowered request plus a possible eviction
                // writeback
                if self.mshrs.full(mshr_addr) || self.miss_queue.len() + 2 > self.miss_queue_size {
                    self.stats.res_fails += 1;
                    // roll back the reservation taken by the tag array
                    if let Some(idx) = way {
                        if params.alloc_policy == AllocPolicy::OnMiss {
                            self.tags
                                .block_mut(idx)
                                .set_state(BlockState::Invalid, fetch.sector_mask);
                        }
                    }
                    return CacheAccessOutcome::ReservationFail(fetch);
                }
                self.stats.misses += 1;
                if let Some(idx) = way {
                    self.tags
                        .block_mut(idx)
                        .set_readable_on_fill(true, fetch.sector_mask);
                }
                self.mshrs.allocate(mshr_addr);
                if let Some(evicted) = evicted {
                    self.emit_writeback(&fetch, &evicted);
                }
                self.miss_queue.push_back(fetch);
                CacheAccessOutcome::Miss
            }
            ProbeOutcome::ReservationFail => {
                self.stats.res_fails += 1;
                CacheAccessOutcome::ReservationFail(fetch)
            }
        }
    }

    fn access_write(
        &mut self,
        fetch: Box<MemFetch>,
        time: Cycle,
        params: &CacheParams,
        mshr_addr: Address,
    ) -> CacheAccessOutcome {
        debug_assert!(
            params.write_policy != WritePolicy::ReadOnly,
            "{}: write issued to a read-only cache",
            self.name
        );
        let (outcome, way) = self.tags.probe(fetch.addr, fetch.sector_mask);
        match outcome {
            ProbeOutcome::Hit => {
                let idx = way.unwrap_or_default();
                match params.write_policy {
                    WritePolicy::WriteBack | WritePolicy::LocalWbGlobalWt => {
                        let block = self.tags.block_mut(idx);
                        block.set_state(BlockState::Modified, fetch.sector_mask);
                        block.set_byte_mask(fetch.byte_mask);
                        block.set_last_access_time(time, fetch.sector_mask);
                        CacheAccessOutcome::Hit(fetch)
                    }
                    WritePolicy::WriteThrough => {
                        if self.miss_queue.len() >= self.miss_queue_size {
                            self.stats.res_fails += 1;
                            return CacheAccessOutcome::ReservationFail(fetch);
                        }
                        let block = self.tags.block_mut(idx);
                        block.set_state(BlockState::Modified, fetch.sector_mask);
                        block.set_byte_mask(fetch.byte_mask);
                        self.miss_queue.push_back(fetch);
                        CacheAccessOutcome::Miss
                    }
                    WritePolicy::WriteEvict => {
                        if self.miss_queue.len() >= self.miss_queue_size {
                            self.stats.res_fails += 1;
                            return CacheAccessOutcome::ReservationFail(fetch);
                        }
                        self.tags
                            .block_mut(idx)
                            .set_state(BlockState::Invalid, SectorMask::all());
                        self.miss_queue.push_back(fetch);
                        CacheAccessOutcome::Miss
                    }
                    WritePolicy::ReadOnly => CacheAccessOutcome::ReservationFail(fetch),
                }
            }
            ProbeOutcome::HitReserved => {
                // write under a pending fill: arm the modified-on-fill path
                if self.mshrs.probe(mshr_addr) && !self.mshrs.full(mshr_addr) {
                    if let Some(idx) = way {
                        let block = self.tags.block_mut(idx);
                        block.set_modified_on_fill(true, fetch.sector_mask);
                        block.set_byte_mask_on_fill(true);
                        block.set_byte_mask(fetch.byte_mask);
                    }
                    self.stats.pending_hits += 1;
                    self.mshrs.merge(mshr_addr, fetch);
                    CacheAccessOutcome::PendingHit
                } else {
                    self.stats.res_fails += 1;
                    CacheAccessOutcome::ReservationFail(fetch)
                }
            }
            ProbeOutcome::Miss | ProbeOutcome::SectorMiss => {
                if params.write_alloc == WriteAllocPolicy::None {
                    // bypass: forward the write downstream untouched
                    if self.miss_queue.len() >= self.miss_queue_size {
                        self.stats.res_fails += 1;
                        return CacheAccessOutcome::ReservationFail(fetch);
                    }
                    self.stats.misses += 1;
                    self.miss_queue.push_back(fetch);
                    return CacheAccessOutcome::Miss;
                }
                // allocating write: reserve the line, absorb the write data
                // into it, mint an internal read to fetch the rest of the
                // line, and acknowledge the store right away
                if self.mshrs.probe(mshr_addr)
                    || self.mshrs.full(mshr_addr)
                    || self.miss_queue.len() + 2 > self.miss_queue_size
                {
                    self.stats.res_fails += 1;
                    return CacheAccessOutcome::ReservationFail(fetch);
                }
                let (outcome2, way2, evicted) = self.tags.access(fetch.addr, time, fetch.sector_mask);
                if !matches!(outcome2, ProbeOutcome::Miss | ProbeOutcome::SectorMiss) || way2.is_none()
                {
                    self.stats.res_fails += 1;
                    return CacheAccessOutcome::ReservationFail(fetch);
                }
                self.stats.misses += 1;
                if let Some(idx) = way2 {
                    let block = self.tags.block_mut(idx);
                    block.set_modified_on_fill(true, fetch.sector_mask);
                    block.set_byte_mask_on_fill(true);
                    block.set_byte_mask(fetch.byte_mask);
                    block.set_readable_on_fill(true, fetch.sector_mask);
                }
                self.mshrs.allocate(mshr_addr);
                if let Some(evicted) = evicted {
                    self.emit_writeback(&fetch, &evicted);
                }
                self.emit_fill_fetch(&fetch);
                CacheAccessOutcome::Hit(fetch)
            }
            ProbeOutcome::ReservationFail => {
                self.stats.res_fails += 1;
                CacheAccessOutcome::ReservationFail(fetch)
            }
        }
    }

    fn emit_writeback(&mut self, cause: &MemFetch, evicted: &EvictedBlock) {
        let id = self.wb_id_next;
        self.wb_id_next += 1;
        let mut wb = Box::new(MemFetch::new(
            id,
            evicted.block_addr,
            AccessKind::WriteRequest,
            evicted.modified_size + cause.ctrl_size,
            cause.ctrl_size,
            cause.space,
            cause.cluster_id,
            cause.core_id,
            cause.warp_id,
            cause.sub_partition,
            cause.issue_cycle,
        ));
        wb.sector_mask = evicted.sector_mask;
        wb.byte_mask = evicted.byte_mask;
        wb.is_internal = true;
        self.miss_queue.push_back(wb);
    }

    /// Mints the read that fetches a write-allocated line. The write
    /// itself is acknowledged immediately; this internal fetch completes
    /// the reservation and is destroyed at fill.
    fn emit_fill_fetch(&mut self, cause: &MemFetch) {
        let id = self.wb_id_next;
        self.wb_id_next += 1;
        let mut fill = Box::new(MemFetch::new(
            id,
            cause.addr,
            AccessKind::ReadRequest,
            self.tags.params().line_size,
            cause.ctrl_size,
            cause.space,
            cause.cluster_id,
            cause.core_id,
            cause.warp_id,
            cause.sub_partition,
            cause.issue_cycle,
        ));
        fill.sector_mask = cause.sector_mask;
        fill.is_internal = true;
        self.miss_queue.push_back(fill);
    }

    /// Whether a lowered request waits to move downstream.
    pub fn has_downstream_ready(&self) -> bool {
        !self.miss_queue.is_empty()
    }

    /// Takes the oldest lowered request for the level below.
    pub fn pop_downstream(&mut self) -> Option<Box<MemFetch>> {
        self.miss_queue.pop_front()
    }

    /// Completes an outstanding miss: fills the array and releases the
    /// original fetch plus every merged follower, ready to become replies.
    /// Internal fill fetches die here; only requester-owned fetches are
    /// returned.
    pub fn fill(&mut self, fetch: Box<MemFetch>, time: Cycle) -> Vec<Box<MemFetch>> {
        let params = self.tags.params();
        let mshr_addr = params.mshr_addr(fetch.addr);
        self.tags
            .fill(fetch.addr, time, fetch.sector_mask, fetch.byte_mask);
        let mut ready = self.mshrs.fill(mshr_addr);
        if !fetch.is_internal {
            ready.insert(0, fetch);
        }
        ready
    }

    /// Whether `addr` has an MSHR entry outstanding.
    pub fn waiting_for_fill(&self, addr: Address) -> bool {
        self.mshrs.probe(self.tags.params().mshr_addr(addr))
    }

    /// Invalidates the whole array; returns the count of dirty lines that
    /// would need writing back.
    pub fn flush(&mut self) -> usize {
        self.tags.flush()
    }

    /// Whether the cache holds no outstanding misses.
    pub fn quiesced(&self) -> bool {
        self.mshrs.is_empty() && self.miss_queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instruction::MemorySpace;

    fn params(kind: &str) -> CacheParams {
        let text = format!("{kind}:64:128:16,L:B:m:W:L,A:192:4,32:0,32");
        CacheParams::parse(&text)
            .ok()
            .flatten()
            .expect("valid geometry")
    }

    fn read_fetch(id: u64, addr: Address) -> Box<MemFetch> {
        Box::new(MemFetch::new(
            id,
            addr,
            AccessKind::ReadRequest,
            128,
            8,
            MemorySpace::Global,
            0,
            0,
            0,
            0,
            0,
        ))
    }

    #[test]
    fn test_line_block_state_machine() {
        let mut block = CacheBlock::new(CacheKind::Normal);
        assert!(block.is_invalid_line());

        block.allocate(0x80, 0x80, 10, SectorMask::all());
        assert!(block.is_reserved_line());
        assert!(!block.is_valid_line());

        block.fill(20, SectorMask::all(), ByteMask::none());
        assert!(block.is_valid_line());
        assert!(!block.is_modified_line());
    }

    #[test]
    fn test_modified_on_fill() {
        let mut block = CacheBlock::new(CacheKind::Normal);
        block.allocate(0x80, 0x80, 10, SectorMask::all());
        block.set_modified_on_fill(true, SectorMask::all());
        block.fill(20, SectorMask::all(), ByteMask::none());
        assert!(block.is_modified_line());
        assert!(!block.is_valid_line());
    }

    #[test]
    fn test_valid_and_modified_exclusive() {
        let mut block = CacheBlock::new(CacheKind::Sector);
        block.allocate(0x80, 0x80, 1, SectorMask::single(0));
        block.fill(2, SectorMask::single(0), ByteMask::none());
        block.allocate(0x80, 0x80, 3, SectorMask::single(1));
        block.set_modified_on_fill(true, SectorMask::single(1));
        block.fill(4, SectorMask::single(1), ByteMask::none());
        assert!(block.is_modified_line());
        assert!(!(block.is_valid_line() && block.is_modified_line()));
    }

    #[test]
    fn test_sector_modified_size() {
        let mut block = CacheBlock::new(CacheKind::Sector);
        block.allocate(0x80, 0x80, 1, SectorMask::single(2));
        block.set_modified_on_fill(true, SectorMask::single(2));
        block.fill(2, SectorMask::single(2), ByteMask::none());
        assert_eq!(block.modified_size(), SECTOR_SIZE);

        let line = CacheBlock::new(CacheKind::Normal);
        assert_eq!(line.modified_size(), SECTOR_CHUNK_SIZE * SECTOR_SIZE);
    }

    #[test]
    fn test_cache_miss_then_hits() {
        let mut cache = DataCache::new("L2", params("S"), 1 << 32);

        // first access misses and lowers a request
        match cache.access(read_fetch(1, 0x1000), 1) {
            CacheAccessOutcome::Miss => {}
            _ => panic!("expected miss"),
        }
        let lowered = cache.pop_downstream().expect("lowered request");
        assert_eq!(lowered.addr, 0x1000);

        // fill completes the miss and releases the original fetch
        let ready = cache.fill(lowered, 10);
        assert_eq!(ready.len(), 1);

        // three subsequent reads of the same line hit
        for id in 2..5 {
            match cache.access(read_fetch(id, 0x1000), 20) {
                CacheAccessOutcome::Hit(_) => {}
                _ => panic!("expected hit"),
            }
        }
        assert_eq!(cache.stats().accesses, 4);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_pending_hit_merges_into_mshr() {
        let mut cache = DataCache::new("L2", params("S"), 1 << 32);
        assert!(matches!(
            cache.access(read_fetch(1, 0x2000), 1),
            CacheAccessOutcome::Miss
        ));
        assert!(matches!(
            cache.access(read_fetch(2, 0x2000), 2),
            CacheAccessOutcome::PendingHit
        ));
        let lowered = cache.pop_downstream().expect("lowered request");
        let ready = cache.fill(lowered, 10);
        assert_eq!(ready.len(), 2);
        assert_eq!(cache.stats().pending_hits, 1);
    }

    #[test]
    fn test_write_hit_marks_dirty() {
        let mut cache = DataCache::new("L2", params("N"), 1 << 32);
        assert!(matches!(
            cache.access(read_fetch(1, 0x3000), 1),
            CacheAccessOutcome::Miss
        ));
        let lowered = cache.pop_downstream().expect("lowered");
        let _ = cache.fill(lowered, 5);

        let mut write = read_fetch(2, 0x3000);
        write.kind = AccessKind::WriteRequest;
        write.byte_mask = ByteMask::span(0, 32);
        match cache.access(write, 6) {
            CacheAccessOutcome::Hit(_) => {}
            _ => panic!("write-back hit expected"),
        }
        assert_eq!(cache.flush(), 1);
    }

    #[test]
    fn test_flush_reports_and_clears_dirty_lines() {
        let mut cache = DataCache::new("L2", params("N"), 1 << 32);
        let _ = cache.access(read_fetch(1, 0x4000), 1);
        let lowered = cache.pop_downstream().expect("lowered");
        let _ = cache.fill(lowered, 2);
        let mut write = read_fetch(2, 0x4000);
        write.kind = AccessKind::WriteRequest;
        let _ = cache.access(write, 3);
        assert_eq!(cache.flush(), 1);
        assert_eq!(cache.flush(), 0);
    }
}
