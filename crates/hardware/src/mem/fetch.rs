//! Memory request representation and lifecycle.
//!
//! A [`MemFetch`] is one memory request in flight. It is created by a shader
//! core at issue, travels through the fabric and memory hierarchy as a
//! uniquely owned box, and is destroyed by the originating core at
//! writeback. Its [`FetchStatus`] advances monotonically — a fetch never
//! moves backward through the pipeline, and every forward hop is
//! timestamped for latency accounting.

use crate::common::masks::{ByteMask, SectorMask};
use crate::common::{Address, Cycle};
use crate::core::instruction::MemorySpace;

/// Message class of a fetch on the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Core-to-memory read.
    ReadRequest,
    /// Core-to-memory write.
    WriteRequest,
    /// Memory-to-core read data.
    ReadReply,
    /// Memory-to-core write acknowledgement.
    WriteAck,
}

impl AccessKind {
    /// Whether this is write-flavored traffic.
    pub const fn is_write(self) -> bool {
        matches!(self, Self::WriteRequest | Self::WriteAck)
    }

    /// Whether this is a reply moving memory-to-core.
    pub const fn is_reply(self) -> bool {
        matches!(self, Self::ReadReply | Self::WriteAck)
    }
}

/// Pipeline position of a fetch. Variants are ordered along the request
/// ring; transitions must never decrease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FetchStatus {
    /// Created, still inside the shader core.
    InShader,
    /// Injected into the request fabric.
    InIcntToMem,
    /// Queued at a sub-partition (`icnt→L2` FIFO or ROP queue).
    InPartitionIcntToL2,
    /// Being serviced by the L2 slice.
    InL2,
    /// Queued toward DRAM (`L2→dram` FIFO).
    InL2ToDram,
    /// In the DRAM latency queue or channel.
    InDram,
    /// Queued back toward L2 (`dram→L2` FIFO).
    InDramToL2,
    /// Queued toward the fabric (`L2→icnt` FIFO).
    InL2ToIcnt,
    /// Injected into the reply fabric.
    InIcntToShader,
}

/// One memory request.
pub struct MemFetch {
    /// Unique id, stable for the fetch's whole life.
    pub id: u64,
    /// Target address.
    pub addr: Address,
    /// Message class; flips to the reply class at the memory side.
    pub kind: AccessKind,
    /// Payload size in bytes (data for reads, data+header for writes).
    pub size: u32,
    /// Header-only size in bytes, used for write requests' replies.
    pub ctrl_size: u32,
    /// Sectors of the target line this fetch touches.
    pub sector_mask: SectorMask,
    /// Exact bytes written (writes only).
    pub byte_mask: ByteMask,
    /// Address space of the originating instruction.
    pub space: MemorySpace,
    /// Originating cluster (fabric device id of the return port).
    pub cluster_id: usize,
    /// Originating shader core within the cluster.
    pub core_id: usize,
    /// Originating warp.
    pub warp_id: usize,
    /// Destination registers to release on reply (loads only).
    pub dst_regs: Vec<u32>,
    /// Active lanes of the originating instruction, for retirement
    /// accounting at the reply.
    pub active_lanes: u32,
    /// Target memory sub-partition (global fabric indexing).
    pub sub_partition: usize,
    /// Whether this is cache-generated traffic (an eviction writeback or a
    /// write-allocate fill). No requester waits on it; it is destroyed at
    /// the level that minted it once serviced.
    pub is_internal: bool,
    /// Core cycle at which the originating instruction issued.
    pub issue_cycle: Cycle,
    /// Cycle stamped when the reply re-enters the fabric.
    pub return_timestamp: Cycle,
    status: FetchStatus,
    timeline: Vec<(FetchStatus, Cycle)>,
}

impl MemFetch {
    /// Creates a fresh request in [`FetchStatus::InShader`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        addr: Address,
        kind: AccessKind,
        size: u32,
        ctrl_size: u32,
        space: MemorySpace,
        cluster_id: usize,
        core_id: usize,
        warp_id: usize,
        sub_partition: usize,
        issue_cycle: Cycle,
    ) -> Self {
        Self {
            id,
            addr,
            kind,
            size,
            ctrl_size,
            sector_mask: SectorMask::all(),
            byte_mask: ByteMask::none(),
            space,
            cluster_id,
            core_id,
            warp_id,
            dst_regs: Vec::new(),
            active_lanes: 0,
            sub_partition,
            is_internal: false,
            issue_cycle,
            return_timestamp: 0,
            status: FetchStatus::InShader,
            timeline: vec![(FetchStatus::InShader, issue_cycle)],
        }
    }

    /// Current pipeline position.
    pub const fn status(&self) -> FetchStatus {
        self.status
    }

    /// Advances the pipeline position, stamping `cycle`.
    ///
    /// Panics if the transition would move backward: ownership hand-offs
    /// only ever carry a fetch forward around the ring.
    pub fn set_status(&mut self, status: FetchStatus, cycle: Cycle) {
        assert!(
            status >= self.status,
            "fetch {} status moved backward: {:?} -> {:?}",
            self.id,
            self.status,
            status
        );
        if status != self.status {
            self.status = status;
            self.timeline.push((status, cycle));
        }
    }

    /// Every status this fetch has held, oldest first, with timestamps.
    pub fn timeline(&self) -> &[(FetchStatus, Cycle)] {
        &self.timeline
    }

    /// Whether this fetch is write-flavored.
    pub const fn is_write(&self) -> bool {
        self.kind.is_write()
    }

    /// Whether this fetch is a texture access (bypasses the ROP queue).
    pub fn is_texture(&self) -> bool {
        self.space == MemorySpace::Texture
    }

    /// Bytes this fetch occupies on the fabric when sent as a reply: data
    /// for reads, header only for write acks.
    pub const fn reply_size(&self) -> u32 {
        if self.is_write() { self.ctrl_size } else { self.size }
    }

    /// Converts the request into its memory-side reply class.
    pub fn convert_to_reply(&mut self) {
        self.kind = match self.kind {
            AccessKind::ReadRequest => AccessKind::ReadReply,
            AccessKind::WriteRequest => AccessKind::WriteAck,
            reply => reply,
        };
    }
}

impl std::fmt::Debug for MemFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MemFetch{{id={}, addr={:#x}, {:?}, {:?}, w{}@c{}}}",
            self.id, self.addr, self.kind, self.status, self.warp_id, self.cluster_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch() -> MemFetch {
        MemFetch::new(
            7,
            0x1000,
            AccessKind::ReadRequest,
            32,
            8,
            MemorySpace::Global,
            0,
            0,
            0,
            0,
            100,
        )
    }

    #[test]
    fn test_status_advances_and_timestamps() {
        let mut mf = fetch();
        mf.set_status(FetchStatus::InIcntToMem, 101);
        mf.set_status(FetchStatus::InPartitionIcntToL2, 105);
        mf.set_status(FetchStatus::InL2, 106);
        let stages: Vec<_> = mf.timeline().iter().map(|&(s, _)| s).collect();
        assert_eq!(
            stages,
            vec![
                FetchStatus::InShader,
                FetchStatus::InIcntToMem,
                FetchStatus::InPartitionIcntToL2,
                FetchStatus::InL2,
            ]
        );
    }

    #[test]
    #[should_panic(expected = "status moved backward")]
    fn test_status_never_regresses() {
        let mut mf = fetch();
        mf.set_status(FetchStatus::InDram, 200);
        mf.set_status(FetchStatus::InL2, 201);
    }

    #[test]
    fn test_reply_conversion_and_size() {
        let mut mf = fetch();
        mf.convert_to_reply();
        assert_eq!(mf.kind, AccessKind::ReadReply);
        assert_eq!(mf.reply_size(), 32);

        let mut store = fetch();
        store.kind = AccessKind::WriteRequest;
        store.convert_to_reply();
        assert_eq!(store.kind, AccessKind::WriteAck);
        assert_eq!(store.reply_size(), 8);
    }
}
