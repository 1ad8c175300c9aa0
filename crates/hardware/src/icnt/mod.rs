//! Packet-switched interconnect shim.
//!
//! The fabric connects shader clusters to memory sub-partitions. It models:
//! 1. **Injection:** per-(subnet, node) queues bounded in flits; `push`
//!    flitizes a request into `ceil(size / flit_size)` flits.
//! 2. **Traversal:** `advance` moves whole packets from injection queues
//!    into per-VC ejection buffers at the destination, then promotes one
//!    flit per VC into the boundary buffer.
//! 3. **Ejection:** `pop` round-robins over virtual channels at the
//!    boundary; a packet becomes observable only once its tail flit has
//!    reached the boundary buffer.
//! 4. **Mapping:** device ids translate to node positions through a
//!    preset-or-configured bijection optimized for mesh layouts.
//!
//! With two subnets, requests (SM→MEM) ride subnet 0 and replies (MEM→SM)
//! ride subnet 1, which structurally rules out request/reply deadlock.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::common::error::SimError;
use crate::common::Cycle;
use crate::config::InterconnectConfig;
use crate::mem::fetch::{AccessKind, MemFetch};

/// Packet class carried by every flit of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    /// Core-to-memory read.
    ReadRequest,
    /// Core-to-memory write.
    WriteRequest,
    /// Memory-to-core read data.
    ReadReply,
    /// Memory-to-core write acknowledgement.
    WriteReply,
}

impl From<AccessKind> for PacketClass {
    fn from(kind: AccessKind) -> Self {
        match kind {
            AccessKind::ReadRequest => Self::ReadRequest,
            AccessKind::WriteRequest => Self::WriteRequest,
            AccessKind::ReadReply => Self::ReadReply,
            AccessKind::WriteAck => Self::WriteReply,
        }
    }
}

/// One flit. All flits of a packet share vc/src/dst/class; the tail flit
/// carries the payload.
pub struct Flit {
    /// First flit of its packet.
    pub head: bool,
    /// Last flit of its packet.
    pub tail: bool,
    /// Virtual channel.
    pub vc: usize,
    /// Source node.
    pub src: usize,
    /// Destination node.
    pub dst: usize,
    /// Packet class.
    pub class: PacketClass,
    /// Fabric time at injection.
    pub injected: Cycle,
    /// The enclosed request; present on the tail flit only.
    pub payload: Option<Box<MemFetch>>,
}

/// A packet waiting in an injection queue, not yet flitized onto the wire.
struct Packet {
    n_flits: usize,
    vc: usize,
    src: usize,
    dst: usize,
    class: PacketClass,
    injected: Cycle,
    fetch: Box<MemFetch>,
}

/// Injection queue bounded in flits.
#[derive(Default)]
struct InjectQueue {
    packets: VecDeque<Packet>,
    flits: usize,
}

/// Boundary buffer: flits of ejected packets, observable to `pop` once the
/// tail arrives.
#[derive(Default)]
struct BoundaryBuffer {
    /// `(payload, is_tail, injected)` per flit.
    flits: VecDeque<(Option<Box<MemFetch>>, bool, Cycle)>,
    packets: usize,
}

impl BoundaryBuffer {
    fn push_flit(&mut self, payload: Option<Box<MemFetch>>, is_tail: bool, injected: Cycle) {
        self.flits.push_back((payload, is_tail, injected));
        if is_tail {
            self.packets += 1;
        }
    }

    const fn has_packet(&self) -> bool {
        self.packets > 0
    }

    fn len(&self) -> usize {
        self.flits.len()
    }

    fn is_empty(&self) -> bool {
        self.flits.is_empty()
    }

    /// Consumes flits through the tail and returns the payload with its
    /// injection time.
    fn pop_packet(&mut self) -> Option<(Box<MemFetch>, Cycle)> {
        if self.packets == 0 {
            return None;
        }
        while let Some((payload, is_tail, injected)) = self.flits.pop_front() {
            if is_tail {
                self.packets -= 1;
                let fetch = payload?;
                return Some((fetch, injected));
            }
        }
        None
    }
}

/// The interconnect fabric.
pub struct Interconnect {
    n_shader: usize,
    n_mem: usize,
    subnets: usize,
    vcs: usize,
    flit_size: u32,
    input_capacity: usize,
    ejection_capacity: usize,
    boundary_capacity: usize,
    node_map: Vec<usize>,
    reverse_node_map: Vec<usize>,
    /// `[subnet][node]`
    injection: Vec<Vec<InjectQueue>>,
    /// `[subnet][node][vc]`
    ejection: Vec<Vec<Vec<VecDeque<Flit>>>>,
    /// `[subnet][node][vc]`
    boundary: Vec<Vec<Vec<BoundaryBuffer>>>,
    /// `[subnet][node]` round-robin VC cursor, advanced only on a
    /// successful pop.
    rr_turn: Vec<Vec<usize>>,
    time: Cycle,
    total_elapsed: Cycle,
    packets_delivered: u64,
}

impl Interconnect {
    /// Builds the fabric for `n_shader` cluster ports and `n_mem` memory
    /// ports.
    pub fn new(
        n_shader: usize,
        n_mem: usize,
        config: &InterconnectConfig,
    ) -> Result<Self, SimError> {
        let nodes = n_shader + n_mem;
        let (node_map, reverse_node_map) = build_node_map(n_shader, n_mem, config)?;
        let subnets = config.subnets;
        let vcs = config.num_vcs;

        let injection = (0..subnets)
            .map(|_| (0..nodes).map(|_| InjectQueue::default()).collect())
            .collect();
        let ejection = (0..subnets)
            .map(|_| {
                (0..nodes)
                    .map(|_| (0..vcs).map(|_| VecDeque::new()).collect())
                    .collect()
            })
            .collect();
        let boundary = (0..subnets)
            .map(|_| {
                (0..nodes)
                    .map(|_| (0..vcs).map(|_| BoundaryBuffer::default()).collect())
                    .collect()
            })
            .collect();
        let rr_turn = (0..subnets).map(|_| vec![0; nodes]).collect();

        Ok(Self {
            n_shader,
            n_mem,
            subnets,
            vcs,
            flit_size: config.flit_size,
            input_capacity: config.input_capacity(),
            ejection_capacity: config.ejection_capacity(),
            boundary_capacity: config.boundary_buffer_size,
            node_map,
            reverse_node_map,
            injection,
            ejection,
            boundary,
            rr_turn,
            time: 0,
            total_elapsed: 0,
            packets_delivered: 0,
        })
    }

    /// Bytes per flit.
    pub const fn flit_size(&self) -> u32 {
        self.flit_size
    }

    /// Device-to-node map.
    pub fn node_map(&self) -> &[usize] {
        &self.node_map
    }

    /// Node-to-device map; inverse of [`Self::node_map`].
    pub fn reverse_node_map(&self) -> &[usize] {
        &self.reverse_node_map
    }

    const fn n_flits(&self, size: u32) -> usize {
        (size.div_ceil(self.flit_size)) as usize
    }

    fn inject_subnet(&self, device: usize) -> usize {
        if self.subnets > 1 && device >= self.n_shader {
            1
        } else {
            0
        }
    }

    fn eject_subnet(&self, device: usize) -> usize {
        if self.subnets > 1 && device < self.n_shader {
            1
        } else {
            0
        }
    }

    /// Whether the injecting device's queue can take a packet of `size`
    /// bytes.
    pub fn has_buffer(&self, device: usize, size: u32) -> bool {
        let subnet = self.inject_subnet(device);
        let node = self.node_map[device];
        self.injection[subnet][node].flits + self.n_flits(size) <= self.input_capacity
    }

    /// Injects a packet. The caller must have observed [`Self::has_buffer`].
    pub fn push(&mut self, src_device: usize, dst_device: usize, fetch: Box<MemFetch>, size: u32) {
        assert!(
            self.has_buffer(src_device, size),
            "push without injection buffer space (device {src_device})"
        );
        let subnet = self.inject_subnet(src_device);
        let src = self.node_map[src_device];
        let dst = self.node_map[dst_device];
        let n_flits = self.n_flits(size);
        // a (src, dst) pair always uses the same VC, preserving per-pair
        // packet order
        let vc = (src + dst) % self.vcs;
        debug!(
            src_device,
            dst_device,
            subnet,
            n_flits,
            "icnt push {:?}",
            fetch
        );
        let queue = &mut self.injection[subnet][src];
        queue.flits += n_flits;
        queue.packets.push_back(Packet {
            n_flits,
            vc,
            src,
            dst,
            class: PacketClass::from(fetch.kind),
            injected: self.time,
            fetch,
        });
    }

    /// Pops a delivered packet at `device`, round-robining over VCs.
    pub fn pop(&mut self, device: usize) -> Option<Box<MemFetch>> {
        let subnet = self.eject_subnet(device);
        let node = self.node_map[device];

        let mut turn = self.rr_turn[subnet][node];
        let mut popped = None;
        for _ in 0..self.vcs {
            if popped.is_none() && self.boundary[subnet][node][turn].has_packet() {
                popped = self.boundary[subnet][node][turn].pop_packet();
            }
            turn = (turn + 1) % self.vcs;
            if popped.is_some() {
                break;
            }
        }
        popped.map(|(fetch, injected)| {
            self.rr_turn[subnet][node] = turn;
            self.total_elapsed += self.time - injected;
            self.packets_delivered += 1;
            trace!(device, "icnt pop {:?}", fetch);
            fetch
        })
    }

    /// One fabric step: traverse packets to ejection buffers, then promote
    /// one flit per VC into each boundary buffer.
    pub fn advance(&mut self) {
        self.time += 1;

        // router traversal: one whole packet per (subnet, source) per step,
        // gated on ejection space for every flit of the packet
        for subnet in 0..self.subnets {
            for src in 0..self.injection[subnet].len() {
                let Some(packet) = self.injection[subnet][src].packets.front() else {
                    continue;
                };
                let (dst, vc, n_flits) = (packet.dst, packet.vc, packet.n_flits);
                if self.ejection[subnet][dst][vc].len() + n_flits > self.ejection_capacity {
                    continue;
                }
                let Some(packet) = self.injection[subnet][src].packets.pop_front() else {
                    continue;
                };
                self.injection[subnet][src].flits -= packet.n_flits;
                let mut payload = Some(packet.fetch);
                for i in 0..packet.n_flits {
                    let tail = i + 1 == packet.n_flits;
                    self.ejection[subnet][dst][vc].push_back(Flit {
                        head: i == 0,
                        tail,
                        vc,
                        src: packet.src,
                        dst,
                        class: packet.class,
                        injected: packet.injected,
                        payload: if tail { payload.take() } else { None },
                    });
                }
            }
        }

        // boundary promotion: one flit per (subnet, node, vc) per step
        for subnet in 0..self.subnets {
            for node in 0..self.ejection[subnet].len() {
                for vc in 0..self.vcs {
                    if self.boundary[subnet][node][vc].len() >= self.boundary_capacity {
                        continue;
                    }
                    if let Some(flit) = self.ejection[subnet][node][vc].pop_front() {
                        debug_assert_eq!(flit.dst, node);
                        self.boundary[subnet][node][vc].push_flit(
                            flit.payload,
                            flit.tail,
                            flit.injected,
                        );
                    }
                }
            }
        }
    }

    /// Whether any flit or packet is still in flight.
    pub fn busy(&self) -> bool {
        for subnet in 0..self.subnets {
            for node in 0..self.injection[subnet].len() {
                if !self.injection[subnet][node].packets.is_empty() {
                    return true;
                }
                for vc in 0..self.vcs {
                    if !self.ejection[subnet][node][vc].is_empty()
                        || !self.boundary[subnet][node][vc].is_empty()
                    {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Total packet-traversal latency accumulated over delivered packets.
    pub const fn total_elapsed(&self) -> Cycle {
        self.total_elapsed
    }

    /// Packets delivered so far.
    pub const fn packets_delivered(&self) -> u64 {
        self.packets_delivered
    }
}

/// Builds the device-to-node map and its inverse.
///
/// With `use_map`, the memory-node positions come from the configured
/// vector or from one of the shipped presets; shader ids fill the remaining
/// positions in order. Without it, devices map to nodes identically.
fn build_node_map(
    n_shader: usize,
    n_mem: usize,
    config: &InterconnectConfig,
) -> Result<(Vec<usize>, Vec<usize>), SimError> {
    let n_node = n_shader + n_mem;
    let mut node_map = vec![0usize; n_node];

    if config.use_map {
        let memory_node: Vec<usize> = if config.memory_node_map.is_empty() {
            preset_memory_nodes(n_shader, n_mem).ok_or_else(|| {
                SimError::config(
                    "no preset node mapping for this shader/memory count",
                    format!("({n_shader}, {n_mem})"),
                )
            })?
        } else {
            if config.memory_node_map.len() != n_mem {
                return Err(SimError::config(
                    "memory_node_map length must equal the number of memory ports",
                    format!("{:?}", config.memory_node_map),
                ));
            }
            config.memory_node_map.clone()
        };

        let mut next_node = 0;
        let mut memory_node_index = 0;
        for slot in node_map.iter_mut().take(n_shader) {
            while memory_node.get(memory_node_index) == Some(&next_node) {
                next_node += 1;
                memory_node_index += 1;
            }
            *slot = next_node;
            next_node += 1;
        }
        for i in 0..n_mem {
            node_map[n_shader + i] = memory_node[i];
        }
    } else {
        for (i, slot) in node_map.iter_mut().enumerate() {
            *slot = i;
        }
    }

    let mut reverse_node_map = vec![usize::MAX; n_node];
    for (device, &node) in node_map.iter().enumerate() {
        if node >= n_node || reverse_node_map[node] != usize::MAX {
            return Err(SimError::config(
                "node map is not a bijection onto the node range",
                format!("{node_map:?}"),
            ));
        }
        reverse_node_map[node] = device;
    }
    Ok((node_map, reverse_node_map))
}

/// Shipped memory-node layouts, optimized for mesh topologies.
fn preset_memory_nodes(n_shader: usize, n_mem: usize) -> Option<Vec<usize>> {
    match (n_shader, n_mem) {
        // +--+--+--+--+
        // |C0|M0|C1|M1|
        // +--+--+--+--+
        // |M2|C2|M3|C3|
        // +--+--+--+--+
        // |C4|M4|C5|M5|
        // +--+--+--+--+
        // |M6|C6|M7|C7|
        // +--+--+--+--+
        (8, 8) => Some(vec![1, 3, 4, 6, 9, 11, 12, 14]),
        (28, 8) => Some(vec![3, 7, 10, 12, 23, 25, 28, 32]),
        (56, 8) => Some(vec![3, 15, 17, 29, 36, 47, 49, 61]),
        (110, 11) => Some(vec![12, 20, 25, 28, 57, 60, 63, 92, 95, 100, 108]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instruction::MemorySpace;

    fn config(subnets: usize, vcs: usize) -> InterconnectConfig {
        InterconnectConfig {
            subnets,
            num_vcs: vcs,
            use_map: false,
            ..InterconnectConfig::default()
        }
    }

    fn fetch(id: u64) -> Box<MemFetch> {
        Box::new(MemFetch::new(
            id,
            0x100,
            AccessKind::ReadRequest,
            32,
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
    fn test_preset_8_8_layout() {
        let cfg = InterconnectConfig::default();
        let (map, reverse) = build_node_map(8, 8, &cfg).expect("preset exists");
        // memory devices 8..16 sit at the preset positions
        assert_eq!(&map[8..], &[1, 3, 4, 6, 9, 11, 12, 14]);
        // shaders fill the remaining slots in order
        assert_eq!(&map[..8], &[0, 2, 5, 7, 8, 10, 13, 15]);
        // bijection
        for device in 0..16 {
            assert_eq!(reverse[map[device]], device);
        }
    }

    #[test]
    fn test_no_preset_is_config_error() {
        let cfg = InterconnectConfig::default();
        assert!(build_node_map(3, 5, &cfg).is_err());
    }

    #[test]
    fn test_config_vector_overrides_presets() {
        let cfg = InterconnectConfig {
            memory_node_map: vec![0, 2],
            ..InterconnectConfig::default()
        };
        let (map, _) = build_node_map(2, 2, &cfg).expect("explicit map");
        assert_eq!(&map[2..], &[0, 2]);
        assert_eq!(&map[..2], &[1, 3]);
    }

    #[test]
    fn test_round_trip_one_packet() {
        let mut icnt = Interconnect::new(1, 1, &config(2, 1)).expect("fabric");
        assert!(icnt.has_buffer(0, 32));
        icnt.push(0, 1, fetch(1), 32);
        assert!(icnt.busy());
        assert!(icnt.pop(1).is_none());

        // one advance traverses, a second promotes the tail to the boundary
        icnt.advance();
        icnt.advance();
        let delivered = icnt.pop(1).expect("delivered packet");
        assert_eq!(delivered.id, 1);
        assert!(!icnt.busy());
        assert_eq!(icnt.packets_delivered(), 1);
    }

    #[test]
    fn test_per_pair_order_preserved() {
        let mut icnt = Interconnect::new(1, 1, &config(2, 2)).expect("fabric");
        icnt.push(0, 1, fetch(1), 32);
        icnt.push(0, 1, fetch(2), 32);
        for _ in 0..8 {
            icnt.advance();
        }
        assert_eq!(icnt.pop(1).expect("first").id, 1);
        assert_eq!(icnt.pop(1).expect("second").id, 2);
    }

    #[test]
    fn test_multi_flit_packet_integrity() {
        let mut icnt = Interconnect::new(1, 1, &config(2, 1)).expect("fabric");
        // 128 bytes over 32-byte flits = 4 flits
        icnt.push(0, 1, fetch(1), 128);
        icnt.advance(); // traversal into ejection
        icnt.advance(); // boundary gets flit 1
        assert!(icnt.pop(1).is_none(), "no pop before the tail arrives");
        icnt.advance();
        icnt.advance();
        icnt.advance(); // boundary has all 4 flits
        assert_eq!(icnt.pop(1).expect("tail arrived").id, 1);
    }

    #[test]
    fn test_injection_backpressure() {
        let cfg = InterconnectConfig {
            input_buffer_size: 4,
            ..config(2, 1)
        };
        let mut icnt = Interconnect::new(1, 1, &cfg).expect("fabric");
        icnt.push(0, 1, fetch(1), 128); // 4 flits fill the queue
        assert!(!icnt.has_buffer(0, 32));
        icnt.advance();
        assert!(icnt.has_buffer(0, 32));
    }
}
