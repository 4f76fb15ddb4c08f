//! Reassembly of application I/O into per-target layouts
//!
//! User input iod/sgl pairs possibly need to be reassembled at the client
//! before anything is sent:
//!
//! 1. adjacent extents are merged and out-of-order extents sorted, with the
//!    data segments regenerated to match;
//! 2. for erasure-coded objects each extent is split across the stripe's
//!    data cells, parity-cell placement is computed, and one I/O descriptor
//!    plus skip map is produced per touched target.
//!
//! The request is built once per logical operation, consulted by every
//! per-target dispatch, and discarded at completion.

use crate::extent::{normalize, Extent, PARITY_INDICATOR};
use crate::seg::SegSpec;
use crate::singv::SingleValueLayout;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use stripeio_common::{Error, RedundancyClass, Result};

/// What an I/O descriptor addresses under one attribute key.
#[derive(Clone, Debug)]
pub enum IoKind {
    /// Byte-extent array value
    Array {
        /// Extents in the object's logical address space
        extents: Vec<Extent>,
    },
    /// Atomic single value
    Single {
        /// Value size in bytes
        size: u64,
    },
}

/// One application-level I/O descriptor.
#[derive(Clone, Debug)]
pub struct IoDescriptor {
    /// Attribute key the descriptor addresses
    pub key: Bytes,
    /// Addressed value shape
    pub kind: IoKind,
}

/// Scatter-gather list paired with one I/O descriptor.
#[derive(Clone, Debug, Default)]
pub struct SgList {
    /// Data segments, concatenated in descriptor order
    pub segments: Vec<Bytes>,
}

impl SgList {
    /// Total byte length across segments.
    #[must_use]
    pub fn total_len(&self) -> u64 {
        self.segments.iter().map(|s| s.len() as u64).sum()
    }

    fn flatten(&self) -> Bytes {
        match self.segments.len() {
            0 => Bytes::new(),
            1 => self.segments[0].clone(),
            _ => {
                let mut buf = BytesMut::with_capacity(self.total_len() as usize);
                for seg in &self.segments {
                    buf.extend_from_slice(seg);
                }
                buf.freeze()
            }
        }
    }
}

/// Payload of one per-target segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegPayload {
    /// User bytes for a data cell
    Data(Bytes),
    /// Parity range; the encoder fills the buffer at transfer time
    Parity,
}

/// One bit per target in the stripe, data cells first, then parity cells.
/// A clear bit excludes the target from the bulk transfer entirely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetBitmap {
    bits: Vec<u8>,
    len: u32,
}

impl TargetBitmap {
    /// All-clear bitmap over `len` targets.
    #[must_use]
    pub fn new(len: u32) -> Self {
        Self {
            bits: vec![0u8; (len as usize).div_ceil(8)],
            len,
        }
    }

    /// Set the bit for `target`.
    pub fn set(&mut self, target: u32) {
        debug_assert!(target < self.len);
        self.bits[(target / 8) as usize] |= 1 << (target % 8);
    }

    /// Whether the bit for `target` is set.
    #[must_use]
    pub fn get(&self, target: u32) -> bool {
        debug_assert!(target < self.len);
        self.bits[(target / 8) as usize] & (1 << (target % 8)) != 0
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    /// Number of targets covered.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Whether no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count_ones() == 0
    }
}

/// Per-target sub-descriptor for one I/O descriptor.
#[derive(Clone, Debug)]
pub struct TargetSubIo {
    /// Index into the request's descriptor array
    pub iod_index: usize,
    /// Target-address extents; parity extents carry the indicator bit
    pub extents: Vec<Extent>,
    /// Payloads aligned one to one with `extents`
    pub payloads: Vec<SegPayload>,
    /// Bulk-transfer map over the sub-descriptor's span
    pub skip_map: Vec<SegSpec>,
}

/// All I/O bound for one target of the stripe.
#[derive(Clone, Debug)]
pub struct TargetIo {
    /// Cell index within the stripe (0..k+p)
    pub cell: u32,
    /// Per-descriptor sub-I/O
    pub subs: Vec<TargetSubIo>,
}

/// Accumulates per-target segments, then sorts, merges and seals them.
struct SegmentSorter {
    /// [target][iod] -> unordered segment runs
    pending: Vec<Vec<Vec<(Extent, SegPayload)>>>,
}

impl SegmentSorter {
    fn new(target_count: u32, iod_count: usize) -> Result<Self> {
        let mut pending = Vec::new();
        pending
            .try_reserve_exact(target_count as usize)
            .map_err(|_| Error::OutOfMemory {
                count: target_count as usize,
            })?;
        for _ in 0..target_count {
            pending.push(vec![Vec::new(); iod_count]);
        }
        Ok(Self { pending })
    }

    fn push(&mut self, target: u32, iod: usize, ext: Extent, payload: SegPayload) {
        self.pending[target as usize][iod].push((ext, payload));
    }

    /// Sort each target's runs, merge contiguous same-kind runs, and emit
    /// the sealed per-target descriptors.
    fn seal(self) -> Result<Vec<Option<TargetIo>>> {
        let mut out = Vec::with_capacity(self.pending.len());
        for (cell, per_iod) in self.pending.into_iter().enumerate() {
            let mut subs = Vec::new();
            for (iod_index, mut runs) in per_iod.into_iter().enumerate() {
                if runs.is_empty() {
                    continue;
                }
                runs.sort_by_key(|(ext, _)| ext.offset);
                let merged = merge_runs(runs);
                let skip_map = build_skip_map(&merged)?;
                let (extents, payloads) = merged.into_iter().unzip();
                subs.push(TargetSubIo {
                    iod_index,
                    extents,
                    payloads,
                    skip_map,
                });
            }
            if subs.is_empty() {
                out.push(None);
            } else {
                out.push(Some(TargetIo {
                    cell: cell as u32,
                    subs,
                }));
            }
        }
        Ok(out)
    }
}

fn merge_runs(runs: Vec<(Extent, SegPayload)>) -> Vec<(Extent, SegPayload)> {
    let mut out: Vec<(Extent, SegPayload)> = Vec::with_capacity(runs.len());
    for (ext, payload) in runs {
        match out.last_mut() {
            Some((last_ext, last_payload))
                if ext.offset == last_ext.end()
                    && matches!(
                        (&payload, &*last_payload),
                        (SegPayload::Data(_), SegPayload::Data(_))
                            | (SegPayload::Parity, SegPayload::Parity)
                    ) =>
            {
                last_ext.len += ext.len;
                let merged = match (&payload, &*last_payload) {
                    (SegPayload::Data(tail), SegPayload::Data(head)) => {
                        let mut buf = BytesMut::with_capacity(head.len() + tail.len());
                        buf.extend_from_slice(head);
                        buf.extend_from_slice(tail);
                        Some(SegPayload::Data(buf.freeze()))
                    }
                    _ => None,
                };
                if let Some(merged) = merged {
                    *last_payload = merged;
                }
            }
            _ => out.push((ext, payload)),
        }
    }
    out
}

/// Describe the gap structure of one sub-descriptor's span: data records
/// for real payload, skip records for padding between runs.
fn build_skip_map(runs: &[(Extent, SegPayload)]) -> Result<Vec<SegSpec>> {
    let mut map = Vec::new();
    let mut cursor: Option<u64> = None;
    for (ext, _) in runs {
        let off = ext.offset & !PARITY_INDICATOR;
        if let Some(pos) = cursor {
            if off > pos {
                map.push(SegSpec::skip(off - pos)?);
            }
        }
        map.push(SegSpec::data(ext.len)?);
        cursor = Some(off + ext.len);
    }
    Ok(map)
}

/// Reassembled object request, built once per operation.
#[derive(Debug)]
pub struct ReassemblyRequest {
    /// Redundancy class the layout was computed for
    pub class: RedundancyClass,
    /// Normalized I/O descriptors (merged, sorted)
    pub iods: Vec<IoDescriptor>,
    /// Data regenerated to match `iods`
    pub sgls: Vec<SgList>,
    /// Per-descriptor single-value layouts (`None` for array descriptors)
    pub singv_layouts: Vec<Option<SingleValueLayout>>,
    /// Targets in the stripe (group size)
    pub target_count: u32,
    /// One bit per target; clear bits take no part in the transfer
    pub bitmap: TargetBitmap,
    /// Per-target I/O, indexed by cell; `None` where the bit is clear
    pub target_ios: Vec<Option<TargetIo>>,
}

impl ReassemblyRequest {
    /// Build the per-target layout for one operation.
    ///
    /// `for_update` controls parity placement: updates always touch every
    /// parity cell of a written stripe, fetches never do.
    pub fn build(
        iods: Vec<IoDescriptor>,
        sgls: Vec<SgList>,
        class: &RedundancyClass,
        for_update: bool,
    ) -> Result<Self> {
        if iods.len() != sgls.len() {
            return Err(Error::invalid_argument(format!(
                "{} descriptors but {} scatter-gather lists",
                iods.len(),
                sgls.len()
            )));
        }
        if iods.is_empty() {
            return Err(Error::invalid_argument("empty I/O"));
        }

        let target_count = class.group_size();
        let mut sorter = SegmentSorter::new(target_count, iods.len())?;
        let mut norm_iods = Vec::with_capacity(iods.len());
        let mut norm_sgls = Vec::with_capacity(iods.len());
        let mut singv_layouts = Vec::with_capacity(iods.len());

        for (iod_index, (iod, sgl)) in iods.into_iter().zip(sgls).enumerate() {
            match iod.kind {
                IoKind::Array { extents } => {
                    let (iod, sgl) =
                        place_array(&mut sorter, iod_index, iod.key, extents, &sgl, class, for_update)?;
                    norm_iods.push(iod);
                    norm_sgls.push(sgl);
                    singv_layouts.push(None);
                }
                IoKind::Single { size } => {
                    let layout = SingleValueLayout::for_size(class, size);
                    place_single(&mut sorter, iod_index, &layout, &sgl, class, for_update)?;
                    norm_iods.push(IoDescriptor {
                        key: iod.key,
                        kind: IoKind::Single { size },
                    });
                    norm_sgls.push(sgl);
                    singv_layouts.push(Some(layout));
                }
            }
        }

        let target_ios = sorter.seal()?;
        let mut bitmap = TargetBitmap::new(target_count);
        for (cell, io) in target_ios.iter().enumerate() {
            if io.is_some() {
                bitmap.set(cell as u32);
            }
        }
        if bitmap.is_empty() {
            return Err(Error::invalid_argument("I/O touches no target"));
        }

        Ok(Self {
            class: *class,
            iods: norm_iods,
            sgls: norm_sgls,
            singv_layouts,
            target_count,
            bitmap,
            target_ios,
        })
    }

    /// Per-target I/O for `cell`, if the cell takes part in the transfer.
    #[must_use]
    pub fn target_io(&self, cell: u32) -> Option<&TargetIo> {
        self.target_ios.get(cell as usize).and_then(Option::as_ref)
    }
}

/// Split one array descriptor across the stripe and register parity.
fn place_array(
    sorter: &mut SegmentSorter,
    iod_index: usize,
    key: Bytes,
    extents: Vec<Extent>,
    sgl: &SgList,
    class: &RedundancyClass,
    for_update: bool,
) -> Result<(IoDescriptor, SgList)> {
    for ext in &extents {
        ext.validate_user()?;
    }
    let needed: u64 = extents.iter().map(|e| e.len).sum();
    if sgl.total_len() < needed {
        return Err(Error::invalid_argument(format!(
            "scatter-gather list holds {} bytes, extents need {needed}",
            sgl.total_len()
        )));
    }

    // Pair each extent with its slice of the flattened data, then sort and
    // merge so per-target splitting sees a canonical run list.
    let flat = sgl.flatten();
    let mut runs = Vec::with_capacity(extents.len());
    let mut consumed = 0usize;
    for ext in extents {
        let data = flat.slice(consumed..consumed + ext.len as usize);
        consumed += ext.len as usize;
        runs.push((ext, data));
    }
    let runs = normalize(runs, |head: Bytes, tail: Bytes| {
        let mut buf = BytesMut::with_capacity(head.len() + tail.len());
        buf.extend_from_slice(&head);
        buf.extend_from_slice(&tail);
        buf.freeze()
    })?;

    match *class {
        RedundancyClass::Replicated { .. } => {
            // Near-identity: every replica receives the full run list at
            // logical addresses.
            for target in 0..class.group_size() {
                for (ext, data) in &runs {
                    sorter.push(target, iod_index, *ext, SegPayload::Data(data.clone()));
                }
            }
        }
        RedundancyClass::ErasureCoded {
            data_cells,
            parity_cells,
            cell_size,
        } => {
            let k = u64::from(data_cells);
            let stripe_size = k * cell_size;
            // Rows of each stripe touched by this descriptor, for parity
            // placement: stripe index -> [row_start, row_end).
            let mut touched: BTreeMap<u64, (u64, u64)> = BTreeMap::new();

            for (ext, data) in &runs {
                let mut off = ext.offset;
                let mut taken = 0u64;
                while taken < ext.len {
                    let stripe = off / stripe_size;
                    let cell = (off % stripe_size) / cell_size;
                    let row = off % cell_size;
                    let take = (cell_size - row).min(ext.len - taken);
                    let toff = stripe * cell_size + row;
                    sorter.push(
                        cell as u32,
                        iod_index,
                        Extent::new(toff, take),
                        SegPayload::Data(data.slice(taken as usize..(taken + take) as usize)),
                    );
                    if for_update {
                        touched
                            .entry(stripe)
                            .and_modify(|(lo, hi)| {
                                *lo = (*lo).min(row);
                                *hi = (*hi).max(row + take);
                            })
                            .or_insert((row, row + take));
                    }
                    off += take;
                    taken += take;
                }
            }

            for (stripe, (row_start, row_end)) in touched {
                for p in 0..u32::from(parity_cells) {
                    sorter.push(
                        u32::from(data_cells) + p,
                        iod_index,
                        Extent::new(
                            PARITY_INDICATOR | (stripe * cell_size + row_start),
                            row_end - row_start,
                        ),
                        SegPayload::Parity,
                    );
                }
            }
        }
    }

    let (norm_extents, norm_segments): (Vec<_>, Vec<_>) = runs.into_iter().unzip();
    Ok((
        IoDescriptor {
            key,
            kind: IoKind::Array {
                extents: norm_extents,
            },
        },
        SgList {
            segments: norm_segments,
        },
    ))
}

/// Register a single value per its layout: replicated values land whole on
/// each layout target, striped values are chunked across the data cells.
fn place_single(
    sorter: &mut SegmentSorter,
    iod_index: usize,
    layout: &SingleValueLayout,
    sgl: &SgList,
    class: &RedundancyClass,
    for_update: bool,
) -> Result<()> {
    let value = sgl.flatten();
    if layout.striped {
        let chunk = layout.chunk;
        let mut off = 0u64;
        let mut cell = 0u32;
        while off < value.len() as u64 {
            let take = chunk.min(value.len() as u64 - off);
            sorter.push(
                cell,
                iod_index,
                Extent::new(0, take),
                SegPayload::Data(value.slice(off as usize..(off + take) as usize)),
            );
            off += take;
            cell += 1;
        }
        if for_update {
            for p in 0..u32::from(class.parity_cells()) {
                sorter.push(
                    u32::from(class.data_cells()) + p,
                    iod_index,
                    Extent::new(PARITY_INDICATOR, chunk),
                    SegPayload::Parity,
                );
            }
        }
    } else {
        for &target in &layout.targets {
            sorter.push(
                target,
                iod_index,
                Extent::new(0, value.len() as u64),
                SegPayload::Data(value.clone()),
            );
        }
    }
    Ok(())
}

/// Map a data-cell target offset back to the logical object offset.
/// Returns `None` for parity extents, which have no logical address.
#[must_use]
pub fn logical_offset(class: &RedundancyClass, cell: u32, target_offset: u64) -> Option<u64> {
    if target_offset & PARITY_INDICATOR != 0 {
        return None;
    }
    match *class {
        RedundancyClass::Replicated { .. } => Some(target_offset),
        RedundancyClass::ErasureCoded {
            data_cells,
            cell_size,
            ..
        } => {
            if cell >= u32::from(data_cells) {
                return None;
            }
            let stripe = target_offset / cell_size;
            let row = target_offset % cell_size;
            Some(stripe * u64::from(data_cells) * cell_size + u64::from(cell) * cell_size + row)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 4 data cells of 8 bytes plus 2 parity cells; one stripe covers 32
    // bytes of user data.
    const EC_4_2_TINY: RedundancyClass = RedundancyClass::ErasureCoded {
        data_cells: 4,
        parity_cells: 2,
        cell_size: 8,
    };

    fn array_io(extents: Vec<Extent>, data: &[u8]) -> (Vec<IoDescriptor>, Vec<SgList>) {
        (
            vec![IoDescriptor {
                key: Bytes::from_static(b"akey"),
                kind: IoKind::Array { extents },
            }],
            vec![SgList {
                segments: vec![Bytes::copy_from_slice(data)],
            }],
        )
    }

    /// Rebuild logical coverage from the per-target layout and check it
    /// byte-for-byte against the expected ranges.
    fn check_round_trip(req: &ReassemblyRequest, expected: &[(u64, &[u8])]) {
        let mut rebuilt: BTreeMap<u64, u8> = BTreeMap::new();
        for cell in 0..req.target_count {
            let Some(tio) = req.target_io(cell) else {
                continue;
            };
            for sub in &tio.subs {
                for (ext, payload) in sub.extents.iter().zip(&sub.payloads) {
                    let SegPayload::Data(data) = payload else {
                        continue;
                    };
                    let base = logical_offset(&req.class, cell, ext.offset).unwrap();
                    for (i, byte) in data.iter().enumerate() {
                        let prev = rebuilt.insert(base + i as u64, *byte);
                        if let Some(prev) = prev {
                            assert_eq!(prev, *byte, "replicas disagree at {}", base + i as u64);
                        }
                    }
                }
            }
        }
        let mut want: BTreeMap<u64, u8> = BTreeMap::new();
        for (off, bytes) in expected {
            for (i, byte) in bytes.iter().enumerate() {
                want.insert(off + i as u64, *byte);
            }
        }
        assert_eq!(rebuilt, want);
    }

    #[test]
    fn test_round_trip_single_extent() {
        let data: Vec<u8> = (0..16u8).collect();
        let (iods, sgls) = array_io(vec![Extent::new(0, 16)], &data);
        let req = ReassemblyRequest::build(iods, sgls, &EC_4_2_TINY, true).unwrap();
        check_round_trip(&req, &[(0, &data)]);
    }

    #[test]
    fn test_round_trip_adjacent_merge() {
        let data: Vec<u8> = (0..16u8).collect();
        // Supplied tail-first; adjacent at offset 8.
        let extents = vec![Extent::new(8, 8), Extent::new(0, 8)];
        let (mut iods, mut sgls) = array_io(extents, &[]);
        sgls[0].segments = vec![
            Bytes::copy_from_slice(&data[8..]),
            Bytes::copy_from_slice(&data[..8]),
        ];
        let req = ReassemblyRequest::build(iods.drain(..).collect(), sgls, &EC_4_2_TINY, true)
            .unwrap();

        // Merged to one extent in the normalized descriptor.
        match &req.iods[0].kind {
            IoKind::Array { extents } => assert_eq!(extents, &[Extent::new(0, 16)]),
            IoKind::Single { .. } => unreachable!(),
        }
        check_round_trip(&req, &[(0, &data)]);
    }

    #[test]
    fn test_round_trip_out_of_order_with_gap() {
        let hi = [7u8; 4];
        let lo = [3u8; 4];
        let (mut iods, mut sgls) = array_io(vec![Extent::new(40, 4), Extent::new(0, 4)], &[]);
        sgls[0].segments = vec![Bytes::copy_from_slice(&hi), Bytes::copy_from_slice(&lo)];
        let req = ReassemblyRequest::build(iods.drain(..).collect(), sgls, &EC_4_2_TINY, true)
            .unwrap();
        check_round_trip(&req, &[(0, &lo), (40, &hi)]);
    }

    #[test]
    fn test_parity_bit_rejected() {
        let data = [0u8; 8];
        let (iods, sgls) = array_io(vec![Extent::new(PARITY_INDICATOR, 8)], &data);
        let err = ReassemblyRequest::build(iods, sgls, &EC_4_2_TINY, true).unwrap_err();
        assert!(matches!(err, Error::InvalidExtent { .. }));

        let (iods, sgls) = array_io(vec![Extent::new(PARITY_INDICATOR - 4, 8)], &data);
        let err = ReassemblyRequest::build(iods, sgls, &EC_4_2_TINY, true).unwrap_err();
        assert!(matches!(err, Error::InvalidExtent { .. }));
    }

    #[test]
    fn test_partial_stripe_write_bitmap() {
        // Write covering cells 1 and 2 only: offsets 8..24 of stripe 0.
        let data = [9u8; 16];
        let (iods, sgls) = array_io(vec![Extent::new(8, 16)], &data);
        let req = ReassemblyRequest::build(iods, sgls, &EC_4_2_TINY, true).unwrap();

        assert!(!req.bitmap.get(0));
        assert!(req.bitmap.get(1));
        assert!(req.bitmap.get(2));
        assert!(!req.bitmap.get(3));
        // Parity is always written.
        assert!(req.bitmap.get(4));
        assert!(req.bitmap.get(5));
        assert_eq!(req.bitmap.count_ones(), 4);

        // Parity extents carry the indicator bit and cover the touched rows.
        let parity = req.target_io(4).unwrap();
        assert_eq!(parity.subs[0].extents.len(), 1);
        let pext = parity.subs[0].extents[0];
        assert!(pext.is_parity());
        assert_eq!(pext.offset & !PARITY_INDICATOR, 0);
        assert_eq!(pext.len, 8);
    }

    #[test]
    fn test_fetch_touches_no_parity() {
        let data = [1u8; 16];
        let (iods, sgls) = array_io(vec![Extent::new(8, 16)], &data);
        let req = ReassemblyRequest::build(iods, sgls, &EC_4_2_TINY, false).unwrap();
        assert!(!req.bitmap.get(4));
        assert!(!req.bitmap.get(5));
        assert_eq!(req.bitmap.count_ones(), 2);
    }

    #[test]
    fn test_skip_map_describes_gaps() {
        // Two runs in cell 0 (rows 0..2 and 4..6) leave a 2-byte hole.
        let data = [5u8; 4];
        let (mut iods, mut sgls) = array_io(vec![Extent::new(0, 2), Extent::new(4, 2)], &[]);
        sgls[0].segments = vec![Bytes::copy_from_slice(&data[..2]), Bytes::copy_from_slice(&data[2..])];
        let req = ReassemblyRequest::build(iods.drain(..).collect(), sgls, &EC_4_2_TINY, true)
            .unwrap();

        let sub = &req.target_io(0).unwrap().subs[0];
        let map: Vec<(u64, bool)> = sub.skip_map.iter().map(|s| (s.len(), s.is_skip())).collect();
        assert_eq!(map, vec![(2, false), (2, true), (2, false)]);
    }

    #[test]
    fn test_multi_stripe_extent_merges_per_target() {
        // Two full stripes: every data cell sees two contiguous rows that
        // merge into one 16-byte target extent.
        let data: Vec<u8> = (0..64).map(|i| i as u8).collect();
        let (iods, sgls) = array_io(vec![Extent::new(0, 64)], &data);
        let req = ReassemblyRequest::build(iods, sgls, &EC_4_2_TINY, true).unwrap();
        for cell in 0..4 {
            let sub = &req.target_io(cell).unwrap().subs[0];
            assert_eq!(sub.extents, vec![Extent::new(0, 16)]);
        }
        check_round_trip(&req, &[(0, &data)]);
    }

    #[test]
    fn test_replicated_pass_through() {
        let data = [2u8; 24];
        let (iods, sgls) = array_io(vec![Extent::new(100, 24)], &data);
        let req = ReassemblyRequest::build(iods, sgls, &RedundancyClass::REPL_3, true).unwrap();
        assert_eq!(req.bitmap.count_ones(), 3);
        for cell in 0..3 {
            let sub = &req.target_io(cell).unwrap().subs[0];
            assert_eq!(sub.extents, vec![Extent::new(100, 24)]);
        }
        check_round_trip(&req, &[(100, &data)]);
    }

    #[test]
    fn test_small_single_value_placement() {
        let value = Bytes::from_static(b"tiny");
        let iods = vec![IoDescriptor {
            key: Bytes::from_static(b"akey"),
            kind: IoKind::Single { size: 4 },
        }];
        let sgls = vec![SgList {
            segments: vec![value],
        }];
        let req = ReassemblyRequest::build(iods, sgls, &EC_4_2_TINY, true).unwrap();
        // Cell 0 plus both parity cells.
        assert!(req.bitmap.get(0));
        assert!(req.bitmap.get(4));
        assert!(req.bitmap.get(5));
        assert_eq!(req.bitmap.count_ones(), 3);
        assert!(req.singv_layouts[0].is_some());
    }

    #[test]
    fn test_mismatched_sgl_rejected() {
        let (iods, _) = array_io(vec![Extent::new(0, 16)], &[0u8; 16]);
        let err = ReassemblyRequest::build(iods, vec![], &EC_4_2_TINY, true).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_round_trip_random_extents() {
        use rand::prelude::*;
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);

        for _ in 0..64 {
            // Disjoint random extents within three stripes, shuffled.
            let mut offsets: Vec<u64> = (0..12).map(|i| i * 8).collect();
            offsets.shuffle(&mut rng);
            let picked = rng.gen_range(1..=6);
            let mut extents = Vec::new();
            let mut expected = Vec::new();
            let mut payload = Vec::new();
            for off in offsets.into_iter().take(picked) {
                let len = rng.gen_range(1..=8u64);
                let data: Vec<u8> = (0..len).map(|_| rng.gen_range(0..=255u8)).collect();
                extents.push(Extent::new(off, len));
                payload.extend_from_slice(&data);
                expected.push((off, data));
            }

            let (iods, mut sgls) = array_io(extents, &[]);
            sgls[0].segments = vec![Bytes::copy_from_slice(&payload)];
            let req = ReassemblyRequest::build(iods, sgls, &EC_4_2_TINY, true).unwrap();
            let expected_refs: Vec<(u64, &[u8])> = expected
                .iter()
                .map(|(off, data)| (*off, data.as_slice()))
                .collect();
            check_round_trip(&req, &expected_refs);
        }
    }
}
