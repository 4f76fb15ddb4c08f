//! StripeIO EC - Erasure-coded I/O reassembly
//!
//! Transforms application iod/sgl pairs into per-target layouts: extent
//! normalization, stripe splitting with parity addressing, skip maps for
//! bulk transfers, and single-value placement. The erasure mathematics
//! (encode/decode) lives behind the transfer layer and is not part of
//! this crate.

pub mod extent;
pub mod reassembly;
pub mod seg;
pub mod singv;

pub use extent::{Extent, PARITY_INDICATOR};
pub use reassembly::{
    logical_offset, IoDescriptor, IoKind, ReassemblyRequest, SegPayload, SgList, TargetBitmap,
    TargetIo, TargetSubIo,
};
pub use seg::{PackedSeg, SegSpec, MAX_SEG_LEN};
pub use singv::SingleValueLayout;
