#![forbid(unsafe_op_in_unsafe_fn)]

/*!
Measures host <-> device transfer throughput for pageable, pinned and
device-resident buffers.

A [`HostBuffer`](buffer::HostBuffer) owns a contiguous host allocation,
either pageable or page-locked, and exposes it as a zero-copy
[`ArrayView`](buffer::ArrayView). A [`Tensor`](tensor::Tensor) wraps host,
pinned or device storage and provides the copy primitives that the
[`bench`] driver times, reporting the median duration of repeated copies
and the bandwidth derived from it.

Device support requires the "cuda" feature.
*/

pub mod result {
    pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
}

pub mod bench;
pub mod buffer;
pub mod scalar;
pub mod tensor;
