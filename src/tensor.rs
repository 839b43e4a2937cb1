use crate::{
    buffer::{ArrayView, ArrayViewMut},
    scalar::{Scalar, ScalarType},
};
use anyhow::{bail, Result};
#[cfg(feature = "cuda")]
use cust::memory::{CopyDestination, DeviceBuffer, LockedBuffer};
use derive_more::{Display, IsVariant};
use std::{marker::PhantomData, mem::size_of, slice};

#[cfg(feature = "cuda")]
use crate::buffer::error::AllocationError;
use crate::buffer::HostAllocKind;

/// Errors.
pub mod error {
    use super::Location;

    /// The transfer primitive reported a transport-level failure.
    #[derive(Debug, thiserror::Error)]
    #[error("copy from {src} to {dst} failed")]
    pub struct CopyError {
        src: Location,
        dst: Location,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    }

    impl CopyError {
        pub(super) fn new(
            src: Location,
            dst: Location,
            source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
        ) -> Self {
            Self {
                src,
                dst,
                source: source.into(),
            }
        }
    }

    /** The (source, destination) pairing is not implemented by the
    underlying library.

    Notably there is no conversion-copy into a pinned destination. */
    #[derive(Clone, Copy, Debug, thiserror::Error)]
    #[error("copy from {src} to {dst} is not supported")]
    pub struct UnsupportedCombination {
        src: Location,
        dst: Location,
    }

    impl UnsupportedCombination {
        pub(super) fn new(src: Location, dst: Location) -> Self {
            Self { src, dst }
        }
    }

    /** CUDA is unavailable.

    - The "cuda" feature is not enabled.
    */
    #[derive(Clone, Copy, Debug, thiserror::Error)]
    #[error("DeviceUnavailable")]
    pub struct DeviceUnavailable;

    /// Device memory could not be obtained.
    #[cfg(feature = "cuda")]
    #[derive(Debug, thiserror::Error)]
    #[error("failed to allocate device buffer of {len} elements")]
    pub struct OutOfDeviceMemory {
        len: usize,
        #[source]
        source: cust::error::CudaError,
    }

    #[cfg(feature = "cuda")]
    impl OutOfDeviceMemory {
        pub(super) fn new(len: usize, source: cust::error::CudaError) -> Self {
            Self { len, source }
        }
    }
}
use error::*;

/** Where a [`Tensor`]'s memory resides.

Displays as the report abbreviation, ie "h", "hp" or "d".
*/
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash, IsVariant)]
pub enum Location {
    /// Pageable host memory.
    #[display(fmt = "h")]
    Host,
    /// Page-locked host memory.
    #[display(fmt = "hp")]
    PinnedHost,
    /// Device memory.
    #[display(fmt = "d")]
    Device,
}

enum Storage<'a, T: Scalar> {
    Host(Vec<T>),
    #[cfg(feature = "cuda")]
    Pinned(LockedBuffer<T>),
    #[cfg(feature = "cuda")]
    Device(DeviceBuffer<T>),
    HostView {
        ptr: *const T,
        len: usize,
        kind: HostAllocKind,
        _m: PhantomData<&'a T>,
    },
    HostViewMut {
        ptr: *mut T,
        len: usize,
        kind: HostAllocKind,
        _m: PhantomData<&'a mut T>,
    },
}

/** A one-dimensional tensor in pageable host, pinned host or device memory.

Owned tensors release their storage on drop. A tensor created with
[`from_array_view`](Tensor::from_array_view) borrows a
[`HostBuffer`](crate::buffer::HostBuffer)'s memory without copying and
is read-only; one created with
[`from_array_view_mut`](Tensor::from_array_view_mut) holds the buffer's
exclusive borrow and writes through it on
[`copy_from`](Tensor::copy_from).
*/
pub struct Tensor<'a, T: Scalar> {
    storage: Storage<'a, T>,
}

impl<T: Scalar> Tensor<'static, T> {
    /// A pageable host tensor taking ownership of `vec`.
    pub fn from_vec(vec: Vec<T>) -> Self {
        Self {
            storage: Storage::Host(vec),
        }
    }
    /// A tensor of `len` zeros at `location`.
    pub fn zeros(location: Location, len: usize) -> Result<Self> {
        Self::from_elem(location, len, T::zero())
    }
    /// A tensor of `len` ones at `location`.
    pub fn ones(location: Location, len: usize) -> Result<Self> {
        Self::from_elem(location, len, T::one())
    }
    fn from_elem(location: Location, len: usize, elem: T) -> Result<Self> {
        match location {
            Location::Host => Ok(Self::from_vec(vec![elem; len])),
            Location::PinnedHost => {
                #[cfg(feature = "cuda")]
                {
                    let buffer = LockedBuffer::new(&elem, len)
                        .map_err(|e| AllocationError::new(HostAllocKind::Pinned, len, e))?;
                    Ok(Self {
                        storage: Storage::Pinned(buffer),
                    })
                }
                #[cfg(not(feature = "cuda"))]
                {
                    Err(DeviceUnavailable.into())
                }
            }
            Location::Device => {
                #[cfg(feature = "cuda")]
                {
                    let host = vec![elem; len];
                    let buffer = DeviceBuffer::from_slice(&host)
                        .map_err(|e| OutOfDeviceMemory::new(len, e))?;
                    Ok(Self {
                        storage: Storage::Device(buffer),
                    })
                }
                #[cfg(not(feature = "cuda"))]
                {
                    Err(DeviceUnavailable.into())
                }
            }
        }
    }
}

impl<'a, T: Scalar> Tensor<'a, T> {
    /** Wraps an [`ArrayView`]'s memory without copying.

    The tensor's location follows the view's allocation kind. The
    tensor is read-only; it can be a copy source but not a copy
    destination. */
    pub fn from_array_view(view: ArrayView<'a, T>) -> Self {
        Self {
            storage: Storage::HostView {
                ptr: view.as_ptr(),
                len: view.len(),
                kind: view.kind(),
                _m: PhantomData,
            },
        }
    }
    /** Wraps an [`ArrayViewMut`]'s memory without copying.

    Like [`from_array_view`](Tensor::from_array_view), but the view's
    exclusive borrow carries over, so [`copy_from`](Tensor::copy_from)
    can write the buffer in place. */
    pub fn from_array_view_mut(mut view: ArrayViewMut<'a, T>) -> Self {
        Self {
            storage: Storage::HostViewMut {
                ptr: view.as_mut_ptr(),
                len: view.len(),
                kind: view.kind(),
                _m: PhantomData,
            },
        }
    }
    /// Where the tensor's memory resides.
    pub fn location(&self) -> Location {
        match &self.storage {
            Storage::Host(_) => Location::Host,
            #[cfg(feature = "cuda")]
            Storage::Pinned(_) => Location::PinnedHost,
            #[cfg(feature = "cuda")]
            Storage::Device(_) => Location::Device,
            Storage::HostView { kind, .. } | Storage::HostViewMut { kind, .. } => match kind {
                HostAllocKind::Pageable => Location::Host,
                HostAllocKind::Pinned => Location::PinnedHost,
            },
        }
    }
    /// The element type.
    pub fn scalar_type(&self) -> ScalarType {
        T::SCALAR_TYPE
    }
    /// Number of elements.
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Host(vec) => vec.len(),
            #[cfg(feature = "cuda")]
            Storage::Pinned(buffer) => buffer.len(),
            #[cfg(feature = "cuda")]
            Storage::Device(buffer) => buffer.len(),
            Storage::HostView { len, .. } | Storage::HostViewMut { len, .. } => *len,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Size of the tensor in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.len() * size_of::<T>()
    }
    /** The tensor's memory as a host slice.

    Device tensors return None. */
    pub fn as_host_slice(&self) -> Option<&[T]> {
        match &self.storage {
            Storage::Host(vec) => Some(vec.as_slice()),
            #[cfg(feature = "cuda")]
            Storage::Pinned(buffer) => Some(&buffer[..]),
            #[cfg(feature = "cuda")]
            Storage::Device(_) => None,
            Storage::HostView { ptr, len, .. } => {
                Some(unsafe { slice::from_raw_parts(*ptr, *len) })
            }
            Storage::HostViewMut { ptr, len, .. } => {
                Some(unsafe { slice::from_raw_parts(*ptr as *const T, *len) })
            }
        }
    }
    fn as_host_slice_mut(&mut self) -> Option<&mut [T]> {
        match &mut self.storage {
            Storage::Host(vec) => Some(vec.as_mut_slice()),
            #[cfg(feature = "cuda")]
            Storage::Pinned(buffer) => Some(&mut buffer[..]),
            #[cfg(feature = "cuda")]
            Storage::Device(_) => None,
            Storage::HostView { .. } => None,
            Storage::HostViewMut { ptr, len, .. } => {
                Some(unsafe { slice::from_raw_parts_mut(*ptr, *len) })
            }
        }
    }
    /** A conversion-copy into a fresh tensor at `location` with element
    type `U`.

    Always copies, like `tensor.to(device, dtype, copy=True)`.

    **errors**

    - [`UnsupportedCombination`]: the destination is pinned (the
      library provides no conversion-copy into pinned memory), or both
      source and destination are on the device.
    - [`DeviceUnavailable`]: `location` is the device without the
      "cuda" feature.
    - [`OutOfDeviceMemory`], [`CopyError`]: the allocation or transfer
      failed.
    */
    pub fn to<U: Scalar>(&self, location: Location) -> Result<Tensor<'static, U>> {
        match location {
            Location::PinnedHost => {
                Err(UnsupportedCombination::new(self.location(), location).into())
            }
            Location::Host => {
                if let Some(slice) = self.as_host_slice() {
                    Ok(Tensor::from_vec(convert(slice)))
                } else {
                    #[cfg(feature = "cuda")]
                    {
                        self.download()
                    }
                    #[cfg(not(feature = "cuda"))]
                    {
                        unreachable!()
                    }
                }
            }
            Location::Device => {
                #[cfg(feature = "cuda")]
                {
                    let slice = if let Some(slice) = self.as_host_slice() {
                        slice
                    } else {
                        return Err(
                            UnsupportedCombination::new(self.location(), location).into()
                        );
                    };
                    let buffer = if U::SCALAR_TYPE == T::SCALAR_TYPE {
                        DeviceBuffer::from_slice(bytemuck::cast_slice(slice))
                    } else {
                        let converted: Vec<U> = convert(slice);
                        DeviceBuffer::from_slice(&converted)
                    }
                    .map_err(|e| OutOfDeviceMemory::new(slice.len(), e))?;
                    Ok(Tensor {
                        storage: Storage::Device(buffer),
                    })
                }
                #[cfg(not(feature = "cuda"))]
                {
                    Err(DeviceUnavailable.into())
                }
            }
        }
    }
    #[cfg(feature = "cuda")]
    fn download<U: Scalar>(&self) -> Result<Tensor<'static, U>> {
        let buffer = match &self.storage {
            Storage::Device(buffer) => buffer,
            _ => unreachable!(),
        };
        if U::SCALAR_TYPE == T::SCALAR_TYPE {
            let mut vec = vec![U::zero(); buffer.len()];
            buffer
                .copy_to(bytemuck::cast_slice_mut::<U, T>(&mut vec))
                .map_err(|e| CopyError::new(Location::Device, Location::Host, e))?;
            Ok(Tensor::from_vec(vec))
        } else {
            let mut vec = vec![T::zero(); buffer.len()];
            buffer
                .copy_to(&mut vec[..])
                .map_err(|e| CopyError::new(Location::Device, Location::Host, e))?;
            Ok(Tensor::from_vec(vec.iter().map(|x| x.cast()).collect()))
        }
    }
    /** Overwrites the tensor in place with the elements of `src`, like
    `tensor.copy_(src)`.

    Supported pairings are host-like to host-like, host-like to device
    and device to host-like; device to device is not.

    **errors**

    - The lengths differ.
    - The destination is a read-only view.
    - [`UnsupportedCombination`], [`CopyError`].
    */
    pub fn copy_from(&mut self, src: &Tensor<T>) -> Result<()> {
        if self.len() != src.len() {
            bail!(
                "copy_from: expected {} elements, found {}",
                self.len(),
                src.len()
            );
        }
        #[cfg_attr(not(feature = "cuda"), allow(unused_variables))]
        let (src_loc, dst_loc) = (src.location(), self.location());
        #[cfg(feature = "cuda")]
        if let Storage::Device(dst) = &mut self.storage {
            return if let Some(slice) = src.as_host_slice() {
                dst.copy_from(slice)
                    .map_err(|e| CopyError::new(src_loc, dst_loc, e).into())
            } else {
                Err(UnsupportedCombination::new(src_loc, dst_loc).into())
            };
        }
        let dst = match self.as_host_slice_mut() {
            Some(dst) => dst,
            None => bail!("copy_from: the destination is a read-only view"),
        };
        #[cfg(feature = "cuda")]
        if let Storage::Device(src_buffer) = &src.storage {
            return src_buffer
                .copy_to(dst)
                .map_err(|e| CopyError::new(src_loc, dst_loc, e).into());
        }
        dst.copy_from_slice(src.as_host_slice().unwrap());
        Ok(())
    }
}

fn convert<T: Scalar, U: Scalar>(slice: &[T]) -> Vec<U> {
    if U::SCALAR_TYPE == T::SCALAR_TYPE {
        bytemuck::cast_slice(slice).to_vec()
    } else {
        slice.iter().map(|x| x.cast()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::HostBuffer;

    #[test]
    fn to_host_copies() {
        let src = Tensor::from_vec(vec![1i8, 2, 3]);
        let dst = src.to::<i8>(Location::Host).unwrap();
        assert_eq!(dst.location(), Location::Host);
        assert_eq!(dst.as_host_slice(), src.as_host_slice());
        assert_ne!(
            dst.as_host_slice().unwrap().as_ptr(),
            src.as_host_slice().unwrap().as_ptr()
        );
    }

    #[test]
    fn to_host_converts_dtype() {
        let src = Tensor::from_vec(vec![500i32, 1]);
        let dst = src.to::<i8>(Location::Host).unwrap();
        assert_eq!(dst.as_host_slice(), Some([-12i8, 1].as_slice()));
    }

    #[test]
    fn to_pinned_unsupported() {
        let src = Tensor::from_vec(vec![1i8; 4]);
        let err = src.to::<i8>(Location::PinnedHost).err().unwrap();
        assert!(err.downcast_ref::<UnsupportedCombination>().is_some());
    }

    #[test]
    fn copy_from_host_to_host() {
        let src = Tensor::from_vec(vec![7u8; 16]);
        let mut dst = Tensor::zeros(Location::Host, 16).unwrap();
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.as_host_slice(), src.as_host_slice());
    }

    #[test]
    fn copy_from_length_mismatch() {
        let src = Tensor::from_vec(vec![1u8; 8]);
        let mut dst = Tensor::zeros(Location::Host, 16).unwrap();
        assert!(dst.copy_from(&src).is_err());
    }

    #[test]
    fn view_tensor_shares_buffer_memory() {
        let mut buffer = HostBuffer::<i8>::pageable(64).unwrap();
        let src = Tensor::from_vec(vec![7i8; 64]);
        let mut dst = Tensor::from_array_view_mut(buffer.as_array_view_mut());
        assert_eq!(dst.location(), Location::Host);
        dst.copy_from(&src).unwrap();
        drop(dst);
        // The copy wrote the buffer's memory in place.
        assert!(buffer.as_slice().iter().all(|x| *x == 7));
    }

    #[test]
    fn view_tensor_reads_buffer() {
        let buffer = HostBuffer::<i8>::pageable(64).unwrap();
        let tensor = Tensor::from_array_view(buffer.as_array_view());
        assert_eq!(tensor.location(), Location::Host);
        assert_eq!(tensor.as_host_slice(), Some(buffer.as_slice()));
    }

    #[test]
    fn copy_into_readonly_view_rejected() {
        let buffer = HostBuffer::<i8>::pageable(8).unwrap();
        let src = Tensor::from_vec(vec![1i8; 8]);
        let mut dst = Tensor::from_array_view(buffer.as_array_view());
        assert!(dst.copy_from(&src).is_err());
        // The buffer keeps its ramp fill.
        assert_eq!(buffer.as_slice()[0], 0);
    }

    #[cfg(feature = "cuda")]
    mod cuda {
        use super::*;

        #[test]
        fn roundtrip_through_device() {
            let _context = cust::quick_init().unwrap();
            let src = Tensor::from_vec((0..64usize).map(i8::from_index).collect());
            let device = src.to::<i8>(Location::Device).unwrap();
            assert_eq!(device.location(), Location::Device);
            assert_eq!(device.len(), 64);
            let back = device.to::<i8>(Location::Host).unwrap();
            assert_eq!(back.as_host_slice(), src.as_host_slice());
        }

        #[test]
        fn copy_into_pinned_from_device() {
            let _context = cust::quick_init().unwrap();
            let src = Tensor::<i8>::ones(Location::Device, 32).unwrap();
            let mut dst = Tensor::zeros(Location::PinnedHost, 32).unwrap();
            dst.copy_from(&src).unwrap();
            assert!(dst.as_host_slice().unwrap().iter().all(|x| *x == 1));
        }

        #[test]
        fn copy_device_to_device_unsupported() {
            let _context = cust::quick_init().unwrap();
            let src = Tensor::<i8>::ones(Location::Device, 8).unwrap();
            let mut dst = Tensor::<i8>::zeros(Location::Device, 8).unwrap();
            let err = dst.copy_from(&src).unwrap_err();
            assert!(err.downcast_ref::<UnsupportedCombination>().is_some());
        }
    }
}
