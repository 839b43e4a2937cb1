use crate::scalar::{Scalar, ScalarType};
#[cfg(feature = "cuda")]
use cust::memory::LockedBuffer;
use derive_more::{Display, IsVariant};
use std::{marker::PhantomData, mem::size_of, slice};

/// Errors.
pub mod error {
    use super::HostAllocKind;

    /** Host memory could not be obtained.

    - Pageable: the allocator reported out of memory.
    - Pinned: the pages could not be locked, eg the resource limit
      was exceeded or no CUDA context is current.
    */
    #[derive(Debug, thiserror::Error)]
    #[error("failed to allocate {kind} host buffer of {len} elements")]
    pub struct AllocationError {
        kind: HostAllocKind,
        len: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    }

    impl AllocationError {
        pub(crate) fn new(
            kind: HostAllocKind,
            len: usize,
            source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
        ) -> Self {
            Self {
                kind,
                len,
                source: source.into(),
            }
        }
        /// The allocation kind that failed.
        pub fn kind(&self) -> HostAllocKind {
            self.kind
        }
    }
}
use error::*;

/// How a [`HostBuffer`]'s memory is allocated.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash, IsVariant)]
pub enum HostAllocKind {
    /// Ordinary heap memory, may be paged out by the operating system.
    #[display(fmt = "pageable")]
    Pageable,
    /// Page-locked memory, usable for direct asynchronous device copies.
    #[display(fmt = "pinned")]
    Pinned,
}

enum HostData<T: Scalar> {
    Pageable(Vec<T>),
    #[cfg(feature = "cuda")]
    Pinned(LockedBuffer<T>),
}

/** A fixed-length, contiguous host allocation.

The buffer exclusively owns its memory. Element `i` is initialized to
`i`, wrapping past the element type's range. The backing storage is
released exactly once when the buffer is dropped, unlocking pinned
pages if applicable.
*/
pub struct HostBuffer<T: Scalar> {
    data: HostData<T>,
}

impl<T: Scalar> HostBuffer<T> {
    /** Allocates `len` elements of the given kind.

    **errors**

    [`AllocationError`] if the memory could not be obtained. No
    partially initialized buffer is returned. */
    pub fn new(len: usize, kind: HostAllocKind) -> Result<Self, AllocationError> {
        match kind {
            HostAllocKind::Pageable => Self::pageable(len),
            HostAllocKind::Pinned => Self::pinned(len),
        }
    }
    /// Allocates `len` elements of ordinary heap memory.
    pub fn pageable(len: usize) -> Result<Self, AllocationError> {
        let mut vec = Vec::new();
        vec.try_reserve_exact(len)
            .map_err(|e| AllocationError::new(HostAllocKind::Pageable, len, e))?;
        vec.extend((0..len).map(T::from_index));
        Ok(Self {
            data: HostData::Pageable(vec),
        })
    }
    /** Allocates `len` elements of page-locked memory.

    Requires a current CUDA context. The pages are locked on creation
    and unlocked when the buffer is dropped. */
    #[cfg(feature = "cuda")]
    pub fn pinned(len: usize) -> Result<Self, AllocationError> {
        let mut buffer = LockedBuffer::new(&T::default(), len)
            .map_err(|e| AllocationError::new(HostAllocKind::Pinned, len, e))?;
        for (i, x) in buffer.iter_mut().enumerate() {
            *x = T::from_index(i);
        }
        Ok(Self {
            data: HostData::Pinned(buffer),
        })
    }
    #[cfg(not(feature = "cuda"))]
    pub fn pinned(len: usize) -> Result<Self, AllocationError> {
        Err(AllocationError::new(
            HostAllocKind::Pinned,
            len,
            crate::tensor::error::DeviceUnavailable,
        ))
    }
    /// The allocation kind.
    pub fn kind(&self) -> HostAllocKind {
        match &self.data {
            HostData::Pageable(_) => HostAllocKind::Pageable,
            #[cfg(feature = "cuda")]
            HostData::Pinned(_) => HostAllocKind::Pinned,
        }
    }
    /// Number of elements, fixed at construction.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Size of the buffer in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.len() * size_of::<T>()
    }
    pub fn as_slice(&self) -> &[T] {
        match &self.data {
            HostData::Pageable(vec) => vec.as_slice(),
            #[cfg(feature = "cuda")]
            HostData::Pinned(buffer) => &buffer[..],
        }
    }
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match &mut self.data {
            HostData::Pageable(vec) => vec.as_mut_slice(),
            #[cfg(feature = "cuda")]
            HostData::Pinned(buffer) => &mut buffer[..],
        }
    }
    /** A non-owning view of the buffer's memory.

    No data is copied; the view reads the buffer's memory on access, so
    in-place writes to the buffer are observable through a previously
    obtained view. The view must not be accessed after the buffer is
    dropped. */
    pub fn as_array_view(&self) -> ArrayView<'_, T> {
        let slice = self.as_slice();
        ArrayView {
            raw: RawHostSlice {
                ptr: slice.as_ptr() as *mut u8,
                len: slice.len() * size_of::<T>(),
            },
            kind: self.kind(),
            _m: PhantomData,
        }
    }
    /** A non-owning mutable view of the buffer's memory.

    Borrows the buffer exclusively for the lifetime of the view, so
    writes through the view cannot alias other access to the buffer. */
    pub fn as_array_view_mut(&mut self) -> ArrayViewMut<'_, T> {
        let kind = self.kind();
        let slice = self.as_mut_slice();
        ArrayViewMut {
            raw: RawHostSlice {
                ptr: slice.as_mut_ptr() as *mut u8,
                len: slice.len() * size_of::<T>(),
            },
            kind,
            _m: PhantomData,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RawHostSlice {
    ptr: *mut u8,
    len: usize,
}

/** A borrowed, contiguous, one-dimensional view of host memory.

The descriptor is a raw pointer, an element count, the element type and
a unit stride, for interchange with array or tensor libraries without
copying. The view does not own the memory and must not outlive the
[`HostBuffer`] it was obtained from.
*/
#[derive(Clone, Copy)]
pub struct ArrayView<'a, T: Scalar> {
    raw: RawHostSlice,
    kind: HostAllocKind,
    _m: PhantomData<&'a T>,
}

impl<T: Scalar> ArrayView<'_, T> {
    /// Shape of the view, `[len]`.
    pub fn shape(&self) -> [usize; 1] {
        [self.len()]
    }
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.raw.len / size_of::<T>()
    }
    pub fn is_empty(&self) -> bool {
        self.raw.len == 0
    }
    /// Distance between consecutive elements, always 1.
    pub fn stride(&self) -> usize {
        1
    }
    /// The element type.
    pub fn scalar_type(&self) -> ScalarType {
        T::SCALAR_TYPE
    }
    /// The allocation kind of the viewed buffer.
    pub fn kind(&self) -> HostAllocKind {
        self.kind
    }
    /// The viewed memory.
    pub fn as_ptr(&self) -> *const T {
        self.raw.ptr as *const T
    }
    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.raw.ptr as *const T, self.len()) }
    }
}

/** Like [`ArrayView`], but exclusive and writable.

Obtained from [`HostBuffer::as_array_view_mut`]; the buffer cannot be
read or written through any other path while the view is live.
*/
pub struct ArrayViewMut<'a, T: Scalar> {
    raw: RawHostSlice,
    kind: HostAllocKind,
    _m: PhantomData<&'a mut T>,
}

impl<T: Scalar> ArrayViewMut<'_, T> {
    /// Shape of the view, `[len]`.
    pub fn shape(&self) -> [usize; 1] {
        [self.len()]
    }
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.raw.len / size_of::<T>()
    }
    pub fn is_empty(&self) -> bool {
        self.raw.len == 0
    }
    /// Distance between consecutive elements, always 1.
    pub fn stride(&self) -> usize {
        1
    }
    /// The element type.
    pub fn scalar_type(&self) -> ScalarType {
        T::SCALAR_TYPE
    }
    /// The allocation kind of the viewed buffer.
    pub fn kind(&self) -> HostAllocKind {
        self.kind
    }
    /// The viewed memory.
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.raw.ptr as *mut T
    }
    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.raw.ptr as *const T, self.len()) }
    }
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.raw.ptr as *mut T, self.len()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dry::macro_for;
    use paste::paste;

    macro_for!($T in [u8, i8, u16, i16, u32, i32, f32, u64, i64, f64] {
        paste! {
            #[test]
            fn [<pageable_view_ $T>]() {
                let buffer = HostBuffer::<$T>::pageable(17).unwrap();
                let view = buffer.as_array_view();
                assert_eq!(view.shape(), [17]);
                assert_eq!(view.stride(), 1);
                assert_eq!(view.scalar_type(), ScalarType::[<$T:upper>]);
                for (i, x) in view.as_slice().iter().enumerate() {
                    assert_eq!(*x, $T::from_index(i));
                }
            }
        }
    });

    #[test]
    fn pageable_fill_wraps_i8() {
        let buffer = HostBuffer::<i8>::pageable(512).unwrap();
        let slice = buffer.as_array_view().as_slice().to_vec();
        assert_eq!(slice.iter().copied().max(), Some(i8::MAX));
        assert_eq!(slice.iter().copied().min(), Some(i8::MIN));
    }

    #[test]
    fn pageable_fill_wraps_u8() {
        let buffer = HostBuffer::<u8>::pageable(512).unwrap();
        let slice = buffer.as_array_view().as_slice().to_vec();
        assert_eq!(slice.iter().copied().max(), Some(u8::MAX));
        assert_eq!(slice.iter().copied().min(), Some(u8::MIN));
    }

    #[test]
    fn pageable_fill_short() {
        let buffer = HostBuffer::<i32>::pageable(100).unwrap();
        let slice = buffer.as_array_view().as_slice().to_vec();
        assert_eq!(slice.iter().copied().max(), Some(99));
        assert_eq!(slice.iter().copied().min(), Some(0));
    }

    #[test]
    fn empty_buffer() {
        let buffer = HostBuffer::<u8>::new(0, HostAllocKind::Pageable).unwrap();
        assert!(buffer.is_empty());
        let view = buffer.as_array_view();
        assert_eq!(view.shape(), [0]);
        assert!(view.as_slice().is_empty());
    }

    #[test]
    fn view_idempotent() {
        let buffer = HostBuffer::<i8>::pageable(512).unwrap();
        let a = buffer.as_array_view();
        let b = buffer.as_array_view();
        assert_eq!(a.as_ptr(), b.as_ptr());
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn view_mut_writes_buffer() {
        let mut buffer = HostBuffer::<i8>::pageable(16).unwrap();
        buffer.as_array_view_mut().as_mut_slice().fill(42);
        assert!(buffer.as_slice().iter().all(|x| *x == 42));
    }

    #[test]
    fn view_observes_buffer_writes() {
        let mut buffer = HostBuffer::<i8>::pageable(16).unwrap();
        let ptr = buffer.as_array_view().as_ptr();
        buffer.as_mut_slice().fill(42);
        let view = buffer.as_array_view();
        assert_eq!(view.as_ptr(), ptr);
        assert!(view.as_slice().iter().all(|x| *x == 42));
    }

    #[cfg(feature = "cuda")]
    mod cuda {
        use super::*;

        macro_for!($T in [u8, i8, u16, i16, u32, i32, f32, u64, i64, f64] {
            paste! {
                #[test]
                fn [<pinned_view_ $T>]() {
                    let _context = cust::quick_init().unwrap();
                    let buffer = HostBuffer::<$T>::pinned(17).unwrap();
                    let view = buffer.as_array_view();
                    assert_eq!(view.shape(), [17]);
                    assert_eq!(view.scalar_type(), ScalarType::[<$T:upper>]);
                    for (i, x) in view.as_slice().iter().enumerate() {
                        assert_eq!(*x, $T::from_index(i));
                    }
                }
            }
        });

        #[test]
        fn pinned_fill_wraps_i8() {
            let _context = cust::quick_init().unwrap();
            let buffer = HostBuffer::<i8>::pinned(512).unwrap();
            let slice = buffer.as_array_view().as_slice().to_vec();
            assert_eq!(slice.iter().copied().max(), Some(i8::MAX));
            assert_eq!(slice.iter().copied().min(), Some(i8::MIN));
        }

        #[test]
        fn pinned_allocation_failure() {
            let _context = cust::quick_init().unwrap();
            // Far beyond any lockable amount of host memory.
            let err = HostBuffer::<u8>::pinned(1 << 46).err().unwrap();
            assert_eq!(err.kind(), HostAllocKind::Pinned);
        }
    }
}
