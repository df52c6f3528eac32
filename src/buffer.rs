//! Zero-copy handoff of geometry from producers into primitives.
//!
//! A [`BufferDescriptor`] is only a view: it names a block of memory the producer owns and
//! says how many elements of which stride live there. The receiving primitive copies the bytes
//! out during the staging call and never keeps the descriptor afterwards.

use std::marker::PhantomData;

use crate::error::StagingError;

/// A borrowed `(address, element count, bytes per element)` view over caller-owned memory.
#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    address: *const u8,
    element_count: usize,
    bytes_per_element: usize,
    _borrow: PhantomData<&'a [u8]>,
}

// The descriptor is a read-only view; the memory it names is required to stay valid and
// unmodified for `'a`, which makes sharing the view across threads as safe as sharing `&[u8]`.
unsafe impl Send for BufferDescriptor<'_> {}
unsafe impl Sync for BufferDescriptor<'_> {}

impl<'a> BufferDescriptor<'a> {
    /// Builds a descriptor from a raw address, as handed over by a foreign runtime.
    ///
    /// # Safety
    ///
    /// When `element_count > 0`, `address` must be valid for reads of
    /// `element_count * bytes_per_element` bytes for the whole lifetime `'a`, and the memory
    /// must not be written to during that time.
    pub unsafe fn new(address: *const u8, element_count: usize, bytes_per_element: usize) -> Self {
        Self {
            address,
            element_count,
            bytes_per_element,
            _borrow: PhantomData,
        }
    }

    /// Describes an existing slice without copying it.
    pub fn from_slice<T: bytemuck::Pod>(data: &'a [T]) -> Self {
        Self {
            address: data.as_ptr().cast::<u8>(),
            element_count: data.len(),
            bytes_per_element: std::mem::size_of::<T>(),
            _borrow: PhantomData,
        }
    }

    /// A descriptor with no elements. Staging it clears the destination.
    pub fn empty() -> Self {
        Self {
            address: std::ptr::null(),
            element_count: 0,
            bytes_per_element: 0,
            _borrow: PhantomData,
        }
    }

    pub fn address(&self) -> *const u8 {
        self.address
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn bytes_per_element(&self) -> usize {
        self.bytes_per_element
    }

    /// Total number of bytes described, `element_count * bytes_per_element`.
    ///
    /// Fails when the product overflows or is larger than any slice can be.
    pub fn byte_len(&self) -> Result<usize, StagingError> {
        self.element_count
            .checked_mul(self.bytes_per_element)
            .filter(|len| *len <= isize::MAX as usize)
            .ok_or(StagingError::LengthOverflow {
                element_count: self.element_count,
                bytes_per_element: self.bytes_per_element,
            })
    }

    fn as_bytes(&self) -> Result<&'a [u8], StagingError> {
        if self.element_count == 0 || self.address.is_null() {
            return Ok(&[]);
        }
        let len = self.byte_len()?;
        // SAFETY: guaranteed by the contract of `new`, or by construction in `from_slice`.
        Ok(unsafe { std::slice::from_raw_parts(self.address, len) })
    }

    /// Copies the described bytes into a freshly sized vector of `T`.
    ///
    /// Exactly `byte_len()` bytes are copied. A zero element count yields an empty vector.
    pub fn to_vec<T: bytemuck::Pod>(&self) -> Result<Vec<T>, StagingError> {
        let bytes = self.as_bytes()?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }

        let element_size = std::mem::size_of::<T>();
        if bytes.len() % element_size != 0 {
            return Err(StagingError::MisalignedLength {
                bytes: bytes.len(),
                element_size,
            });
        }

        let mut destination = vec![T::zeroed(); bytes.len() / element_size];
        bytemuck::cast_slice_mut::<T, u8>(&mut destination).copy_from_slice(bytes);
        Ok(destination)
    }
}

impl Default for BufferDescriptor<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_exactly_the_described_bytes() {
        let source = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let descriptor = unsafe { BufferDescriptor::new(source.as_ptr().cast(), 3, 4) };

        let copied: Vec<f32> = descriptor.to_vec().unwrap();
        assert_eq!(copied, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn zero_elements_yield_an_empty_destination() {
        let source = [7u16; 4];
        let descriptor = unsafe { BufferDescriptor::new(source.as_ptr().cast(), 0, 2) };

        assert!(descriptor.to_vec::<u16>().unwrap().is_empty());
        assert!(BufferDescriptor::empty().to_vec::<f32>().unwrap().is_empty());
    }

    #[test]
    fn rejects_totals_that_do_not_split_into_elements() {
        let source = [0u8; 6];
        let descriptor = BufferDescriptor::from_slice(&source[..5]);

        assert_eq!(
            descriptor.to_vec::<u16>(),
            Err(StagingError::MisalignedLength {
                bytes: 5,
                element_size: 2
            })
        );
    }

    #[test]
    fn overflowing_totals_are_rejected_before_reading() {
        let source = [0u8; 2];
        let descriptor = unsafe { BufferDescriptor::new(source.as_ptr(), usize::MAX, 2) };

        let expected = StagingError::LengthOverflow {
            element_count: usize::MAX,
            bytes_per_element: 2,
        };
        assert_eq!(descriptor.byte_len(), Err(expected.clone()));
        assert_eq!(descriptor.to_vec::<u8>(), Err(expected));

        let oversized = unsafe { BufferDescriptor::new(source.as_ptr(), usize::MAX / 2 + 1, 1) };
        assert!(matches!(
            oversized.to_vec::<u8>(),
            Err(StagingError::LengthOverflow { .. })
        ));
    }

    #[test]
    fn element_stride_may_differ_from_the_destination_type() {
        // Two packed xyz vertices described as two 12-byte elements.
        let source = [0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0];
        let descriptor = unsafe { BufferDescriptor::new(source.as_ptr().cast(), 2, 12) };

        let copied: Vec<f32> = descriptor.to_vec().unwrap();
        assert_eq!(copied.len(), 6);
        assert_eq!(copied[5], 5.0);
    }
}
