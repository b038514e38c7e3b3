use crate::buffer::AlignedBuffer;
use crate::scalar::{ConversionError, Element, Scalar};
use simbind_types::CType;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArrayError {
    #[error("allocation of {bytes} bytes is too large")]
    TooLarge { bytes: usize },

    #[error("shape {shape:?} needs {expected} elements, got {found}")]
    LengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        found: usize,
    },

    #[error("array has element type {found}, expected {expected}")]
    DtypeMismatch { expected: CType, found: CType },

    #[error("expected shape {expected:?}, got {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("index {index:?} is out of bounds for shape {shape:?}")]
    OutOfBounds { index: Vec<usize>, shape: Vec<usize> },

    #[error("{rust} cannot view {ctype} elements")]
    ElementType { rust: &'static str, ctype: CType },

    #[error("array is already borrowed")]
    Borrowed,

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// Contiguous row-major storage of one primitive type.
pub struct ArrayData {
    ctype: CType,
    shape: Vec<usize>,
    buffer: AlignedBuffer,
}

fn element_count(shape: &[usize]) -> Result<usize, ArrayError> {
    shape
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or(ArrayError::TooLarge { bytes: usize::MAX })
}

impl ArrayData {
    pub fn zeros(ctype: CType, shape: &[usize]) -> Result<Self, ArrayError> {
        let count = element_count(shape)?;
        let bytes = count
            .checked_mul(ctype.size())
            .ok_or(ArrayError::TooLarge { bytes: usize::MAX })?;
        Ok(Self {
            ctype,
            shape: shape.to_vec(),
            buffer: AlignedBuffer::zeroed(bytes, ctype.align())?,
        })
    }

    pub fn from_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Self, ArrayError> {
        let mut data = Self::zeros(T::CTYPE, shape)?;
        if values.len() != data.len() {
            return Err(ArrayError::LengthMismatch {
                shape: shape.to_vec(),
                expected: data.len(),
                found: values.len(),
            });
        }
        data.as_mut_slice::<T>()?.copy_from_slice(&values);
        Ok(data)
    }

    /// Builds storage from decoded values, casting each to `ctype`.
    pub fn from_scalars(ctype: CType, shape: &[usize], values: &[Scalar]) -> Result<Self, ArrayError> {
        let mut data = Self::zeros(ctype, shape)?;
        if values.len() != data.len() {
            return Err(ArrayError::LengthMismatch {
                shape: shape.to_vec(),
                expected: data.len(),
                found: values.len(),
            });
        }
        for (flat, value) in values.iter().enumerate() {
            data.write_flat(flat, value.cast(ctype));
        }
        Ok(data)
    }

    pub fn ctype(&self) -> CType {
        self.ctype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.buffer.len() / self.ctype.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn elem_size(&self) -> usize {
        self.ctype.size()
    }

    pub(crate) fn data_ptr(&self) -> *mut u8 {
        self.buffer.as_ptr()
    }

    pub fn flat_index(&self, index: &[usize]) -> Result<usize, ArrayError> {
        let out_of_bounds = || ArrayError::OutOfBounds {
            index: index.to_vec(),
            shape: self.shape.clone(),
        };
        if index.len() != self.shape.len() {
            return Err(out_of_bounds());
        }
        let mut flat = 0usize;
        for (&i, &n) in index.iter().zip(&self.shape) {
            if i >= n {
                return Err(out_of_bounds());
            }
            flat = flat * n + i;
        }
        Ok(flat)
    }

    pub fn get_flat(&self, flat: usize) -> Result<Scalar, ArrayError> {
        if flat >= self.len() {
            return Err(ArrayError::OutOfBounds {
                index: vec![flat],
                shape: vec![self.len()],
            });
        }
        let size = self.elem_size();
        Ok(Scalar::decode(self.ctype, &self.buffer.as_slice()[flat * size..(flat + 1) * size]))
    }

    pub fn get(&self, index: &[usize]) -> Result<Scalar, ArrayError> {
        self.get_flat(self.flat_index(index)?)
    }

    pub fn set(&mut self, index: &[usize], value: Scalar) -> Result<(), ArrayError> {
        let flat = self.flat_index(index)?;
        let value = value.convert(self.ctype)?;
        self.write_flat(flat, value);
        Ok(())
    }

    fn write_flat(&mut self, flat: usize, value: Scalar) {
        let size = self.elem_size();
        let ctype = self.ctype;
        value.encode(ctype, &mut self.buffer.as_mut_slice()[flat * size..(flat + 1) * size]);
    }

    /// Sets every element; the value must convert exactly to the element type.
    pub fn fill(&mut self, value: Scalar) -> Result<(), ArrayError> {
        let value = value.convert(self.ctype)?;
        let size = self.elem_size();
        let mut cell = vec![0u8; size];
        value.encode(self.ctype, &mut cell);
        for chunk in self.buffer.as_mut_slice().chunks_exact_mut(size) {
            chunk.copy_from_slice(&cell);
        }
        Ok(())
    }

    pub fn as_slice<T: Element>(&self) -> Result<&[T], ArrayError> {
        self.check_element::<T>()?;
        /* SAFETY: element type checked, buffer aligned for ctype and sized len * size_of::<T>() */
        Ok(unsafe { std::slice::from_raw_parts(self.buffer.as_ptr() as *const T, self.len()) })
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T], ArrayError> {
        self.check_element::<T>()?;
        let len = self.len();
        /* SAFETY: as above, with exclusive access through &mut self */
        Ok(unsafe { std::slice::from_raw_parts_mut(self.buffer.as_ptr() as *mut T, len) })
    }

    fn check_element<T: Element>(&self) -> Result<(), ArrayError> {
        if T::accepts(self.ctype) {
            Ok(())
        } else {
            Err(ArrayError::ElementType {
                rust: std::any::type_name::<T>(),
                ctype: self.ctype,
            })
        }
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, ArrayError> {
        Ok(self.as_slice::<T>()?.to_vec())
    }

    pub fn to_scalars(&self) -> Vec<Scalar> {
        let size = self.elem_size();
        self.buffer
            .as_slice()
            .chunks_exact(size)
            .map(|chunk| Scalar::decode(self.ctype, chunk))
            .collect()
    }

    /// Copies `other` element-wise with C cast semantics; shapes must match.
    pub fn assign_from(&mut self, other: &ArrayData) -> Result<(), ArrayError> {
        if self.shape != other.shape {
            return Err(ArrayError::ShapeMismatch {
                expected: self.shape.clone(),
                found: other.shape.clone(),
            });
        }
        self.copy_prefix_from(other);
        Ok(())
    }

    /// Copies the common flat prefix of `other`, casting when types differ.
    pub fn copy_prefix_from(&mut self, other: &ArrayData) {
        let count = self.len().min(other.len());
        if self.ctype == other.ctype {
            let bytes = count * self.elem_size();
            self.buffer.as_mut_slice()[..bytes].copy_from_slice(&other.buffer.as_slice()[..bytes]);
            return;
        }
        for flat in 0..count {
            if let Ok(value) = other.get_flat(flat) {
                self.write_flat(flat, value.cast(self.ctype));
            }
        }
    }

    pub fn try_clone(&self) -> Result<Self, ArrayError> {
        Ok(Self {
            ctype: self.ctype,
            shape: self.shape.clone(),
            buffer: self.buffer.try_clone()?,
        })
    }
}

impl fmt::Debug for ArrayData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayData")
            .field("ctype", &self.ctype)
            .field("shape", &self.shape)
            .finish()
    }
}

/// Shared handle to array storage.
///
/// Clones alias the same buffer. While more than one handle exists the
/// storage counts as pinned and cannot be resized in place.
#[derive(Clone)]
pub struct CArray(Rc<RefCell<ArrayData>>);

impl CArray {
    pub fn new(data: ArrayData) -> Self {
        CArray(Rc::new(RefCell::new(data)))
    }

    pub fn zeros(ctype: CType, shape: &[usize]) -> Result<Self, ArrayError> {
        Ok(Self::new(ArrayData::zeros(ctype, shape)?))
    }

    pub fn from_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Self, ArrayError> {
        Ok(Self::new(ArrayData::from_vec(shape, values)?))
    }

    /// One-dimensional array holding `values`.
    pub fn from_slice<T: Element>(values: &[T]) -> Result<Self, ArrayError> {
        Self::from_vec(&[values.len()], values.to_vec())
    }

    pub fn borrow(&self) -> Ref<'_, ArrayData> {
        self.0.borrow()
    }

    pub fn try_borrow(&self) -> Result<Ref<'_, ArrayData>, ArrayError> {
        self.0.try_borrow().map_err(|_| ArrayError::Borrowed)
    }

    /* Crate only: a mutable `ArrayData` could be replaced wholesale, moving the
     * buffer out from under the pointers installed in a native struct */
    pub(crate) fn try_borrow_mut(&self) -> Result<RefMut<'_, ArrayData>, ArrayError> {
        self.0.try_borrow_mut().map_err(|_| ArrayError::Borrowed)
    }

    /// Runs `f` over the elements in place. Shape and buffer stay fixed, so
    /// any native struct holding this array keeps valid pointers.
    pub fn update<T: Element, R>(&self, f: impl FnOnce(&mut [T]) -> R) -> Result<R, ArrayError> {
        let mut data = self.try_borrow_mut()?;
        Ok(f(data.as_mut_slice::<T>()?))
    }

    pub fn ctype(&self) -> CType {
        self.0.borrow().ctype()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.borrow().shape().to_vec()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: &[usize]) -> Result<Scalar, ArrayError> {
        self.0.borrow().get(index)
    }

    pub fn set(&self, index: &[usize], value: impl Into<Scalar>) -> Result<(), ArrayError> {
        self.try_borrow_mut()?.set(index, value.into())
    }

    pub fn fill(&self, value: impl Into<Scalar>) -> Result<(), ArrayError> {
        self.try_borrow_mut()?.fill(value.into())
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, ArrayError> {
        self.0.borrow().to_vec()
    }

    pub fn to_scalars(&self) -> Vec<Scalar> {
        self.0.borrow().to_scalars()
    }

    pub fn ptr_eq(&self, other: &CArray) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn reference_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn is_shared(&self) -> bool {
        self.reference_count() > 1
    }

    pub fn deep_copy(&self) -> Result<CArray, ArrayError> {
        Ok(CArray::new(self.0.borrow().try_clone()?))
    }
}

impl fmt::Debug for CArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(data) => write!(f, "CArray({}, {:?})", data.ctype(), data.shape()),
            Err(_) => f.write_str("CArray(<borrowed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_indexing() {
        let array = CArray::from_vec(&[2, 3], vec![0i32, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(array.get(&[1, 2]).unwrap(), Scalar::Int(5));
        assert_eq!(array.get(&[0, 1]).unwrap(), Scalar::Int(1));
        assert!(matches!(array.get(&[2, 0]), Err(ArrayError::OutOfBounds { .. })));
        assert!(array.get(&[0]).is_err());
    }

    #[test]
    fn set_and_fill_check_conversion() {
        let array = CArray::zeros(CType::Int, &[4]).unwrap();
        array.fill(7).unwrap();
        assert_eq!(array.to_vec::<i32>().unwrap(), vec![7; 4]);
        array.set(&[2], 9u8).unwrap();
        assert_eq!(array.to_vec::<i32>().unwrap(), vec![7, 7, 9, 7]);
        assert!(array.fill(1.5).is_err());
        assert!(array.to_vec::<f64>().is_err());
    }

    #[test]
    fn prefix_copy_follows_flat_order() {
        let source = ArrayData::from_vec(&[2, 2], vec![1.0f64, 2.0, 3.0, 4.0]).unwrap();
        let mut grown = ArrayData::zeros(CType::Double, &[2, 3]).unwrap();
        grown.copy_prefix_from(&source);
        assert_eq!(grown.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
        let mut shrunk = ArrayData::zeros(CType::Double, &[3]).unwrap();
        shrunk.copy_prefix_from(&source);
        assert_eq!(shrunk.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn update_writes_through_shared_handles() {
        let a = CArray::from_slice(&[1i32, 2, 3]).unwrap();
        let alias = a.clone();
        let before = a.borrow().data_ptr();
        a.update(|values: &mut [i32]| values.iter_mut().for_each(|v| *v *= 10)).unwrap();
        assert_eq!(alias.to_vec::<i32>().unwrap(), vec![10, 20, 30]);
        assert_eq!(a.borrow().data_ptr(), before);
        assert!(a.update(|_: &mut [f64]| ()).is_err());
    }

    #[test]
    fn assign_casts_between_types() {
        let mut target = ArrayData::zeros(CType::Int, &[3]).unwrap();
        let source = ArrayData::from_vec(&[3], vec![1.9f64, -2.2, 3.0]).unwrap();
        target.assign_from(&source).unwrap();
        assert_eq!(target.to_vec::<i32>().unwrap(), vec![1, -2, 3]);
        let wrong = ArrayData::zeros(CType::Int, &[4]).unwrap();
        assert!(target.assign_from(&wrong).is_err());
    }

    #[test]
    fn clones_share_deep_copies_do_not() {
        let a = CArray::from_slice(&[1i32, 2, 3]).unwrap();
        let shared = a.clone();
        let copy = a.deep_copy().unwrap();
        assert!(a.is_shared());
        a.set(&[0], 10).unwrap();
        assert_eq!(shared.get(&[0]).unwrap(), Scalar::Int(10));
        assert_eq!(copy.get(&[0]).unwrap(), Scalar::Int(1));
        assert!(!copy.ptr_eq(&a));
    }

    #[test]
    fn write_while_borrowed_fails() {
        let a = CArray::from_slice(&[1u16, 2]).unwrap();
        let guard = a.borrow();
        assert_eq!(a.set(&[0], 3u16), Err(ArrayError::Borrowed));
        drop(guard);
        assert!(a.set(&[0], 3u16).is_ok());
    }
}
