use crate::array::ArrayData;
use simbind_types::ArrayLayout;
use std::ffi::c_void;

/// What native code sees for one array member.
///
/// Flat members get the data pointer itself. Pointer-chain members get a
/// table of row pointers per level, rebuilt whenever the storage moves.
pub(crate) struct NativeView {
    top: *mut c_void,
    /* row pointer tables; boxed so their addresses stay fixed */
    _chain: Vec<Box<[*mut c_void]>>,
}

impl NativeView {
    pub(crate) fn build(layout: ArrayLayout, data: &ArrayData) -> Self {
        let base = data.data_ptr();
        let shape = data.shape();
        let ndim = shape.len();
        if layout == ArrayLayout::Flat || ndim <= 1 {
            return Self { top: base.cast(), _chain: Vec::new() };
        }

        let row_bytes = shape[ndim - 1] * data.elem_size();
        let rows: usize = shape[..ndim - 1].iter().product();
        let bottom: Box<[*mut c_void]> =
            (0..rows).map(|r| base.wrapping_add(r * row_bytes).cast::<c_void>()).collect();
        let mut below = bottom.as_ptr() as *mut *mut c_void;
        let mut chain = vec![bottom];

        for level in (0..ndim - 2).rev() {
            let count: usize = shape[..=level].iter().product();
            let fan = shape[level + 1];
            let table: Box<[*mut c_void]> =
                (0..count).map(|r| below.wrapping_add(r * fan).cast::<c_void>()).collect();
            below = table.as_ptr() as *mut *mut c_void;
            chain.push(table);
        }

        Self { top: below.cast(), _chain: chain }
    }

    pub(crate) fn top(&self) -> *mut c_void {
        self.top
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbind_types::CType;

    #[test]
    fn chain_points_at_rows() {
        let data = ArrayData::from_vec(&[2, 3], vec![0i32, 1, 2, 3, 4, 5]).unwrap();
        let view = NativeView::build(ArrayLayout::Iliffe, &data);
        let rows = view.top() as *const *const i32;
        /* SAFETY: the view and data are alive; shape is 2x3 */
        unsafe {
            assert_eq!(*(*rows.add(1)).add(2), 5);
            assert_eq!(*(*rows.add(0)).add(1), 1);
        }
    }

    #[test]
    fn three_level_chain() {
        let values: Vec<f64> = (0..24).map(|v| v as f64).collect();
        let data = ArrayData::from_vec(&[2, 3, 4], values).unwrap();
        let view = NativeView::build(ArrayLayout::Iliffe, &data);
        let top = view.top() as *const *const *const f64;
        /* SAFETY: as above, shape 2x3x4 */
        unsafe {
            assert_eq!(*(*(*top.add(1)).add(2)).add(3), 23.0);
            assert_eq!(*(*(*top.add(0)).add(1)).add(0), 4.0);
        }
    }

    #[test]
    fn flat_view_is_data_pointer() {
        let data = ArrayData::zeros(CType::Double, &[3, 3]).unwrap();
        let view = NativeView::build(ArrayLayout::Flat, &data);
        assert_eq!(view.top() as *mut u8, data.data_ptr());
    }
}
