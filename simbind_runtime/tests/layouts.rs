use simbind_runtime::{
    ArrayError, BindError, CallArgs, ClassSpec, Instance, NativeObject, Overrides, Scalar, SimClass, SymbolTable,
};
use std::ffi::c_void;
use std::os::raw::c_int;
use std::rc::Rc;
use std::sync::Arc;

#[repr(C)]
struct Grid {
    num_x: c_int,
    num_y: c_int,
    rows: *mut *mut f64,
    flat: *mut f64,
    total: f64,
}

unsafe extern "C" fn grid_fill(this: *mut Grid, scale: f64) -> c_int {
    let grid = unsafe { &mut *this };
    let (nx, ny) = (grid.num_x as usize, grid.num_y as usize);
    let mut total = 0.0;
    for i in 0..nx {
        for j in 0..ny {
            let value = scale * (10 * i + j) as f64;
            unsafe {
                *(*grid.rows.add(i)).add(j) = value;
                *grid.flat.add(i * ny + j) = value;
            }
            total += value;
        }
    }
    grid.total = total;
    0
}

fn grid_class() -> Arc<SimClass> {
    let spec = ClassSpec::new("Grid")
        .func_prefix("grid_")
        .members(["num_x = 2", "num_y = 3", "double rows[x][y]", "double flat[x, y]", "double total"])
        .function("total fill(double scale = 1.0)");
    let table = SymbolTable::new().with("grid_fill", grid_fill as *const c_void);
    SimClass::from_spec(spec, Arc::new(table)).unwrap()
}

#[test]
fn pointer_chain_and_flat_arrays_share_indexing() {
    let mut grid = grid_class().instantiate(Overrides::new()).unwrap();
    let total = grid.call("fill", CallArgs::new()).unwrap().unwrap();
    assert_eq!(total.as_scalar(), Some(Scalar::Float(36.0)));

    let rows = grid.array("rows").unwrap();
    let flat = grid.array("flat").unwrap();
    assert_eq!(rows.shape(), vec![2, 3]);
    assert_eq!(rows.get(&[1, 2]).unwrap(), Scalar::Float(12.0));
    assert_eq!(flat.get(&[1, 2]).unwrap(), Scalar::Float(12.0));
    assert_eq!(rows.to_vec::<f64>().unwrap(), flat.to_vec::<f64>().unwrap());
    assert_eq!(grid.get("rows_0_1").unwrap().as_scalar(), Some(Scalar::Float(1.0)));
}

#[test]
fn views_follow_resized_storage() {
    let mut grid = grid_class().instantiate(Overrides::new()).unwrap();
    grid.resize([("x", 4), ("y", 5)], Default::default()).unwrap();
    grid.call("fill", CallArgs::new().arg(2.0)).unwrap();
    assert_eq!(grid.nums("x, y").unwrap(), vec![4, 5]);
    assert_eq!(grid.array("rows").unwrap().get(&[3, 4]).unwrap(), Scalar::Float(68.0));
    assert_eq!(grid.array("flat").unwrap().get(&[3, 4]).unwrap(), Scalar::Float(68.0));
}

#[repr(C)]
struct Inner {
    value: f64,
}

#[repr(C)]
struct Outer {
    scaled: f64,
    inner: *mut Inner,
}

unsafe extern "C" fn outer_scale(this: *mut Outer, k: f64) -> c_int {
    let outer = unsafe { &mut *this };
    if outer.inner.is_null() {
        return 2;
    }
    outer.scaled = unsafe { (*outer.inner).value } * k;
    0
}

fn outer_class() -> Arc<SimClass> {
    let spec = ClassSpec::new("Outer")
        .member("double scaled")
        .object_member("inner", "Inner")
        .function("scaled scale(double k)");
    let table = SymbolTable::new().with("Outer_scale", outer_scale as *const c_void);
    SimClass::from_spec(spec, Arc::new(table)).unwrap()
}

fn inner_object(value: f64) -> Rc<dyn NativeObject> {
    let class = SimClass::builder(ClassSpec::new("Inner").member("double value")).build().unwrap();
    let inner = class.instantiate(Overrides::new().set("value", value)).unwrap();
    Rc::new(inner)
}

#[test]
fn object_members_pass_native_handles() {
    let class = outer_class();
    let mut outer = class.instantiate(Overrides::new().set("inner", inner_object(2.5))).unwrap();
    let scaled = outer.call("scale", CallArgs::new().arg(4)).unwrap().unwrap();
    assert_eq!(scaled.as_scalar(), Some(Scalar::Float(10.0)));

    let inner = outer.object("inner").unwrap();
    let inner = inner.as_any().downcast_ref::<Instance>().unwrap();
    assert_eq!(inner.scalar("value").unwrap(), Scalar::Float(2.5));

    let mut copy = outer.deep_copy().unwrap();
    assert!(!Rc::ptr_eq(&copy.object("inner").unwrap(), &outer.object("inner").unwrap()));
    assert!(copy.call("scale", CallArgs::new().arg(1)).is_ok());

    let mut empty = class.instantiate(Overrides::new()).unwrap();
    assert!(matches!(empty.get("inner"), Err(BindError::NotAllocated { .. })));
    let err = empty.call("scale", CallArgs::new().arg(1)).unwrap_err();
    assert!(matches!(err, BindError::NativeCallFailure { code: 2, .. }));
}

#[test]
fn object_tags_must_match() {
    let class = outer_class();
    let wrong: Rc<dyn NativeObject> = Rc::new(class.instantiate(Overrides::new()).unwrap());
    let err = class.instantiate(Overrides::new().set("inner", wrong)).unwrap_err();
    assert_eq!(err.to_string(), "object member 'inner' expects tag 'Inner', got 'Outer'");

    let mut outer = class.instantiate(Overrides::new()).unwrap();
    let err = outer.set("inner", 3).unwrap_err();
    assert!(matches!(err, BindError::TypeMismatch { .. }));
}

#[repr(C)]
struct Square {
    num_i: c_int,
    m: *mut *mut f64,
    total: f64,
}

unsafe extern "C" fn square_sum(this: *mut Square) -> c_int {
    let square = unsafe { &mut *this };
    let n = square.num_i as usize;
    let mut total = 0.0;
    for r in 0..n {
        for c in 0..n {
            total += unsafe { *(*square.m.add(r)).add(c) };
        }
    }
    square.total = total;
    0
}

fn square_class() -> Arc<SimClass> {
    let spec = ClassSpec::new("Square")
        .members(["num_i = 2", "double m[i][i]", "double total"])
        .function("total sum()");
    let table = SymbolTable::new().with("Square_sum", square_sum as *const c_void);
    SimClass::from_spec(spec, Arc::new(table)).unwrap()
}

#[test]
fn failed_resize_changes_nothing() {
    let mut square = square_class().instantiate(Overrides::new()).unwrap();
    square.array("m").unwrap().fill(1.5).unwrap();

    let err = square.resize([("i", 2_000_000_000)], Default::default()).unwrap_err();
    assert!(matches!(err, BindError::Array(ArrayError::TooLarge { .. })));
    assert_eq!(square.num("i").unwrap(), 2);
    assert_eq!(square.array("m").unwrap().shape(), vec![2, 2]);
    let total = square.call("sum", CallArgs::new()).unwrap().unwrap();
    assert_eq!(total.as_scalar(), Some(Scalar::Float(6.0)));

    square.resize([("i", 3)], Default::default()).unwrap();
    let total = square.call("sum", CallArgs::new()).unwrap().unwrap();
    assert_eq!(total.as_scalar(), Some(Scalar::Float(6.0)));
}

#[test]
fn handle_writes_keep_native_pointers_valid() {
    let mut square = square_class().instantiate(Overrides::new()).unwrap();
    let m = square.array("m").unwrap();
    m.update(|values: &mut [f64]| values.copy_from_slice(&[1.0, 2.0, 3.0, 4.0])).unwrap();
    let total = square.call("sum", CallArgs::new()).unwrap().unwrap();
    assert_eq!(total.as_scalar(), Some(Scalar::Float(10.0)));

    /* the held handle pins the old storage; the struct follows the new one */
    square.resize([("i", 3)], Default::default()).unwrap();
    assert_eq!(m.shape(), vec![2, 2]);
    square.array("m").unwrap().fill(1.0).unwrap();
    m.fill(100.0).unwrap();
    let total = square.call("sum", CallArgs::new()).unwrap().unwrap();
    assert_eq!(total.as_scalar(), Some(Scalar::Float(9.0)));
}
