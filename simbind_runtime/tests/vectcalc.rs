use simbind_runtime::{
    ArrayError, BindError, CArray, CallArgs, ClassSpec, InPlace, Instance, InstanceState, Overrides, Scalar, SimClass,
    SymbolSource, SymbolTable, Value,
};
use std::ffi::c_void;
use std::os::raw::c_int;
use std::sync::Arc;

const VECT_CALC: &str = r#"
name: VectCalc
func-prefix: vc_
members:
  - num_i = 10
  - int v1[i] = 1
  - int v2[i] = 2
  - int v3[i]
  - int ans
functions:
  - vec_{op | plus, minus, times, divide}()
  - ans subvec_dot(i i1=0, i< i2=num_i)
  - checked(int code)
subsets:
  vec:
    members: [v3]
    funcs: ["vec_{plus, minus, times, divide}"]
    default: true
errors:
  1:
    kind: ZeroDivisionError
    message: "{symbol} divided by zero"
"#;

#[repr(C)]
struct VectCalc {
    num_i: c_int,
    v1: *mut c_int,
    v2: *mut c_int,
    v3: *mut c_int,
    ans: c_int,
}

unsafe fn elementwise(this: *mut VectCalc, op: fn(c_int, c_int) -> Option<c_int>) -> c_int {
    let vc = unsafe { &mut *this };
    for k in 0..vc.num_i as usize {
        let (a, b) = unsafe { (*vc.v1.add(k), *vc.v2.add(k)) };
        match op(a, b) {
            Some(value) => unsafe { *vc.v3.add(k) = value },
            None => return 1,
        }
    }
    0
}

unsafe extern "C" fn vc_vec_plus(this: *mut VectCalc) -> c_int {
    unsafe { elementwise(this, |a, b| Some(a + b)) }
}

unsafe extern "C" fn vc_vec_minus(this: *mut VectCalc) -> c_int {
    unsafe { elementwise(this, |a, b| Some(a - b)) }
}

unsafe extern "C" fn vc_vec_times(this: *mut VectCalc) -> c_int {
    unsafe { elementwise(this, |a, b| Some(a * b)) }
}

unsafe extern "C" fn vc_vec_divide(this: *mut VectCalc) -> c_int {
    unsafe { elementwise(this, |a, b| a.checked_div(b)) }
}

unsafe extern "C" fn vc_subvec_dot(this: *mut VectCalc, i1: c_int, i2: c_int) -> c_int {
    let vc = unsafe { &mut *this };
    let mut sum = 0;
    for k in i1 as usize..i2 as usize {
        sum += unsafe { *vc.v1.add(k) * *vc.v2.add(k) };
    }
    vc.ans = sum;
    0
}

unsafe extern "C" fn vc_checked(_this: *mut VectCalc, code: c_int) -> c_int {
    code
}

fn symbols() -> Arc<dyn SymbolSource> {
    Arc::new(
        SymbolTable::new()
            .with("vc_vec_plus", vc_vec_plus as *const c_void)
            .with("vc_vec_minus", vc_vec_minus as *const c_void)
            .with("vc_vec_times", vc_vec_times as *const c_void)
            .with("vc_vec_divide", vc_vec_divide as *const c_void)
            .with("vc_subvec_dot", vc_subvec_dot as *const c_void)
            .with("vc_checked", vc_checked as *const c_void),
    )
}

fn vect_calc() -> Arc<SimClass> {
    SimClass::from_spec(ClassSpec::from_yaml_str(VECT_CALC).unwrap(), symbols()).unwrap()
}

fn ints(instance: &Instance, name: &str) -> Vec<i32> {
    instance.array(name).unwrap().to_vec::<i32>().unwrap()
}

fn three_element() -> Instance {
    vect_calc()
        .instantiate(
            Overrides::new()
                .set("num_i", 3)
                .set("v1", CArray::from_slice(&[5i32, 5, 5]).unwrap())
                .set("v2", CArray::from_slice(&[2i32, 2, 2]).unwrap()),
        )
        .unwrap()
}

#[test]
fn defaults_fill_arrays() {
    let instance = vect_calc().instantiate(Overrides::new()).unwrap();
    assert_eq!(instance.num("i").unwrap(), 10);
    assert_eq!(ints(&instance, "v1"), vec![1; 10]);
    assert_eq!(ints(&instance, "v2"), vec![2; 10]);
    assert_eq!(ints(&instance, "v3"), vec![0; 10]);
    assert_eq!(instance.scalar("ans").unwrap(), Scalar::Int(0));
    assert_eq!(instance.nums("i").unwrap(), vec![10]);
}

#[test]
fn choice_selects_concrete_function() {
    let mut instance = three_element();
    instance.call("vec", CallArgs::new().named("op", "minus")).unwrap();
    assert_eq!(ints(&instance, "v3"), vec![3, 3, 3]);

    instance.call("vec", CallArgs::new().arg("times")).unwrap();
    assert_eq!(ints(&instance, "v3"), vec![10, 10, 10]);

    /* first choice is the default */
    instance.call("vec", CallArgs::new()).unwrap();
    assert_eq!(ints(&instance, "v3"), vec![7, 7, 7]);

    let err = instance.call("vec", CallArgs::new().named("op", "modulo")).unwrap_err();
    assert!(matches!(err, BindError::InvalidChoice { .. }));
    assert!(err.to_string().contains("plus, minus, times, divide"));
}

#[test]
fn index_arguments_are_bounds_checked() {
    let mut instance = vect_calc().instantiate(Overrides::new()).unwrap();

    let err = instance.call("subvec_dot", CallArgs::new().named("i1", 10)).unwrap_err();
    assert_eq!(err.to_string(), "index i cannot be larger than or equal to num_i=10 where value is i1=10");

    let err = instance.call("subvec_dot", CallArgs::new().named("i2", 11)).unwrap_err();
    assert_eq!(err.to_string(), "index i cannot be larger than or equal to num_i+1=11 where value is i2=11");

    let err = instance.call("subvec_dot", CallArgs::new().named("i2", 0)).unwrap_err();
    assert_eq!(err.to_string(), "index i cannot be less than 1 where value is i2=0");

    let err = instance.call("subvec_dot", CallArgs::new().named("i1", -1)).unwrap_err();
    assert!(matches!(err, BindError::IndexRange { .. }));

    let ans = instance.call("subvec_dot", CallArgs::new().arg(0).arg(10)).unwrap();
    assert_eq!(ans.unwrap().as_scalar(), Some(Scalar::Int(20)));

    /* upper bound equal to num_i is valid */
    let ans = instance.call("subvec_dot", CallArgs::new().named("i1", 9).named("i2", 10)).unwrap();
    assert_eq!(ans.unwrap().as_scalar(), Some(Scalar::Int(2)));
}

#[test]
fn defaults_by_name_read_live_state() {
    let mut instance = vect_calc().instantiate(Overrides::new()).unwrap();
    instance.resize([("i", 4)], InPlace::No).unwrap();
    let ans = instance.call("subvec_dot", CallArgs::new()).unwrap();
    assert_eq!(ans.unwrap().as_scalar(), Some(Scalar::Int(8)));
    assert_eq!(instance.scalar("ans").unwrap(), Scalar::Int(8));
}

#[test]
fn return_codes_map_to_errors() {
    let mut instance = three_element();
    instance.set("v2_1", 0).unwrap();
    let err = instance.call("vec", CallArgs::new().named("op", "divide")).unwrap_err();
    match &err {
        BindError::Native { kind, code, symbol, .. } => {
            assert_eq!(kind, "ZeroDivisionError");
            assert_eq!(*code, 1);
            assert_eq!(symbol, "vec_divide");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.to_string(), "ZeroDivisionError: vec_divide divided by zero");

    let err = instance.call("checked", CallArgs::new().arg(7)).unwrap_err();
    assert_eq!(err.to_string(), "native function 'checked' terminated with code 7");
    assert!(instance.call("checked", CallArgs::new().arg(0)).unwrap().is_none());
}

#[test]
fn malformed_calls_are_rejected() {
    let mut instance = vect_calc().instantiate(Overrides::new()).unwrap();
    let err = instance.call("subvec_dot", CallArgs::new().arg(0).arg(1).arg(2)).unwrap_err();
    assert!(matches!(err, BindError::TooManyArguments { expected: 2, given: 3, .. }));

    let err = instance.call("subvec_dot", CallArgs::new().arg(0).named("i1", 1)).unwrap_err();
    assert!(matches!(err, BindError::MultipleValues { .. }));

    let err = instance.call("subvec_dot", CallArgs::new().named("k", 1)).unwrap_err();
    assert!(matches!(err, BindError::UnrecognizedArgument { .. }));

    let err = instance.call("checked", CallArgs::new()).unwrap_err();
    assert!(matches!(err, BindError::MissingArgument { .. }));

    let err = instance.call("checked", CallArgs::new().arg(1.5)).unwrap_err();
    assert!(matches!(err, BindError::Conversion { .. }));

    let err = instance.call("transpose", CallArgs::new()).unwrap_err();
    assert!(matches!(err, BindError::UnknownFunction { .. }));
}

#[test]
fn subsets_gate_functions_and_storage() {
    let mut instance = vect_calc().instantiate(Overrides::new()).unwrap();
    instance.set_subset_flags([("vec", false)]).unwrap();

    assert!(matches!(instance.get("v3"), Err(BindError::NotAllocated { .. })));
    let err = instance.call("vec", CallArgs::new()).unwrap_err();
    assert_eq!(err.to_string(), "native function 'vec_plus' cannot be called with subset flags {vec: false}");
    assert!(instance.call("subvec_dot", CallArgs::new()).is_ok());

    instance.set_subset_flags([("vec", true)]).unwrap();
    assert_eq!(ints(&instance, "v3"), vec![0; 10]);
    instance.call("vec", CallArgs::new()).unwrap();
    assert_eq!(ints(&instance, "v3"), vec![3; 10]);

    let err = instance.set_subset_flags([("fast", true)]).unwrap_err();
    assert!(matches!(err, BindError::UnknownSubset { .. }));

    let off = vect_calc().instantiate(Overrides::new().subset("vec", false)).unwrap();
    assert!(off.get("v3").is_err());
    assert_eq!(off.subset_flags().get("vec"), Some(false));
}

#[test]
fn resize_keeps_prefix_when_unshared() {
    let mut instance = vect_calc().instantiate(Overrides::new()).unwrap();
    instance.set("v1", CArray::from_vec(&[10], (0..10).collect::<Vec<i32>>()).unwrap()).unwrap();
    instance.resize([("i", 12)], InPlace::No).unwrap();
    assert_eq!(instance.num("i").unwrap(), 12);
    assert_eq!(ints(&instance, "v1"), vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 0]);

    instance.resize([("i", 3)], InPlace::Yes).unwrap();
    assert_eq!(ints(&instance, "v1"), vec![0, 1, 2]);
    assert_eq!(ints(&instance, "v2"), vec![2, 2, 2]);
}

#[test]
fn resize_of_shared_storage_follows_mode() {
    let mut instance = vect_calc().instantiate(Overrides::new()).unwrap();
    let held = instance.array("v1").unwrap();
    held.set(&[0], 42).unwrap();

    let err = instance.resize([("i", 5)], InPlace::Yes).unwrap_err();
    assert!(matches!(err, BindError::ResizeConflict { references: 2, .. }));
    assert_eq!(instance.num("i").unwrap(), 10);

    instance.resize([("i", 12)], InPlace::OrCopy).unwrap();
    let copied = instance.array("v1").unwrap();
    assert!(!copied.ptr_eq(&held));
    assert_eq!(copied.to_vec::<i32>().unwrap()[..3], [42, 1, 1]);
    assert_eq!(copied.len(), 12);
    drop(copied);

    let held = instance.array("v1").unwrap();
    instance.resize([("i", 5)], InPlace::No).unwrap();
    assert_eq!(held.len(), 12);
    assert_eq!(ints(&instance, "v1"), vec![0; 5]);
    assert_eq!(ints(&instance, "v2"), vec![2; 5]);

    let err = instance.resize([("k", 5)], InPlace::No).unwrap_err();
    assert_eq!(err.to_string(), "unknown index names: k; valid names are: i");
}

#[test]
fn assignments_check_shape_consistency() {
    let mut instance = vect_calc().instantiate(Overrides::new()).unwrap();

    let err = instance
        .set_values([("v1", Value::from(CArray::from_slice(&[1i32, 2, 3]).unwrap()))], InPlace::No)
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("num_i is specified inconsistently"));
    assert!(text.contains("v1.shape[0] = 3 (supplied)"));
    assert!(text.contains("self.v2.shape[0] = 10 (stored)"));
    assert_eq!(instance.num("i").unwrap(), 10);
    assert_eq!(ints(&instance, "v1"), vec![1; 10]);
    assert_eq!(ints(&instance, "v2"), vec![2; 10]);

    let err = instance
        .set_values(
            [("num_i", Value::from(5)), ("v1", Value::from(CArray::from_slice(&[1i32, 2, 3]).unwrap()))],
            InPlace::No,
        )
        .unwrap_err();
    assert!(err.to_string().contains("num_i = 5 (requested)"));
    assert_eq!(instance.num("i").unwrap(), 10);
    assert_eq!(ints(&instance, "v1"), vec![1; 10]);

    /* v3 still holds ten elements and takes part in the check */
    let err = instance
        .set_values(
            [
                ("v1", Value::from(CArray::from_slice(&[1i32, 2, 3]).unwrap())),
                ("v2", Value::from(CArray::from_slice(&[4.0f64, 5.0, 6.0]).unwrap())),
            ],
            InPlace::No,
        )
        .unwrap_err();
    assert!(err.to_string().contains("self.v3.shape[0] = 10 (stored)"));
    assert_eq!(ints(&instance, "v2"), vec![2; 10]);

    instance
        .set_values(
            [
                ("num_i", Value::from(3)),
                ("v1", Value::from(CArray::from_slice(&[1i32, 2, 3]).unwrap())),
                ("v2", Value::from(CArray::from_slice(&[4.0f64, 5.0, 6.0]).unwrap())),
            ],
            InPlace::No,
        )
        .unwrap();
    assert_eq!(instance.num("i").unwrap(), 3);
    assert_eq!(ints(&instance, "v2"), vec![4, 5, 6]);
    assert_eq!(instance.array("v3").unwrap().len(), 3);

    let err = instance
        .set("v1", CArray::from_vec(&[1, 3], vec![1i32, 2, 3]).unwrap())
        .unwrap_err();
    assert!(matches!(err, BindError::Array(_)));
}

#[test]
fn rank_errors_name_the_declared_shape() {
    let mut instance = vect_calc().instantiate(Overrides::new().subset("vec", false)).unwrap();
    let err = instance.set("v3", CArray::from_vec(&[1, 3], vec![1i32, 2, 3]).unwrap()).unwrap_err();
    match err {
        BindError::Array(ArrayError::ShapeMismatch { expected, found }) => {
            assert_eq!(expected, vec![10]);
            assert_eq!(found, vec![1, 3]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    let err = instance.set("v3", CArray::from_slice(&[0i32; 10]).unwrap()).unwrap_err();
    assert!(matches!(err, BindError::NotAllocated { .. }));
}

#[test]
fn resize_to_current_size_keeps_storage() {
    let mut instance = three_element();
    let held = instance.array("v1").unwrap();
    instance.resize([("i", 3)], InPlace::Yes).unwrap();
    assert!(instance.array("v1").unwrap().ptr_eq(&held));
    assert_eq!(held.to_vec::<i32>().unwrap(), vec![5, 5, 5]);
    assert_eq!(instance.num("i").unwrap(), 3);
    instance.call("vec", CallArgs::new()).unwrap();
    assert_eq!(ints(&instance, "v3"), vec![7, 7, 7]);
}

#[test]
fn writes_through_handles_reach_native_code() {
    let mut instance = vect_calc().instantiate(Overrides::new()).unwrap();
    let v1 = instance.array("v1").unwrap();
    v1.update(|values: &mut [i32]| {
        for (k, value) in values.iter_mut().enumerate() {
            *value = k as i32;
        }
    })
    .unwrap();
    v1.set(&[0], 100).unwrap();
    instance.call("vec", CallArgs::new()).unwrap();
    assert_eq!(ints(&instance, "v3"), vec![102, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
    assert_eq!(v1.shape(), vec![10]);
}

#[test]
fn scalars_and_fills_are_converted() {
    let mut instance = vect_calc().instantiate(Overrides::new()).unwrap();
    instance.set("v2", 7).unwrap();
    assert_eq!(ints(&instance, "v2"), vec![7; 10]);
    instance.set("num_i", 4).unwrap();
    assert_eq!(instance.array("v1").unwrap().len(), 4);

    assert!(matches!(instance.set("ans", 2.5), Err(BindError::Conversion { .. })));
    assert!(matches!(instance.set("num_i", -1), Err(BindError::Conversion { .. })));
    assert!(matches!(instance.set("ans", CArray::from_slice(&[1i32]).unwrap()), Err(BindError::TypeMismatch { .. })));

    let err = instance.set_values([("bogus", Value::from(1)), ("other", Value::from(2))], InPlace::No).unwrap_err();
    assert_eq!(err.to_string(), "unrecognized arguments: bogus, other");
}

#[test]
fn in_place_adopts_matching_arrays() {
    let class = vect_calc();
    let supplied = CArray::from_vec(&[10], vec![3i32; 10]).unwrap();
    let instance = class
        .instantiate(Overrides::new().set("v1", supplied.clone()).in_place(InPlace::Yes))
        .unwrap();
    assert!(instance.array("v1").unwrap().ptr_eq(&supplied));

    let doubles = CArray::from_vec(&[10], vec![1.5f64; 10]).unwrap();
    let err = class
        .instantiate(Overrides::new().set("v1", doubles.clone()).in_place(InPlace::Yes))
        .unwrap_err();
    assert!(matches!(err, BindError::InPlaceMismatch { .. }));

    let copied = class
        .instantiate(Overrides::new().set("v1", doubles.clone()).in_place(InPlace::OrCopy))
        .unwrap();
    assert!(!copied.array("v1").unwrap().ptr_eq(&doubles));
    assert_eq!(ints(&copied, "v1"), vec![1; 10]);
}

#[test]
fn element_aliases_read_and_write() {
    let mut instance = vect_calc().instantiate(Overrides::new()).unwrap();
    instance.set("v1_3", 7).unwrap();
    assert_eq!(instance.get("v1_3").unwrap().as_scalar(), Some(Scalar::Int(7)));
    assert_eq!(ints(&instance, "v1")[3], 7);

    let err = instance.set("v1_10", 1).unwrap_err();
    assert!(matches!(err, BindError::Array(_)));

    let values = instance.get_many(&["v1_3, v2_0", "ans"]).unwrap();
    assert_eq!(values.len(), 3);
    assert_eq!(values[1].as_scalar(), Some(Scalar::Int(2)));
}

#[test]
fn copies_share_or_own_storage() {
    let mut instance = three_element();
    instance.set("ans", 4).unwrap();

    let mut shallow = instance.shallow_copy().unwrap();
    assert!(shallow.array("v1").unwrap().ptr_eq(&instance.array("v1").unwrap()));
    shallow.set("ans", 9).unwrap();
    assert_eq!(instance.scalar("ans").unwrap(), Scalar::Int(4));

    let mut deep = instance.deep_copy().unwrap();
    assert!(!deep.array("v1").unwrap().ptr_eq(&instance.array("v1").unwrap()));
    deep.call("vec", CallArgs::new().arg("minus")).unwrap();
    assert_eq!(ints(&deep, "v3"), vec![3, 3, 3]);
    assert_eq!(ints(&instance, "v3"), vec![0, 0, 0]);

    shallow.call("vec", CallArgs::new()).unwrap();
    assert_eq!(ints(&instance, "v3"), vec![7, 7, 7]);
}

#[test]
fn native_calls_need_unborrowed_arrays() {
    let mut instance = three_element();
    let held = instance.array("v2").unwrap();
    let guard = held.borrow();
    let err = instance.call("vec", CallArgs::new()).unwrap_err();
    assert!(matches!(err, BindError::ArrayBorrowed { ref member } if member == "v2"));
    drop(guard);
    assert!(instance.call("vec", CallArgs::new()).is_ok());
}

#[test]
fn snapshot_round_trips_through_json() {
    let class = vect_calc();
    let mut instance = class.instantiate(Overrides::new().set("num_i", 4)).unwrap();
    instance.set("v1_2", 9).unwrap();
    instance.set("ans", 5).unwrap();
    instance.set_extra("label", serde_json::json!("run 1")).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vect.json");
    instance.snapshot().unwrap().save(&path).unwrap();

    let restored = Instance::restore(&class, InstanceState::load(&path).unwrap()).unwrap();
    assert_eq!(restored.num("i").unwrap(), 4);
    assert_eq!(ints(&restored, "v1"), vec![1, 1, 9, 1]);
    assert_eq!(restored.scalar("ans").unwrap(), Scalar::Int(5));
    assert_eq!(restored.extra("label"), Some(&serde_json::json!("run 1")));
    assert_eq!(restored.snapshot().unwrap(), instance.snapshot().unwrap());

    let mut state = instance.snapshot().unwrap();
    state.class = "Other".into();
    assert!(matches!(Instance::restore(&class, state), Err(BindError::StateClassMismatch { .. })));
}

#[test]
fn wrappers_delegate_to_generated_method() {
    let spec = ClassSpec::from_yaml_str(VECT_CALC).unwrap();
    let class = SimClass::builder(spec)
        .symbols(symbols())
        .wrap("vec", |instance, mut args, generated| {
            if args.is_empty() {
                args.set_named("op", "times");
            }
            let out = generated(instance, args)?;
            instance.set("ans", 99)?;
            Ok(out)
        })
        .build()
        .unwrap();

    let mut instance = class
        .instantiate(Overrides::new().set("num_i", 2).set("v1", 3).set("v2", 4))
        .unwrap();
    instance.call("vec", CallArgs::new()).unwrap();
    assert_eq!(ints(&instance, "v3"), vec![12, 12]);
    assert_eq!(instance.scalar("ans").unwrap(), Scalar::Int(99));

    instance.call_generated("vec", CallArgs::new()).unwrap();
    assert_eq!(ints(&instance, "v3"), vec![7, 7]);

    let err = SimClass::builder(ClassSpec::from_yaml_str(VECT_CALC).unwrap())
        .symbols(symbols())
        .wrap("transpose", |instance, args, generated| generated(instance, args))
        .build()
        .unwrap_err();
    assert!(matches!(err, BindError::UnknownWrapper { .. }));
}

#[test]
fn binding_reports_missing_symbols_and_sizes() {
    let partial: Arc<dyn SymbolSource> =
        Arc::new(SymbolTable::new().with("vc_vec_plus", vc_vec_plus as *const c_void));
    let err = SimClass::from_spec(ClassSpec::from_yaml_str(VECT_CALC).unwrap(), partial).unwrap_err();
    match err {
        BindError::MissingSymbols { symbols, .. } => {
            assert_eq!(symbols.len(), 5);
            assert!(symbols.contains(&"vc_subvec_dot".to_string()));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let err = SimClass::builder(ClassSpec::from_yaml_str(VECT_CALC).unwrap()).build().unwrap_err();
    assert!(matches!(err, BindError::NoSymbolSource { .. }));

    let sparse = ClassSpec::new("Sparse").members(["num_j", "num_k", "double w[j][k]"]);
    let class = SimClass::builder(sparse).build().unwrap();
    let err = class.instantiate(Overrides::new()).unwrap_err();
    assert_eq!(err.to_string(), "no size given for: num_j, num_k");
    let instance = class.instantiate(Overrides::new().set("num_j", 2).set("num_k", 3)).unwrap();
    assert_eq!(instance.array("w").unwrap().shape(), vec![2, 3]);
}
