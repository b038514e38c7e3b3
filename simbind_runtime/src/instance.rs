use crate::array::{ArrayData, ArrayError, CArray};
use crate::buffer::AlignedBuffer;
use crate::class::SimClass;
use crate::errors::{
    AxisKey, BindError, BindResult, ExtentSource, ShapeConflict, ShapeContributor, ShapeReport,
};
use crate::native::NativeFunction;
use crate::object::NativeObject;
use crate::scalar::{ConversionError, Scalar};
use crate::value::{InPlace, Overrides, Value};
use crate::view::NativeView;
use indexmap::IndexMap;
use simbind_gen::{ClassMetadata, SubsetFlags};
use simbind_types::{ArrayLayout, CType, Extent, MemberDecl};
use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

struct ArraySlot {
    array: CArray,
    _view: NativeView,
}

/// One live simulation object: the native struct plus the storage its
/// pointer members refer to.
pub struct Instance {
    class: Arc<SimClass>,
    raw: AlignedBuffer,
    arrays: IndexMap<String, ArraySlot>,
    objects: IndexMap<String, Rc<dyn NativeObject>>,
    flags: SubsetFlags,
    extras: IndexMap<String, serde_json::Value>,
}

/* Keyword assignments sorted by what they touch, validated before any write */
#[derive(Default)]
struct Assignment {
    counts: IndexMap<String, usize>,
    scalars: Vec<(String, Scalar)>,
    arrays: IndexMap<String, CArray>,
    fills: Vec<(String, Scalar)>,
    elements: Vec<(String, Vec<usize>, Scalar)>,
    objects: Vec<(String, Rc<dyn NativeObject>)>,
}

/* Everything a resize writes, allocated and encoded up front */
struct ResizePlan {
    /* (offset, encoded count) */
    counts: Vec<(usize, Vec<u8>)>,
    members: Vec<PlannedArray>,
    /* Replacement storage for unshared arrays, parallel to `members` */
    storage: Vec<Option<ArrayData>>,
}

struct PlannedArray {
    name: String,
    pointer_offset: usize,
    array: CArray,
    view: NativeView,
}

fn member_ctype(member: &MemberDecl) -> CType {
    member.ctype.unwrap_or(CType::Int)
}

fn expect_scalar(name: &str, value: Value) -> BindResult<Scalar> {
    match value {
        Value::Scalar(scalar) => Ok(scalar),
        other => Err(BindError::TypeMismatch {
            name: name.to_string(),
            expected: "a number",
            found: other.kind_name(),
        }),
    }
}

fn convert(name: &str, value: Scalar, ctype: CType) -> BindResult<Scalar> {
    value.convert(ctype).map_err(|source| BindError::Conversion { name: name.to_string(), source })
}

fn axis_key(extent: &Extent) -> AxisKey {
    match extent {
        Extent::Index(index) => AxisKey::Index(index.clone()),
        Extent::Fixed(n) => AxisKey::Fixed(*n),
    }
}

/* Why `supplied` cannot become the member's storage as is */
fn adoption_mismatch(member: &MemberDecl, supplied: &CArray, shape: &[usize]) -> Option<String> {
    let ctype = member_ctype(member);
    if supplied.ctype() != ctype {
        return Some(format!("element type is {}, expected {ctype}", supplied.ctype()));
    }
    if supplied.shape() != shape {
        return Some(format!("shape is {:?}, expected {shape:?}", supplied.shape()));
    }
    None
}

fn check_element_index(member: &str, index: &[usize], shape: &[usize]) -> BindResult<()> {
    if index.len() == shape.len() && index.iter().zip(shape).all(|(i, n)| i < n) {
        return Ok(());
    }
    debug!(member, ?index, ?shape, "element alias out of bounds");
    Err(ArrayError::OutOfBounds { index: index.to_vec(), shape: shape.to_vec() }.into())
}

impl Assignment {
    fn classify(meta: &ClassMetadata, values: IndexMap<String, Value>) -> BindResult<Self> {
        let mut plan = Assignment::default();
        let mut unknown = Vec::new();
        for (name, value) in values {
            if let Some(member) = meta.member(&name) {
                plan.add_member(member, value)?;
            } else if let Some((member, index)) = meta.element_alias(&name) {
                let scalar = convert(&name, expect_scalar(&name, value)?, member_ctype(member))?;
                plan.elements.push((member.name.clone(), index, scalar));
            } else {
                unknown.push(name);
            }
        }
        if !unknown.is_empty() {
            return Err(BindError::UnrecognizedArgument { names: unknown });
        }
        Ok(plan)
    }

    fn add_member(&mut self, member: &MemberDecl, value: Value) -> BindResult<()> {
        let name = member.name.clone();
        if let Some(index) = member.count_index() {
            let requested = expect_scalar(&name, value)?;
            let ctype = member_ctype(member);
            let size = convert(&name, requested, ctype)?
                .as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| BindError::Conversion {
                    name: name.clone(),
                    source: ConversionError::OutOfRange { value: requested.to_string(), ctype },
                })?;
            self.counts.insert(index.to_string(), size);
        } else if member.is_scalar() {
            let scalar = convert(&name, expect_scalar(&name, value)?, member_ctype(member))?;
            self.scalars.push((name, scalar));
        } else if member.is_array() {
            match value {
                Value::Array(array) => {
                    self.arrays.insert(name, array);
                }
                Value::Scalar(scalar) => {
                    let scalar = convert(&name, scalar, member_ctype(member))?;
                    self.fills.push((name, scalar));
                }
                Value::Object(_) => {
                    return Err(BindError::TypeMismatch { name, expected: "an array or number", found: "object" })
                }
            }
        } else {
            let object = match value {
                Value::Object(object) => object,
                other => {
                    return Err(BindError::TypeMismatch { name, expected: "an object", found: other.kind_name() })
                }
            };
            let expected = member.object_tag().unwrap_or_default();
            if object.layout_tag() != expected {
                return Err(BindError::ObjectTagMismatch {
                    member: name,
                    expected: expected.to_string(),
                    found: object.layout_tag().to_string(),
                });
            }
            self.objects.push((name, object));
        }
        Ok(())
    }
}

impl Instance {
    /// Builds an instance: subset flags, sizes, struct, defaults, arrays,
    /// then the remaining keyword values.
    pub fn new(class: &Arc<SimClass>, overrides: Overrides) -> BindResult<Instance> {
        let class = Arc::clone(class);
        let meta = class.metadata();
        let Overrides { values, subsets, in_place } = overrides;

        let mut flags = meta.subsets.defaults();
        flags
            .set_many(subsets.iter().map(|(name, on)| (name.as_str(), *on)))
            .map_err(|names| BindError::UnknownSubset { names })?;

        let mut plan = Assignment::classify(meta, values)?;

        let mut sizes = IndexMap::new();
        let mut missing = Vec::new();
        for (name, index) in &meta.indices {
            match plan.counts.get(name).copied().or(index.default) {
                Some(size) => {
                    sizes.insert(name.clone(), size);
                }
                None => missing.push(index.count_member.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(BindError::MissingSize { indices: missing });
        }

        let raw = AlignedBuffer::zeroed(meta.layout.size, meta.layout.alignment)?;
        let mut instance = Instance {
            class: Arc::clone(&class),
            raw,
            arrays: IndexMap::new(),
            objects: IndexMap::new(),
            flags,
            extras: IndexMap::new(),
        };

        for (index, size) in &sizes {
            instance.write_count(meta, index, *size)?;
        }
        for member in meta.members.iter().filter(|m| m.is_scalar() && !m.is_count()) {
            if let Some(default) = member.default {
                instance.write_scalar(member, Scalar::from(default))?;
            }
        }

        for member in meta.array_members() {
            if !instance.flags.is_member_allocation_needed(&member.name) {
                continue;
            }
            let shape = instance.shape_with(meta, member, |index| sizes.get(index).copied())?;
            let adopted = match (in_place, plan.arrays.get(&member.name)) {
                (InPlace::No, _) | (_, None) => None,
                (mode, Some(supplied)) => match adoption_mismatch(member, supplied, &shape) {
                    None => Some(supplied.clone()),
                    Some(reason) if mode == InPlace::Yes => {
                        return Err(BindError::InPlaceMismatch { member: member.name.clone(), reason })
                    }
                    Some(_) => None,
                },
            };
            match adopted {
                Some(array) => {
                    plan.arrays.shift_remove(&member.name);
                    instance.install_array(member, array)?;
                }
                None => instance.allocate_array(member, &shape)?,
            }
        }

        instance.apply(plan, InPlace::No)?;
        debug!(class = %meta.name, flags = %instance.flags, "created instance");
        Ok(instance)
    }

    pub fn class(&self) -> &Arc<SimClass> {
        &self.class
    }

    pub fn metadata(&self) -> &ClassMetadata {
        self.class.metadata()
    }

    /// Address of the native struct.
    pub fn struct_ptr(&self) -> *mut c_void {
        self.raw.as_ptr().cast()
    }

    /// Reads a member or element alias.
    ///
    /// Scalars are copied out; arrays and objects are returned as shared
    /// handles, so writes through them are visible to native code.
    pub fn get(&self, name: &str) -> BindResult<Value> {
        let meta = self.class.metadata();
        let Some(member) = meta.member(name) else {
            if let Some((member, index)) = meta.element_alias(name) {
                let slot = self.slot(&member.name)?;
                return Ok(Value::Scalar(slot.array.try_borrow()?.get(&index)?));
            }
            return Err(self.unknown_member(name));
        };
        if member.is_scalar() {
            return Ok(Value::Scalar(self.read_scalar(member)?));
        }
        if member.is_array() {
            return Ok(Value::Array(self.slot(name)?.array.clone()));
        }
        self.objects
            .get(name)
            .map(|object| Value::Object(Rc::clone(object)))
            .ok_or_else(|| BindError::NotAllocated { member: name.to_string() })
    }

    /// Reads several values; each entry may itself be a comma separated list.
    pub fn get_many<S: AsRef<str>>(&self, names: &[S]) -> BindResult<Vec<Value>> {
        names
            .iter()
            .flat_map(|names| names.as_ref().split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| self.get(name))
            .collect()
    }

    pub fn scalar(&self, name: &str) -> BindResult<Scalar> {
        match self.get(name)? {
            Value::Scalar(scalar) => Ok(scalar),
            other => Err(BindError::TypeMismatch {
                name: name.to_string(),
                expected: "a scalar member",
                found: other.kind_name(),
            }),
        }
    }

    pub fn array(&self, name: &str) -> BindResult<CArray> {
        match self.get(name)? {
            Value::Array(array) => Ok(array),
            other => Err(BindError::TypeMismatch {
                name: name.to_string(),
                expected: "an array member",
                found: other.kind_name(),
            }),
        }
    }

    pub fn object(&self, name: &str) -> BindResult<Rc<dyn NativeObject>> {
        match self.get(name)? {
            Value::Object(object) => Ok(object),
            other => Err(BindError::TypeMismatch {
                name: name.to_string(),
                expected: "an object member",
                found: other.kind_name(),
            }),
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> BindResult<()> {
        self.set_values([(name, value.into())], InPlace::No)
    }

    /// Assigns several members at once.
    ///
    /// All values are validated, including shape consistency between the
    /// supplied arrays, stored arrays and requested sizes, before anything is
    /// written. Whole arrays are assigned before element aliases.
    pub fn set_values<I, K>(&mut self, values: I, in_place: InPlace) -> BindResult<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values: IndexMap<String, Value> = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let plan = Assignment::classify(self.class.metadata(), values)?;
        self.apply(plan, in_place)
    }

    /// Current size of one index.
    pub fn num(&self, index: &str) -> BindResult<usize> {
        let meta = self.class.metadata();
        if meta.index(index).is_none() {
            return Err(self.unknown_indices(vec![index.to_string()]));
        }
        self.count(meta, index)
    }

    /// Sizes for a comma separated list of indices, e.g. `"i, j"`.
    pub fn nums(&self, indices: &str) -> BindResult<Vec<usize>> {
        let meta = self.class.metadata();
        let names: Vec<&str> = indices.split(',').map(str::trim).filter(|n| !n.is_empty()).collect();
        let unknown: Vec<String> =
            names.iter().filter(|n| meta.index(n).is_none()).map(|n| n.to_string()).collect();
        if !unknown.is_empty() {
            return Err(self.unknown_indices(unknown));
        }
        names.into_iter().map(|name| self.count(meta, name)).collect()
    }

    /// Changes index sizes and reshapes every allocated array using them.
    ///
    /// Unshared storage is always resized in place, keeping its flat prefix.
    /// Shared storage is replaced by zeros (`No`), replaced by a copy of the
    /// prefix (`OrCopy`) or rejected (`Yes`).
    pub fn resize<I, K>(&mut self, sizes: I, mode: InPlace) -> BindResult<()>
    where
        I: IntoIterator<Item = (K, usize)>,
        K: Into<String>,
    {
        let class = Arc::clone(&self.class);
        let meta = class.metadata();
        let sizes: IndexMap<String, usize> = sizes.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let unknown: Vec<String> = sizes.keys().filter(|k| meta.index(k).is_none()).cloned().collect();
        if !unknown.is_empty() {
            return Err(self.unknown_indices(unknown));
        }
        let plan = self.plan_resize(meta, &sizes, mode, &[])?;
        self.commit_resize(plan)
    }

    pub fn subset_flags(&self) -> &SubsetFlags {
        &self.flags
    }

    /// Switches subsets for this instance, allocating members that became
    /// needed and freeing members no subset requires any more.
    pub fn set_subset_flags<I, K>(&mut self, flags: I) -> BindResult<()>
    where
        I: IntoIterator<Item = (K, bool)>,
        K: AsRef<str>,
    {
        let flags: Vec<(K, bool)> = flags.into_iter().collect();
        self.flags
            .set_many(flags.iter().map(|(name, on)| (name.as_ref(), *on)))
            .map_err(|names| BindError::UnknownSubset { names })?;
        self.sync_allocations()
    }

    /// Copy sharing array storage and objects with `self`; the struct and
    /// scalars are independent.
    pub fn shallow_copy(&self) -> BindResult<Instance> {
        self.duplicate(false)
    }

    /// Copy with its own array storage and duplicated objects.
    pub fn deep_copy(&self) -> BindResult<Instance> {
        self.duplicate(true)
    }

    pub fn extra(&self, name: &str) -> Option<&serde_json::Value> {
        self.extras.get(name)
    }

    pub fn extras(&self) -> &IndexMap<String, serde_json::Value> {
        &self.extras
    }

    /// Attaches a Rust-side attribute that is carried through copies and
    /// snapshots. Member names are reserved.
    pub fn set_extra(&mut self, name: impl Into<String>, value: serde_json::Value) -> BindResult<()> {
        let name = name.into();
        let meta = self.class.metadata();
        if meta.member(&name).is_some() || meta.element_alias(&name).is_some() {
            return Err(BindError::TypeMismatch { name, expected: "an attribute name", found: "member name" });
        }
        self.extras.insert(name, value);
        Ok(())
    }

    pub(crate) fn replace_extras(&mut self, extras: IndexMap<String, serde_json::Value>) {
        self.extras = extras;
    }

    /// Runs a resolved native function on this instance's struct.
    ///
    /// Every array is held mutably borrowed for the duration of the call,
    /// since native code may write through any pointer member.
    pub(crate) fn invoke_native(&mut self, native: &NativeFunction, args: &[Scalar]) -> BindResult<i32> {
        let mut guards = Vec::with_capacity(self.arrays.len());
        for (name, slot) in &self.arrays {
            let guard = slot.array.try_borrow_mut().map_err(|_| BindError::ArrayBorrowed { member: name.clone() })?;
            guards.push(guard);
        }
        /* SAFETY: the struct matches the compiled layout, every pointer member refers to
         * storage owned by this instance, and the symbol was resolved for this signature */
        let code = unsafe { native.invoke(self.struct_ptr(), args) };
        drop(guards);
        trace!(symbol = %native.symbol, code, "native call returned");
        Ok(code)
    }

    fn duplicate(&self, deep: bool) -> BindResult<Instance> {
        let class = Arc::clone(&self.class);
        let meta = class.metadata();
        let mut copy = Instance {
            class: Arc::clone(&class),
            raw: self.raw.try_clone()?,
            arrays: IndexMap::new(),
            objects: IndexMap::new(),
            flags: self.flags.clone(),
            extras: self.extras.clone(),
        };
        for (name, slot) in &self.arrays {
            let member = meta.member(name).ok_or_else(|| self.unknown_member(name))?;
            let array = if deep { slot.array.deep_copy()? } else { slot.array.clone() };
            copy.install_array(member, array)?;
        }
        for (name, object) in &self.objects {
            let object = if deep { object.duplicate()? } else { Rc::clone(object) };
            copy.install_object(name, object)?;
        }
        trace!(class = %meta.name, deep, "copied instance");
        Ok(copy)
    }

    fn apply(&mut self, plan: Assignment, in_place: InPlace) -> BindResult<()> {
        let class = Arc::clone(&self.class);
        let meta = class.metadata();

        /* rank comes from the declaration, so this holds for unallocated members too */
        for (name, supplied) in &plan.arrays {
            let member = meta.member(name).ok_or_else(|| self.unknown_member(name))?;
            let found = supplied.try_borrow()?.shape().to_vec();
            if found.len() != member.ndim() {
                let expected = self.shape_with(meta, member, |_| None)?;
                return Err(ArrayError::ShapeMismatch { expected, found }.into());
            }
        }

        let touched = plan
            .arrays
            .keys()
            .chain(plan.fills.iter().map(|(name, _)| name))
            .chain(plan.elements.iter().map(|(name, _, _)| name));
        for name in touched {
            let slot = self.slot(name)?;
            drop(slot.array.try_borrow_mut().map_err(|_| BindError::ArrayBorrowed { member: name.clone() })?);
        }

        let sizes = self.resolve_sizes(meta, &plan)?;

        let mut adopt = Vec::new();
        if in_place != InPlace::No {
            for (name, supplied) in &plan.arrays {
                let member = meta.member(name).ok_or_else(|| self.unknown_member(name))?;
                let shape = self.shape_with(meta, member, |index| sizes.get(index).copied())?;
                match adoption_mismatch(member, supplied, &shape) {
                    None => adopt.push(name.clone()),
                    Some(reason) if in_place == InPlace::Yes => {
                        return Err(BindError::InPlaceMismatch { member: name.clone(), reason })
                    }
                    Some(_) => {}
                }
            }
        }

        for (name, index, _) in &plan.elements {
            let member = meta.member(name).ok_or_else(|| self.unknown_member(name))?;
            let shape = self.shape_with(meta, member, |index| sizes.get(index).copied())?;
            check_element_index(name, index, &shape)?;
        }

        let resize = self.plan_resize(meta, &sizes, in_place, &adopt)?;
        self.commit_resize(resize)?;

        for (name, supplied) in plan.arrays {
            let member = meta.member(&name).ok_or_else(|| self.unknown_member(&name))?;
            if adopt.contains(&name) {
                self.install_array(member, supplied)?;
                continue;
            }
            let slot = self.slot(&name)?;
            if slot.array.ptr_eq(&supplied) {
                continue;
            }
            let source = supplied.try_borrow()?;
            slot.array.try_borrow_mut()?.assign_from(&source)?;
        }
        for (name, value) in plan.fills {
            self.slot(&name)?.array.try_borrow_mut()?.fill(value)?;
        }
        for (name, index, value) in plan.elements {
            self.slot(&name)?.array.try_borrow_mut()?.set(&index, value)?;
        }
        for (name, value) in plan.scalars {
            let member = meta.member(&name).ok_or_else(|| self.unknown_member(&name))?;
            self.write_scalar(member, value)?;
        }
        for (name, object) in plan.objects {
            self.install_object(&name, object)?;
        }
        Ok(())
    }

    /* Index sizes implied by one assignment, or a report of every disagreement */
    fn resolve_sizes(&self, meta: &ClassMetadata, plan: &Assignment) -> BindResult<IndexMap<String, usize>> {
        let mut observed: IndexMap<AxisKey, Vec<ShapeContributor>> = IndexMap::new();

        for (name, array) in &plan.arrays {
            let member = meta.member(name).ok_or_else(|| self.unknown_member(name))?;
            let shape = array.shape();
            for (axis, extent) in member.extents().iter().enumerate() {
                observed.entry(axis_key(extent)).or_default().push(ShapeContributor {
                    member: name.clone(),
                    axis,
                    extent: shape[axis],
                    source: ExtentSource::Supplied,
                });
            }
        }
        for (index, size) in &plan.counts {
            observed.entry(AxisKey::Index(index.clone())).or_default().push(ShapeContributor {
                member: ClassMetadata::count_member_name(index),
                axis: 0,
                extent: *size,
                source: ExtentSource::Requested,
            });
        }
        for (name, slot) in &self.arrays {
            if plan.arrays.contains_key(name) {
                continue;
            }
            let Some(member) = meta.member(name) else { continue };
            let shape = slot.array.shape();
            for (axis, extent) in member.extents().iter().enumerate() {
                let Extent::Index(index) = extent else { continue };
                if plan.counts.contains_key(index) {
                    continue;
                }
                if let Some(contributors) = observed.get_mut(&AxisKey::Index(index.clone())) {
                    contributors.push(ShapeContributor {
                        member: name.clone(),
                        axis,
                        extent: shape[axis],
                        source: ExtentSource::Stored,
                    });
                }
            }
        }

        let mut conflicts = Vec::new();
        let mut sizes = IndexMap::new();
        for (axis, contributors) in observed {
            let first = contributors[0].extent;
            let consistent = match &axis {
                AxisKey::Fixed(n) => contributors.iter().all(|c| c.extent == *n),
                AxisKey::Index(_) => contributors.iter().all(|c| c.extent == first),
            };
            if !consistent {
                conflicts.push(ShapeConflict { axis, contributors });
                continue;
            }
            if let AxisKey::Index(index) = axis {
                sizes.insert(index, first);
            }
        }
        if !conflicts.is_empty() {
            return Err(BindError::ShapeConsistency(ShapeReport { conflicts }));
        }
        Ok(sizes)
    }

    /* Allocates and copies every reshaped array without touching `self`; a failure
     * here leaves counts, storage and pointers as they were */
    fn plan_resize(
        &self,
        meta: &ClassMetadata,
        sizes: &IndexMap<String, usize>,
        mode: InPlace,
        skip: &[String],
    ) -> BindResult<ResizePlan> {
        let mut changed = Vec::new();
        let mut counts = Vec::new();
        for (index, size) in sizes {
            if self.count(meta, index)? == *size {
                continue;
            }
            let count_member = self.count_member(meta, index)?;
            let ctype = member_ctype(count_member);
            let value = convert(&count_member.name, Scalar::from(*size), ctype)?;
            let (offset, width) = self.field_span(&count_member.name)?;
            let mut bytes = vec![0u8; width];
            value.encode(ctype, &mut bytes);
            counts.push((offset, bytes));
            changed.push((index.as_str(), *size));
        }

        let mut members = Vec::new();
        let mut storage = Vec::new();
        for (name, slot) in &self.arrays {
            if skip.contains(name) {
                continue;
            }
            let Some(member) = meta.member(name) else { continue };
            if !member.index_names().any(|index| changed.iter().any(|(c, _)| *c == index)) {
                continue;
            }
            let shape = self.shape_with(meta, member, |index| {
                changed.iter().find(|(c, _)| *c == index).map(|(_, size)| *size)
            })?;
            let ctype = member_ctype(member);
            let layout = member.layout().unwrap_or(ArrayLayout::Iliffe);
            let (pointer_offset, _) = self.field_span(name)?;

            let (array, data, view) = if !slot.array.is_shared() {
                /* same handle, new buffer holding the old flat prefix */
                let mut data = ArrayData::zeros(ctype, &shape)?;
                data.copy_prefix_from(&*slot.array.try_borrow()?);
                drop(slot.array.try_borrow_mut().map_err(|_| BindError::ArrayBorrowed { member: name.clone() })?);
                let view = NativeView::build(layout, &data);
                (slot.array.clone(), Some(data), view)
            } else {
                let fresh = match mode {
                    InPlace::Yes => {
                        return Err(BindError::ResizeConflict {
                            member: name.clone(),
                            references: slot.array.reference_count(),
                        })
                    }
                    InPlace::No => CArray::zeros(ctype, &shape)?,
                    InPlace::OrCopy => {
                        let mut data = ArrayData::zeros(ctype, &shape)?;
                        data.copy_prefix_from(&*slot.array.try_borrow()?);
                        CArray::new(data)
                    }
                };
                let view = NativeView::build(layout, &*fresh.try_borrow()?);
                (fresh, None, view)
            };
            trace!(member = %name, ?shape, refill = data.is_some(), "planned resize");
            members.push(PlannedArray { name: name.clone(), pointer_offset, array, view });
            storage.push(data);
        }
        Ok(ResizePlan { counts, members, storage })
    }

    fn commit_resize(&mut self, plan: ResizePlan) -> BindResult<()> {
        let ResizePlan { counts, members, storage } = plan;

        /* the only fallible step, taken before anything is written */
        let mut guards = Vec::with_capacity(members.len());
        for (planned, data) in members.iter().zip(&storage) {
            let guard = match data {
                Some(_) => Some(
                    planned
                        .array
                        .try_borrow_mut()
                        .map_err(|_| BindError::ArrayBorrowed { member: planned.name.clone() })?,
                ),
                None => None,
            };
            guards.push(guard);
        }

        for (guard, data) in guards.into_iter().zip(storage) {
            if let (Some(mut guard), Some(data)) = (guard, data) {
                *guard = data;
            }
        }
        for (offset, bytes) in counts {
            self.raw.as_mut_slice()[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }
        for planned in members {
            self.poke_pointer(planned.pointer_offset, planned.view.top());
            self.arrays.insert(planned.name, ArraySlot { array: planned.array, _view: planned.view });
        }
        Ok(())
    }

    fn sync_allocations(&mut self) -> BindResult<()> {
        let class = Arc::clone(&self.class);
        let meta = class.metadata();
        for member in meta.array_members() {
            let needed = self.flags.is_member_allocation_needed(&member.name);
            let allocated = self.arrays.contains_key(&member.name);
            if needed && !allocated {
                let shape = self.shape_with(meta, member, |_| None)?;
                self.allocate_array(member, &shape)?;
            } else if !needed && allocated {
                self.arrays.shift_remove(&member.name);
                self.write_pointer(&member.name, std::ptr::null_mut())?;
                debug!(member = %member.name, "released array");
            }
        }
        Ok(())
    }

    /* Shape of `member`, taking index sizes from `size` and falling back to stored counts */
    fn shape_with(
        &self,
        meta: &ClassMetadata,
        member: &MemberDecl,
        size: impl Fn(&str) -> Option<usize>,
    ) -> BindResult<Vec<usize>> {
        member
            .extents()
            .iter()
            .map(|extent| match extent {
                Extent::Fixed(n) => Ok(*n),
                Extent::Index(index) => match size(index) {
                    Some(n) => Ok(n),
                    None => self.count(meta, index),
                },
            })
            .collect()
    }

    fn allocate_array(&mut self, member: &MemberDecl, shape: &[usize]) -> BindResult<()> {
        let array = CArray::zeros(member_ctype(member), shape)?;
        if let Some(default) = member.default {
            array.fill(Scalar::from(default))?;
        }
        self.install_array(member, array)
    }

    fn install_array(&mut self, member: &MemberDecl, array: CArray) -> BindResult<()> {
        let layout = member.layout().unwrap_or(ArrayLayout::Iliffe);
        let view = NativeView::build(layout, &*array.try_borrow()?);
        self.write_pointer(&member.name, view.top())?;
        self.arrays.insert(member.name.clone(), ArraySlot { array, _view: view });
        Ok(())
    }

    fn install_object(&mut self, name: &str, object: Rc<dyn NativeObject>) -> BindResult<()> {
        self.write_pointer(name, object.native_handle())?;
        self.objects.insert(name.to_string(), object);
        Ok(())
    }

    fn slot(&self, name: &str) -> BindResult<&ArraySlot> {
        self.arrays.get(name).ok_or_else(|| BindError::NotAllocated { member: name.to_string() })
    }

    fn count_member<'m>(&self, meta: &'m ClassMetadata, index: &str) -> BindResult<&'m MemberDecl> {
        let name = ClassMetadata::count_member_name(index);
        meta.member(&name).ok_or_else(|| self.unknown_member(&name))
    }

    fn count(&self, meta: &ClassMetadata, index: &str) -> BindResult<usize> {
        let value = self.read_scalar(self.count_member(meta, index)?)?;
        Ok(value.as_i64().and_then(|n| usize::try_from(n).ok()).unwrap_or(0))
    }

    fn write_count(&mut self, meta: &ClassMetadata, index: &str, size: usize) -> BindResult<()> {
        let member = self.count_member(meta, index)?;
        self.write_scalar(member, Scalar::from(size))
    }

    fn field_span(&self, name: &str) -> BindResult<(usize, usize)> {
        self.class
            .metadata()
            .layout
            .field(name)
            .map(|field| (field.offset, field.size))
            .ok_or_else(|| self.unknown_member(name))
    }

    fn read_scalar(&self, member: &MemberDecl) -> BindResult<Scalar> {
        let (offset, size) = self.field_span(&member.name)?;
        Ok(Scalar::decode(member_ctype(member), &self.raw.as_slice()[offset..offset + size]))
    }

    fn write_scalar(&mut self, member: &MemberDecl, value: Scalar) -> BindResult<()> {
        let ctype = member_ctype(member);
        let value = convert(&member.name, value, ctype)?;
        let (offset, size) = self.field_span(&member.name)?;
        value.encode(ctype, &mut self.raw.as_mut_slice()[offset..offset + size]);
        Ok(())
    }

    fn write_pointer(&mut self, name: &str, ptr: *mut c_void) -> BindResult<()> {
        let (offset, _) = self.field_span(name)?;
        self.poke_pointer(offset, ptr);
        Ok(())
    }

    fn poke_pointer(&mut self, offset: usize, ptr: *mut c_void) {
        let bytes = (ptr as usize).to_ne_bytes();
        self.raw.as_mut_slice()[offset..offset + bytes.len()].copy_from_slice(&bytes);
    }

    fn unknown_member(&self, name: &str) -> BindError {
        BindError::UnknownMember { name: name.to_string(), class: self.class.name().to_string() }
    }

    fn unknown_indices(&self, names: Vec<String>) -> BindError {
        BindError::UnknownIndex { names, valid: self.class.metadata().indices.keys().cloned().collect() }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.class.metadata();
        let mut out = f.debug_struct(&meta.name);
        for member in &meta.members {
            match self.get(&member.name) {
                Ok(Value::Scalar(scalar)) => out.field(&member.name, &scalar),
                Ok(Value::Array(array)) => out.field(&member.name, &array.shape()),
                Ok(Value::Object(object)) => out.field(&member.name, &object.layout_tag()),
                Err(_) => out.field(&member.name, &"<unallocated>"),
            };
        }
        out.finish()
    }
}

/* an instance can itself be the target of another class's object member */
impl NativeObject for Instance {
    fn layout_tag(&self) -> &str {
        self.class.name()
    }

    fn native_handle(&self) -> *mut c_void {
        self.struct_ptr()
    }

    fn duplicate(&self) -> BindResult<Rc<dyn NativeObject>> {
        Ok(Rc::new(self.deep_copy()?))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
