use crate::errors::BindResult;
use std::any::Any;
use std::ffi::c_void;
use std::rc::Rc;

/// Another native object an instance can point at through an object member.
///
/// The tag must equal the tag declared for the member. `duplicate` backs
/// deep copies of the owning instance.
pub trait NativeObject: Any {
    fn layout_tag(&self) -> &str;

    /// Address stored in the owning struct's handle field.
    fn native_handle(&self) -> *mut c_void;

    fn duplicate(&self) -> BindResult<Rc<dyn NativeObject>>;

    fn as_any(&self) -> &dyn Any;
}
