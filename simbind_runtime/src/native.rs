//! Symbol lookup and native calls.

use crate::errors::{BindError, BindResult};
use crate::scalar::Scalar;
use libffi::middle::{arg, Arg, Cif, CodePtr, Type};
use libloading::{Library, Symbol};
use simbind_types::{CType, ScalarClass};
use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::path::Path;

/// Anything that can map a native symbol name to an address.
pub trait SymbolSource: Send + Sync {
    fn resolve(&self, symbol: &str) -> Option<*const c_void>;

    /// Short description used in logs.
    fn describe(&self) -> String;
}

/// A shared library opened with `libloading`.
pub struct NativeLibrary {
    library: Library,
    path: String,
}

impl NativeLibrary {
    pub fn load(path: impl AsRef<Path>) -> BindResult<Self> {
        let path = path.as_ref();
        /* SAFETY: running library initializers is inherent to loading simulation code */
        let library = unsafe { Library::new(path) }.map_err(|e| BindError::Library {
            library: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { library, path: path.display().to_string() })
    }

    /// Loads `name` (no prefix or extension) from `dir`, or from the
    /// loader's search path when no directory is given.
    pub fn load_by_name(name: &str, dir: Option<&Path>) -> BindResult<Self> {
        let file = Self::platform_lib_name(name);
        match dir {
            Some(dir) => Self::load(dir.join(&file)),
            None => Self::load(&file),
        }
    }

    pub fn platform_lib_name(name: &str) -> String {
        libloading::library_filename(name).to_string_lossy().into_owned()
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl SymbolSource for NativeLibrary {
    fn resolve(&self, symbol: &str) -> Option<*const c_void> {
        let name = CString::new(symbol).ok()?;
        /* SAFETY: the address is only used through a call interface built from the declaration */
        let found: Symbol<'_, *const c_void> =
            unsafe { self.library.get(name.as_bytes_with_nul()) }.ok()?;
        Some(*found)
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

/// Function addresses registered by hand, for code linked into the process.
#[derive(Default)]
pub struct SymbolTable {
    symbols: HashMap<String, SymbolAddr>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, addr: *const c_void) {
        self.symbols.insert(symbol.into(), SymbolAddr(addr));
    }

    pub fn with(mut self, symbol: impl Into<String>, addr: *const c_void) -> Self {
        self.insert(symbol, addr);
        self
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolSource for SymbolTable {
    fn resolve(&self, symbol: &str) -> Option<*const c_void> {
        self.symbols.get(symbol).map(|addr| addr.0)
    }

    fn describe(&self) -> String {
        format!("symbol table ({} entries)", self.symbols.len())
    }
}

/* code addresses are immutable and valid for the life of the image */
#[derive(Debug, Clone, Copy)]
pub(crate) struct SymbolAddr(pub(crate) *const c_void);

unsafe impl Send for SymbolAddr {}
unsafe impl Sync for SymbolAddr {}

/// One resolved concrete function: `int f(T *self, args...)`.
#[derive(Debug, Clone)]
pub(crate) struct NativeFunction {
    pub(crate) symbol: String,
    pub(crate) addr: SymbolAddr,
    pub(crate) arg_types: Vec<CType>,
}

impl NativeFunction {
    /// Calls the function with already converted arguments.
    ///
    /// # Safety
    ///
    /// `this` must point at a live struct with the class layout, and the
    /// symbol must really have the declared signature.
    pub(crate) unsafe fn invoke(&self, this: *mut c_void, args: &[Scalar]) -> i32 {
        let cells: Vec<ArgCell> = self
            .arg_types
            .iter()
            .zip(args)
            .map(|(ctype, value)| ArgCell::new(*ctype, *value))
            .collect();
        let types: Vec<Type> = std::iter::once(Type::pointer())
            .chain(self.arg_types.iter().map(|ctype| ffi_type(*ctype)))
            .collect();
        let cif = Cif::new(types.into_iter(), Type::c_int());

        let mut ffi_args: Vec<Arg> = Vec::with_capacity(cells.len() + 1);
        ffi_args.push(arg(&this));
        ffi_args.extend(cells.iter().map(ArgCell::as_arg));

        /* integer returns are widened to a full register by libffi */
        let raw: usize = unsafe { cif.call(CodePtr::from_ptr(self.addr.0), &ffi_args) };
        raw as i32
    }
}

/* storage for one argument, typed to match its ffi description */
enum ArgCell {
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Wide(WideFloat),
}

#[repr(C, align(16))]
struct WideFloat([u8; 16]);

impl ArgCell {
    fn new(ctype: CType, value: Scalar) -> Self {
        let value = value.cast(ctype);
        match ctype.class() {
            ScalarClass::Float => match ctype {
                CType::Float => ArgCell::F32(value.as_f64() as f32),
                CType::LongDouble if !wide_long_double() => ArgCell::F64(value.as_f64()),
                CType::LongDouble => {
                    let mut bytes = [0u8; 16];
                    value.encode(ctype, &mut bytes[..ctype.size()]);
                    ArgCell::Wide(WideFloat(bytes))
                }
                _ => ArgCell::F64(value.as_f64()),
            },
            ScalarClass::Bool | ScalarClass::Byte => {
                let mut byte = [0u8; 1];
                value.encode(ctype, &mut byte);
                ArgCell::U8(byte[0])
            }
            class => {
                let signed = class == ScalarClass::Signed;
                let raw = match value {
                    Scalar::Int(v) => v,
                    Scalar::UInt(v) => v as i64,
                    other => other.as_f64() as i64,
                };
                match (signed, ctype.size()) {
                    (true, 2) => ArgCell::I16(raw as i16),
                    (false, 2) => ArgCell::U16(raw as u16),
                    (true, 4) => ArgCell::I32(raw as i32),
                    (false, 4) => ArgCell::U32(raw as u32),
                    (true, _) => ArgCell::I64(raw),
                    (false, _) => ArgCell::U64(raw as u64),
                }
            }
        }
    }

    fn as_arg(&self) -> Arg {
        match self {
            ArgCell::U8(v) => arg(v),
            ArgCell::I16(v) => arg(v),
            ArgCell::U16(v) => arg(v),
            ArgCell::I32(v) => arg(v),
            ArgCell::U32(v) => arg(v),
            ArgCell::I64(v) => arg(v),
            ArgCell::U64(v) => arg(v),
            ArgCell::F32(v) => arg(v),
            ArgCell::F64(v) => arg(v),
            ArgCell::Wide(v) => arg(v),
        }
    }
}

/* long double is wider than double on this target */
fn wide_long_double() -> bool {
    CType::LongDouble.size() > CType::Double.size()
}

fn ffi_type(ctype: CType) -> Type {
    match ctype {
        CType::Char | CType::Bool => Type::u8(),
        CType::Short => Type::i16(),
        CType::UShort => Type::u16(),
        CType::Int => Type::c_int(),
        CType::UInt => Type::c_uint(),
        CType::Long => Type::c_long(),
        CType::ULong => Type::c_ulong(),
        CType::LongLong => Type::i64(),
        CType::ULongLong => Type::u64(),
        CType::Float => Type::f32(),
        CType::Double => Type::f64(),
        CType::LongDouble if wide_long_double() => Type::longdouble(),
        CType::LongDouble => Type::f64(),
        CType::SizeT => Type::usize(),
    }
}
