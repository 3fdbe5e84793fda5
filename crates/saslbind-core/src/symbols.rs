//! Required SASL entry points and the all-or-nothing resolver.

use std::ffi::{CStr, c_int, c_void};
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

use crate::abi::{
    SaslClientInitFn, SaslClientNewFn, SaslClientStartFn, SaslClientStepFn, SaslDisposeFn,
    SaslErrDetailFn, SaslErrStringFn, SaslGetPropFn, SaslListMechFn,
};
use crate::dl::LoadedLibrary;

/// Number of entry points the handshake needs.
pub const SYMBOL_COUNT: usize = 9;

/// Destination slot in a [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    ClientInit,
    ClientNew,
    ClientStart,
    ClientStep,
    Dispose,
    ErrDetail,
    ErrString,
    GetProp,
    ListMech,
}

impl Slot {
    pub const ALL: [Slot; SYMBOL_COUNT] = [
        Slot::ClientInit,
        Slot::ClientNew,
        Slot::ClientStart,
        Slot::ClientStep,
        Slot::Dispose,
        Slot::ErrDetail,
        Slot::ErrString,
        Slot::GetProp,
        Slot::ListMech,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// C symbol name exported by `libsasl2` for this slot.
    pub fn symbol_name(self) -> &'static str {
        match self {
            Slot::ClientInit => "sasl_client_init",
            Slot::ClientNew => "sasl_client_new",
            Slot::ClientStart => "sasl_client_start",
            Slot::ClientStep => "sasl_client_step",
            Slot::Dispose => "sasl_dispose",
            Slot::ErrDetail => "sasl_errdetail",
            Slot::ErrString => "sasl_errstring",
            Slot::GetProp => "sasl_getprop",
            Slot::ListMech => "sasl_listmech",
        }
    }
}

/// One row of a binding table: look up `name`, store it in `slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolSpec {
    pub name: &'static str,
    pub slot: Slot,
}

impl SymbolSpec {
    pub const fn new(name: &'static str, slot: Slot) -> Self {
        Self { name, slot }
    }
}

/// Entry points bound by [`SaslLibrary::resolve`](crate::SaslLibrary::resolve),
/// in lookup order.
pub const REQUIRED_SYMBOLS: [SymbolSpec; SYMBOL_COUNT] = [
    SymbolSpec::new("sasl_client_init", Slot::ClientInit),
    SymbolSpec::new("sasl_client_new", Slot::ClientNew),
    SymbolSpec::new("sasl_client_start", Slot::ClientStart),
    SymbolSpec::new("sasl_client_step", Slot::ClientStep),
    SymbolSpec::new("sasl_dispose", Slot::Dispose),
    SymbolSpec::new("sasl_errdetail", Slot::ErrDetail),
    SymbolSpec::new("sasl_errstring", Slot::ErrString),
    SymbolSpec::new("sasl_getprop", Slot::GetProp),
    SymbolSpec::new("sasl_listmech", Slot::ListMech),
];

/// First symbol a resolution attempt could not bind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{detail}")]
pub struct SymbolError {
    pub symbol: &'static str,
    pub detail: String,
}

/// Fully bound SASL client API.
///
/// A table only exists with every slot bound. The pointers stay valid while
/// the library they came from is open; [`SaslLibrary`](crate::SaslLibrary)
/// hands out the table by reference so it cannot outlive the handle.
pub struct SymbolTable {
    sasl_client_init: SaslClientInitFn,
    sasl_client_new: SaslClientNewFn,
    sasl_client_start: SaslClientStartFn,
    sasl_client_step: SaslClientStepFn,
    sasl_dispose: SaslDisposeFn,
    sasl_errdetail: SaslErrDetailFn,
    sasl_errstring: SaslErrStringFn,
    sasl_getprop: SaslGetPropFn,
    sasl_listmech: SaslListMechFn,
}

// Shared read-only across threads once bound.
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SymbolTable>();
};

impl SymbolTable {
    fn from_slots(slots: [Option<NonNull<c_void>>; SYMBOL_COUNT]) -> Result<Self, SymbolError> {
        let bound = |slot: Slot| {
            slots[slot.index()].ok_or_else(|| SymbolError {
                symbol: slot.symbol_name(),
                detail: format!("No binding for symbol \"{}\"", slot.symbol_name()),
            })
        };

        // SAFETY: every address was exported under the name of the C function
        // whose prototype the field type mirrors.
        unsafe {
            Ok(Self {
                sasl_client_init: bind(bound(Slot::ClientInit)?),
                sasl_client_new: bind(bound(Slot::ClientNew)?),
                sasl_client_start: bind(bound(Slot::ClientStart)?),
                sasl_client_step: bind(bound(Slot::ClientStep)?),
                sasl_dispose: bind(bound(Slot::Dispose)?),
                sasl_errdetail: bind(bound(Slot::ErrDetail)?),
                sasl_errstring: bind(bound(Slot::ErrString)?),
                sasl_getprop: bind(bound(Slot::GetProp)?),
                sasl_listmech: bind(bound(Slot::ListMech)?),
            })
        }
    }

    pub fn sasl_client_init(&self) -> SaslClientInitFn {
        self.sasl_client_init
    }

    pub fn sasl_client_new(&self) -> SaslClientNewFn {
        self.sasl_client_new
    }

    pub fn sasl_client_start(&self) -> SaslClientStartFn {
        self.sasl_client_start
    }

    pub fn sasl_client_step(&self) -> SaslClientStepFn {
        self.sasl_client_step
    }

    pub fn sasl_dispose(&self) -> SaslDisposeFn {
        self.sasl_dispose
    }

    pub fn sasl_errdetail(&self) -> SaslErrDetailFn {
        self.sasl_errdetail
    }

    pub fn sasl_errstring(&self) -> SaslErrStringFn {
        self.sasl_errstring
    }

    pub fn sasl_getprop(&self) -> SaslGetPropFn {
        self.sasl_getprop
    }

    pub fn sasl_listmech(&self) -> SaslListMechFn {
        self.sasl_listmech
    }

    /// Raw address bound to `slot`.
    pub fn address(&self, slot: Slot) -> *const c_void {
        match slot {
            Slot::ClientInit => self.sasl_client_init as *const c_void,
            Slot::ClientNew => self.sasl_client_new as *const c_void,
            Slot::ClientStart => self.sasl_client_start as *const c_void,
            Slot::ClientStep => self.sasl_client_step as *const c_void,
            Slot::Dispose => self.sasl_dispose as *const c_void,
            Slot::ErrDetail => self.sasl_errdetail as *const c_void,
            Slot::ErrString => self.sasl_errstring as *const c_void,
            Slot::GetProp => self.sasl_getprop as *const c_void,
            Slot::ListMech => self.sasl_listmech as *const c_void,
        }
    }

    /// Library description of a SASL result code, via `sasl_errstring`.
    pub fn errstring(&self, code: c_int) -> Option<String> {
        // SAFETY: `sasl_errstring` accepts any code and null language
        // arguments, and returns a static string or null.
        let text = unsafe { (self.sasl_errstring)(code, ptr::null(), ptr::null_mut()) };
        if text.is_null() {
            return None;
        }
        // SAFETY: non-null results are NUL-terminated static strings.
        Some(unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned())
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for slot in Slot::ALL {
            map.entry(&slot.symbol_name(), &self.address(slot));
        }
        map.finish()
    }
}

unsafe fn bind<F: Copy>(address: NonNull<c_void>) -> F {
    debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*mut c_void>());
    mem::transmute_copy(&address.as_ptr())
}

/// Bind every entry of `specs` from `library`.
///
/// Stops at the first lookup failure and returns it; no table is produced
/// unless every slot ends up bound. Releasing the handle on failure is the
/// caller's job.
pub fn resolve_symbols<L: LoadedLibrary>(
    library: &L,
    specs: &[SymbolSpec],
) -> Result<SymbolTable, SymbolError> {
    let mut slots: [Option<NonNull<c_void>>; SYMBOL_COUNT] = [None; SYMBOL_COUNT];

    for spec in specs {
        let address = library.symbol(spec.name).map_err(|e| SymbolError {
            symbol: spec.name,
            detail: e.0,
        })?;
        tracing::trace!(symbol = spec.name, "resolved");
        slots[spec.slot.index()] = Some(address);
    }

    SymbolTable::from_slots(slots)
}
