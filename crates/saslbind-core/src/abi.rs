//! Binary mirror of the Cyrus SASL client API.
//!
//! `sasl/sasl.h` is not available at build time, so the handful of types and
//! constants the handshake needs are reproduced here by hand. Only what is
//! used is mirrored, not the full API. Every structure is `#[repr(C)]` with
//! the field order of the C header, and the layouts are pinned by `const`
//! assertions at the bottom of this file: a layout drift must fail the build,
//! not corrupt memory at run time.

use std::ffi::{c_char, c_int, c_uchar, c_uint, c_ulong, c_void};
use std::fmt::{self, Display, Formatter};
use std::marker::{PhantomData, PhantomPinned};
use std::mem;

// Result codes.
pub const SASL_CONTINUE: c_int = 1;
pub const SASL_OK: c_int = 0;
pub const SASL_FAIL: c_int = -1;
pub const SASL_INTERACT: c_int = 2;

// Callback identifiers.
pub const SASL_CB_LIST_END: c_ulong = 0;
pub const SASL_CB_LOG: c_ulong = 2;
pub const SASL_CB_USER: c_ulong = 0x4001;
pub const SASL_CB_AUTHNAME: c_ulong = 0x4002;
pub const SASL_CB_PASS: c_ulong = 0x4004;
pub const SASL_CB_ECHOPROMPT: c_ulong = 0x4005;
pub const SASL_CB_NOECHOPROMPT: c_ulong = 0x4006;
pub const SASL_CB_GETREALM: c_ulong = 0x4008;
pub const SASL_CB_CANON_USER: c_ulong = 0x8007;

// Property identifiers for `sasl_getprop`.
pub const SASL_USERNAME: c_int = 0;
pub const SASL_AUTHSOURCE: c_int = 14;
pub const SASL_MECHNAME: c_int = 15;

/// Result codes by name, in header order.
pub const RESULT_CODES: [(&str, c_int); 4] = [
    ("SASL_CONTINUE", SASL_CONTINUE),
    ("SASL_OK", SASL_OK),
    ("SASL_FAIL", SASL_FAIL),
    ("SASL_INTERACT", SASL_INTERACT),
];

/// Callback identifiers by name, in header order.
pub const CALLBACK_IDS: [(&str, c_ulong); 9] = [
    ("SASL_CB_LIST_END", SASL_CB_LIST_END),
    ("SASL_CB_LOG", SASL_CB_LOG),
    ("SASL_CB_USER", SASL_CB_USER),
    ("SASL_CB_AUTHNAME", SASL_CB_AUTHNAME),
    ("SASL_CB_PASS", SASL_CB_PASS),
    ("SASL_CB_ECHOPROMPT", SASL_CB_ECHOPROMPT),
    ("SASL_CB_NOECHOPROMPT", SASL_CB_NOECHOPROMPT),
    ("SASL_CB_GETREALM", SASL_CB_GETREALM),
    ("SASL_CB_CANON_USER", SASL_CB_CANON_USER),
];

/// Property identifiers by name.
pub const PROPERTY_IDS: [(&str, c_int); 3] = [
    ("SASL_USERNAME", SASL_USERNAME),
    ("SASL_AUTHSOURCE", SASL_AUTHSOURCE),
    ("SASL_MECHNAME", SASL_MECHNAME),
];

/// Typed view of a SASL result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaslResult {
    Ok,
    Continue,
    Interact,
    Fail,
    /// Any code this mirror does not name.
    Other(c_int),
}

impl SaslResult {
    pub fn from_code(code: c_int) -> Self {
        match code {
            SASL_OK => Self::Ok,
            SASL_CONTINUE => Self::Continue,
            SASL_INTERACT => Self::Interact,
            SASL_FAIL => Self::Fail,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> c_int {
        match self {
            Self::Ok => SASL_OK,
            Self::Continue => SASL_CONTINUE,
            Self::Interact => SASL_INTERACT,
            Self::Fail => SASL_FAIL,
            Self::Other(code) => code,
        }
    }

    /// `true` for codes that end the exchange with an error.
    pub fn is_error(self) -> bool {
        self.code() < 0
    }
}

impl Display for SaslResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "SASL_OK"),
            Self::Continue => write!(f, "SASL_CONTINUE"),
            Self::Interact => write!(f, "SASL_INTERACT"),
            Self::Fail => write!(f, "SASL_FAIL"),
            Self::Other(code) => write!(f, "SASL result {}", code),
        }
    }
}

/// Opaque `sasl_conn_t`. Only ever handled through pointers.
#[repr(C)]
pub struct SaslConn {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// `sasl_secret_t`: a length followed by a variable-length byte tail.
///
/// The declared `data` array has a single element; the library reads `len`
/// bytes starting at `data`. Use [`OwnedSecret`] to build one.
#[repr(C)]
#[derive(Debug)]
pub struct Secret {
    pub len: c_ulong,
    pub data: [c_uchar; 1],
}

/// Generic callback procedure. The library casts it to the id-specific
/// prototype before calling.
pub type SaslCallbackProc = unsafe extern "C" fn() -> c_int;

/// `sasl_callback_t`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Callback {
    pub id: c_ulong,
    pub proc_: Option<SaslCallbackProc>,
    pub context: *mut c_void,
}

impl Callback {
    pub fn new(id: c_ulong, proc_: Option<SaslCallbackProc>, context: *mut c_void) -> Self {
        Self { id, proc_, context }
    }

    /// The `SASL_CB_LIST_END` entry that terminates a callback array.
    pub fn list_end() -> Self {
        Self::new(SASL_CB_LIST_END, None, std::ptr::null_mut())
    }

    pub fn is_list_end(&self) -> bool {
        self.id == SASL_CB_LIST_END
    }
}

/// `sasl_interact_t`: one interactive prompt the library needs answered.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Interact {
    pub id: c_ulong,
    pub challenge: *const c_char,
    pub prompt: *const c_char,
    pub defresult: *const c_char,
    pub result: *const c_void,
    pub len: c_uint,
}

/// Heap buffer laid out as a [`Secret`] header followed by the payload and a
/// trailing NUL.
///
/// The buffer is zeroed on drop.
pub struct OwnedSecret {
    buf: Vec<c_ulong>,
    len: usize,
}

impl OwnedSecret {
    pub fn new(bytes: &[u8]) -> Self {
        let data_offset = mem::offset_of!(Secret, data);
        let total = data_offset + bytes.len() + 1;
        let mut buf: Vec<c_ulong> = vec![0; total.div_ceil(mem::size_of::<c_ulong>())];
        buf[0] = bytes.len() as c_ulong;

        // SAFETY: `buf` spans at least `total` bytes and `len` is the first
        // field, so the payload lands at `data_offset` without overlap.
        unsafe {
            let base = buf.as_mut_ptr().cast::<u8>();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(data_offset), bytes.len());
        }

        Self {
            buf,
            len: bytes.len(),
        }
    }

    pub fn as_ptr(&self) -> *const Secret {
        self.buf.as_ptr().cast()
    }

    pub fn as_mut_ptr(&mut self) -> *mut Secret {
        self.buf.as_mut_ptr().cast()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload bytes, without the trailing NUL.
    pub fn data(&self) -> &[u8] {
        // SAFETY: `new` copied exactly `len` bytes to this offset.
        unsafe {
            let base = self.buf.as_ptr().cast::<u8>();
            std::slice::from_raw_parts(base.add(mem::offset_of!(Secret, data)), self.len)
        }
    }
}

impl Drop for OwnedSecret {
    fn drop(&mut self) {
        for word in self.buf.iter_mut() {
            // SAFETY: `word` is a valid, aligned element of `buf`.
            unsafe { std::ptr::write_volatile(word, 0) };
        }
    }
}

impl fmt::Debug for OwnedSecret {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedSecret")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// `sasl_client_init`
pub type SaslClientInitFn = unsafe extern "C" fn(callbacks: *const Callback) -> c_int;

/// `sasl_client_new`
pub type SaslClientNewFn = unsafe extern "C" fn(
    service: *const c_char,
    server_fqdn: *const c_char,
    iplocalport: *const c_char,
    ipremoteport: *const c_char,
    prompt_supp: *const Callback,
    flags: c_uint,
    pconn: *mut *mut SaslConn,
) -> c_int;

/// `sasl_client_start`
pub type SaslClientStartFn = unsafe extern "C" fn(
    conn: *mut SaslConn,
    mechlist: *const c_char,
    prompt_need: *mut *mut Interact,
    clientout: *mut *const c_char,
    clientoutlen: *mut c_uint,
    mech: *mut *const c_char,
) -> c_int;

/// `sasl_client_step`
pub type SaslClientStepFn = unsafe extern "C" fn(
    conn: *mut SaslConn,
    serverin: *const c_char,
    serverinlen: c_uint,
    prompt_need: *mut *mut Interact,
    clientout: *mut *const c_char,
    clientoutlen: *mut c_uint,
) -> c_int;

/// `sasl_dispose`
pub type SaslDisposeFn = unsafe extern "C" fn(pconn: *mut *mut SaslConn);

/// `sasl_errdetail`
pub type SaslErrDetailFn = unsafe extern "C" fn(conn: *mut SaslConn) -> *const c_char;

/// `sasl_errstring`
pub type SaslErrStringFn = unsafe extern "C" fn(
    saslerr: c_int,
    langlist: *const c_char,
    outlang: *mut *const c_char,
) -> *const c_char;

/// `sasl_getprop`
pub type SaslGetPropFn =
    unsafe extern "C" fn(conn: *mut SaslConn, propnum: c_int, pvalue: *mut *const c_void) -> c_int;

/// `sasl_listmech`
pub type SaslListMechFn = unsafe extern "C" fn(
    conn: *mut SaslConn,
    user: *const c_char,
    prefix: *const c_char,
    sep: *const c_char,
    suffix: *const c_char,
    result: *mut *const c_char,
    plen: *mut c_uint,
    pcount: *mut c_int,
) -> c_int;

// Function pointers are bound from raw symbol addresses.
const _: () = assert!(mem::size_of::<SaslClientInitFn>() == mem::size_of::<*mut c_void>());
const _: () = assert!(mem::size_of::<Option<SaslCallbackProc>>() == mem::size_of::<*mut c_void>());

// LP64 (Linux, macOS, BSDs): `unsigned long` is 8 bytes.
#[cfg(all(not(windows), target_pointer_width = "64"))]
const _: () = {
    assert!(mem::size_of::<Secret>() == 16);
    assert!(mem::offset_of!(Secret, len) == 0);
    assert!(mem::offset_of!(Secret, data) == 8);

    assert!(mem::size_of::<Callback>() == 24);
    assert!(mem::offset_of!(Callback, id) == 0);
    assert!(mem::offset_of!(Callback, proc_) == 8);
    assert!(mem::offset_of!(Callback, context) == 16);

    assert!(mem::size_of::<Interact>() == 48);
    assert!(mem::offset_of!(Interact, id) == 0);
    assert!(mem::offset_of!(Interact, challenge) == 8);
    assert!(mem::offset_of!(Interact, prompt) == 16);
    assert!(mem::offset_of!(Interact, defresult) == 24);
    assert!(mem::offset_of!(Interact, result) == 32);
    assert!(mem::offset_of!(Interact, len) == 40);
};

// LLP64 (64-bit Windows): `unsigned long` is 4 bytes.
#[cfg(all(windows, target_pointer_width = "64"))]
const _: () = {
    assert!(mem::size_of::<Secret>() == 8);
    assert!(mem::offset_of!(Secret, data) == 4);
    assert!(mem::size_of::<Callback>() == 24);
    assert!(mem::offset_of!(Callback, proc_) == 8);
    assert!(mem::size_of::<Interact>() == 48);
    assert!(mem::offset_of!(Interact, len) == 40);
};

#[cfg(target_pointer_width = "32")]
const _: () = {
    assert!(mem::size_of::<Secret>() == 8);
    assert!(mem::offset_of!(Secret, data) == 4);
    assert!(mem::size_of::<Callback>() == 12);
    assert!(mem::offset_of!(Callback, proc_) == 4);
    assert!(mem::offset_of!(Callback, context) == 8);
    assert!(mem::size_of::<Interact>() == 24);
    assert!(mem::offset_of!(Interact, len) == 20);
};
