//! OS dynamic-loader seam.
//!
//! [`SystemLoader`] opens real shared libraries through `libloading`. The
//! traits exist so the loader and resolver logic can run against a test
//! double that counts live handles.

use std::ffi::c_void;
use std::path::Path;
use std::ptr::NonNull;

use libloading::Library;

/// Loader failure text, as reported by the OS loader.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DlError(pub String);

impl DlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Error for a symbol that is absent or resolves to a null address.
    pub fn symbol(name: &str, reason: impl std::fmt::Display) -> Self {
        Self(format!("Failed to load symbol \"{}\": {}", name, reason))
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Opens shared libraries by file name or path.
pub trait DynamicLoader {
    type Library: LoadedLibrary;

    fn open(&self, name: &str) -> Result<Self::Library, DlError>;
}

/// An open shared library. Dropping it releases the handle.
pub trait LoadedLibrary {
    /// Address of the exported symbol `name`; never null.
    fn symbol(&self, name: &str) -> Result<NonNull<c_void>, DlError>;

    /// Release the handle, reporting loader errors.
    fn close(self) -> Result<(), DlError>;
}

/// The platform dynamic loader (`dlopen` with `RTLD_NOW | RTLD_LOCAL`, or
/// `LoadLibrary`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLoader;

/// Handle returned by [`SystemLoader`].
#[derive(Debug)]
pub struct SystemLibrary {
    library: Library,
}

impl SystemLoader {
    /// Open `name` with every undefined reference bound up front, so a
    /// library with broken dependencies fails here instead of on first call.
    #[cfg(unix)]
    fn open_exact(name: &str) -> Result<SystemLibrary, DlError> {
        use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};

        // SAFETY: loading runs the library's initialisers. Callers only pass
        // names of the system SASL library, whose initialisers are benign.
        let library = unsafe { UnixLibrary::open(Some(name), RTLD_NOW | RTLD_LOCAL) }
            .map_err(|e| DlError::new(e.to_string()))?;
        Ok(SystemLibrary {
            library: library.into(),
        })
    }

    #[cfg(not(unix))]
    fn open_exact(name: &str) -> Result<SystemLibrary, DlError> {
        // SAFETY: see the unix variant.
        let library = unsafe { Library::new(name) }.map_err(|e| DlError::new(e.to_string()))?;
        Ok(SystemLibrary { library })
    }
}

impl DynamicLoader for SystemLoader {
    type Library = SystemLibrary;

    fn open(&self, name: &str) -> Result<SystemLibrary, DlError> {
        let err = match Self::open_exact(name) {
            Ok(library) => return Ok(library),
            Err(e) => e,
        };

        match with_platform_extension(name) {
            Some(extended) => {
                tracing::trace!(library = name, extended = %extended, "retrying with platform extension");
                Self::open_exact(&extended)
            }
            None => Err(err),
        }
    }
}

impl LoadedLibrary for SystemLibrary {
    fn symbol(&self, name: &str) -> Result<NonNull<c_void>, DlError> {
        // SAFETY: the address is only returned, never dereferenced here.
        let address = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }
            .map(|symbol| *symbol)
            .map_err(|e| DlError::symbol(name, e))?;

        NonNull::new(address).ok_or_else(|| DlError::symbol(name, "symbol address is null"))
    }

    fn close(self) -> Result<(), DlError> {
        self.library.close().map_err(|e| DlError::new(e.to_string()))
    }
}

/// `name` with the platform shared-library suffix appended, unless its file
/// name already carries an extension in its last few characters
/// (`libsasl2.so.2`, `libsasl2.dylib`).
pub fn with_platform_extension(name: &str) -> Option<String> {
    let suffix = std::env::consts::DLL_SUFFIX;
    let file_name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);

    if file_name.is_empty() {
        return None;
    }

    if let Some(dot) = file_name.rfind('.') {
        if dot >= file_name.len().saturating_sub(suffix.len()) {
            return None;
        }
    }

    Some(format!("{}{}", name, suffix))
}
