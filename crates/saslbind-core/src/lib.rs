//! Runtime discovery and binding of the system Cyrus SASL library.
//!
//! The client never links against `libsasl2`. Instead a [`SaslLibrary`]
//! probes a short, platform-specific list of candidate file names, opens the
//! first one the OS loader accepts and binds every required entry point into
//! a [`SymbolTable`]. A missing library or a missing symbol is reported as a
//! recoverable [`LoaderError`] so the caller can mark SASL/GSSAPI as
//! unavailable.
//!
//! ```no_run
//! use saslbind_core::{SaslLibrary, abi::SASL_OK};
//!
//! let mut sasl = SaslLibrary::new();
//! match sasl.load_default() {
//!     Ok(symbols) => println!("{:?}", symbols.errstring(SASL_OK)),
//!     Err(e) => eprintln!("SASL unavailable: {e} ({})", sasl.last_error()),
//! }
//! ```

pub mod abi;
pub mod candidates;
pub mod config;
pub mod dl;
pub mod error;
pub mod library;
pub mod symbols;

pub use candidates::{Platform, default_candidates};
pub use config::LoaderConfig;
pub use dl::{DlError, DynamicLoader, LoadedLibrary, SystemLibrary, SystemLoader};
pub use error::{ERROR_BUFFER_CAPACITY, ErrorBuffer, LoaderError, Result};
pub use library::{LoadState, SaslLibrary};
pub use symbols::{REQUIRED_SYMBOLS, SYMBOL_COUNT, Slot, SymbolError, SymbolSpec, SymbolTable};
