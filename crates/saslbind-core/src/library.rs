//! Caller-owned SASL library handle and symbol table.

use std::fmt;

use crate::config::LoaderConfig;
use crate::dl::{DynamicLoader, LoadedLibrary, SystemLoader};
use crate::error::{ErrorBuffer, LoaderError, Result};
use crate::symbols::{REQUIRED_SYMBOLS, SymbolTable, resolve_symbols};

/// Lifecycle of a [`SaslLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Nothing held.
    Unloaded,
    /// A handle is open but the symbol table is not bound yet.
    Loading,
    /// Handle open and every required symbol bound.
    Loaded,
    /// The last attempt failed; nothing is held.
    Failed,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Unloaded => "unloaded",
            LoadState::Loading => "loading",
            LoadState::Loaded => "loaded",
            LoadState::Failed => "failed",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct OpenLibrary<H> {
    name: String,
    handle: H,
}

/// The runtime-loaded Cyrus SASL library.
///
/// Owns at most one library handle together with the symbol table bound
/// from it. The two are acquired by [`open`](Self::open) and
/// [`resolve`](Self::resolve) and released together by
/// [`close`](Self::close) or on drop. Calls must not overlap; once
/// [`Loaded`](LoadState::Loaded) the table may be shared read-only across
/// threads.
pub struct SaslLibrary<L: DynamicLoader = SystemLoader> {
    loader: L,
    config: LoaderConfig,
    state: LoadState,
    library: Option<OpenLibrary<L::Library>>,
    symbols: Option<SymbolTable>,
    last_error: ErrorBuffer,
}

impl SaslLibrary<SystemLoader> {
    /// Unloaded library using the system loader and default configuration.
    pub fn new() -> Self {
        Self::with_loader(SystemLoader)
    }

    pub fn from_config(config: LoaderConfig) -> Self {
        Self::new().with_config(config)
    }
}

impl Default for SaslLibrary<SystemLoader> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: DynamicLoader> SaslLibrary<L> {
    pub fn with_loader(loader: L) -> Self {
        Self {
            loader,
            config: LoaderConfig::default(),
            state: LoadState::Unloaded,
            library: None,
            symbols: None,
            last_error: ErrorBuffer::new(),
        }
    }

    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }

    /// The bound table, only while [`Loaded`](LoadState::Loaded).
    pub fn symbols(&self) -> Option<&SymbolTable> {
        self.symbols.as_ref()
    }

    /// Candidate name the open handle was obtained with.
    pub fn library_name(&self) -> Option<&str> {
        self.library.as_ref().map(|library| library.name.as_str())
    }

    /// Description of the most recent failure; empty if the last attempt
    /// succeeded.
    pub fn last_error(&self) -> &str {
        self.last_error.as_str()
    }

    /// Open the first candidate the OS loader accepts and return its name.
    ///
    /// Candidates are tried strictly in order. If all of them fail nothing is
    /// held, the state becomes [`Failed`](LoadState::Failed) and the error
    /// carries the loader text of the last attempt.
    pub fn open<S: AsRef<str>>(&mut self, candidates: &[S]) -> Result<&str> {
        if matches!(self.state, LoadState::Loading | LoadState::Loaded) {
            return Err(LoaderError::AlreadyLoaded);
        }

        if candidates.is_empty() {
            let err = LoaderError::NoCandidates;
            self.last_error.set(err.to_string());
            return Err(err);
        }

        self.state = LoadState::Loading;

        for candidate in candidates {
            let name = candidate.as_ref();
            match self.loader.open(name) {
                Ok(handle) => {
                    tracing::debug!(library = name, "opened SASL library");
                    self.last_error.clear();
                    let library = self.library.insert(OpenLibrary {
                        name: name.to_string(),
                        handle,
                    });
                    return Ok(&library.name);
                }
                Err(e) => {
                    tracing::debug!(library = name, error = %e, "candidate not loadable");
                    self.last_error.set(e.message());
                }
            }
        }

        self.state = LoadState::Failed;
        let err = LoaderError::LibraryNotFound {
            candidates: candidates.iter().map(|c| c.as_ref().to_string()).collect(),
            detail: self.last_error.as_str().to_string(),
        };
        self.report_failure(&err);
        Err(err)
    }

    /// Bind every required entry point from the open handle.
    ///
    /// All or nothing: on the first missing symbol the handle is closed, no
    /// table is kept and the error names that symbol.
    pub fn resolve(&mut self) -> Result<&SymbolTable> {
        if self.symbols.is_none() {
            let library = self.library.as_ref().ok_or(LoaderError::NotOpen)?;

            match resolve_symbols(&library.handle, &REQUIRED_SYMBOLS) {
                Ok(table) => {
                    tracing::info!(library = %library.name, "SASL library loaded");
                    self.symbols = Some(table);
                    self.state = LoadState::Loaded;
                }
                Err(e) => {
                    self.release();
                    self.state = LoadState::Failed;
                    self.last_error.set(&e.detail);

                    let err = LoaderError::SymbolMissing {
                        symbol: e.symbol.to_string(),
                        detail: e.detail,
                    };
                    self.report_failure(&err);
                    return Err(err);
                }
            }
        }

        self.symbols.as_ref().ok_or(LoaderError::NotOpen)
    }

    /// [`open`](Self::open) followed by [`resolve`](Self::resolve).
    pub fn load<S: AsRef<str>>(&mut self, candidates: &[S]) -> Result<&SymbolTable> {
        self.open(candidates)?;
        self.resolve()
    }

    /// [`load`](Self::load) with the configured candidates, or the platform
    /// defaults if none are configured.
    pub fn load_default(&mut self) -> Result<&SymbolTable> {
        let candidates: Vec<String> = self
            .config
            .candidates()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.load(&candidates)
    }

    /// Drop the symbol table and release the handle. Safe to call in any
    /// state, any number of times.
    pub fn close(&mut self) {
        if let Some(name) = self.library_name() {
            tracing::debug!(library = name, "closing SASL library");
        }
        self.release();
        self.state = LoadState::Unloaded;
    }

    fn release(&mut self) {
        // The table goes first so no pointer outlives the handle.
        self.symbols = None;

        if let Some(library) = self.library.take() {
            if let Err(e) = library.handle.close() {
                tracing::debug!(library = %library.name, error = %e, "failed to close SASL library");
            }
        }
    }

    fn report_failure(&self, err: &LoaderError) {
        if self.config.log_failures {
            tracing::warn!(error = %err, "SASL library unavailable");
        } else {
            tracing::debug!(error = %err, "SASL library unavailable");
        }
    }
}

impl<L: DynamicLoader> Drop for SaslLibrary<L> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<L: DynamicLoader> fmt::Debug for SaslLibrary<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslLibrary")
            .field("state", &self.state)
            .field("library", &self.library_name())
            .field("last_error", &self.last_error.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dl::DlError;
    use crate::symbols::{SYMBOL_COUNT, Slot};
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::ffi::c_void;
    use std::ptr::NonNull;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    extern "C" fn stub() {}

    /// In-memory loader that tracks how many handles are alive.
    #[derive(Default)]
    struct FakeLoader {
        libraries: HashMap<String, Vec<&'static str>>,
        live: Rc<Cell<usize>>,
        attempts: RefCell<Vec<String>>,
    }

    impl FakeLoader {
        fn with_library(mut self, name: &str, exports: &[&'static str]) -> Self {
            self.libraries.insert(name.to_string(), exports.to_vec());
            self
        }

        fn with_complete(self, name: &str) -> Self {
            let exports: Vec<_> = REQUIRED_SYMBOLS.iter().map(|s| s.name).collect();
            self.with_library(name, &exports)
        }

        fn without(self, name: &str, missing: &str) -> Self {
            let exports: Vec<_> = REQUIRED_SYMBOLS
                .iter()
                .map(|s| s.name)
                .filter(|n| *n != missing)
                .collect();
            self.with_library(name, &exports)
        }

        fn live(&self) -> usize {
            self.live.get()
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.borrow().clone()
        }
    }

    struct FakeLibrary {
        exports: Vec<&'static str>,
        live: Rc<Cell<usize>>,
    }

    impl Drop for FakeLibrary {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    impl DynamicLoader for FakeLoader {
        type Library = FakeLibrary;

        fn open(&self, name: &str) -> std::result::Result<FakeLibrary, DlError> {
            self.attempts.borrow_mut().push(name.to_string());
            let exports = self.libraries.get(name).ok_or_else(|| {
                DlError::new(format!("{}: cannot open shared object file", name))
            })?;
            self.live.set(self.live.get() + 1);
            Ok(FakeLibrary {
                exports: exports.clone(),
                live: self.live.clone(),
            })
        }
    }

    impl LoadedLibrary for FakeLibrary {
        fn symbol(&self, name: &str) -> std::result::Result<NonNull<c_void>, DlError> {
            if !self.exports.iter().any(|export| *export == name) {
                return Err(DlError::symbol(name, "undefined symbol"));
            }
            Ok(NonNull::new(stub as *const () as *mut c_void).unwrap())
        }

        fn close(self) -> std::result::Result<(), DlError> {
            Ok(())
        }
    }

    const CANDIDATES: [&str; 2] = ["libx.so.2", "libx.so.3"];

    #[test]
    fn test_scenario_only_second_candidate_present() {
        let mut sasl = SaslLibrary::with_loader(FakeLoader::default().with_complete("libx.so.3"));

        let table = sasl.load(&CANDIDATES).unwrap();
        for slot in Slot::ALL {
            assert!(!table.address(slot).is_null());
        }

        assert_eq!(sasl.state(), LoadState::Loaded);
        assert_eq!(sasl.library_name(), Some("libx.so.3"));
        assert_eq!(sasl.loader().attempts(), CANDIDATES.to_vec());
        assert_eq!(sasl.loader().live(), 1);
        assert!(sasl.last_error().is_empty());
    }

    #[test]
    fn test_scenario_no_candidate_present() {
        let mut sasl = SaslLibrary::with_loader(FakeLoader::default());

        let err = sasl.open(&CANDIDATES).unwrap_err();
        assert!(matches!(err, LoaderError::LibraryNotFound { .. }));
        assert_eq!(sasl.state(), LoadState::Failed);
        assert_eq!(sasl.library_name(), None);
        assert_eq!(sasl.loader().live(), 0);

        // Only the last candidate's failure is the operation's error.
        assert_eq!(sasl.last_error(), "libx.so.3: cannot open shared object file");

        sasl.close();
        assert_eq!(sasl.state(), LoadState::Unloaded);
        assert_eq!(sasl.loader().live(), 0);
    }

    #[test]
    fn test_scenario_missing_listmech() {
        let loader = FakeLoader::default().without("libx.so.2", "sasl_listmech");
        let mut sasl = SaslLibrary::with_loader(loader);

        assert_eq!(sasl.open(&CANDIDATES).unwrap(), "libx.so.2");
        assert_eq!(sasl.state(), LoadState::Loading);
        assert_eq!(sasl.loader().live(), 1);

        let err = sasl.resolve().unwrap_err();
        assert_eq!(err.missing_symbol(), Some("sasl_listmech"));
        assert_eq!(sasl.state(), LoadState::Failed);
        assert!(sasl.symbols().is_none());
        assert_eq!(sasl.library_name(), None);
        assert_eq!(sasl.loader().live(), 0, "handle leaked");
        assert!(sasl.last_error().contains("sasl_listmech"));

        // The handle is gone for good: resolving again has nothing to use.
        assert_eq!(sasl.resolve().unwrap_err(), LoaderError::NotOpen);
    }

    #[test]
    fn test_first_match_wins() {
        for _ in 0..3 {
            let loader = FakeLoader::default()
                .with_complete("libx.so.2")
                .with_complete("libx.so.3");
            let mut sasl = SaslLibrary::with_loader(loader);

            sasl.load(&CANDIDATES).unwrap();
            assert_eq!(sasl.library_name(), Some("libx.so.2"));
            assert_eq!(sasl.loader().attempts(), vec!["libx.so.2"]);
            assert_eq!(sasl.loader().live(), 1);
        }
    }

    #[test]
    fn test_incomplete_first_match_is_not_skipped() {
        let loader = FakeLoader::default()
            .without("libx.so.2", "sasl_client_step")
            .with_complete("libx.so.3");
        let mut sasl = SaslLibrary::with_loader(loader);

        let err = sasl.load(&CANDIDATES).unwrap_err();
        assert_eq!(err.missing_symbol(), Some("sasl_client_step"));
        assert_eq!(sasl.loader().live(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut sasl = SaslLibrary::with_loader(FakeLoader::default().with_complete("libx.so.2"));

        sasl.close();
        sasl.close();
        assert_eq!(sasl.state(), LoadState::Unloaded);

        sasl.load(&CANDIDATES).unwrap();
        sasl.close();
        assert_eq!(sasl.state(), LoadState::Unloaded);
        assert!(sasl.symbols().is_none());
        assert_eq!(sasl.loader().live(), 0);

        sasl.close();
        assert_eq!(sasl.state(), LoadState::Unloaded);
    }

    #[test]
    fn test_reload_after_close() {
        let mut sasl = SaslLibrary::with_loader(FakeLoader::default().with_complete("libx.so.3"));

        sasl.load(&CANDIDATES).unwrap();
        sasl.close();
        sasl.load(&["libx.so.3"]).unwrap();
        assert!(sasl.is_loaded());
        assert_eq!(sasl.loader().live(), 1);
    }

    #[test]
    fn test_retry_after_failure_with_other_candidates() {
        let mut sasl = SaslLibrary::with_loader(FakeLoader::default().with_complete("libsasl2.so.3"));

        assert!(sasl.load(&CANDIDATES).is_err());
        assert_eq!(sasl.state(), LoadState::Failed);

        sasl.load(&["libsasl2.so.3"]).unwrap();
        assert!(sasl.is_loaded());
        assert!(sasl.last_error().is_empty());
    }

    #[test]
    fn test_open_while_loaded_is_rejected() {
        let mut sasl = SaslLibrary::with_loader(FakeLoader::default().with_complete("libx.so.2"));

        sasl.open(&CANDIDATES).unwrap();
        assert_eq!(sasl.open(&CANDIDATES).unwrap_err(), LoaderError::AlreadyLoaded);

        sasl.resolve().unwrap();
        assert_eq!(sasl.load(&CANDIDATES).unwrap_err(), LoaderError::AlreadyLoaded);
        assert_eq!(sasl.loader().live(), 1);
    }

    #[test]
    fn test_resolve_twice_returns_same_table() {
        let mut sasl = SaslLibrary::with_loader(FakeLoader::default().with_complete("libx.so.2"));

        let first = sasl.load(&CANDIDATES).unwrap().address(Slot::ClientInit);
        let second = sasl.resolve().unwrap().address(Slot::ClientInit);
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_without_open() {
        let mut sasl = SaslLibrary::with_loader(FakeLoader::default());
        assert_eq!(sasl.resolve().unwrap_err(), LoaderError::NotOpen);
        assert_eq!(sasl.state(), LoadState::Unloaded);
    }

    #[test]
    fn test_empty_candidate_list() {
        let mut sasl = SaslLibrary::with_loader(FakeLoader::default());
        let none: [&str; 0] = [];

        assert_eq!(sasl.open(&none).unwrap_err(), LoaderError::NoCandidates);
        assert_eq!(sasl.state(), LoadState::Unloaded);
        assert!(sasl.loader().attempts().is_empty());
    }

    #[test]
    fn test_load_default_uses_configured_candidates() {
        let config = LoaderConfig {
            candidates: vec!["libcustom.so".into()],
            log_failures: true,
        };
        let mut sasl = SaslLibrary::with_loader(FakeLoader::default().with_complete("libcustom.so"))
            .with_config(config);

        sasl.load_default().unwrap();
        assert_eq!(sasl.library_name(), Some("libcustom.so"));
    }

    /// Formatted log output collected by a test subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run a failing load against `loader` and return what was logged.
    fn failed_load_logs(loader: FakeLoader, log_failures: bool) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let config = LoaderConfig {
                candidates: Vec::new(),
                log_failures,
            };
            let mut sasl = SaslLibrary::with_loader(loader).with_config(config);
            assert!(sasl.load(&CANDIDATES).is_err());
        });

        let bytes = logs.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn unavailable_lines(logs: &str, level: &str) -> usize {
        logs.lines()
            .filter(|line| line.contains(level) && line.contains("SASL library unavailable"))
            .count()
    }

    #[test]
    fn test_failure_logged_at_debug_by_default() {
        let logs = failed_load_logs(FakeLoader::default(), false);

        assert_eq!(unavailable_lines(&logs, "DEBUG"), 1, "logs: {}", logs);
        assert!(!logs.contains("WARN"), "logs: {}", logs);
    }

    #[test]
    fn test_failure_logged_at_warn_when_enabled() {
        let logs = failed_load_logs(FakeLoader::default(), true);

        assert_eq!(unavailable_lines(&logs, "WARN"), 1, "logs: {}", logs);
        assert_eq!(unavailable_lines(&logs, "DEBUG"), 0, "logs: {}", logs);
        assert!(logs.contains("libx.so.3"));
    }

    #[test]
    fn test_missing_symbol_logged_at_warn_when_enabled() {
        let loader = FakeLoader::default().without("libx.so.2", "sasl_dispose");
        let logs = failed_load_logs(loader, true);

        assert_eq!(unavailable_lines(&logs, "WARN"), 1, "logs: {}", logs);
        assert!(logs.contains("sasl_dispose"));
    }

    #[test]
    fn test_drop_releases_handle() {
        let live;
        {
            let loader = FakeLoader::default().with_complete("libx.so.2");
            live = loader.live.clone();
            let mut sasl = SaslLibrary::with_loader(loader);
            sasl.load(&CANDIDATES).unwrap();
            assert_eq!(live.get(), 1);
        }
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn test_every_required_symbol_is_enforced() {
        for spec in REQUIRED_SYMBOLS {
            let loader = FakeLoader::default().without("libx.so.2", spec.name);
            let mut sasl = SaslLibrary::with_loader(loader);

            let err = sasl.load(&CANDIDATES).unwrap_err();
            assert_eq!(err.missing_symbol(), Some(spec.name));
            assert_eq!(sasl.loader().live(), 0);
        }
        assert_eq!(REQUIRED_SYMBOLS.len(), SYMBOL_COUNT);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LoadState::Loaded.to_string(), "loaded");
        assert_eq!(LoadState::Failed.as_str(), "failed");
    }
}
