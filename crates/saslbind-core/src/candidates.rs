//! Platform candidate names for the Cyrus SASL shared library.

use std::fmt::{self, Display, Formatter};

/// Platform family that decides which file names are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    MacOs,
    Windows,
    /// Linux, the BSDs and every other Unix-like target.
    Unix,
}

/// Candidate names per platform, in the order they are tried.
///
/// Linux distributions ship either the `.so.2` or the `.so.3` SONAME of
/// `libsasl2`; both expose the same client API.
const CANDIDATE_TABLE: [(Platform, &[&str]); 3] = [
    (Platform::MacOs, &["libsasl2.2.dylib"]),
    (Platform::Windows, &["libsasl2.dll", "libsasl.dll"]),
    (Platform::Unix, &["libsasl2.so.2", "libsasl2.so.3"]),
];

impl Platform {
    /// The platform this binary was built for.
    pub const fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::MacOs => "macos",
            Platform::Windows => "windows",
            Platform::Unix => "unix",
        }
    }

    /// Ordered candidate file names for this platform. Never empty.
    pub fn candidates(&self) -> &'static [&'static str] {
        CANDIDATE_TABLE
            .iter()
            .find(|(platform, _)| platform == self)
            .map(|(_, names)| *names)
            .unwrap_or(&[])
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate names for the build target.
pub fn default_candidates() -> &'static [&'static str] {
    Platform::current().candidates()
}
