//! Minimum TLS version enforcement for outbound connections.
//!
//! Some TLS stacks support a protocol version without enabling it by
//! default. Instead of patching sockets as they are created, the adapter
//! inspects the capabilities of the linked TLS library once, when the
//! transport is built, and decides on a [`TlsPlan`]:
//!
//! ```text
//! minimum enabled by default ──► Default   (pass-through, minimum still enforced)
//! minimum supported only     ──► Restrict  (enabled set = supported versions >= minimum)
//! minimum not supported      ──► Default   (warning, unpatched transport)
//! ```
//!
//! Hardening is best-effort. If a restricted configuration cannot be built
//! (no usable trust roots, protocol mismatch), the adapter logs a warning and
//! leaves the client builder untouched.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustls::{ProtocolVersion, SupportedProtocolVersion};
use thiserror::Error;
use tracing::{debug, info, warn};

// =============================================================================
// TLS Version
// =============================================================================

/// TLS protocol versions the transport can negotiate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// TLS 1.2
    #[default]
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// All versions, oldest first.
    pub const ALL: [TlsVersion; 2] = [TlsVersion::Tls12, TlsVersion::Tls13];

    /// Returns the conventional protocol name, e.g. `TLSv1.2`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }

    fn from_protocol(version: ProtocolVersion) -> Option<Self> {
        match version {
            ProtocolVersion::TLSv1_2 => Some(TlsVersion::Tls12),
            ProtocolVersion::TLSv1_3 => Some(TlsVersion::Tls13),
            _ => None,
        }
    }

    fn to_rustls(self) -> &'static SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }

    fn to_reqwest(self) -> reqwest::tls::Version {
        match self {
            TlsVersion::Tls12 => reqwest::tls::Version::TLS_1_2,
            TlsVersion::Tls13 => reqwest::tls::Version::TLS_1_3,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a TLS version string is not recognised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown TLS version '{0}' (expected 1.2 or 1.3)")]
pub struct ParseTlsVersionError(String);

impl FromStr for TlsVersion {
    type Err = ParseTlsVersionError;

    /// Accepts `1.2`, `TLSv1.2`, `tls1.2`, `TLS_1_2` and the 1.3 equivalents.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', ".");
        let number = normalized
            .strip_prefix("tlsv")
            .or_else(|| normalized.strip_prefix("tls"))
            .unwrap_or(&normalized)
            .trim_start_matches('.');

        match number {
            "1.2" => Ok(TlsVersion::Tls12),
            "1.3" => Ok(TlsVersion::Tls13),
            _ => Err(ParseTlsVersionError(s.to_string())),
        }
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// What the linked TLS library can negotiate, and what it enables unasked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsCapabilities {
    /// Versions the library implements.
    pub supported: Vec<TlsVersion>,
    /// Versions enabled when no explicit protocol list is given.
    pub enabled_by_default: Vec<TlsVersion>,
}

impl TlsCapabilities {
    /// Creates a capability description, mainly for tests and embedders
    /// running on constrained platforms.
    pub fn new(supported: Vec<TlsVersion>, enabled_by_default: Vec<TlsVersion>) -> Self {
        Self {
            supported,
            enabled_by_default,
        }
    }

    /// Queries the linked rustls build.
    pub fn detect() -> Self {
        fn collect(versions: &[&SupportedProtocolVersion]) -> Vec<TlsVersion> {
            let mut out: Vec<TlsVersion> = versions
                .iter()
                .filter_map(|v| TlsVersion::from_protocol(v.version))
                .collect();
            out.sort();
            out.dedup();
            out
        }

        Self {
            supported: collect(rustls::ALL_VERSIONS),
            enabled_by_default: collect(rustls::DEFAULT_VERSIONS),
        }
    }
}

// =============================================================================
// Plan
// =============================================================================

/// Outcome of the capability check performed at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TlsPlan {
    /// Use the library defaults, with `minimum` passed to the client builder.
    Default { minimum: TlsVersion },
    /// Restrict the enabled protocol set to exactly these versions.
    Restrict { versions: Vec<TlsVersion> },
}

impl TlsPlan {
    /// Decides how to enforce `minimum` given the library's capabilities.
    pub fn negotiate(minimum: TlsVersion, capabilities: &TlsCapabilities) -> Self {
        if capabilities.enabled_by_default.contains(&minimum) {
            return TlsPlan::Default { minimum };
        }

        if !capabilities.supported.contains(&minimum) {
            warn!(
                minimum = %minimum,
                supported = ?capabilities.supported,
                "Minimum TLS version not supported, using default TLS configuration"
            );
            return TlsPlan::Default { minimum };
        }

        let versions: Vec<TlsVersion> = capabilities
            .supported
            .iter()
            .copied()
            .filter(|v| *v >= minimum)
            .collect();

        TlsPlan::Restrict { versions }
    }

    /// Returns true if the plan patches the protocol set.
    pub fn is_restricted(&self) -> bool {
        matches!(self, TlsPlan::Restrict { .. })
    }
}

// =============================================================================
// Secure Transport Adapter
// =============================================================================

/// Errors building a restricted TLS configuration.
#[derive(Debug, Error)]
pub enum TlsSetupError {
    /// The platform trust store yielded no usable certificates.
    #[error("no usable trust roots ({ignored} certificates rejected)")]
    NoTrustRoots { ignored: usize },

    /// rustls rejected the protocol version list.
    #[error("unsupported protocol versions: {0}")]
    Protocol(String),
}

/// Applies a [`TlsPlan`] to a reqwest client builder.
pub struct SecureTransport;

impl SecureTransport {
    /// Runs the capability check and applies the resulting plan.
    ///
    /// Returns the (possibly patched) builder together with the plan that was
    /// actually applied, which is `Default` again if hardening fell back.
    pub fn configure(
        builder: reqwest::ClientBuilder,
        minimum: TlsVersion,
        capabilities: &TlsCapabilities,
    ) -> (reqwest::ClientBuilder, TlsPlan) {
        let plan = TlsPlan::negotiate(minimum, capabilities);
        Self::apply(builder, plan, minimum)
    }

    /// Applies an already negotiated plan.
    pub fn apply(
        builder: reqwest::ClientBuilder,
        plan: TlsPlan,
        minimum: TlsVersion,
    ) -> (reqwest::ClientBuilder, TlsPlan) {
        let versions = match plan {
            TlsPlan::Default { minimum } => {
                debug!(minimum = %minimum, "Using default TLS configuration");
                return (builder.min_tls_version(minimum.to_reqwest()), plan);
            }
            TlsPlan::Restrict { versions } => versions,
        };

        match restricted_client_config(&versions) {
            Ok(config) => {
                info!(versions = ?versions, "Restricted TLS protocol versions");
                (
                    builder.use_preconfigured_tls(config),
                    TlsPlan::Restrict { versions },
                )
            }
            Err(e) => {
                warn!(error = %e, "Error while restricting TLS versions, using default TLS configuration");
                (builder, TlsPlan::Default { minimum })
            }
        }
    }
}

/// Builds a rustls configuration enabling exactly `versions`, trusting the
/// platform's root certificates.
fn restricted_client_config(versions: &[TlsVersion]) -> Result<rustls::ClientConfig, TlsSetupError> {
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        debug!(error = %err, "Skipping unreadable platform certificate source");
    }

    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if added == 0 {
        return Err(TlsSetupError::NoTrustRoots { ignored });
    }

    let protocol_versions: Vec<&'static SupportedProtocolVersion> =
        versions.iter().map(|v| v.to_rustls()).collect();

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&protocol_versions)
    .map_err(|e| TlsSetupError::Protocol(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(config)
}
