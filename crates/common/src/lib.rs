pub mod protocol;
pub mod token;

pub use protocol::*;
pub use token::{SessionToken, TokenError, TokenService};

/// Current wire-protocol version, negotiated via the `Brokk-CTL-Version`
/// header.
pub const PROTOCOL_VERSION_MAJOR: u32 = 1;
pub const PROTOCOL_VERSION_MINOR: u32 = 0;

pub fn protocol_version_string() -> String {
    format!("{PROTOCOL_VERSION_MAJOR}.{PROTOCOL_VERSION_MINOR}")
}

/// The capabilities this build understands; advertised in protocol
/// negotiation error bodies.
pub const SUPPORTED_CAPABILITIES: &[&str] = &[
    "LLM_TOKEN",
    "NOTIFICATION",
    "ERROR",
    "CONTEXT_BASELINE",
    "STATE_HINT",
    "CONFIRM_REQUEST",
];

/// Outcome of comparing a client-supplied protocol version against ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolCompat {
    Compatible,
    /// Same major, client's minor is newer than ours.
    UnsupportedFeature,
    /// Differing major version.
    Incompatible,
}

/// Parses a `Brokk-CTL-Version` header value (`"major.minor"`) and compares
/// it against this build's version.
pub fn check_protocol_version(header_value: &str) -> ProtocolCompat {
    let Some((major_s, minor_s)) = header_value.split_once('.') else {
        return ProtocolCompat::Incompatible;
    };
    let (Ok(major), Ok(minor)) = (major_s.parse::<u32>(), minor_s.parse::<u32>()) else {
        return ProtocolCompat::Incompatible;
    };
    if major != PROTOCOL_VERSION_MAJOR {
        ProtocolCompat::Incompatible
    } else if minor > PROTOCOL_VERSION_MINOR {
        ProtocolCompat::UnsupportedFeature
    } else {
        ProtocolCompat::Compatible
    }
}

#[cfg(test)]
mod version_tests {
    use super::*;

    #[test]
    fn same_version_is_compatible() {
        assert_eq!(check_protocol_version("1.0"), ProtocolCompat::Compatible);
    }

    #[test]
    fn newer_minor_same_major_is_unsupported_feature() {
        assert_eq!(check_protocol_version("1.7"), ProtocolCompat::UnsupportedFeature);
    }

    #[test]
    fn different_major_is_incompatible() {
        assert_eq!(check_protocol_version("2.0"), ProtocolCompat::Incompatible);
        assert_eq!(check_protocol_version("0.5"), ProtocolCompat::Incompatible);
    }

    #[test]
    fn garbage_header_is_incompatible() {
        assert_eq!(check_protocol_version("garbage"), ProtocolCompat::Incompatible);
    }
}
