//! Brook sync error module

use crate::keys::AddressFormat;

/// Top level error enumerating any error that may occur during sync
#[derive(Debug, thiserror::Error)]
pub enum SyncError<E>
where
    E: std::fmt::Debug + std::fmt::Display,
{
    /// Server error.
    #[error("server error. {0}")]
    ServerError(#[from] ServerError),
    /// Config error.
    #[error("config error. {0}")]
    ConfigError(#[from] ConfigError),
    /// Address derivation error.
    #[error("address derivation error. {0}")]
    DerivationError(#[from] DerivationError),
    /// The store is missing a record the engine previously derived or persisted.
    #[error("inconsistent store state. {0}")]
    InconsistentStore(String),
    /// Store error.
    #[error("store error. {0}")]
    StoreError(E),
}

/// Server errors.
///
/// Errors associated with connecting to the indexer and receiving invalid data.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Server request failed.
    #[error("server request failed. {0}")]
    RequestFailed(String),
    /// Server returned data that could not be interpreted.
    #[error("server returned malformed data. {0}")]
    MalformedResponse(String),
    /// Fetcher task was dropped.
    #[error("fetcher task was dropped.")]
    FetcherDropped,
}

/// Configuration and engine state errors.
///
/// All variants are fatal for [`crate::sync::SyncEngine::start`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Unsupported address format.
    #[error("unsupported address format. {0}")]
    UnsupportedFormat(String),
    /// Unknown purpose type.
    #[error("unknown purpose type. {0}")]
    UnknownPurpose(String),
    /// No extended public key was supplied for a declared format.
    #[error("missing extended public key for format {0}")]
    MissingKey(AddressFormat),
    /// The gap limit must be non-zero.
    #[error("gap limit must be non-zero")]
    ZeroGapLimit,
    /// Sync is already running.
    #[error("sync is already running")]
    AlreadyRunning,
    /// Sync is not running.
    #[error("sync is not running")]
    NotRunning,
}

/// Address derivation and encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    /// Child key derivation failed.
    #[error("bip32 derivation failed. {0}")]
    Bip32(#[from] bitcoin::bip32::Error),
    /// No extended public key is loaded for the requested format.
    #[error("no extended public key for format {0}")]
    MissingKey(AddressFormat),
    /// Failed to parse an address string.
    #[error("failed to parse address. {0}")]
    AddressParse(#[from] bitcoin::address::ParseError),
    /// A script pubkey did not correspond to a known address form.
    #[error("script pubkey does not encode an address. {0}")]
    AddressFromScript(#[from] bitcoin::address::FromScriptError),
    /// Invalid script pubkey hex.
    #[error("invalid script pubkey hex. {0}")]
    ScriptHex(#[from] hex::FromHexError),
    /// The requested change index is not a supported branch of the format.
    #[error("change index {change} is not supported by format {format}")]
    UnsupportedBranch {
        /// Format the path belongs to.
        format: AddressFormat,
        /// Rejected change index.
        change: u32,
    },
}
