//! Error taxonomy for DID resolution and PDS I/O.

use thiserror::Error;

/// Failures from the PDS Resolver. The Watcher itself never propagates
/// transport failures — it logs and keeps running — so this enum only
/// needs to serve `resolver` callers (the Manifest Builder, mainly).
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("could not resolve identifier {0}: no service entry in DID document")]
    NoServiceEntry(String),

    #[error("malformed DID document for {0}: {1}")]
    MalformedDocument(String, String),

    #[error("upstream returned {status} for {url}")]
    Upstream { status: u16, url: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("request to {url} failed after retries: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}
