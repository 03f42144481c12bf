use thiserror::Error;

/// The single error category exposed by `graphydb`.
///
/// Storage-engine errors from `rusqlite` and attribute (de)serialization errors from
/// `serde_json` propagate unchanged through the `#[from]` variants below. `Other` is a catch-all
/// for errors that don't warrant their own variant (glob compilation, ad-hoc validation) -- the
/// same role `anyhow::Error` plays in SpacetimeDB's per-crate error enums. `GraphyDbError` itself
/// implements `std::error::Error`, so callers who don't need to match on a specific variant can
/// also propagate it through `anyhow::Result` with a plain `?`.
#[derive(Error, Debug)]
pub enum GraphyDbError {
    #[error("pattern error: {0}")]
    Pattern(String),

    #[error("edge references node `{uid}` which does not exist")]
    MissingNodeRef { uid: String },

    #[error("node `{uid}` is still connected; delete incident edges first or pass disconnect=true")]
    StillConnected { uid: String },

    #[error("unknown undo action: journal record had neither `+` nor `-`, or referenced a uid that could not be resolved")]
    UnknownUndoAction,

    #[error("node or edge must be created with a non-empty kind")]
    InvalidKind,

    #[error("key `{0}` not found")]
    KeyNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("attribute (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GraphyDbError>;
