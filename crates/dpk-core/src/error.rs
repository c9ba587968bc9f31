use dpk_domain::CodecError;

/// Errors surfaced by dpk operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DpkError {
    #[error("[DPK100] profile catalog is not initialized (offline, or the client could not be built)")]
    NotInitialized,
    #[error("[DPK110] fetching {url} failed: {reason}")]
    TransientFetch { url: String, reason: String },
    #[error("[DPK120] revision {name} ({revision}) cannot be read: {reason}")]
    MalformedRevision {
        name: String,
        revision: String,
        reason: String,
    },
    #[error("[DPK200] blob '{name}' in {dir}: {reason}")]
    Io {
        dir: String,
        name: String,
        reason: String,
    },
    #[error("[DPK300] snapshot {name} is read-only")]
    IllegalMutation { name: String },
    #[error("[DPK310] failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },
    #[error("[DPK400] {path} is not a DE1 installation: {reason}")]
    InvalidInstallation { path: String, reason: String },
    #[error("[DPK410] no tag matches '{0}'")]
    UnknownTag(String),
    #[error("[DPK411] no snapshot named '{0}'")]
    UnknownSnapshot(String),
    #[error("[DPK900] background worker failed: {0}")]
    Worker(String),
}

impl DpkError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "DPK100",
            Self::TransientFetch { .. } => "DPK110",
            Self::MalformedRevision { .. } => "DPK120",
            Self::Io { .. } => "DPK200",
            Self::IllegalMutation { .. } => "DPK300",
            Self::Decode { .. } => "DPK310",
            Self::InvalidInstallation { .. } => "DPK400",
            Self::UnknownTag(_) => "DPK410",
            Self::UnknownSnapshot(_) => "DPK411",
            Self::Worker(_) => "DPK900",
        }
    }

    /// Whether the error stems from user input rather than the environment.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized
                | Self::InvalidInstallation { .. }
                | Self::UnknownTag(_)
                | Self::UnknownSnapshot(_)
                | Self::IllegalMutation { .. }
        )
    }

    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Re-run without --offline / set DPK_ONLINE=1."),
            Self::TransientFetch { .. } => {
                Some("Check network access; set DPK_GITHUB_TOKEN if the API rate limit was hit.")
            }
            Self::InvalidInstallation { .. } => {
                Some("Point --root / DPK_ROOT at the folder that contains version.tcl.")
            }
            Self::UnknownTag(_) => Some("List available tags with `dpk tags`."),
            Self::UnknownSnapshot(_) => Some("List snapshots with `dpk backups`."),
            _ => None,
        }
    }

    pub(crate) fn decode(what: impl Into<String>, err: &CodecError) -> Self {
        Self::Decode {
            what: what.into(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn io(dir: impl Into<String>, name: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Io {
            dir: dir.into(),
            name: name.into(),
            reason: format!("{err:#}"),
        }
    }
}
