#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! Data model of the DE1 profile library: profiles, catalog tags, the
//! deduplicated content cache, and the gzip+JSON document codec.

pub mod codec;
pub mod content_cache;
pub mod library;
pub mod profile;
pub mod tag;

pub use codec::{decode_document, encode_document, BlobMap, CodecError};
pub use content_cache::ContentCache;
pub use library::{next_version, version_stamp, ProfileLibrary, PROFILE_LIB_FILE};
pub use profile::{resolve_display_name, Profile, TITLE_MARKER, UNKNOWN_TITLE};
pub use tag::{millis_to_datetime, Tag};
