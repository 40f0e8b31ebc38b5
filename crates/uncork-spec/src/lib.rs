//! Manifest schema, path tokenization, and tree layouts for uncork.
//!
//! This crate defines the data layer shared by capture, the overlay runtime,
//! and the package builders: the `Manifest` (single source of truth for every
//! built package), the reversible path `Tokenizer`, and the fixed directory
//! layouts of the intermediate representation and installed packages.

pub mod layout;
pub mod manifest;
pub mod token;
pub mod types;

pub use layout::{InstallLayout, IntermediateLayout, UserDataLayout};
pub use manifest::{
    AppMetadata, Executable, InstallConfig, Manifest, ManifestError, PrefixInfo, WineConfig,
    MANIFEST_FILE, SCHEMA_VERSION,
};
pub use token::{resolve, RealUser, Token, TokenError, TokenMap, Tokenizer, HOME_TOKEN, USER_TOKEN};
pub use types::{ExeId, PackageName};

use std::path::Path;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// On Linux with ext4 `data=ordered` (the default), renames are usually
/// durable without an explicit dir fsync, but POSIX does not guarantee this.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}
