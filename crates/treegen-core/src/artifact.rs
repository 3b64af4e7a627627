//! Artifact identity: per-submission base identifiers and the file paths
//! derived from them.
//!
//! Every submission gets one [`BaseId`]. All files belonging to that
//! submission live directly under the store root and share the identifier as
//! their stem:
//!
//! ```text
//! <root>/L3D_<32 hex>.l++    grammar source
//! <root>/L3D_<32 hex>.off+   mesh
//! <root>/L3D_<32 hex>.jpg    preview image
//! ```
//!
//! Identifiers are system-generated (UUID v4) and validated against a strict
//! grammar whenever they come back from outside, so no caller-supplied text
//! ever becomes part of a path.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ArtifactError, Result};

/// Prefix shared by every base identifier.
pub const BASE_ID_PREFIX: &str = "L3D_";

const MAX_ALLOCATION_ATTEMPTS: u32 = 8;

fn base_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^L3D_[0-9a-f]{32}$").expect("static pattern compiles"))
}

/// Unique per-submission token from which all artifact paths are derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BaseId(String);

impl BaseId {
    /// Generate a fresh identifier from 122 bits of OS randomness.
    pub fn generate() -> Self {
        Self(format!("{BASE_ID_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Parse an identifier, rejecting anything outside the identifier grammar.
    pub fn parse(s: &str) -> Result<Self> {
        if base_id_pattern().is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(ArtifactError::InvalidReference(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BaseId {
    type Error = ArtifactError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<BaseId> for String {
    fn from(id: BaseId) -> Self {
        id.0
    }
}

/// The pipeline stage input or output a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    /// Grammar text written from the submission.
    Source,
    /// Mesh produced by the build stage.
    Mesh,
    /// Preview image produced by the render stage.
    Image,
}

impl ArtifactRole {
    pub const ALL: [ArtifactRole; 3] = [Self::Source, Self::Mesh, Self::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactRole::Source => "source",
            ArtifactRole::Mesh => "mesh",
            ArtifactRole::Image => "image",
        }
    }

    /// File extension expected by the external tools.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactRole::Source => "l++",
            ArtifactRole::Mesh => "off+",
            ArtifactRole::Image => "jpg",
        }
    }

    /// Whether artifacts of this role may be handed to the serving endpoint.
    pub fn is_exposable(&self) -> bool {
        !matches!(self, ArtifactRole::Source)
    }

    fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.extension() == ext)
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The derived paths for one submission. Immutable once allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub base_id: BaseId,
    pub source: PathBuf,
    pub mesh: PathBuf,
    pub image: PathBuf,
}

impl ArtifactSet {
    pub fn path(&self, role: ArtifactRole) -> &Path {
        match role {
            ArtifactRole::Source => &self.source,
            ArtifactRole::Mesh => &self.mesh,
            ArtifactRole::Image => &self.image,
        }
    }
}

/// Opaque, externally resolvable reference to an exposable artifact.
///
/// Rendered as `<base_id>.<mesh|image>`. Source artifacts cannot be referenced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactRef {
    base_id: BaseId,
    role: ArtifactRole,
}

impl ArtifactRef {
    pub fn mesh(base_id: &BaseId) -> Self {
        Self {
            base_id: base_id.clone(),
            role: ArtifactRole::Mesh,
        }
    }

    pub fn image(base_id: &BaseId) -> Self {
        Self {
            base_id: base_id.clone(),
            role: ArtifactRole::Image,
        }
    }

    pub fn base_id(&self) -> &BaseId {
        &self.base_id
    }

    pub fn role(&self) -> ArtifactRole {
        self.role
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.base_id, self.role)
    }
}

impl FromStr for ArtifactRef {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ArtifactError::InvalidReference(s.to_string());
        let (id, role) = s.split_once('.').ok_or_else(invalid)?;
        let base_id = BaseId::parse(id).map_err(|_| invalid())?;
        match role {
            "mesh" => Ok(Self::mesh(&base_id)),
            "image" => Ok(Self::image(&base_id)),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for ArtifactRef {
    type Error = ArtifactError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ArtifactRef> for String {
    fn from(r: ArtifactRef) -> Self {
        r.to_string()
    }
}

/// Filesystem namespace holding every submission's artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| ArtifactError::Allocation {
            root: root.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministically map `(base_id, role)` to a path under the root.
    pub fn derive(&self, base_id: &BaseId, role: ArtifactRole) -> PathBuf {
        self.root.join(format!("{}.{}", base_id, role.extension()))
    }

    /// Allocate a fresh identifier and its artifact paths.
    ///
    /// The identifier is reserved on disk by exclusively creating an empty
    /// source file, so two allocations can never hand out the same stem even
    /// across processes sharing the root.
    pub fn allocate(&self) -> Result<ArtifactSet> {
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let base_id = BaseId::generate();
            let source = self.derive(&base_id, ArtifactRole::Source);
            match OpenOptions::new().write(true).create_new(true).open(&source) {
                Ok(_) => {
                    return Ok(ArtifactSet {
                        mesh: self.derive(&base_id, ArtifactRole::Mesh),
                        image: self.derive(&base_id, ArtifactRole::Image),
                        source,
                        base_id,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::warn!(base_id = %base_id, "artifact identifier collision, retrying");
                }
                Err(e) => {
                    return Err(ArtifactError::Allocation {
                        root: self.root.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(ArtifactError::Allocation {
            root: self.root.clone(),
            reason: format!("no free identifier after {MAX_ALLOCATION_ATTEMPTS} attempts"),
        })
    }

    /// Map a reference back to an existing file inside the store.
    ///
    /// Fails with `NotFound` if the artifact was never produced and with
    /// `OutsideNamespace` if the file resolves (e.g. through a symlink) to a
    /// location outside the root.
    pub fn resolve(&self, reference: &ArtifactRef) -> Result<PathBuf> {
        let path = self.derive(reference.base_id(), reference.role());
        let canonical = fs::canonicalize(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ArtifactError::NotFound(reference.to_string()),
            _ => ArtifactError::Io(e),
        })?;
        let root = fs::canonicalize(&self.root)?;
        if !canonical.starts_with(&root) || !canonical.is_file() {
            return Err(ArtifactError::OutsideNamespace(canonical));
        }
        Ok(canonical)
    }

    /// Delete artifact files last modified more than `max_age` ago.
    ///
    /// Only files whose names match the artifact naming scheme are touched.
    /// Returns the number of files removed.
    pub fn purge_older_than(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((stem, ext)) = name.split_once('.') else {
                continue;
            };
            if BaseId::parse(stem).is_err() || ArtifactRole::from_extension(ext).is_none() {
                continue;
            }

            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let age = now
                .duration_since(meta.modified()?)
                .unwrap_or(Duration::ZERO);
            if age > max_age {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("artifacts")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_generated_base_id_matches_grammar() {
        let id = BaseId::generate();
        assert!(id.as_str().starts_with(BASE_ID_PREFIX));
        assert_eq!(id.as_str().len(), BASE_ID_PREFIX.len() + 32);
        assert!(BaseId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_base_id_rejects_foreign_text() {
        for bad in [
            "",
            "L3D_",
            "../etc/passwd",
            "L3D_0123456789abcdef0123456789abcdeg",
            "L3D_0123456789ABCDEF0123456789ABCDEF",
            "L3D_0123456789abcdef0123456789abcdef/..",
            "x3D_0123456789abcdef0123456789abcdef",
        ] {
            assert!(BaseId::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_derive_shares_stem_across_roles() {
        let (_dir, store) = make_store();
        let id = BaseId::generate();
        let source = store.derive(&id, ArtifactRole::Source);
        let mesh = store.derive(&id, ArtifactRole::Mesh);
        let image = store.derive(&id, ArtifactRole::Image);

        assert_eq!(source.file_name().unwrap(), format!("{id}.l++").as_str());
        assert_eq!(mesh.file_name().unwrap(), format!("{id}.off+").as_str());
        assert_eq!(image.file_name().unwrap(), format!("{id}.jpg").as_str());
        assert_eq!(source.parent(), Some(store.root()));
        assert_eq!(store.derive(&id, ArtifactRole::Mesh), mesh);
    }

    #[test]
    fn test_allocate_reserves_source_file() {
        let (_dir, store) = make_store();
        let set = store.allocate().unwrap();
        assert!(set.source.exists());
        assert!(!set.mesh.exists());
        assert!(!set.image.exists());
        assert_eq!(set.path(ArtifactRole::Mesh), set.mesh.as_path());
    }

    #[test]
    fn test_allocate_yields_distinct_ids() {
        let (_dir, store) = make_store();
        let ids: std::collections::HashSet<_> = (0..200)
            .map(|_| store.allocate().unwrap().base_id)
            .collect();
        assert_eq!(ids.len(), 200);
    }

    #[cfg(unix)]
    #[test]
    fn test_allocate_fails_on_unwritable_root() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = make_store();
        fs::set_permissions(store.root(), fs::Permissions::from_mode(0o500)).unwrap();
        // root bypasses permission bits; nothing to assert in that case
        let probe = store.root().join("probe");
        if fs::write(&probe, b"x").is_ok() {
            return;
        }

        match store.allocate() {
            Err(ArtifactError::Allocation { .. }) => {}
            other => panic!("expected Allocation error, got {other:?}"),
        }
    }

    #[test]
    fn test_artifact_ref_display_and_parse() {
        let id = BaseId::generate();
        let mesh = ArtifactRef::mesh(&id);
        assert_eq!(mesh.to_string(), format!("{id}.mesh"));
        assert_eq!(mesh.to_string().parse::<ArtifactRef>().unwrap(), mesh);

        let image: ArtifactRef = format!("{id}.image").parse().unwrap();
        assert_eq!(image.role(), ArtifactRole::Image);
        assert_eq!(image.base_id(), &id);
    }

    #[test]
    fn test_artifact_ref_rejects_source_and_garbage() {
        let id = BaseId::generate();
        assert!(format!("{id}.source").parse::<ArtifactRef>().is_err());
        assert!(format!("{id}.l++").parse::<ArtifactRef>().is_err());
        assert!("../../etc/passwd.mesh".parse::<ArtifactRef>().is_err());
        assert!(format!("{id}").parse::<ArtifactRef>().is_err());
    }

    #[test]
    fn test_artifact_ref_serializes_as_string() {
        let id = BaseId::generate();
        let r = ArtifactRef::image(&id);
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, format!("\"{id}.image\""));
        assert!(serde_json::from_str::<ArtifactRef>("\"nope.image\"").is_err());
    }

    #[test]
    fn test_resolve_existing_artifact() {
        let (_dir, store) = make_store();
        let set = store.allocate().unwrap();
        fs::write(&set.image, b"jpeg").unwrap();

        let resolved = store.resolve(&ArtifactRef::image(&set.base_id)).unwrap();
        assert_eq!(resolved, fs::canonicalize(&set.image).unwrap());
    }

    #[test]
    fn test_resolve_missing_artifact() {
        let (_dir, store) = make_store();
        let set = store.allocate().unwrap();
        match store.resolve(&ArtifactRef::mesh(&set.base_id)) {
            Err(ArtifactError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let (dir, store) = make_store();
        let outside = dir.path().join("secret.txt");
        fs::write(&outside, b"secret").unwrap();

        let id = BaseId::generate();
        std::os::unix::fs::symlink(&outside, store.derive(&id, ArtifactRole::Image)).unwrap();

        match store.resolve(&ArtifactRef::image(&id)) {
            Err(ArtifactError::OutsideNamespace(_)) => {}
            other => panic!("expected OutsideNamespace, got {other:?}"),
        }
    }

    #[test]
    fn test_purge_only_touches_artifacts() {
        let (_dir, store) = make_store();
        let set = store.allocate().unwrap();
        fs::write(&set.mesh, b"OFF").unwrap();
        let unrelated = store.root().join("README");
        fs::write(&unrelated, b"keep me").unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let removed = store.purge_older_than(Duration::ZERO).unwrap();

        assert_eq!(removed, 2);
        assert!(!set.source.exists());
        assert!(!set.mesh.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_purge_keeps_recent_artifacts() {
        let (_dir, store) = make_store();
        let set = store.allocate().unwrap();
        let removed = store.purge_older_than(Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(set.source.exists());
    }
}
