use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("package name must not be empty")]
    EmptyName,
    #[error("package version must not be empty")]
    EmptyVersion,
    #[error("archive path must not be empty")]
    EmptyArchivePath,
    #[error("legacy catalog cannot hold {0}")]
    LegacyField(&'static str),
}

/// One package's metadata row in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageRecord {
    /// Surrogate key assigned by the store on insert. Never reused,
    /// even after the record is deleted.
    pub id: i64,
    /// Display name, ie "gcc". Unique only in legacy (v1) catalogs.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque to the store; no ordering or semver meaning.
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Locator for the installable archive.
    pub archive_path: String,
    /// Entry point inside the unpacked archive, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<String>,
    /// CRC-32 of the archive content, supplied by the producer.
    pub crc: u32,
    /// Whether the archive bundles its own install script.
    pub has_installer: bool,
    /// Whether installation should register the executable on PATH.
    pub add_to_path: bool,
}

/// Insert input: a record before the store has assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NewPackage {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub version: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub archive_path: String,
    #[serde(default)]
    pub executable_path: Option<String>,
    pub crc: u32,
    pub has_installer: bool,
    #[serde(default)]
    pub add_to_path: bool,
}

/// Partial update. Outer `None` leaves a field unchanged; for optional
/// fields the inner `None` clears the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackagePatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub version: Option<String>,
    pub image_url: Option<Option<String>>,
    pub archive_path: Option<String>,
    pub executable_path: Option<Option<String>>,
    pub crc: Option<u32>,
    pub has_installer: Option<bool>,
    pub add_to_path: Option<bool>,
}

impl PackagePatch {
    pub fn is_empty(&self) -> bool {
        *self == PackagePatch::default()
    }
}

impl NewPackage {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(&self.name, &self.version, &self.archive_path)
    }

    /// Extra constraints when the target catalog is still at the legacy
    /// shape, which has no columns for these fields.
    pub fn validate_for_legacy(&self) -> Result<(), ValidationError> {
        self.validate()?;
        if self.executable_path.is_some() {
            return Err(ValidationError::LegacyField("executable_path"));
        }
        if self.add_to_path {
            return Err(ValidationError::LegacyField("add_to_path"));
        }
        Ok(())
    }
}

impl PackageRecord {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(&self.name, &self.version, &self.archive_path)
    }

    /// See [`NewPackage::validate_for_legacy`].
    pub fn validate_for_legacy(&self) -> Result<(), ValidationError> {
        self.validate()?;
        if self.executable_path.is_some() {
            return Err(ValidationError::LegacyField("executable_path"));
        }
        if self.add_to_path {
            return Err(ValidationError::LegacyField("add_to_path"));
        }
        Ok(())
    }

    /// Applies a patch in place. The result must be re-validated as a
    /// whole; a patch cannot touch `id`.
    pub fn apply(&mut self, patch: &PackagePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(version) = &patch.version {
            self.version = version.clone();
        }
        if let Some(image_url) = &patch.image_url {
            self.image_url = image_url.clone();
        }
        if let Some(archive_path) = &patch.archive_path {
            self.archive_path = archive_path.clone();
        }
        if let Some(executable_path) = &patch.executable_path {
            self.executable_path = executable_path.clone();
        }
        if let Some(crc) = patch.crc {
            self.crc = crc;
        }
        if let Some(has_installer) = patch.has_installer {
            self.has_installer = has_installer;
        }
        if let Some(add_to_path) = patch.add_to_path {
            self.add_to_path = add_to_path;
        }
    }
}

fn validate_fields(name: &str, version: &str, archive_path: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if version.trim().is_empty() {
        return Err(ValidationError::EmptyVersion);
    }
    if archive_path.trim().is_empty() {
        return Err(ValidationError::EmptyArchivePath);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> NewPackage {
        NewPackage {
            name: "editor".to_string(),
            version: "1.2.0".to_string(),
            archive_path: "editor.tar.gz".to_string(),
            crc: 0xdead_beef,
            has_installer: false,
            ..NewPackage::default()
        }
    }

    #[test]
    fn valid_draft_passes() {
        assert_eq!(draft().validate(), Ok(()));
    }

    #[test]
    fn empty_required_fields_are_rejected() {
        let mut pkg = draft();
        pkg.name = "  ".to_string();
        assert_eq!(pkg.validate(), Err(ValidationError::EmptyName));

        let mut pkg = draft();
        pkg.version = String::new();
        assert_eq!(pkg.validate(), Err(ValidationError::EmptyVersion));

        let mut pkg = draft();
        pkg.archive_path = String::new();
        assert_eq!(pkg.validate(), Err(ValidationError::EmptyArchivePath));
    }

    #[test]
    fn legacy_rejects_fields_it_cannot_store() {
        let mut pkg = draft();
        pkg.executable_path = Some("bin/editor".to_string());
        assert_eq!(
            pkg.validate_for_legacy(),
            Err(ValidationError::LegacyField("executable_path"))
        );

        let mut pkg = draft();
        pkg.add_to_path = true;
        assert_eq!(
            pkg.validate_for_legacy(),
            Err(ValidationError::LegacyField("add_to_path"))
        );

        assert_eq!(draft().validate_for_legacy(), Ok(()));
    }

    #[test]
    fn patch_merges_and_clears() {
        let mut record = PackageRecord {
            id: 7,
            name: "editor".to_string(),
            description: Some("a text editor".to_string()),
            version: "1.2.0".to_string(),
            image_url: None,
            archive_path: "editor.tar.gz".to_string(),
            executable_path: None,
            crc: 1,
            has_installer: false,
            add_to_path: false,
        };
        let patch = PackagePatch {
            version: Some("1.3.0".to_string()),
            description: Some(None),
            executable_path: Some(Some("bin/editor".to_string())),
            crc: Some(2),
            ..PackagePatch::default()
        };
        record.apply(&patch);
        assert_eq!(record.id, 7);
        assert_eq!(record.version, "1.3.0");
        assert_eq!(record.description, None);
        assert_eq!(record.executable_path.as_deref(), Some("bin/editor"));
        assert_eq!(record.crc, 2);
        assert_eq!(record.name, "editor");
    }

    #[test]
    fn empty_patch_is_detectable() {
        assert!(PackagePatch::default().is_empty());
        let patch = PackagePatch {
            crc: Some(0),
            ..PackagePatch::default()
        };
        assert!(!patch.is_empty());
    }
}
