//! CDI spec files under a registry root directory.

use std::fs;
use std::path::{Path, PathBuf};

use accel_core::{Family, CDI_VENDOR};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{CdiError, CdiResult};
use crate::spec::{CdiDevice, Spec};
use crate::version::minimum_required_version;

const SPEC_EXTENSION: &str = "json";

/// A spec document and the file it lives in.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecFile {
    pub path: PathBuf,
    pub spec: Spec,
}

impl SpecFile {
    /// File name without extension; the key used by [`Registry::write_spec`].
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    }
}

/// In-memory view of every spec file under `root`.
#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
    specs: Vec<SpecFile>,
}

impl Registry {
    /// Open the registry at `root`, creating the directory if needed.
    pub fn open(root: &Path) -> CdiResult<Self> {
        fs::create_dir_all(root).map_err(|source| CdiError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let mut registry = Self {
            root: root.to_path_buf(),
            specs: Vec::new(),
        };
        registry.refresh();
        debug!(?root, specs = registry.specs.len(), "CDI registry opened");
        Ok(registry)
    }

    /// Reload every spec file; unreadable files are logged and skipped.
    pub fn refresh(&mut self) {
        self.specs = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.into_path())
            .filter(|path| is_spec_file(path))
            .filter_map(|path| match load_spec(&path) {
                Ok(spec) => Some(SpecFile { path, spec }),
                Err(e) => {
                    warn!(error = %e, "skipping CDI spec");
                    None
                }
            })
            .collect();
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn specs(&self) -> &[SpecFile] {
        &self.specs
    }

    /// Specs whose kind matches `kind`, e.g. `intel.com/qat`.
    pub fn specs_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a SpecFile> {
        self.specs.iter().filter(move |s| s.spec.kind == kind)
    }

    /// Stable spec name for a family: `intel.com-qat`.
    pub fn spec_name(family: Family) -> String {
        format!("{CDI_VENDOR}-{}", family.cdi_class())
    }

    pub fn spec_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{SPEC_EXTENSION}"))
    }

    pub fn spec(&self, name: &str) -> Option<&SpecFile> {
        let path = self.spec_path(name);
        self.specs.iter().find(|s| s.path == path)
    }

    /// Look up a device by qualified name, `vendor/class=name`.
    pub fn device<'a>(&'a self, qualified: &'a str) -> Option<(&'a SpecFile, &'a CdiDevice)> {
        let (kind, name) = qualified.split_once('=')?;
        self.specs_of_kind(kind)
            .find_map(|file| file.spec.device(name).map(|dev| (file, dev)))
    }

    /// Stamp the minimum version and persist `spec` as `name`. A spec with
    /// no devices is removed instead.
    pub fn write_spec(&mut self, mut spec: Spec, name: &str) -> CdiResult<()> {
        if spec.devices.is_empty() {
            debug!(%name, "no devices left in CDI spec, removing it");
            return self.remove_spec(name);
        }
        spec.cdi_version = minimum_required_version(&spec).to_string();

        let path = self.spec_path(name);
        let data = serde_json::to_vec_pretty(&spec).map_err(|source| CdiError::Serialize {
            name: name.to_string(),
            source,
        })?;
        let tmp = self.root.join(format!(".{name}.{SPEC_EXTENSION}.tmp"));
        fs::write(&tmp, data).map_err(|source| CdiError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| CdiError::Io {
            path: path.clone(),
            source,
        })?;

        match self.specs.iter_mut().find(|s| s.path == path) {
            Some(existing) => existing.spec = spec,
            None => self.specs.push(SpecFile { path, spec }),
        }
        debug!(%name, "CDI spec written");
        Ok(())
    }

    pub fn remove_spec(&mut self, name: &str) -> CdiResult<()> {
        let path = self.spec_path(name);
        match fs::remove_file(&path) {
            Ok(()) => info!(?path, "CDI spec removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(CdiError::Io { path, source }),
        }
        self.specs.retain(|s| s.path != path);
        Ok(())
    }
}

fn is_spec_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    !hidden && path.is_file() && path.extension().is_some_and(|e| e == SPEC_EXTENSION)
}

fn load_spec(path: &Path) -> CdiResult<Spec> {
    let data = fs::read(path).map_err(|source| CdiError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| CdiError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ContainerEdits, DeviceNode};

    fn device(name: &str) -> CdiDevice {
        CdiDevice::new(
            name,
            ContainerEdits {
                device_nodes: vec![DeviceNode::char_device(format!("/dev/vfio/{name}"), None)],
                ..Default::default()
            },
        )
    }

    #[test]
    fn write_stamps_version_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::open(dir.path()).unwrap();
        let mut spec = Spec::new(Family::Qat.cdi_kind());
        spec.devices.push(device("qatvf-0000-4b-00-1"));
        registry.write_spec(spec, "intel.com-qat").unwrap();

        let reopened = Registry::open(dir.path()).unwrap();
        let file = reopened.spec("intel.com-qat").unwrap();
        assert_eq!(file.spec.cdi_version, "0.3.0");
        assert_eq!(file.name(), "intel.com-qat");
        assert!(reopened.device("intel.com/qat=qatvf-0000-4b-00-1").is_some());
        assert!(reopened.device("intel.com/gpu=qatvf-0000-4b-00-1").is_none());
    }

    #[test]
    fn empty_spec_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::open(dir.path()).unwrap();
        let mut spec = Spec::new(Family::Qat.cdi_kind());
        spec.devices.push(device("a"));
        registry.write_spec(spec.clone(), "intel.com-qat").unwrap();
        assert!(registry.spec_path("intel.com-qat").exists());

        spec.devices.clear();
        registry.write_spec(spec, "intel.com-qat").unwrap();
        assert!(!registry.spec_path("intel.com-qat").exists());
        assert!(registry.specs().is_empty());
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        assert!(registry.specs().is_empty());
    }

    #[test]
    fn spec_names_are_stable() {
        assert_eq!(Registry::spec_name(Family::Gaudi), "intel.com-gaudi");
        assert_eq!(Registry::spec_name(Family::Qat), "intel.com-qat");
    }
}
