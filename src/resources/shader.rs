//! Shader source retrieval

use std::path::{Path, PathBuf};

use crate::error::{RendererError, RendererResult};

/// Directory of WGSL sources, one file per shader: `<dir>/<name>.wgsl`
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    root: PathBuf,
}

impl ShaderLibrary {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.wgsl"))
    }

    /// Read the source of shader `name`; an unreadable or empty file is an error
    pub fn source(&self, name: &str) -> RendererResult<String> {
        match std::fs::read_to_string(self.path_of(name)) {
            Ok(source) if !source.trim().is_empty() => Ok(source),
            Ok(_) => Err(RendererError::ShaderSource(name.to_string())),
            Err(e) => {
                log::debug!("{}: {}", self.path_of(name).display(), e);
                Err(RendererError::ShaderSource(name.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_source_is_reported_by_name() {
        let library = ShaderLibrary::new("no/such/dir");
        let err = library.source("pbr").unwrap_err();
        assert_eq!(err.to_string(), "Cannot read shader source file: pbr");
    }

    #[test]
    fn test_bundled_shaders_are_readable() {
        let library = ShaderLibrary::new(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders"));
        for name in ["equirect2cube", "spmap", "irmap", "spbrdf", "skybox", "pbr", "tonemap"] {
            assert!(library.source(name).is_ok(), "{name}");
        }
    }
}
