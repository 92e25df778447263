use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::FileOptions;

/// Test context with temporary directory management.
/// Automatically cleans up when dropped.
pub struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a fresh temporary directory
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Get the root path of the temporary directory
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a file with content at the given relative path
    pub fn create_file(&self, relative_path: &str, content: &str) -> PathBuf {
        self.create_file_bytes(relative_path, content.as_bytes())
    }

    /// Create a file with binary content at the given relative path
    pub fn create_file_bytes(&self, relative_path: &str, content: &[u8]) -> PathBuf {
        let path = self.root().join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Create a DFU package zip holding an optional manifest.json and the
    /// given files.
    pub fn create_package(
        &self,
        name: &str,
        manifest: Option<&str>,
        files: &[(&str, &[u8])],
    ) -> PathBuf {
        let path = self.root().join(name);
        let file = fs::File::create(&path).expect("Failed to create zip");
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);

        if let Some(manifest) = manifest {
            zip.start_file("manifest.json", options)
                .expect("Failed to start manifest");
            zip.write_all(manifest.as_bytes())
                .expect("Failed to write manifest");
        }
        for (entry, content) in files {
            zip.start_file(*entry, options).expect("Failed to start entry");
            zip.write_all(content).expect("Failed to write entry");
        }

        zip.finish().expect("Failed to finish zip");
        path
    }

    /// Get full path for a relative path
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
