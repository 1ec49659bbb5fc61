//! The `api` file: where the sandbox discovers the host API address.
//!
//! Written once after the server binds, containing the bound multiaddress
//! (e.g. `/ip4/127.0.0.1/tcp/5001`), and removed during teardown.

use std::io;
use std::path::{Path, PathBuf};

use browsernode_core::BindAddress;

/// File name inside the repository directory.
pub const ADDRESS_FILE_NAME: &str = "api";

#[derive(Debug, Clone)]
pub struct AddressFile {
    path: PathBuf,
}

impl AddressFile {
    /// The address file inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(ADDRESS_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `addr` in multiaddress form, replacing any previous content.
    pub async fn write(&self, addr: &BindAddress) -> io::Result<()> {
        tokio::fs::write(&self.path, addr.to_string()).await
    }

    /// Reads the stored address back.
    pub async fn read(&self) -> io::Result<String> {
        tokio::fs::read_to_string(&self.path).await
    }

    /// Deletes the file.
    pub async fn remove(&self) -> io::Result<()> {
        tokio::fs::remove_file(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read_is_parseable_multiaddr() {
        let dir = TempDir::new().unwrap();
        let file = AddressFile::in_dir(dir.path());
        let addr: BindAddress = "/ip4/127.0.0.1/tcp/45123".parse().unwrap();

        file.write(&addr).await.unwrap();
        let stored: BindAddress = file.read().await.unwrap().parse().unwrap();

        assert_eq!(stored, addr);
        assert_eq!(file.path(), dir.path().join("api"));
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let dir = TempDir::new().unwrap();
        let file = AddressFile::in_dir(dir.path());
        file.write(&"/ip4/127.0.0.1/tcp/1".parse().unwrap()).await.unwrap();

        file.remove().await.unwrap();

        assert!(!file.path().exists());
        assert!(file.remove().await.is_err(), "second removal reports NotFound");
    }
}
