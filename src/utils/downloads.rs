//! Download target resolution.
//!
//! Inbound files land in the platform downloads directory (created 0700
//! if missing) or a configured override. Peer-supplied names are never
//! trusted as paths: only the final component is honoured, degenerate
//! names fall back to a fixed base, and collisions get a numeric suffix
//! so an existing file is never overwritten.

use crate::core::config::FALLBACK_FILE_NAME;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tracing::debug;

pub struct Downloads {
    override_dir: Option<PathBuf>,
}

impl Downloads {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self { override_dir }
    }

    /// Resolve the downloads directory, creating it if absent.
    pub fn dir(&self) -> Result<PathBuf> {
        let dir = match &self.override_dir {
            Some(d) => d.clone(),
            None => dirs::download_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
                .ok_or_else(|| anyhow!("no downloads directory available"))?,
        };

        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating downloads directory {}", dir.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                    .with_context(|| format!("restricting {}", dir.display()))?;
            }
            debug!(event = "downloads_dir_created", dir = %dir.display());
        }

        Ok(dir)
    }

    /// Collision-free target path for a peer-offered file name.
    pub fn unique_path(&self, offered_name: &str) -> Result<PathBuf> {
        let dir = self.dir()?;
        let base = sanitize_file_name(offered_name);

        let candidate = dir.join(&base);
        if !candidate.exists() {
            return Ok(candidate);
        }

        let (stem, ext) = match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
            _ => (base.clone(), String::new()),
        };

        for n in 1..u32::MAX {
            let candidate = dir.join(format!("{stem}-{n}{ext}"));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(anyhow!("no free file name for {base} in {}", dir.display()))
    }
}

/// Strip everything but the final path component; degenerate names fall
/// back to [`FALLBACK_FILE_NAME`].
fn sanitize_file_name(offered: &str) -> String {
    let base = offered
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        FALLBACK_FILE_NAME.to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_downloads() -> (Downloads, PathBuf) {
        let dir = std::env::temp_dir().join(format!("jabberdrop_test_dl_{}", Uuid::new_v4()));
        (Downloads::new(Some(dir.clone())), dir)
    }

    #[test]
    fn test_sanitize_plain_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
    }

    #[test]
    fn test_sanitize_strips_path_components() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("/tmp/evil"), "evil");
        assert_eq!(sanitize_file_name("c:\\users\\evil.exe"), "evil.exe");
    }

    #[test]
    fn test_sanitize_degenerate_names() {
        assert_eq!(sanitize_file_name(""), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("   "), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("dir/"), FALLBACK_FILE_NAME);
    }

    #[test]
    fn test_dir_created_on_demand() {
        let (dl, dir) = test_downloads();
        assert!(!dir.exists());
        assert_eq!(dl.dir().unwrap(), dir);
        assert!(dir.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unique_path_appends_counter() {
        let (dl, dir) = test_downloads();

        let first = dl.unique_path("x.txt").unwrap();
        assert_eq!(first, dir.join("x.txt"));
        std::fs::write(&first, b"taken").unwrap();

        let second = dl.unique_path("x.txt").unwrap();
        assert_eq!(second, dir.join("x-1.txt"));
        std::fs::write(&second, b"taken").unwrap();

        let third = dl.unique_path("x.txt").unwrap();
        assert_eq!(third, dir.join("x-2.txt"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unique_path_no_extension() {
        let (dl, dir) = test_downloads();

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("notes"), b"taken").unwrap();
        assert_eq!(dl.unique_path("notes").unwrap(), dir.join("notes-1"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unique_path_hidden_file() {
        let (dl, dir) = test_downloads();

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(".bashrc"), b"taken").unwrap();
        // A leading-dot name has no stem; the counter goes after the whole name.
        assert_eq!(dl.unique_path(".bashrc").unwrap(), dir.join(".bashrc-1"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
