//! tar.gz extraction for downloaded release artifacts.

use crate::errors::{FlexnodeError, FlexnodeResult};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

/// Extract a tar.gz archive into `destination`.
///
/// `strip_components` drops that many leading path components from every
/// entry, matching `tar --strip-components`. Entries escaping the destination
/// (absolute paths, `..`) are rejected.
pub fn extract_tar_gz(
    archive: &Path,
    destination: &Path,
    strip_components: usize,
) -> FlexnodeResult<()> {
    let file = File::open(archive).map_err(|e| {
        FlexnodeError::Archive(format!("failed to open {}: {}", archive.display(), e))
    })?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut tar = tar::Archive::new(decoder);
    tar.set_preserve_permissions(true);

    std::fs::create_dir_all(destination)?;

    for entry in tar
        .entries()
        .map_err(|e| FlexnodeError::Archive(format!("corrupt archive {}: {}", archive.display(), e)))?
    {
        let mut entry =
            entry.map_err(|e| FlexnodeError::Archive(format!("corrupt entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| FlexnodeError::Archive(format!("invalid entry path: {}", e)))?
            .into_owned();

        let Some(stripped) = strip_entry_path(&path, strip_components) else {
            continue;
        };

        let target = destination.join(&stripped);
        if !target.starts_with(destination) {
            return Err(FlexnodeError::Archive(format!(
                "entry {} escapes destination",
                path.display()
            )));
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target).map_err(|e| {
            FlexnodeError::Archive(format!("failed to unpack {}: {}", target.display(), e))
        })?;
    }
    Ok(())
}

/// Drop leading components; `None` when the entry has nothing left (e.g. the
/// stripped directories themselves) or contains traversal components.
fn strip_entry_path(path: &Path, strip_components: usize) -> Option<PathBuf> {
    let components: Vec<Component<'_>> = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return None;
    }
    if components.len() <= strip_components {
        return None;
    }
    Some(components[strip_components..].iter().collect())
}
