//! Support script emission
//!
//! Every emitted script is the source script with a shebang and a block of
//! injected shell assignments in front. Multi-line values use literal `\t`
//! and `\n` escapes inside one double-quoted string; the test shell expands
//! them at run time.

use crate::error::{OverlayError, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, trace};

/// Mode of every emitted script: rwxr-xr-x
pub const SCRIPT_MODE: u32 = 0o755;

/// Prefix shared by all support scripts
pub const SCRIPT_PREFIX: &str = "lava-";

/// Support scripts in `dir`, sorted by name. A missing directory has none.
pub fn list_scripts(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(OverlayError::Scripts {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut scripts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| OverlayError::Scripts {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_script = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with(SCRIPT_PREFIX));
        if is_script && path.is_file() {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

/// File name of a script as a string, empty when not UTF-8
pub fn script_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// Write `source` to `dest` behind a shebang and `preamble`, then set
/// [`SCRIPT_MODE`] once the content is complete.
pub async fn write_script(source: &Path, dest: &Path, shell: &str, preamble: &str) -> std::io::Result<()> {
    let body = fs::read(source).await?;
    let mut content = format!("#!{}\n\n{}", shell, preamble).into_bytes();
    content.extend_from_slice(&body);
    fs::write(dest, &content).await?;
    fs::set_permissions(dest, std::fs::Permissions::from_mode(SCRIPT_MODE)).await?;
    trace!(dest = %dest.display(), bytes = content.len(), "script written");
    Ok(())
}

/// Copy every script in `sources` into `bin`, in order, each behind the
/// preamble `inject` returns for its file name. A later source with the
/// same name overwrites an earlier one.
pub async fn emit_scripts<F>(sources: &[PathBuf], bin: &Path, shell: &str, inject: F) -> std::io::Result<Vec<PathBuf>>
where
    F: Fn(&str) -> String,
{
    fs::create_dir_all(bin).await?;
    let mut written = Vec::with_capacity(sources.len());
    for source in sources {
        let name = script_name(source);
        let dest = bin.join(name);
        if written.contains(&dest) {
            debug!(script = name, source = %source.display(), "replacing script");
        }
        write_script(source, &dest, shell, &inject(name)).await?;
        if !written.contains(&dest) {
            written.push(dest);
        }
    }
    Ok(written)
}

/// `NAME='value'`
pub fn assign(name: &str, value: &str) -> String {
    format!("{}='{}'\n", name, value)
}

/// `NAME="` newline, one `\tkey\tvalue\n` row per pair, closing `"`
pub fn table<'a>(name: &str, rows: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = format!("{}=\"\n", name);
    for (key, value) in rows {
        out.push_str(&format!("\\t{}\\t{}\\n", key, value));
    }
    out.push_str("\"\n");
    out
}

/// `NAME="line1\nline2\n"` on one physical line
pub fn lines<S: AsRef<str>>(name: &str, values: &[S]) -> String {
    let mut out = format!("{}=\"", name);
    for value in values {
        out.push_str(value.as_ref());
        out.push_str("\\n");
    }
    out.push_str("\"\n\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_list_scripts_sorted_and_filtered() {
        let temp = tempdir().unwrap();
        for name in ["lava-test-case", "lava-background", "README", "other-lava"] {
            std::fs::write(temp.path().join(name), "").unwrap();
        }
        std::fs::create_dir(temp.path().join("lava-dir")).unwrap();

        let scripts = list_scripts(temp.path()).unwrap();
        let names: Vec<&str> = scripts.iter().map(|p| script_name(p)).collect();
        assert_eq!(names, vec!["lava-background", "lava-test-case"]);
    }

    #[test]
    fn test_list_scripts_missing_dir() {
        let temp = tempdir().unwrap();
        assert!(list_scripts(&temp.path().join("absent")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_script_mode_and_header() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("lava-role");
        std::fs::write(&source, "echo $TARGET_ROLE\n").unwrap();
        std::fs::set_permissions(&source, std::fs::Permissions::from_mode(0o600)).unwrap();

        let dest = temp.path().join("out");
        write_script(&source, &dest, "/bin/sh", &assign("TARGET_ROLE", "server"))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(content, "#!/bin/sh\n\nTARGET_ROLE='server'\necho $TARGET_ROLE\n");
        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, SCRIPT_MODE);
    }

    #[tokio::test]
    async fn test_emit_scripts_last_source_wins() {
        let temp = tempdir().unwrap();
        let generic = temp.path().join("generic");
        let distro = temp.path().join("distro");
        std::fs::create_dir_all(&generic).unwrap();
        std::fs::create_dir_all(&distro).unwrap();
        std::fs::write(generic.join("lava-os-build"), "echo generic\n").unwrap();
        std::fs::write(generic.join("lava-test-case"), "echo case\n").unwrap();
        std::fs::write(distro.join("lava-os-build"), "echo debian\n").unwrap();

        let mut sources = list_scripts(&generic).unwrap();
        sources.extend(list_scripts(&distro).unwrap());
        let bin = temp.path().join("out/bin");
        let written = emit_scripts(&sources, &bin, "/bin/bash", |name| {
            if name == "lava-test-case" {
                assign("MARK", "1")
            } else {
                String::new()
            }
        })
        .await
        .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(
            std::fs::read_to_string(bin.join("lava-os-build")).unwrap(),
            "#!/bin/bash\n\necho debian\n"
        );
        assert_eq!(
            std::fs::read_to_string(bin.join("lava-test-case")).unwrap(),
            "#!/bin/bash\n\nMARK='1'\necho case\n"
        );
    }

    #[test]
    fn test_table_format() {
        let block = table("LAVA_STORAGE", [("SATA", "/dev/sda")]);
        assert_eq!(block, "LAVA_STORAGE=\"\n\\tSATA\\t/dev/sda\\n\"\n");
    }

    #[test]
    fn test_lines_format() {
        assert_eq!(
            lines("LAVA_VLAND_TAGS", &["eth1,trunk"]),
            "LAVA_VLAND_TAGS=\"eth1,trunk\\n\"\n\n"
        );
        assert_eq!(
            lines::<&str>("LAVA_VLAND_NAMES", &[]),
            "LAVA_VLAND_NAMES=\"\"\n\n"
        );
    }
}
