//! Icon extraction from Windows executables.
//!
//! Delegated to the icoutils pair (`wrestool` to pull the ICO resource out
//! of the PE file, `icotool` to convert the largest frame to PNG). A missing
//! tool or a resource-less executable degrades to a warning at the capture
//! layer; packages without icons are still valid.

use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IconError {
    #[error("icon tool not found: {0} (install icoutils)")]
    ToolMissing(&'static str),
    #[error("{tool} failed for {path}: {detail}")]
    ExtractionFailed {
        tool: &'static str,
        path: String,
        detail: String,
    },
    #[error("icon I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extract the first icon group of `exe_path` as a PNG at `output_path`.
pub fn extract_icon(exe_path: &Path, output_path: &Path) -> Result<(), IconError> {
    let tmp = tempfile::Builder::new().suffix(".ico").tempfile()?;

    run_tool(
        "wrestool",
        Command::new("wrestool").args([
            "-x",
            "-t",
            "14",
            "-o",
            &tmp.path().to_string_lossy(),
            &exe_path.to_string_lossy(),
        ]),
        exe_path,
    )?;

    if tmp.as_file().metadata()?.len() == 0 {
        return Err(IconError::ExtractionFailed {
            tool: "wrestool",
            path: exe_path.to_string_lossy().into_owned(),
            detail: "executable carries no icon resource".to_owned(),
        });
    }

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // icotool writes one PNG per frame into -o dir; extract the largest
    // frame directly to the target file instead.
    run_tool(
        "icotool",
        Command::new("icotool").args([
            "-x",
            "--icon",
            "--index=1",
            "-o",
            &output_path.to_string_lossy(),
            &tmp.path().to_string_lossy(),
        ]),
        exe_path,
    )?;

    Ok(())
}

fn run_tool(name: &'static str, cmd: &mut Command, exe_path: &Path) -> Result<(), IconError> {
    let output = cmd.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IconError::ToolMissing(name)
        } else {
            IconError::Io(e)
        }
    })?;

    if !output.status.success() {
        return Err(IconError::ExtractionFailed {
            tool: name,
            path: exe_path.to_string_lossy().into_owned(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(())
}
