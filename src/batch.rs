//! Batch mode: many images from a list file.
//!
//! Each non-blank line of the list holds one job, either a bare page URL or a
//! URL and an output file name separated by a tab:
//!
//! ```text
//! https://example.com/viewer?id=1
//! https://example.com/viewer?id=2	second.png
//! ```

use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// One image to untile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub reference: String,
    pub output: PathBuf,
}

/// Parse a job list.
///
/// Jobs without a name are numbered after `output`: `out.jpg` gives
/// `out_001.jpg`, `out_002.jpg` and so on (counting every job, named or
/// not). Named jobs are written next to `output`; a name without an
/// extension gets `.jpg`.
pub fn parse_job_list(content: &str, output: &Path) -> Vec<Job> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(index, line)| {
            let (reference, name) = match line.split_once('\t') {
                Some((reference, name)) => (reference.trim(), Some(name.trim())),
                None => (line, None),
            };

            let output = match name.filter(|n| !n.is_empty()) {
                Some(name) => named_output(output, name),
                None => numbered_output(output, index + 1),
            };

            Job {
                reference: reference.to_string(),
                output,
            }
        })
        .collect()
}

/// Read and parse a job list file.
pub async fn read_job_list(list: &Path, output: &Path) -> Result<Vec<Job>, StoreError> {
    let content = tokio::fs::read_to_string(list)
        .await
        .map_err(|source| StoreError::Io {
            path: list.to_path_buf(),
            source,
        })?;
    Ok(parse_job_list(&content, output))
}

/// `<stem>_<NNN><ext>` next to `output`, `number` starting at 1.
pub fn numbered_output(output: &Path, number: usize) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{}_{:03}.{}", stem, number, ext.to_string_lossy()),
        None => format!("{}_{:03}", stem, number),
    };
    output.with_file_name(name)
}

fn named_output(output: &Path, name: &str) -> PathBuf {
    let dir = output.parent().unwrap_or_else(|| Path::new(""));
    let mut path = dir.join(name);
    if path.extension().is_none() {
        path.set_extension("jpg");
    }
    path
}
