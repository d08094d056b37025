//! Save-directory resolution, filename extraction and collision-free paths.
//!
//! Downloads land in a platform download (or documents) directory unless the
//! session overrides it. When a name is already taken the stager appends a
//! ` (n)` suffix before the extension, `n` bounded by [`MAX_DUPLICATE_SUFFIX`].

use std::path::{Path, PathBuf};

use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use thiserror::Error;
use tracing::debug;

use super::constants::MAX_DUPLICATE_SUFFIX;

/// Errors raised while choosing where a file goes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    /// Neither a download nor a documents directory exists on this platform.
    #[error("no download or documents directory available")]
    NoSaveDirectory,

    /// No explicit name was given and the response carried none.
    #[error("no file name in request or content-disposition header")]
    NoFileName,

    /// Every suffix up to the limit is already taken.
    #[error("all {limit} duplicate names for {name} are taken")]
    SuffixesExhausted {
        /// The requested file name.
        name: String,
        /// The suffix limit that was reached.
        limit: u32,
    },
}

/// Computes destination paths for downloaded and decoded files.
#[derive(Debug, Clone, Default)]
pub struct FileStager {
    save_dir: Option<PathBuf>,
}

impl FileStager {
    /// Creates a stager that saves into the platform directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stager that always saves into `dir`.
    #[must_use]
    pub fn with_save_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: Some(dir.into()),
        }
    }

    /// Returns the directory downloads are written to.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::NoSaveDirectory`] when no override is configured
    /// and the platform has neither a download nor a documents directory.
    pub fn resolve_save_directory(&self) -> Result<PathBuf, StageError> {
        if let Some(dir) = &self.save_dir {
            return Ok(dir.clone());
        }
        dirs::download_dir()
            .or_else(dirs::document_dir)
            .ok_or(StageError::NoSaveDirectory)
    }

    /// Resolves the file path for a download.
    ///
    /// The name is `explicit_name` when given, otherwise the
    /// `content-disposition` filename. If that file exists, suffixes
    /// `name (1).ext`, `name (2).ext`, ... are scanned up to the first unused
    /// one. With `bump` the next free name is returned (used before writing);
    /// without it the highest existing name is returned (used to locate a file
    /// that was already written), the bare name when no suffix is in use.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::NoFileName`] when no name can be determined and
    /// [`StageError::SuffixesExhausted`] when `bump` finds every suffix taken.
    pub fn resolve_file_path(
        &self,
        explicit_name: Option<&str>,
        directory: &Path,
        response_headers: &HeaderMap,
        bump: bool,
    ) -> Result<PathBuf, StageError> {
        let name = explicit_name
            .map(str::to_string)
            .or_else(|| {
                response_headers
                    .get(CONTENT_DISPOSITION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(parse_content_disposition)
            })
            .map(|name| sanitize_filename(&name))
            .filter(|name| !name.is_empty())
            .ok_or(StageError::NoFileName)?;

        let base_path = directory.join(&name);
        if !base_path.exists() {
            return Ok(base_path);
        }

        let (stem, ext) = split_extension(&name);
        let suffixed = |n: u32| directory.join(format!("{stem} ({n}){ext}"));

        let mut highest = 0;
        for n in 1..=MAX_DUPLICATE_SUFFIX {
            if suffixed(n).exists() {
                highest = n;
            } else {
                break;
            }
        }
        debug!(name = %name, highest, bump, "resolved duplicate suffix");

        if !bump {
            return Ok(if highest == 0 { base_path } else { suffixed(highest) });
        }

        let next = highest + 1;
        if next > MAX_DUPLICATE_SUFFIX {
            return Err(StageError::SuffixesExhausted {
                name,
                limit: MAX_DUPLICATE_SUFFIX,
            });
        }
        Ok(suffixed(next))
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

/// Parses Content-Disposition header to extract filename.
///
/// Handles both:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    // Try filename*= first (RFC 5987 encoded)
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // Format: charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = encoded[..end].trim().trim_matches('"');
            if let Ok(decoded) = urlencoding::decode(encoded_name) {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + 9..].trim();
    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        return Some(stripped[..end].to_string());
    }

    // Unquoted - take until ; or end
    let end = value.find(';').unwrap_or(value.len());
    let filename = value[..end].trim().trim_matches('\'');
    (!filename.is_empty()).then(|| filename.to_string())
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized == "." || sanitized == ".." {
        return sanitized.replace('.', "_");
    }
    sanitized
}
