//! File name resolution for downloads.
//!
//! Derives a safe, collision-free name for a download from the caller's
//! requested name, the server-suggested name (Content-Disposition header or
//! URL path) and the current contents of the target directory.

use std::path::{Component, Path, PathBuf};

use tracing::warn;
use url::Url;

use super::constants::{MAX_UNIQUE_NAME_ATTEMPTS, TEMP_EXTENSION, TEMP_EXTENSION_REPLACEMENT};

/// Result of resolving a download's final file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameResolution {
    /// Final, unique file name (without the temp marker).
    pub file_name: String,
    /// Whether the temp marker extension had to be replaced.
    pub replaced_temp_extension: bool,
}

/// Resolves file names against a single target directory.
///
/// Apart from existence checks in the directory, every operation is pure.
#[derive(Debug, Clone, Copy)]
pub struct NameResolver<'a> {
    directory: &'a Path,
}

impl<'a> NameResolver<'a> {
    /// Creates a resolver for the given target directory.
    #[must_use]
    pub fn new(directory: &'a Path) -> Self {
        Self { directory }
    }

    /// Produces the final, unique name for a download.
    ///
    /// Returns `None` when neither the request nor the server yields a name.
    #[must_use]
    pub fn resolve(&self, requested: Option<&str>, suggested: Option<&str>) -> Option<NameResolution> {
        let name = combine_requested_and_suggested(requested, suggested)?;

        let (name, replaced_temp_extension) = match replace_temp_extension(&name) {
            Some(replaced) => {
                warn!(
                    old_extension = TEMP_EXTENSION,
                    new_extension = TEMP_EXTENSION_REPLACEMENT,
                    "name of the downloading file had a prohibited extension, it was replaced"
                );
                (replaced, true)
            }
            None => (name, false),
        };

        let file_name = self.make_unique(&name)?;
        Some(NameResolution {
            file_name,
            replaced_temp_extension,
        })
    }

    /// Returns `name`, or `"stem (n).ext"` with the smallest free `n`.
    ///
    /// A name is free when neither `name` nor `name` + temp marker exists.
    #[must_use]
    pub fn make_unique(&self, name: &str) -> Option<String> {
        if self.is_free(name) {
            return Some(name.to_string());
        }

        let (stem, ext) = split_extension(name);
        (1..=MAX_UNIQUE_NAME_ATTEMPTS)
            .map(|n| format!("{stem} ({n}){ext}"))
            .find(|candidate| self.is_free(candidate))
    }

    /// Full path of a file inside the target directory.
    #[must_use]
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    fn is_free(&self, name: &str) -> bool {
        !self.directory.join(name).exists() && !self.directory.join(temp_file_name(name)).exists()
    }
}

/// Name of the file written while the download is in flight.
#[must_use]
pub fn temp_file_name(name: &str) -> String {
    format!("{name}{TEMP_EXTENSION}")
}

/// Returns true if the file name carries the in-flight temp marker.
#[must_use]
pub fn is_temp_file_name(name: &str) -> bool {
    name.ends_with(TEMP_EXTENSION)
}

/// Applies the requested-name rules on top of the server-suggested name.
///
/// - blank request: suggested name verbatim
/// - request with an extension: unchanged
/// - request without an extension: request + the suggested name's extension
pub(crate) fn combine_requested_and_suggested(
    requested: Option<&str>,
    suggested: Option<&str>,
) -> Option<String> {
    let suggested = suggested
        .map(sanitize_filename)
        .filter(|name| !is_blank_name(name));

    let requested = requested
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(sanitize_filename);

    let Some(requested) = requested else {
        return suggested;
    };

    if has_extension(&requested) {
        return Some(requested);
    }

    let ext = suggested
        .as_deref()
        .map(|name| split_extension(name).1)
        .unwrap_or_default();
    Some(format!("{requested}{ext}"))
}

/// Replaces a trailing temp marker with the neutral placeholder.
pub(crate) fn replace_temp_extension(name: &str) -> Option<String> {
    name.strip_suffix(TEMP_EXTENSION)
        .map(|stem| format!("{stem}{TEMP_EXTENSION_REPLACEMENT}"))
}

/// Splits `name` into stem and extension (extension keeps its leading dot).
///
/// A leading dot (`.bashrc`) or a trailing dot (`file.`) is not an extension.
pub(crate) fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

pub(crate) fn has_extension(name: &str) -> bool {
    !split_extension(name).1.is_empty()
}

/// Server-suggested name: Content-Disposition first, then the URL path.
#[must_use]
pub fn suggested_file_name(content_disposition: Option<&str>, url: &Url) -> Option<String> {
    content_disposition
        .and_then(parse_content_disposition)
        .filter(|name| !name.trim().is_empty())
        .or_else(|| file_name_from_url(url))
}

/// Returns true when the Content-Disposition type is `attachment`.
#[must_use]
pub fn is_attachment(content_disposition: &str) -> bool {
    content_disposition
        .split(';')
        .next()
        .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("attachment"))
}

/// Parses Content-Disposition header to extract filename.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987, preferred)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = remove_quotation_marks(encoded[..end].trim());
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

    let end = value.find(';').unwrap_or(value.len());
    let filename = value[..end].trim();
    (!filename.is_empty()).then(|| filename.to_string())
}

fn remove_quotation_marks(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Last non-empty URL path segment, percent-decoded.
pub(crate) fn file_name_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    Some(decoded)
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |`) and control characters with `_`, and rewrites dot
/// segments so the name can never leave the target directory.
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

    if sanitized.is_empty() {
        return sanitized;
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_blank_name(name: &str) -> bool {
    name.trim_matches(|c| c == '_' || char::is_whitespace(c))
        .is_empty()
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
