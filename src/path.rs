//! String paths on the storage device, always separated by `/`.

pub const SEPARATOR: char = '/';

const OCTET_STREAM: &str = "application/octet-stream";

/// Content types the device is expected to hold, checked before `mime_guess`
/// so that the common cases never depend on its database.
const MIME_TYPES: &[(&str, &str)] = &[
    ("mp3", "audio/mpeg"),
    ("wav", "audio/vnd.wav"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("bmp", "image/bmp"),
    ("txt", "text/plain"),
    ("log", "text/plain"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("mp4", "video/mp4"),
    ("avi", "video/x-msvideo"),
    ("webm", "video/webm"),
];

const FILE_TYPES: &[(&str, &str)] = &[
    ("mp3", "Audio (MP3)"),
    ("wav", "Audio (WAV)"),
    ("png", "Image (PNG)"),
    ("jpg", "Image (JPG)"),
    ("jpeg", "Image (JPEG)"),
    ("bmp", "Image (BMP)"),
    ("txt", "Text (TXT)"),
    ("log", "Text (LOG)"),
    ("csv", "Text (CSV)"),
    ("html", "Web (HTML)"),
    ("css", "Web (CSS)"),
    ("js", "Web (JS)"),
    ("json", "Data (JSON)"),
    ("xml", "Data (XML)"),
    ("zip", "Archive (ZIP)"),
    ("gz", "Archive (GZ)"),
    ("tar", "Archive (TAR)"),
    ("mp4", "Video (MP4)"),
    ("avi", "Video (AVI)"),
    ("webm", "Video (WEBM)"),
];

/// The last component of `path`, empty when there is no separator.
pub fn file_name(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(pos) => &path[pos + 1..],
        None => "",
    }
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with(SEPARATOR)
}

pub fn trailing_slash(path: &str) -> bool {
    path.ends_with(SEPARATOR)
}

/// Joins two paths with exactly one separator between them.
pub fn join(first: &str, second: &str) -> String {
    let mut joined = String::with_capacity(first.len() + second.len() + 1);
    joined.push_str(first);
    match (trailing_slash(first), is_absolute(second)) {
        (false, false) => joined.push(SEPARATOR),
        (true, true) => {
            joined.pop();
        }
        _ => {}
    }
    joined.push_str(second);
    joined
}

/// Strips `root` from the front of `path`; what is left is rooted at `/`.
pub fn remove_root_path(path: &str, root: &str) -> String {
    match path.strip_prefix(root) {
        None => path.to_string(),
        Some("") => SEPARATOR.to_string(),
        Some(rest) if is_absolute(rest) => rest.to_string(),
        Some(rest) => format!("{SEPARATOR}{rest}"),
    }
}

/// The non-empty components of `path`.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|part| !part.is_empty()).collect()
}

/// Extension of the file name, without the dot.
pub fn extension(path: &str) -> &str {
    let name = file_name(path);
    let name = if name.is_empty() { path } else { name };
    match name.rfind('.') {
        Some(pos) => &name[pos + 1..],
        None => "",
    }
}

/// Human readable kind of file, e.g. `Video (MP4)`.
pub fn file_type(path: &str) -> String {
    let ext = extension(path).to_ascii_lowercase();
    if ext.is_empty() {
        return "File".to_string();
    }
    match lookup(FILE_TYPES, &ext) {
        Some(kind) => kind.to_string(),
        None => format!("File ({ext})"),
    }
}

/// Content type served for `path`.
pub fn mime_type(path: &str) -> String {
    let ext = extension(path).to_ascii_lowercase();
    if ext.is_empty() {
        return OCTET_STREAM.to_string();
    }
    if let Some(mime) = lookup(MIME_TYPES, &ext) {
        return mime.to_string();
    }
    mime_guess::from_ext(&ext)
        .first_raw()
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

/// Maps a path requested over HTTP onto an absolute path below `root`.
///
/// Returns `None` if the request tries to climb out of `root`.
pub fn resolve(root: &str, requested: &str) -> Option<String> {
    let mut resolved = if root.is_empty() { SEPARATOR.to_string() } else { root.to_string() };
    for part in split_path(requested) {
        match part {
            "." => continue,
            ".." => return None,
            part => resolved = join(&resolved, part),
        }
    }
    Some(resolved)
}

fn lookup(table: &'static [(&'static str, &'static str)], ext: &str) -> Option<&'static str> {
    table.iter().find(|(key, _)| *key == ext).map(|(_, value)| *value)
}
