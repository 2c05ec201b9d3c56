//! Upload preparation: gzip unwrapping and media type resolution

use std::io::Read;
use std::path::Path;

use bytes::Bytes;
use flate2::read::GzDecoder;

use crate::engine::PartitionInput;
use crate::error::ApiError;

/// Extensions whose type must not depend on mime_guess's table
const EXTENSION_TYPES: &[(&str, &str)] = &[
    ("bmp", "image/bmp"),
    ("csv", "application/csv"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("eml", "message/rfc822"),
    ("epub", "application/epub"),
    ("gz", "application/gzip"),
    ("heic", "image/heic"),
    ("md", "text/markdown"),
    ("msg", "application/x-ole-storage"),
    ("odt", "application/vnd.oasis.opendocument.text"),
    ("org", "text/org"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    ("rst", "text/prs.fallenstein.rst"),
    ("rtf", "application/rtf"),
    ("tsv", "text/tab-separated-values"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("xml", "text/xml"),
];

const GZIP: &str = "application/gzip";
const OCTET_STREAM: &str = "application/octet-stream";
const OUTLOOK_MSG: &str = "application/x-ole-storage";

/// One `files` part as received
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            data: data.into(),
        }
    }

    pub fn is_gzip(&self) -> bool {
        self.content_type.as_deref().map(essence).as_deref() == Some(GZIP) || self.filename.ends_with(".gz")
    }

    pub fn basename(&self) -> &str {
        basename(&self.filename)
    }
}

/// Final path component of an uploaded name
pub fn basename(filename: &str) -> &str {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(filename)
}

/// Guess a media type from a file name
pub fn guess_mime(filename: &str) -> Option<String> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)?;

    EXTENSION_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| mime.to_string())
        .or_else(|| mime_guess::from_ext(&extension).first_raw().map(str::to_string))
}

/// Media type without parameters, lowercased (`Text/Plain; charset=utf-8` -> `text/plain`)
pub fn essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

/// Declared type unless it is missing or generic, then a guess from the name.
/// Outlook `.msg` files are always reported as OLE storage.
pub fn resolve_mime(filename: &str, declared: Option<&str>) -> Option<String> {
    if filename.ends_with(".msg") {
        return Some(OUTLOOK_MSG.to_string());
    }

    match declared.map(essence) {
        Some(declared) if !declared.is_empty() && declared != OCTET_STREAM => Some(declared),
        _ => guess_mime(filename),
    }
}

/// Decompress a gzip upload; the result carries the inner file's name and type.
///
/// Blocking; stops with `UploadTooLarge` once the output passes `max_bytes`.
pub fn gunzip(
    file: UploadedFile,
    uncompressed_content_type: Option<&str>,
    max_bytes: usize,
) -> Result<UploadedFile, ApiError> {
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut data = Vec::new();
    GzDecoder::new(file.data.as_ref())
        .take(limit)
        .read_to_end(&mut data)
        .map_err(|e| ApiError::BadRequest(format!("Unable to decompress {}: {}", file.filename, e)))?;

    if data.len() > max_bytes {
        return Err(ApiError::UploadTooLarge {
            filename: file.filename,
            limit: max_bytes,
        });
    }

    let filename = file
        .filename
        .strip_suffix(".gz")
        .unwrap_or(&file.filename)
        .to_string();
    let content_type = uncompressed_content_type
        .map(str::to_string)
        .or_else(|| guess_mime(&filename));

    tracing::debug!(
        filename = %filename,
        compressed = file.data.len(),
        uncompressed = data.len(),
        "Decompressed gzip upload"
    );

    Ok(UploadedFile::new(filename, content_type, data))
}

/// Turn an already unwrapped upload into engine input.
///
/// With an allow-list, the resolved type must be on it. Without one, any type
/// passes, including none at all; detection is then left to the engine.
pub fn prepare_upload(file: UploadedFile, allowed_mimetypes: Option<&[String]>) -> Result<PartitionInput, ApiError> {
    let content_type = resolve_mime(&file.filename, file.content_type.as_deref());

    if let Some(allowed_mimetypes) = allowed_mimetypes {
        let allowed = content_type
            .as_deref()
            .is_some_and(|mime| allowed_mimetypes.iter().any(|a| essence(a) == mime));
        if !allowed {
            return Err(ApiError::UnsupportedMimeType(
                content_type.unwrap_or_else(|| "None".to_string()),
            ));
        }
    }

    Ok(PartitionInput::new(file.data, file.filename, content_type))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    const LIMIT: usize = 1024;

    fn allow(types: &[&str]) -> Vec<String> {
        types.iter().map(|m| m.to_string()).collect()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_resolve_prefers_declared_type() {
        assert_eq!(resolve_mime("a.bin", Some("text/plain")).as_deref(), Some("text/plain"));
        assert_eq!(resolve_mime("a.pdf", Some(OCTET_STREAM)).as_deref(), Some("application/pdf"));
        assert_eq!(resolve_mime("notes.md", None).as_deref(), Some("text/markdown"));
        assert_eq!(resolve_mime("mail.msg", Some("message/rfc822")).as_deref(), Some(OUTLOOK_MSG));
        assert_eq!(resolve_mime("no_extension", None), None);
    }

    #[test]
    fn test_basename_strips_directories() {
        let file = UploadedFile::new("/tmp/uploads/report.pdf", None, Vec::new());
        assert_eq!(file.basename(), "report.pdf");
    }

    #[test]
    fn test_resolve_strips_parameters() {
        assert_eq!(
            resolve_mime("a.txt", Some("Text/Plain; charset=utf-8")).as_deref(),
            Some("text/plain")
        );
        assert_eq!(essence("application/pdf"), "application/pdf");
        assert!(UploadedFile::new("blob", Some("application/gzip; x=1".into()), Vec::new()).is_gzip());
    }

    #[test]
    fn test_gzip_upload_is_unwrapped() {
        let file = UploadedFile::new("notes.txt.gz", Some(GZIP.into()), gzip(b"hello"));
        let file = gunzip(file, None, LIMIT).unwrap();
        let input = prepare_upload(file, None).unwrap();

        assert_eq!(input.filename, "notes.txt");
        assert_eq!(input.content_type.as_deref(), Some("text/plain"));
        assert_eq!(&input.data[..], b"hello");
    }

    #[test]
    fn test_gzip_uses_declared_inner_type() {
        let file = UploadedFile::new("blob.gz", None, gzip(b"# Title"));
        let file = gunzip(file, Some("text/markdown"), LIMIT).unwrap();
        assert_eq!(file.content_type.as_deref(), Some("text/markdown"));
    }

    #[test]
    fn test_corrupt_gzip_is_bad_request() {
        let file = UploadedFile::new("broken.pdf.gz", None, b"not gzip".to_vec());
        let err = gunzip(file, None, LIMIT).unwrap_err();
        assert_eq!(err.status_code().as_u16(), 400);
    }

    #[test]
    fn test_gzip_output_is_capped() {
        let bomb = gzip(&vec![0u8; 64 * LIMIT]);
        assert!(bomb.len() < LIMIT);

        let err = gunzip(UploadedFile::new("zeros.txt.gz", None, bomb), None, LIMIT).unwrap_err();
        assert_eq!(err.status_code().as_u16(), 413);

        let exact = gzip(&vec![b'a'; LIMIT]);
        let file = gunzip(UploadedFile::new("a.txt.gz", None, exact), None, LIMIT).unwrap();
        assert_eq!(file.data.len(), LIMIT);
    }

    #[test]
    fn test_disallowed_type_is_rejected() {
        let allowed = allow(&["application/pdf", "text/plain"]);

        let file = UploadedFile::new("movie.mp4", None, vec![0u8; 4]);
        let err = prepare_upload(file, Some(allowed.as_slice())).unwrap_err();
        assert_eq!(err.to_string(), "File type video/mp4 is not supported.");

        let file = UploadedFile::new("mystery", None, vec![0u8; 4]);
        let err = prepare_upload(file, Some(allowed.as_slice())).unwrap_err();
        assert_eq!(err.to_string(), "File type None is not supported.");

        let file = UploadedFile::new("a.txt", Some("text/plain; charset=utf-8".into()), vec![0u8; 4]);
        assert!(prepare_upload(file, Some(allowed.as_slice())).is_ok());
    }

    #[test]
    fn test_without_allow_list_everything_passes() {
        let file = UploadedFile::new("movie.mp4", None, vec![0u8; 4]);
        let input = prepare_upload(file, None).unwrap();
        assert_eq!(input.content_type.as_deref(), Some("video/mp4"));

        let file = UploadedFile::new("mystery", None, vec![0u8; 4]);
        let input = prepare_upload(file, None).unwrap();
        assert!(input.content_type.is_none());
    }
}
