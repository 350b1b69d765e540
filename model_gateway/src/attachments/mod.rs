//! Attachment classification
//!
//! Every uploaded file is routed exactly once: the first raster image becomes
//! the primary image, later images are secondary, documents are turned into
//! framed text blocks, and anything unreadable becomes an acknowledgement.
//! One bad attachment never fails the batch.

mod extract;

use assistant_protocol::assistant::Attachment;
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, warn};

use crate::config::ExtractionLimits;

/// Result of classifying one request's attachments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedAttachments {
    pub primary_image: Option<Attachment>,
    pub secondary_images: Vec<Attachment>,
    pub text_blocks: Vec<String>,
}

impl ClassifiedAttachments {
    pub fn has_images(&self) -> bool {
        self.primary_image.is_some()
    }

    /// All images, secondary ones first, primary last.
    pub fn images(&self) -> impl Iterator<Item = &Attachment> {
        self.secondary_images.iter().chain(self.primary_image.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.primary_image.is_none() && self.text_blocks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Pdf,
    Word,
    Zip,
    Text,
    Binary,
}

const TEXT_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/yaml",
    "application/x-yaml",
    "application/javascript",
    "application/x-javascript",
    "application/typescript",
    "application/x-sh",
    "application/sql",
    "application/toml",
    "image/svg+xml",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "tsv", "json", "xml", "yaml", "yml", "toml", "ini", "log",
    "html", "htm", "css", "js", "jsx", "ts", "tsx", "py", "rs", "go", "java", "kt", "c", "h",
    "cpp", "hpp", "cs", "rb", "php", "swift", "sql", "sh", "svg",
];

const WORD_MIME_TYPES: &[&str] = &[
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/msword",
];

const ZIP_MIME_TYPES: &[&str] = &["application/zip", "application/x-zip-compressed"];

fn image_mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

fn normalized_mime(attachment: &Attachment) -> String {
    attachment
        .mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Decide how an attachment is handled from its declared MIME type, falling
/// back to the file extension when the type is missing or generic.
pub fn detect_kind(attachment: &Attachment) -> AttachmentKind {
    let mime = normalized_mime(attachment);
    let ext = attachment.extension().unwrap_or_default();

    if mime.starts_with("image/") && !mime.contains("svg") && !mime.contains("xml") {
        return AttachmentKind::Image;
    }
    if mime == "application/pdf" || ext == "pdf" {
        return AttachmentKind::Pdf;
    }
    if WORD_MIME_TYPES.contains(&mime.as_str()) || ext == "docx" || ext == "doc" {
        return AttachmentKind::Word;
    }
    if ZIP_MIME_TYPES.contains(&mime.as_str()) || ext == "zip" {
        return AttachmentKind::Zip;
    }
    if mime.starts_with("text/") || TEXT_MIME_TYPES.contains(&mime.as_str()) {
        return AttachmentKind::Text;
    }

    let generic = mime.is_empty() || mime == "application/octet-stream";
    if generic && image_mime_for_extension(&ext).is_some() {
        return AttachmentKind::Image;
    }
    if generic && TEXT_EXTENSIONS.contains(&ext.as_str()) {
        return AttachmentKind::Text;
    }
    AttachmentKind::Binary
}

/// Base64 payload without any `data:<mime>;base64,` prefix.
pub(crate) fn strip_data_url(data: &str) -> &str {
    if data.starts_with("data:") {
        if let Some((_, payload)) = data.split_once(',') {
            return payload;
        }
    }
    data
}

/// An image ready for the wire: bare base64 payload and a concrete `image/*`
/// type, taken from the extension when the declared type is missing or generic.
pub fn normalize_image(attachment: &Attachment) -> Attachment {
    let mime = match normalized_mime(attachment) {
        m if m.starts_with("image/") => m,
        _ => {
            let ext = attachment.extension().unwrap_or_default();
            image_mime_for_extension(&ext).unwrap_or("image/png").to_string()
        }
    };
    Attachment::new(
        strip_data_url(&attachment.data).trim(),
        mime,
        attachment.file_name.clone(),
    )
}

pub(crate) fn decode_base64(data: &str) -> Result<Vec<u8>, String> {
    let payload = strip_data_url(data);
    STANDARD.decode(payload.trim()).or_else(|_| {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact)
            .map_err(|e| format!("invalid base64 data: {e}"))
    })
}

fn display_name(attachment: &Attachment) -> &str {
    if attachment.file_name.trim().is_empty() {
        "unnamed file"
    } else {
        attachment.file_name.trim()
    }
}

fn frame(name: &str, body: &str) -> String {
    format!("--- File: {name} ---\n{body}\n--- End of file: {name} ---")
}

fn truncate(text: String, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let mut kept: String = text.chars().take(max_chars).collect();
    kept.push_str(&format!(
        "\n[... truncated, {} more characters not shown]",
        total - max_chars
    ));
    kept
}

fn unreadable(name: &str, reason: &str) -> String {
    format!("[The attached file \"{name}\" could not be read: {reason}]")
}

fn unsupported_binary(name: &str, mime: &str) -> String {
    let mime = if mime.is_empty() { "unknown type" } else { mime };
    format!(
        "[The attached file \"{name}\" ({mime}) is a binary format that cannot be read. \
         It was received but its contents were not analyzed.]"
    )
}

/// Run a blocking extractor off the async runtime. A panic inside the parser
/// is reported like any other extraction failure.
async fn run_blocking<T, F>(bytes: Vec<u8>, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&[u8]) -> Result<T, String> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&bytes))
        .await
        .map_err(|e| format!("extractor crashed: {e}"))?
}

/// Classify a request's attachments, preserving input order within each bucket.
pub async fn classify(attachments: &[Attachment], limits: ExtractionLimits) -> ClassifiedAttachments {
    let mut out = ClassifiedAttachments::default();

    for attachment in attachments {
        let name = display_name(attachment);
        let kind = detect_kind(attachment);
        debug!(file = %name, ?kind, "Classifying attachment");

        if kind == AttachmentKind::Binary {
            out.text_blocks
                .push(unsupported_binary(name, &normalized_mime(attachment)));
            continue;
        }

        let bytes = match decode_base64(&attachment.data) {
            Ok(bytes) => bytes,
            Err(reason) => {
                warn!(file = %name, %reason, "Attachment is not valid base64");
                out.text_blocks.push(unreadable(name, &reason));
                continue;
            }
        };

        match kind {
            AttachmentKind::Image => {
                let image = normalize_image(attachment);
                if out.primary_image.is_none() {
                    out.primary_image = Some(image);
                } else {
                    out.secondary_images.push(image);
                }
            }
            AttachmentKind::Text => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                out.text_blocks
                    .push(frame(name, &truncate(text, limits.max_chars_per_file)));
            }
            AttachmentKind::Pdf => match run_blocking(bytes, extract::pdf_text).await {
                Ok(text) => out
                    .text_blocks
                    .push(frame(name, &truncate(text, limits.max_chars_per_file))),
                Err(reason) => {
                    warn!(file = %name, %reason, "PDF extraction failed");
                    out.text_blocks.push(unreadable(name, &reason));
                }
            },
            AttachmentKind::Word => match run_blocking(bytes, extract::docx_text).await {
                Ok(text) => out
                    .text_blocks
                    .push(frame(name, &truncate(text, limits.max_chars_per_file))),
                Err(reason) => {
                    warn!(file = %name, %reason, "Word extraction failed");
                    out.text_blocks.push(unreadable(name, &reason));
                }
            },
            AttachmentKind::Zip => match run_blocking(bytes, extract::zip_listing).await {
                Ok(names) => {
                    let mut body = format!("ZIP archive containing {} file(s):", names.len());
                    for entry in &names {
                        body.push_str("\n- ");
                        body.push_str(entry);
                    }
                    body.push_str("\n(The contents of files inside the archive are not supported.)");
                    out.text_blocks.push(frame(name, &body));
                }
                Err(reason) => {
                    warn!(file = %name, %reason, "ZIP listing failed");
                    out.text_blocks.push(unreadable(name, &reason));
                }
            },
            AttachmentKind::Binary => {}
        }
    }

    out
}
