use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use axum::{
    Json, async_trait,
    extract::{FromRequest, Multipart, Request},
    http::{HeaderMap, header},
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde_json::{Map, Value};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::warn;
use uuid::Uuid;

use crate::web::responses::ApiError;

/// Public URL prefix under which stored uploads are served.
pub const PUBLIC_PREFIX: &str = "/uploads";

/// Extensions accepted for question images and form photos.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "svg"];

/// Characters left as-is by JavaScript's `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Result type used by the shared upload helpers.
pub type UploadResult<T> = Result<T, UploadError>;

/// Error returned when validating or persisting uploaded files.
#[derive(Debug)]
pub struct UploadError {
    message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UploadError {}

/// Configuration describing the expectations for a single multipart file field.
#[derive(Debug, Clone, Copy)]
pub struct FileFieldConfig<'a> {
    pub field_name: &'a str,
    /// Lowercase extensions accepted for the field; empty accepts anything.
    pub allowed_extensions: &'a [&'a str],
    pub max_files: usize,
}

impl<'a> FileFieldConfig<'a> {
    pub fn single(field_name: &'a str, allowed_extensions: &'a [&'a str]) -> Self {
        Self {
            field_name,
            allowed_extensions,
            max_files: 1,
        }
    }
}

/// Metadata describing a stored upload on disk.
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub field_name: String,
    pub original_name: String,
    pub stored_name: String,
    pub stored_path: PathBuf,
    pub file_size: u64,
}

impl SavedFile {
    /// Path reference persisted in the database and served statically.
    pub fn public_url(&self) -> String {
        public_url(&self.stored_name)
    }
}

/// Aggregated output of the shared upload processor.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub files: Vec<SavedFile>,
    pub text_fields: HashMap<String, Vec<String>>,
}

impl UploadOutcome {
    pub fn files_for<'a>(&'a self, field_name: &str) -> impl Iterator<Item = &'a SavedFile> {
        self.files
            .iter()
            .filter(move |file| file.field_name == field_name)
    }

    pub fn first_file_for(&self, field_name: &str) -> Option<&SavedFile> {
        self.files_for(field_name).next()
    }

    pub fn first_text(&self, field_name: &str) -> Option<&str> {
        self.text_fields
            .get(field_name)
            .and_then(|values| values.first().map(|s| s.as_str()))
    }

    /// Text fields keyed by name, keeping the first value of repeated keys.
    pub fn text_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.text_fields.iter().filter_map(|(name, values)| {
            values
                .first()
                .map(|value| (name.as_str(), value.as_str()))
        })
    }

    /// Text fields taken from a JSON object. Nulls are dropped and other
    /// scalars keep their JSON text.
    pub fn from_json(fields: Map<String, Value>) -> Self {
        let text_fields = fields
            .into_iter()
            .filter_map(|(name, value)| {
                let text = match value {
                    Value::Null => return None,
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                Some((name, vec![text]))
            })
            .collect();
        Self {
            files: Vec::new(),
            text_fields,
        }
    }

    /// Removes every stored file. Used when the request is rejected after intake.
    pub async fn discard(&self) {
        for file in &self.files {
            if let Err(err) = tokio::fs::remove_file(&file.stored_path).await {
                warn!(?err, file = %file.stored_path.display(), "failed to remove rejected upload");
            }
        }
    }
}

/// Body of a form endpoint: multipart when files may be attached, or a JSON
/// object carrying text fields only.
pub enum FormBody {
    Multipart(Multipart),
    Json(Map<String, Value>),
}

#[async_trait]
impl<S> FromRequest<S> for FormBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if has_json_content_type(req.headers()) {
            let Json(fields) = Json::<Map<String, Value>>::from_request(req, state).await?;
            Ok(Self::Json(fields))
        } else {
            Ok(Self::Multipart(Multipart::from_request(req, state).await?))
        }
    }
}

impl FormBody {
    /// Stores declared files (multipart only) and collects text fields.
    pub async fn into_outcome(
        self,
        dest_dir: &Path,
        field_configs: &[FileFieldConfig<'_>],
    ) -> UploadResult<UploadOutcome> {
        match self {
            Self::Multipart(multipart) => {
                process_upload_form(multipart, dest_dir, field_configs).await
            }
            Self::Json(fields) => Ok(UploadOutcome::from_json(fields)),
        }
    }
}

fn has_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .is_some_and(|mime| mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json"))
}

/// Ensures the destination directory exists.
pub async fn ensure_directory(path: &Path) -> UploadResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|err| UploadError::new(format!("failed to create upload directory: {err}")))
}

/// Parses multipart form data, persisting declared file fields into `dest_dir`.
///
/// Text parts are collected by name. File parts for undeclared fields, over
/// the per-field limit, or with a disallowed extension fail the whole form;
/// anything already written is removed before returning the error.
pub async fn process_upload_form(
    multipart: Multipart,
    dest_dir: &Path,
    field_configs: &[FileFieldConfig<'_>],
) -> UploadResult<UploadOutcome> {
    ensure_directory(dest_dir).await?;

    let mut outcome = UploadOutcome::default();
    match read_parts(multipart, dest_dir, field_configs, &mut outcome).await {
        Ok(()) => Ok(outcome),
        Err(err) => {
            outcome.discard().await;
            Err(err)
        }
    }
}

async fn read_parts(
    mut multipart: Multipart,
    dest_dir: &Path,
    field_configs: &[FileFieldConfig<'_>],
    outcome: &mut UploadOutcome,
) -> UploadResult<()> {
    let mut counts: HashMap<&str, usize> = HashMap::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::new(format!("failed to parse multipart form: {err}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = field.text().await.map_err(|err| {
                UploadError::new(format!("failed to read field `{field_name}`: {err}"))
            })?;
            outcome
                .text_fields
                .entry(field_name)
                .or_default()
                .push(value);
            continue;
        };

        // Browsers send an empty file part when a file input is left blank.
        if file_name.is_empty() {
            continue;
        }

        let Some(config) = field_configs
            .iter()
            .find(|config| config.field_name == field_name)
        else {
            return Err(UploadError::new(format!(
                "unexpected file field `{field_name}`"
            )));
        };

        let count = counts.entry(config.field_name).or_insert(0);
        if *count >= config.max_files {
            return Err(UploadError::new(format!(
                "too many files for field `{}` (max {})",
                config.field_name, config.max_files
            )));
        }

        let (_, extension) = split_name(&file_name);
        let extension = extension.to_ascii_lowercase();
        if !config.allowed_extensions.is_empty()
            && !config
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(UploadError::new(format!(
                "field `{}` does not accept `{extension}` files",
                config.field_name
            )));
        }

        let stored_name = stored_name_for(&file_name);
        let stored_path = dest_dir.join(&stored_name);
        let mut file = File::create(&stored_path)
            .await
            .map_err(|err| UploadError::new(format!("failed to save file: {err}")))?;

        // Track the file before streaming so a failed write is still cleaned up.
        outcome.files.push(SavedFile {
            field_name: config.field_name.to_string(),
            original_name: file_name,
            stored_name,
            stored_path,
            file_size: 0,
        });

        let mut total_bytes: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| UploadError::new(format!("failed to read upload data: {err}")))?
        {
            total_bytes += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|err| UploadError::new(format!("failed to write file: {err}")))?;
        }
        file.flush()
            .await
            .map_err(|err| UploadError::new(format!("failed to flush file: {err}")))?;

        if let Some(saved) = outcome.files.last_mut() {
            saved.file_size = total_bytes;
        }
        *count += 1;
    }

    Ok(())
}

/// Builds the `/uploads/...` reference for a stored file name.
pub fn public_url(stored_name: &str) -> String {
    format!(
        "{PUBLIC_PREFIX}/{}",
        utf8_percent_encode(stored_name, URI_COMPONENT)
    )
}

/// Deletes the stored file behind an `/uploads/...` reference.
///
/// References that do not point directly into `upload_dir` are ignored.
pub async fn remove_public_file(upload_dir: &Path, url: &str) {
    let Some(encoded) = url
        .strip_prefix(PUBLIC_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        return;
    };
    let Ok(name) = percent_decode_str(encoded).decode_utf8() else {
        return;
    };
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return;
    }

    let path = upload_dir.join(name.as_ref());
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(?err, file = %path.display(), "failed to remove stored upload"),
    }
}

fn stored_name_for(original: &str) -> String {
    let mut sanitized = sanitize_filename::sanitize(original);
    if sanitized.is_empty() {
        let (_, extension) = split_name(original);
        sanitized = if extension.is_empty() {
            "upload.bin".to_string()
        } else {
            format!("upload.{extension}")
        };
    }
    format!("{}_{}", Uuid::new_v4().simple(), sanitized)
}

fn split_name(name: &str) -> (String, String) {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();
    (stem, extension)
}
