pub mod auth;
pub mod guards;
pub mod responses;
pub mod router;
pub mod state;
pub mod uploads;

#[cfg(test)]
pub(crate) mod test_support;

pub use guards::AuthUser;
pub use responses::{
    ApiError, ApiJson, ApiMessage, ApiPath, ApiResult, DataEnvelope, non_blank, require_field,
};
pub use state::AppState;
pub use uploads::{
    FileFieldConfig, FormBody, IMAGE_EXTENSIONS, SavedFile, UploadOutcome, remove_public_file,
};
