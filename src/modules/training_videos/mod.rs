use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::web::{
    ApiError, ApiMessage, ApiPath, ApiResult, AppState, AuthUser, FileFieldConfig, FormBody,
    UploadOutcome, guards, non_blank, remove_public_file, require_field,
};

const VIDEO_FIELD: &str = "video";

pub fn router(state: AppState) -> Router<AppState> {
    let list = get(list_videos).route_layer(from_fn_with_state(
        state.clone(),
        guards::allow_any_employee,
    ));

    Router::new()
        .route(
            "/hr/training-video",
            post(upload_video).route_layer(from_fn_with_state(
                state.clone(),
                guards::allow_hr_supervisor,
            )),
        )
        .route("/hr", list.clone())
        .route("/hr/", list)
        .route(
            "/hr/training-video/:id",
            delete(delete_video).route_layer(from_fn_with_state(state, guards::allow_staff)),
        )
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TrainingVideo {
    pub id: i32,
    pub video_name: Option<String>,
    pub video_version: Option<String>,
    pub video_description: Option<String>,
    pub video_url: String,
    pub department_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoUploaded {
    message: &'static str,
    video_url: String,
}

async fn upload_video(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    form: FormBody,
) -> ApiResult<(StatusCode, Json<VideoUploaded>)> {
    let upload = form
        .into_outcome(
            &state.config().upload_dir,
            &[FileFieldConfig::single(VIDEO_FIELD, &[])],
        )
        .await?;

    match store_video(state.pool_ref(), &upload).await {
        Ok(video_url) => {
            if let Some(file) = upload.first_file_for(VIDEO_FIELD) {
                info!(
                    uploaded_by = %user.employee_id,
                    original_name = %file.original_name,
                    bytes = file.file_size,
                    %video_url,
                    "training video uploaded"
                );
            }
            Ok((
                StatusCode::CREATED,
                Json(VideoUploaded {
                    message: "Training video uploaded successfully",
                    video_url,
                }),
            ))
        }
        Err(err) => {
            upload.discard().await;
            Err(err)
        }
    }
}

async fn store_video(pool: &PgPool, upload: &UploadOutcome) -> ApiResult<String> {
    let file = upload
        .first_file_for(VIDEO_FIELD)
        .ok_or_else(|| ApiError::validation("No video uploaded"))?;
    let department = require_field(upload.first_text("departmentName"), "departmentName")?;
    let video_url = file.public_url();

    // The department check and the insert are one statement.
    let inserted: Option<i32> = sqlx::query_scalar(
        "INSERT INTO training_videos (video_name, video_version, video_description, video_url, department_name)
         SELECT $1, $2, $3, $4, $5
         WHERE EXISTS (SELECT 1 FROM users WHERE department = $5)
         RETURNING id",
    )
    .bind(non_blank(upload.first_text("videoName")))
    .bind(non_blank(upload.first_text("videoVersion")))
    .bind(non_blank(upload.first_text("videoDescription")))
    .bind(&video_url)
    .bind(department)
    .fetch_optional(pool)
    .await?;

    inserted
        .map(|_| video_url)
        .ok_or_else(|| ApiError::not_found("Invalid department specified"))
}

async fn list_videos(State(state): State<AppState>) -> ApiResult<Json<Vec<TrainingVideo>>> {
    let videos = sqlx::query_as::<_, TrainingVideo>(
        "SELECT id, video_name, video_version, video_description, video_url, department_name, created_at
         FROM training_videos ORDER BY id",
    )
    .fetch_all(state.pool_ref())
    .await?;

    if videos.is_empty() {
        return Err(ApiError::not_found("No training videos found"));
    }

    Ok(Json(videos))
}

async fn delete_video(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> ApiResult<Json<ApiMessage>> {
    let removed: Option<String> =
        sqlx::query_scalar("DELETE FROM training_videos WHERE id = $1 RETURNING video_url")
            .bind(id)
            .fetch_optional(state.pool_ref())
            .await?;

    let video_url = removed.ok_or_else(|| ApiError::not_found("Training video not found"))?;
    remove_public_file(&state.config().upload_dir, &video_url).await;

    Ok(Json(ApiMessage::new("Training video deleted successfully")))
}
