use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::web::{
    ApiError, ApiMessage, ApiPath, ApiResult, AppState, AuthUser, DataEnvelope, FileFieldConfig,
    FormBody, IMAGE_EXTENSIONS, SavedFile, UploadOutcome, guards, non_blank, remove_public_file,
    require_field,
};

const QUESTION_IMG_FIELD: &str = "questionImg";
const OPTION_FIELDS: [(&str, &str); 4] = [
    ("option1", "option1Img"),
    ("option2", "option2Img"),
    ("option3", "option3Img"),
    ("option4", "option4Img"),
];

pub(crate) const QUESTION_COLUMNS: &str = "id, paper_id, question_no, question, question_img, \
     option1, option1_img, option2, option2_img, option3, option3_img, option4, option4_img, \
     correct_option, department";

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/hr/create-question-paper",
            post(create_question).route_layer(from_fn_with_state(
                state.clone(),
                guards::allow_hr_supervisor,
            )),
        )
        .route(
            "/hr/get-question-paper",
            get(list_papers).route_layer(from_fn_with_state(
                state.clone(),
                guards::allow_any_employee,
            )),
        )
        .route(
            "/hr/get-question-paper/:paper_id",
            get(get_paper).route_layer(from_fn_with_state(
                state.clone(),
                guards::allow_any_employee,
            )),
        )
        .route(
            "/hr/delete-question-paper/:paper_id",
            delete(delete_paper)
                .route_layer(from_fn_with_state(state, guards::allow_hr_supervisor)),
        )
}

/// One stored question of a paper, as persisted.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRow {
    pub id: i32,
    pub paper_id: String,
    pub question_no: i32,
    pub question: Option<String>,
    pub question_img: Option<String>,
    pub option1: Option<String>,
    pub option1_img: Option<String>,
    pub option2: Option<String>,
    pub option2_img: Option<String>,
    pub option3: Option<String>,
    pub option3_img: Option<String>,
    pub option4: Option<String>,
    pub option4_img: Option<String>,
    pub correct_option: String,
    pub department: String,
}

/// Paper-level view: every question sharing a `paperId`.
#[derive(Debug, Serialize)]
pub struct PaperGroup {
    #[serde(rename = "PaperId")]
    pub paper_id: String,
    #[serde(rename = "Department")]
    pub department: String,
    #[serde(rename = "Questions")]
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub question_no: i32,
    pub question_text: Option<String>,
    pub question_img: Option<String>,
    pub options: OptionsView,
    pub correct_option: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsView {
    pub option1: Option<String>,
    pub option1_img: Option<String>,
    pub option2: Option<String>,
    pub option2_img: Option<String>,
    pub option3: Option<String>,
    pub option3_img: Option<String>,
    pub option4: Option<String>,
    pub option4_img: Option<String>,
}

impl From<QuestionRow> for QuestionView {
    fn from(row: QuestionRow) -> Self {
        Self {
            question_no: row.question_no,
            question_text: row.question,
            question_img: row.question_img,
            options: OptionsView {
                option1: row.option1,
                option1_img: row.option1_img,
                option2: row.option2,
                option2_img: row.option2_img,
                option3: row.option3,
                option3_img: row.option3_img,
                option4: row.option4,
                option4_img: row.option4_img,
            },
            correct_option: row.correct_option,
        }
    }
}

/// Groups flat rows by paper in first-seen order; questions are sorted by number.
pub fn group_papers(rows: Vec<QuestionRow>) -> Vec<PaperGroup> {
    let mut groups: Vec<(PaperGroup, Vec<QuestionRow>)> = Vec::new();

    for row in rows {
        match groups
            .iter_mut()
            .find(|(group, _)| group.paper_id == row.paper_id)
        {
            Some((_, members)) => members.push(row),
            None => {
                let group = PaperGroup {
                    paper_id: row.paper_id.clone(),
                    department: row.department.clone(),
                    questions: Vec::new(),
                };
                groups.push((group, vec![row]));
            }
        }
    }

    groups
        .into_iter()
        .map(|(mut group, mut members)| {
            members.sort_by_key(|row| row.question_no);
            group.questions = members.into_iter().map(QuestionView::from).collect();
            group
        })
        .collect()
}

/// Text or image content of one question/option slot.
#[derive(Debug, Default, PartialEq, Eq)]
struct Slot {
    text: Option<String>,
    img: Option<String>,
}

impl Slot {
    /// An uploaded image wins over inline text.
    fn resolve(text: Option<&str>, image: Option<&SavedFile>) -> Self {
        match image {
            Some(file) => Self {
                text: None,
                img: Some(file.public_url()),
            },
            None => Self {
                text: non_blank(text).map(str::to_string),
                img: None,
            },
        }
    }
}

/// Validated content of a create-question request.
#[derive(Debug)]
struct QuestionDraft {
    paper_id: String,
    question_no: i32,
    department: String,
    correct_option: String,
    question: Slot,
    options: [Slot; 4],
}

impl QuestionDraft {
    fn from_upload(upload: &UploadOutcome) -> ApiResult<Self> {
        let paper_id = require_field(upload.first_text("paperId"), "paperId")?;
        let question_no = require_field(upload.first_text("questionNo"), "questionNo")?
            .parse::<i32>()
            .map_err(|_| ApiError::validation("questionNo must be an integer"))?;
        let department = require_field(upload.first_text("department"), "department")?;
        let correct_option = require_field(upload.first_text("correctOption"), "correctOption")?;

        let question = Slot::resolve(
            upload.first_text("question"),
            upload.first_file_for(QUESTION_IMG_FIELD),
        );
        let options = OPTION_FIELDS.map(|(text_field, image_field)| {
            Slot::resolve(
                upload.first_text(text_field),
                upload.first_file_for(image_field),
            )
        });

        Ok(Self {
            paper_id: paper_id.to_string(),
            question_no,
            department: department.to_string(),
            correct_option: correct_option.to_string(),
            question,
            options,
        })
    }
}

async fn create_question(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    form: FormBody,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let mut file_fields = vec![FileFieldConfig::single(QUESTION_IMG_FIELD, IMAGE_EXTENSIONS)];
    file_fields.extend(
        OPTION_FIELDS
            .iter()
            .map(|&(_, image_field)| FileFieldConfig::single(image_field, IMAGE_EXTENSIONS)),
    );

    let upload = form
        .into_outcome(&state.config().upload_dir, &file_fields)
        .await?;

    let inserted = match QuestionDraft::from_upload(&upload) {
        Ok(draft) => insert_question(state.pool_ref(), &draft).await,
        Err(err) => Err(err),
    };

    match inserted {
        Ok(row) => {
            info!(
                created_by = %user.employee_id,
                paper_id = %row.paper_id,
                question_no = row.question_no,
                "question added to paper"
            );
            Ok((
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "message": "Question paper created successfully",
                    "data": row,
                })),
            ))
        }
        Err(err) => {
            upload.discard().await;
            Err(err)
        }
    }
}

async fn insert_question(pool: &PgPool, draft: &QuestionDraft) -> ApiResult<QuestionRow> {
    let [option1, option2, option3, option4] = &draft.options;

    // The department check and the insert are one statement.
    let row = sqlx::query_as::<_, QuestionRow>(&format!(
        "INSERT INTO question_papers (paper_id, question_no, question, question_img,
             option1, option1_img, option2, option2_img, option3, option3_img, option4, option4_img,
             correct_option, department)
         SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
         WHERE EXISTS (SELECT 1 FROM users WHERE department = $14)
         RETURNING {QUESTION_COLUMNS}"
    ))
    .bind(&draft.paper_id)
    .bind(draft.question_no)
    .bind(&draft.question.text)
    .bind(&draft.question.img)
    .bind(&option1.text)
    .bind(&option1.img)
    .bind(&option2.text)
    .bind(&option2.img)
    .bind(&option3.text)
    .bind(&option3.img)
    .bind(&option4.text)
    .bind(&option4.img)
    .bind(&draft.correct_option)
    .bind(&draft.department)
    .fetch_optional(pool)
    .await?;

    row.ok_or_else(|| ApiError::not_found("Invalid department specified"))
}

async fn list_papers(
    State(state): State<AppState>,
) -> ApiResult<Json<DataEnvelope<Vec<PaperGroup>>>> {
    let rows = sqlx::query_as::<_, QuestionRow>(&format!(
        "SELECT {QUESTION_COLUMNS} FROM question_papers ORDER BY id"
    ))
    .fetch_all(state.pool_ref())
    .await?;

    if rows.is_empty() {
        return Err(ApiError::not_found("No question papers found"));
    }

    Ok(Json(DataEnvelope::new(group_papers(rows))))
}

async fn get_paper(
    State(state): State<AppState>,
    ApiPath(paper_id): ApiPath<String>,
) -> ApiResult<Json<DataEnvelope<Vec<QuestionRow>>>> {
    let rows = sqlx::query_as::<_, QuestionRow>(&format!(
        "SELECT {QUESTION_COLUMNS} FROM question_papers WHERE paper_id = $1 ORDER BY question_no, id"
    ))
    .bind(&paper_id)
    .fetch_all(state.pool_ref())
    .await?;

    if rows.is_empty() {
        return Err(ApiError::not_found("Question paper not found"));
    }

    Ok(Json(DataEnvelope::new(rows)))
}

#[derive(FromRow)]
struct PaperImages {
    question_img: Option<String>,
    option1_img: Option<String>,
    option2_img: Option<String>,
    option3_img: Option<String>,
    option4_img: Option<String>,
}

async fn delete_paper(
    State(state): State<AppState>,
    ApiPath(paper_id): ApiPath<String>,
) -> ApiResult<Json<ApiMessage>> {
    let removed = sqlx::query_as::<_, PaperImages>(
        "DELETE FROM question_papers WHERE paper_id = $1
         RETURNING question_img, option1_img, option2_img, option3_img, option4_img",
    )
    .bind(&paper_id)
    .fetch_all(state.pool_ref())
    .await?;

    if removed.is_empty() {
        return Err(ApiError::not_found("Question paper not found"));
    }

    let upload_dir = &state.config().upload_dir;
    for images in removed {
        for url in [
            images.question_img,
            images.option1_img,
            images.option2_img,
            images.option3_img,
            images.option4_img,
        ]
        .into_iter()
        .flatten()
        {
            remove_public_file(upload_dir, &url).await;
        }
    }

    info!(%paper_id, "question paper deleted");
    Ok(Json(ApiMessage::new("Question paper deleted successfully")))
}
