use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;

use crate::{
    modules::question_papers::{PaperGroup, QUESTION_COLUMNS, QuestionRow, group_papers},
    web::{
        ApiError, ApiJson, ApiMessage, ApiPath, ApiResult, AppState, AuthUser, DataEnvelope,
        guards, require_field,
    },
};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/hr/assign-paper",
            post(assign_paper).route_layer(from_fn_with_state(
                state.clone(),
                guards::allow_hr_supervisor,
            )),
        )
        .route(
            "/hr/assign-paper/:employee_id",
            get(assigned_papers)
                .route_layer(from_fn_with_state(state, guards::allow_hr_supervisor)),
        )
}

#[derive(Deserialize)]
pub struct AssignRequest {
    #[serde(rename = "employeeId", alias = "employeeID")]
    employee_id: Option<String>,
    #[serde(rename = "paperId")]
    paper_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AssignedPapers {
    #[serde(rename = "EmployeeId")]
    pub employee_id: String,
    #[serde(rename = "Papers")]
    pub papers: Vec<PaperGroup>,
}

async fn assign_paper(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(payload): ApiJson<AssignRequest>,
) -> ApiResult<(StatusCode, Json<ApiMessage>)> {
    let employee_id = require_field(payload.employee_id.as_deref(), "employeeId")?;
    let paper_id = require_field(payload.paper_id.as_deref(), "paperId")?;

    insert_assignment(state.pool_ref(), employee_id, paper_id).await?;

    info!(
        assigned_by = %user.employee_id,
        employee_id,
        paper_id,
        "question paper assigned"
    );
    Ok((
        StatusCode::CREATED,
        Json(ApiMessage::new("Paper assigned successfully")),
    ))
}

/// Writes the assignment only when both the employee and the paper exist.
async fn insert_assignment(pool: &PgPool, employee_id: &str, paper_id: &str) -> ApiResult<i32> {
    let inserted: Option<i32> = sqlx::query_scalar(
        "INSERT INTO assigned_papers (employee_id, paper_id)
         SELECT $1, $2
         WHERE EXISTS (SELECT 1 FROM users WHERE employee_id = $1)
           AND EXISTS (SELECT 1 FROM question_papers WHERE paper_id = $2)
         RETURNING id",
    )
    .bind(employee_id)
    .bind(paper_id)
    .fetch_optional(pool)
    .await?;

    if let Some(id) = inserted {
        return Ok(id);
    }

    let employee_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE employee_id = $1)")
            .bind(employee_id)
            .fetch_one(pool)
            .await?;

    if employee_exists {
        Err(ApiError::not_found("Question paper not found"))
    } else {
        Err(ApiError::not_found("Employee not found"))
    }
}

async fn assigned_papers(
    State(state): State<AppState>,
    ApiPath(employee_id): ApiPath<String>,
) -> ApiResult<Json<DataEnvelope<AssignedPapers>>> {
    let employee_id = require_field(Some(employee_id.as_str()), "employeeId")?.to_string();

    // Repeat assignments of one paper collapse into a single entry.
    let rows = sqlx::query_as::<_, QuestionRow>(&format!(
        "SELECT {QUESTION_COLUMNS} FROM question_papers
         WHERE paper_id IN (SELECT paper_id FROM assigned_papers WHERE employee_id = $1)
         ORDER BY id"
    ))
    .bind(&employee_id)
    .fetch_all(state.pool_ref())
    .await?;

    if rows.is_empty() {
        return Err(ApiError::not_found(
            "No assigned papers found for this employee",
        ));
    }

    Ok(Json(DataEnvelope::new(AssignedPapers {
        employee_id,
        papers: group_papers(rows),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_request_accepts_both_employee_keys() {
        let camel: AssignRequest =
            serde_json::from_str(r#"{"employeeId":"E1","paperId":"P1"}"#).expect("json");
        assert_eq!(camel.employee_id.as_deref(), Some("E1"));

        let legacy: AssignRequest =
            serde_json::from_str(r#"{"employeeID":"E2","paperId":"P1"}"#).expect("json");
        assert_eq!(legacy.employee_id.as_deref(), Some("E2"));
    }

    #[test]
    fn missing_fields_deserialize_as_none() {
        let empty: AssignRequest = serde_json::from_str("{}").expect("json");
        assert!(empty.employee_id.is_none());
        assert!(empty.paper_id.is_none());
    }

    #[test]
    fn assigned_papers_use_envelope_keys() {
        let value = serde_json::to_value(DataEnvelope::new(AssignedPapers {
            employee_id: "E1".into(),
            papers: Vec::new(),
        }))
        .expect("json");
        assert_eq!(value["data"]["EmployeeId"], "E1");
        assert!(value["data"]["Papers"].as_array().expect("array").is_empty());
    }
}
