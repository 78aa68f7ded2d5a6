use std::collections::BTreeMap;

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;

use crate::web::{
    ApiError, ApiMessage, ApiPath, ApiResult, AppState, AuthUser, FileFieldConfig, FormBody,
    IMAGE_EXTENSIONS, UploadOutcome, guards, non_blank, remove_public_file,
};

const PHOTO_FIELD: &str = "photo";
const PHOTO_COLUMN: &str = "photo_url";

/// Every column a client may write, in table order. Nothing outside this
/// list ever reaches a generated statement.
pub const JOINING_FORM_FIELDS: [&str; 49] = [
    "employee_id",
    "full_name",
    "fathers_name",
    "date_of_birth",
    "gender",
    "marital_status",
    "blood_group",
    "official_contact_no",
    "official_mail_id",
    "personal_contact_no",
    "personal_mail_id",
    "present_address_name",
    "present_address_relation",
    "present_address_contact_no",
    "present_address_full_address",
    "present_address_state",
    "present_address_district_city",
    "present_address_pin_code",
    "permanent_address_name",
    "permanent_address_relation",
    "permanent_address_contact_no",
    "permanent_address_full_address",
    "permanent_address_state",
    "permanent_address_district_city",
    "permanent_address_pin_code",
    "date_of_interview",
    "date_of_joining",
    "company_name",
    "department",
    "designation",
    "employee_type",
    "mode_of_recruitment",
    "reference_consultancy",
    "pan_no",
    "adhar_no",
    "bank",
    "account_no",
    "ifsc_code",
    "branch_address",
    "uan_no",
    "e_name1",
    "e_relation1",
    "e_address1",
    "e_contact_no1",
    "e_name2",
    "e_relation2",
    "e_address2",
    "e_contact_no2",
    "date",
];

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/joining/form",
            post(submit_form).route_layer(from_fn_with_state(
                state.clone(),
                guards::allow_hr_supervisor,
            )),
        )
        .route(
            "/joining/forms",
            get(list_forms).route_layer(from_fn_with_state(
                state.clone(),
                guards::allow_any_employee,
            )),
        )
        .route(
            "/joining/form/:id",
            put(update_form)
                .delete(delete_form)
                .route_layer(from_fn_with_state(state, guards::allow_hr_supervisor)),
        )
}

/// Maps a request key onto its allow-listed column.
fn resolve_column(key: &str) -> Option<&'static str> {
    // Older clients send the employee identifier camel-cased.
    if key == "employeeID" {
        return Some("employee_id");
    }
    JOINING_FORM_FIELDS
        .iter()
        .copied()
        .find(|column| *column == key)
}

/// Validated column values keyed by schema position. Blank values become null.
#[derive(Debug, Default, PartialEq)]
pub struct FormFields {
    values: BTreeMap<usize, (&'static str, Option<String>)>,
}

impl FormFields {
    /// Accepts request key/value pairs, rejecting anything off the allow-list.
    /// `id` is skipped because the path carries it.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> ApiResult<Self> {
        let mut values = BTreeMap::new();
        for (key, value) in pairs {
            if key == "id" {
                continue;
            }
            let column = resolve_column(key).ok_or_else(|| {
                ApiError::validation(format!("Unknown joining form field `{key}`"))
            })?;
            let position = JOINING_FORM_FIELDS
                .iter()
                .position(|candidate| *candidate == column)
                .unwrap_or(JOINING_FORM_FIELDS.len());
            values.insert(
                position,
                (column, non_blank(Some(value)).map(str::to_string)),
            );
        }
        Ok(Self { values })
    }

    fn get(&self, column: &str) -> Option<String> {
        self.values
            .values()
            .find(|(name, _)| *name == column)
            .and_then(|(_, value)| value.clone())
    }
}

/// A generated statement and the values bound to its placeholders, in order.
#[derive(Debug, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub values: Vec<Option<String>>,
}

fn count_placeholders(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|(index, byte)| {
            **byte == b'$' && bytes.get(index + 1).is_some_and(u8::is_ascii_digit)
        })
        .count()
}

/// Builds the full-row insert: `photo_url` followed by every allow-listed column.
pub fn build_insert(photo_url: Option<String>, fields: &FormFields) -> ApiResult<Statement> {
    let columns: Vec<&str> = std::iter::once(PHOTO_COLUMN)
        .chain(JOINING_FORM_FIELDS.iter().copied())
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("${n}")).collect();

    let sql = format!(
        "INSERT INTO joining_forms ({}) VALUES ({}) RETURNING id",
        columns.join(", "),
        placeholders.join(", ")
    );

    let mut values = Vec::with_capacity(columns.len());
    values.push(photo_url);
    values.extend(JOINING_FORM_FIELDS.iter().map(|column| fields.get(column)));

    let expected = count_placeholders(&sql);
    if values.len() != expected {
        return Err(ApiError::bad_request(format!(
            "Expected {expected} values, but got {}.",
            values.len()
        )));
    }

    Ok(Statement { sql, values })
}

/// Builds `UPDATE joining_forms SET col = $1, ... WHERE id = $n`.
/// The id is bound last, after `values`.
pub fn build_update(fields: &FormFields, photo_url: Option<String>) -> ApiResult<Statement> {
    let mut assignments: Vec<(&str, Option<String>)> = fields
        .values
        .values()
        .map(|(column, value)| (*column, value.clone()))
        .collect();
    if let Some(photo_url) = photo_url {
        assignments.push((PHOTO_COLUMN, Some(photo_url)));
    }

    if assignments.is_empty() {
        return Err(ApiError::bad_request("No fields provided to update"));
    }

    let set_clause = assignments
        .iter()
        .enumerate()
        .map(|(index, (column, _))| format!("{column} = ${}", index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE joining_forms SET {set_clause} WHERE id = ${}",
        assignments.len() + 1
    );

    Ok(Statement {
        sql,
        values: assignments.into_iter().map(|(_, value)| value).collect(),
    })
}

#[derive(Serialize)]
struct FormSubmitted {
    message: &'static str,
    id: i32,
    photo_url: Option<String>,
}

async fn submit_form(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    form: FormBody,
) -> ApiResult<(StatusCode, Json<FormSubmitted>)> {
    let upload = form
        .into_outcome(
            &state.config().upload_dir,
            &[FileFieldConfig::single(PHOTO_FIELD, IMAGE_EXTENSIONS)],
        )
        .await?;

    match insert_form(state.pool_ref(), &upload).await {
        Ok((id, photo_url)) => {
            info!(submitted_by = %user.employee_id, id, "joining form submitted");
            Ok((
                StatusCode::CREATED,
                Json(FormSubmitted {
                    message: "Joining form submitted successfully",
                    id,
                    photo_url,
                }),
            ))
        }
        Err(err) => {
            upload.discard().await;
            Err(err)
        }
    }
}

async fn insert_form(pool: &PgPool, upload: &UploadOutcome) -> ApiResult<(i32, Option<String>)> {
    let fields = FormFields::from_pairs(upload.text_pairs())?;
    let photo_url = upload.first_file_for(PHOTO_FIELD).map(|file| file.public_url());
    let statement = build_insert(photo_url.clone(), &fields)?;

    let mut query = sqlx::query_scalar::<_, i32>(&statement.sql);
    for value in &statement.values {
        query = query.bind(value);
    }
    let id = query.fetch_one(pool).await?;

    Ok((id, photo_url))
}

async fn list_forms(State(state): State<AppState>) -> ApiResult<Json<Vec<Value>>> {
    let forms: Vec<Value> =
        sqlx::query_scalar("SELECT row_to_json(f) FROM joining_forms f ORDER BY f.id")
            .fetch_all(state.pool_ref())
            .await?;

    if forms.is_empty() {
        return Err(ApiError::not_found("No joining forms found"));
    }

    Ok(Json(forms))
}

async fn update_form(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(id): ApiPath<i32>,
    form: FormBody,
) -> ApiResult<Json<ApiMessage>> {
    let upload_dir = &state.config().upload_dir;
    let upload = form
        .into_outcome(
            upload_dir,
            &[FileFieldConfig::single(PHOTO_FIELD, IMAGE_EXTENSIONS)],
        )
        .await?;

    match apply_update(state.pool_ref(), id, &upload).await {
        Ok(replaced_photo) => {
            if let Some(previous) = replaced_photo {
                remove_public_file(upload_dir, &previous).await;
            }
            info!(updated_by = %user.employee_id, id, "joining form updated");
            Ok(Json(ApiMessage::new("Joining form updated successfully")))
        }
        Err(err) => {
            upload.discard().await;
            Err(err)
        }
    }
}

/// Applies the update and returns the photo it replaced, if any.
async fn apply_update(
    pool: &PgPool,
    id: i32,
    upload: &UploadOutcome,
) -> ApiResult<Option<String>> {
    let fields = FormFields::from_pairs(upload.text_pairs())?;
    let photo_url = upload.first_file_for(PHOTO_FIELD).map(|file| file.public_url());
    let replaces_photo = photo_url.is_some();
    let statement = build_update(&fields, photo_url)?;

    // The CTE reads the row as it was before this statement's update.
    let sql = format!(
        "WITH previous AS (SELECT photo_url FROM joining_forms WHERE id = ${id_param})
         {update}
         RETURNING (SELECT photo_url FROM previous)",
        id_param = statement.values.len() + 1,
        update = statement.sql,
    );

    let mut query = sqlx::query_scalar::<_, Option<String>>(&sql);
    for value in &statement.values {
        query = query.bind(value);
    }
    let previous = query
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Joining form not found"))?;

    Ok(previous.filter(|_| replaces_photo))
}

async fn delete_form(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> ApiResult<Json<ApiMessage>> {
    let removed: Option<Option<String>> =
        sqlx::query_scalar("DELETE FROM joining_forms WHERE id = $1 RETURNING photo_url")
            .bind(id)
            .fetch_optional(state.pool_ref())
            .await?;

    let photo_url = removed.ok_or_else(|| ApiError::not_found("Joining form not found"))?;
    if let Some(photo_url) = photo_url {
        remove_public_file(&state.config().upload_dir, &photo_url).await;
    }

    Ok(Json(ApiMessage::new("Joining form deleted successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_sets_only_given_columns() {
        let fields = FormFields::from_pairs([("id", "5"), ("full_name", "X")]).expect("fields");
        let statement = build_update(&fields, None).expect("statement");

        assert_eq!(
            statement.sql,
            "UPDATE joining_forms SET full_name = $1 WHERE id = $2"
        );
        assert_eq!(statement.values, vec![Some("X".to_string())]);
    }

    #[test]
    fn update_orders_columns_by_schema_and_appends_photo() {
        let fields = FormFields::from_pairs([("bank", "SBI"), ("employeeID", "E7")])
            .expect("fields");
        let statement =
            build_update(&fields, Some("/uploads/abc_me.png".to_string())).expect("statement");

        assert_eq!(
            statement.sql,
            "UPDATE joining_forms SET employee_id = $1, bank = $2, photo_url = $3 WHERE id = $4"
        );
        assert_eq!(
            statement.values,
            vec![
                Some("E7".to_string()),
                Some("SBI".to_string()),
                Some("/uploads/abc_me.png".to_string()),
            ]
        );
    }

    #[test]
    fn update_without_fields_is_rejected() {
        let fields = FormFields::from_pairs([("id", "5")]).expect("fields");
        assert_eq!(fields, FormFields::default());
        let err = build_update(&fields, None).expect_err("empty update");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let err = FormFields::from_pairs([("full_name", "X"), ("is_admin", "true")])
            .expect_err("unknown column");
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(err.to_string().contains("is_admin"));

        let injection = FormFields::from_pairs([("full_name = 'x', bank", "y")]);
        assert!(injection.is_err());
    }

    #[test]
    fn insert_binds_one_value_per_column() {
        let fields =
            FormFields::from_pairs([("full_name", "Asha Rao"), ("gender", "  ")]).expect("fields");
        let statement = build_insert(None, &fields).expect("statement");

        assert_eq!(statement.values.len(), JOINING_FORM_FIELDS.len() + 1);
        assert_eq!(count_placeholders(&statement.sql), statement.values.len());
        assert!(statement.sql.starts_with("INSERT INTO joining_forms (photo_url, employee_id, full_name,"));
        assert_eq!(statement.values[0], None);
        assert_eq!(statement.values[2], Some("Asha Rao".to_string()));
        // Blank input is stored as null.
        assert_eq!(statement.values[5], None);
    }

    #[test]
    fn placeholder_counter_ignores_bare_dollars() {
        assert_eq!(count_placeholders("SELECT $1, '$', $23"), 2);
    }
}
