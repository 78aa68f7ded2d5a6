use std::{fmt, str::FromStr};

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::{debug, warn};

use crate::web::{
    AppState,
    auth::{decode_token, fetch_user},
    responses::ApiError,
};

/// Department whose supervisors manage training content and forms.
pub const HR_DEPARTMENT: &str = "HR";

/// Role carried in a user's `designation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Supervisor,
    Worker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Supervisor => "Supervisor",
            Role::Worker => "Worker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "supervisor" => Ok(Role::Supervisor),
            "worker" => Ok(Role::Worker),
            other => Err(format!(
                "designation must be one of Admin, Supervisor, Worker (got `{other}`)"
            )),
        }
    }
}

/// Authenticated caller, resolved from the bearer token and inserted into
/// request extensions by every guard.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub employee_id: String,
    pub name: String,
    pub department: String,
    pub role: Role,
}

impl AuthUser {
    /// `checkRole`: the caller's role must be one of `roles`.
    pub fn require_role(&self, roles: &[Role]) -> Result<(), ApiError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden("Access denied: insufficient role"))
        }
    }

    /// `checkHRDepartment`: the caller must belong to HR.
    pub fn require_hr_department(&self) -> Result<(), ApiError> {
        if self.department.eq_ignore_ascii_case(HR_DEPARTMENT) {
            Ok(())
        } else {
            Err(ApiError::forbidden(
                "Access denied: HR department access required",
            ))
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|Authorization(bearer)| bearer.token().to_string())
        .ok_or_else(|| ApiError::unauthorized("Missing or invalid Authorization header"))
}

async fn authenticate(state: &AppState, token: &str) -> Result<AuthUser, ApiError> {
    let claims = decode_token(token, &state.config().jwt_secret).map_err(|err| {
        debug!(?err, "rejected bearer token");
        ApiError::unauthorized("Invalid or expired token")
    })?;

    let user = fetch_user(state.pool_ref(), &claims.employee_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User no longer exists"))?;

    let role = user.designation.parse::<Role>().map_err(|err| {
        warn!(employee_id = %user.employee_id, %err, "user has unknown designation");
        ApiError::forbidden("Access denied: unknown role")
    })?;

    Ok(AuthUser {
        employee_id: user.employee_id,
        name: user.name,
        department: user.department,
        role,
    })
}

async fn guard(
    state: &AppState,
    mut req: Request,
    next: Next,
    roles: &[Role],
    hr_only: bool,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())?;
    let user = authenticate(state, &token).await?;
    user.require_role(roles)?;
    if hr_only {
        user.require_hr_department()?;
    }

    debug!(employee_id = %user.employee_id, name = %user.name, role = %user.role, "request authorized");
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Admin, Supervisor or Worker.
pub async fn allow_any_employee(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    guard(
        &state,
        req,
        next,
        &[Role::Admin, Role::Supervisor, Role::Worker],
        false,
    )
    .await
}

/// Supervisor or Admin.
pub async fn allow_staff(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    guard(&state, req, next, &[Role::Supervisor, Role::Admin], false).await
}

/// Supervisor inside the HR department.
pub async fn allow_hr_supervisor(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    guard(&state, req, next, &[Role::Supervisor], true).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, department: &str) -> AuthUser {
        AuthUser {
            employee_id: "EMP-1".into(),
            name: "Asha".into(),
            department: department.into(),
            role,
        }
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Supervisor".parse::<Role>(), Ok(Role::Supervisor));
        assert_eq!(" worker ".parse::<Role>(), Ok(Role::Worker));
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
        assert!("Manager".parse::<Role>().is_err());
    }

    #[test]
    fn role_gate_checks_membership() {
        let worker = user(Role::Worker, "Production");
        assert!(worker.require_role(&[Role::Worker, Role::Admin]).is_ok());
        assert!(matches!(
            worker.require_role(&[Role::Supervisor]),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn hr_gate_checks_department() {
        assert!(user(Role::Supervisor, "HR").require_hr_department().is_ok());
        assert!(user(Role::Supervisor, "hr").require_hr_department().is_ok());
        assert!(matches!(
            user(Role::Supervisor, "Finance").require_hr_department(),
            Err(ApiError::Forbidden(_))
        ));
    }
}
