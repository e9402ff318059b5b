use actix_web::{get, web};

use crate::errors::AppError;
use crate::middleware::auth::{AuthenticatedUser, MaybeAuthenticated};

#[get("/user")]
pub async fn get_user(user: AuthenticatedUser) -> Result<web::Json<crate::middleware::auth::Principal>, AppError> {
    Ok(web::Json(user.0))
}

/// Session probe for the landing page: absence of a session is a valid
/// answer here, not a failure, so this responds 200 with `null` instead of
/// 401.
#[get("/session")]
pub async fn get_session(
    session: MaybeAuthenticated,
) -> Result<web::Json<Option<crate::middleware::auth::Principal>>, AppError> {
    Ok(web::Json(session.0))
}
