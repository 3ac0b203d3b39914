use crate::config::Config;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::session::SessionRepository;
use crate::error::app_error::AppError;
use crate::models::session::SweepResponse;
use chrono::Utc;
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};
use rocket::serde::json::Json;
use rocket::{State, post, routes};
use sqlx::PgPool;

pub(crate) struct CronAuth;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CronAuth {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let config = match req.rocket().state::<Config>() {
            Some(config) => config,
            None => return Outcome::Error((Status::InternalServerError, AppError::BadRequest("Configuration is not loaded".to_string()))),
        };

        if config.cron.auth_token.is_empty() {
            return Outcome::Error((Status::BadRequest, AppError::BadRequest("Cron auth token is not configured".to_string())));
        }

        let incoming = req.headers().get_one("x-cron-token");
        match incoming {
            Some(token) if token == config.cron.auth_token => Outcome::Success(CronAuth),
            _ => Outcome::Error((Status::Forbidden, AppError::Forbidden)),
        }
    }
}

/// Server-side staleness sweep across every document.
#[post("/sweep-sessions")]
pub async fn sweep_sessions(pool: &State<PgPool>, config: &State<Config>, _cron_auth: CronAuth) -> Result<Json<SweepResponse>, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let cutoff = Utc::now() - config.session.stale_after();
    let sessions_removed = repo.delete_stale_sessions(cutoff).await?;
    tracing::info!(sessions_removed, %cutoff, "cron session sweep finished");
    Ok(Json(SweepResponse { sessions_removed, cutoff }))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![sweep_sessions]
}
