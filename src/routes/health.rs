use crate::models::health::HealthResponse;
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_okapi::openapi;
use sqlx::PgPool;
use std::time::Duration;

const DATABASE_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Liveness plus a quick database probe. Always 200 so the API is reachable
/// while the database is still coming up.
#[openapi(tag = "Health")]
#[get("/")]
pub async fn healthcheck(pool: &State<PgPool>) -> Json<HealthResponse> {
    let database = match tokio::time::timeout(DATABASE_PROBE_TIMEOUT, sqlx::query("SELECT 1").execute(pool.inner())).await {
        Ok(Ok(_)) => "up",
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "database health probe failed");
            "down"
        }
        Err(_) => "down",
    };

    Json(HealthResponse { status: "ok", database })
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![healthcheck]
}
