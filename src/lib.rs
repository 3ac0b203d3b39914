pub mod capabilities;
mod config;
mod cron_tasks;
pub mod database;
mod db;
pub mod error;
pub mod feed;
mod middleware;
pub mod models;
mod routes;
pub mod service;

#[cfg(test)]
pub mod test_utils;

pub use config::{Config, SessionConfig};
pub use cron_tasks::{SweepResult, sweep_stale_sessions};
pub use service::session::{SessionContext, SessionController, SessionSnapshot, SessionStatus};

use crate::db::stage_db;
use crate::middleware::RequestLogger;
use crate::routes as app_routes;
use rocket::{Build, Rocket, catchers, http::Method};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};
use rocket_okapi::{get_openapi_route, okapi::merge::marge_spec_list};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` takes precedence over the configured level, e.g.
/// `RUST_LOG=info,coscribe::service::session=trace` to follow feed traffic.
pub fn init_tracing(log_level: &str, json_format: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    // try_init: tests build several rockets in one process.
    let _ = if json_format {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
}

fn build_cors(cors_config: &config::CorsConfig) -> CorsOptions {
    let is_wildcard = cors_config.allowed_origins.len() == 1 && cors_config.allowed_origins[0] == "*";

    let allowed_origins = if cors_config.allowed_origins.is_empty() {
        AllowedOrigins::some_exact::<&str>(&[])
    } else if is_wildcard {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&cors_config.allowed_origins.iter().map(String::as_str).collect::<Vec<_>>())
    };

    CorsOptions {
        allowed_origins,
        allowed_methods: vec![Method::Get, Method::Post, Method::Put, Method::Delete, Method::Patch, Method::Options, Method::Head]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: rocket_cors::AllowedHeaders::some(&["Content-Type", "Accept"]),
        expose_headers: [middleware::REQUEST_ID_HEADER.to_string()].into_iter().collect(),
        allow_credentials: false,
        ..Default::default()
    }
}

fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return config::DEFAULT_API_BASE_PATH.to_string();
    }

    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };

    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }

    normalized
}

fn join_base_path(base_path: &str, path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    let suffix = path.trim_start_matches('/');

    if base.is_empty() {
        format!("/{}", suffix)
    } else {
        format!("{}/{}", base, suffix)
    }
}

struct RouteSpec {
    path: &'static str,
    routes: Vec<rocket::Route>,
    openapi: rocket_okapi::okapi::openapi3::OpenApi,
}

fn collect_route_specs() -> Vec<RouteSpec> {
    let (document_routes, document_openapi) = app_routes::document::routes();
    let (session_routes, session_openapi) = app_routes::session::routes();
    let (health_routes, health_openapi) = app_routes::health::routes();

    vec![
        RouteSpec {
            path: "/documents",
            routes: document_routes,
            openapi: document_openapi,
        },
        RouteSpec {
            path: "/sessions",
            routes: session_routes,
            openapi: session_openapi,
        },
        RouteSpec {
            path: "/health",
            routes: health_routes,
            openapi: health_openapi,
        },
    ]
}

fn mount_api_routes(mut rocket: Rocket<Build>, base_path: &str, enable_swagger: bool) -> Rocket<Build> {
    let route_specs = collect_route_specs();

    if !enable_swagger {
        for spec in route_specs {
            rocket = rocket.mount(join_base_path(base_path, spec.path), spec.routes);
        }
        return rocket;
    }

    let mut openapi_list = Vec::new();
    for spec in route_specs {
        rocket = rocket.mount(join_base_path(base_path, spec.path), spec.routes);
        openapi_list.push((spec.path, spec.openapi));
    }

    match marge_spec_list(&openapi_list) {
        Ok(docs) => {
            let settings = rocket_okapi::settings::OpenApiSettings::default();
            rocket = rocket.mount(base_path, vec![get_openapi_route(docs, &settings)]);

            let swagger = SwaggerUIConfig {
                url: join_base_path(base_path, "openapi.json"),
                ..Default::default()
            };
            rocket.mount(join_base_path(base_path, "docs"), make_swagger_ui(&swagger))
        }
        Err(err) => {
            tracing::error!("Could not merge OpenAPI spec, serving the API without docs: {}", err);
            rocket
        }
    }
}

pub fn build_rocket(config: Config) -> Rocket<Build> {
    init_tracing(&config.logging.level, config.logging.json_format);

    let base_path = normalize_base_path(&config.api.base_path);
    let figment = rocket::Config::figment()
        .merge(("port", config.server.port))
        .merge(("address", config.server.address.clone()));
    let mut rocket = rocket::custom(figment).attach(RequestLogger).attach(stage_db(config.database.clone()));

    match build_cors(&config.cors).to_cors() {
        Ok(cors) => rocket = rocket.attach(cors),
        Err(err) => tracing::error!("Invalid CORS configuration, CORS disabled: {}", err),
    }

    rocket = mount_api_routes(rocket, &base_path, config.api.enable_swagger);
    rocket = rocket.mount(join_base_path(&base_path, "cron"), app_routes::cron::routes());

    rocket
        .register(
            base_path.as_str(),
            catchers![app_routes::error::not_found, app_routes::error::conflict, app_routes::error::service_unavailable],
        )
        .manage(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_is_normalized() {
        assert_eq!(normalize_base_path(""), "/api");
        assert_eq!(normalize_base_path("v1/"), "/v1");
        assert_eq!(normalize_base_path("/"), "/");
        assert_eq!(join_base_path("/", "documents"), "/documents");
        assert_eq!(join_base_path("/api", "/documents"), "/api/documents");
    }

    #[test]
    fn every_api_module_is_mounted() {
        let paths: Vec<&str> = collect_route_specs().iter().map(|spec| spec.path).collect();
        assert_eq!(paths, vec!["/documents", "/sessions", "/health"]);
    }
}
