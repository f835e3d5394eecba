use actix_web::{
    HttpResponse, ResponseError,
    web::{self},
};
use derive_more::derive::{Display, Error};
use serde::Deserialize;

use crate::core::time::Duration;
use crate::power::{Outage, PowerClient};

const DEFAULT_OUTAGE_LIMIT: i64 = 20;
const MAX_OUTAGE_LIMIT: i64 = 500;

pub fn new_routes(client: PowerClient) -> actix_web::Scope {
    web::scope("/api/power")
        .app_data(web::Data::new(client))
        .route("/status", web::get().to(get_status))
        .route("/uptime", web::get().to(get_uptime))
        .route("/rooms/{room}/uptime", web::get().to(get_room_uptime))
        .route("/switches", web::get().to(get_switches))
        .route("/outages", web::get().to(get_outages))
}

type PowerApiResponse = Result<HttpResponse, PowerApiError>;

#[derive(Debug, Error, Display)]
enum PowerApiError {
    #[display("Error accessing data")]
    DataAccessError(anyhow::Error),

    #[display("Not found")]
    NotFound,
}

impl ResponseError for PowerApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        tracing::warn!("PowerApiError: {:?}", self);

        match self {
            PowerApiError::NotFound => StatusCode::NOT_FOUND,
            PowerApiError::DataAccessError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

async fn get_status(client: web::Data<PowerClient>) -> PowerApiResponse {
    match client.current_status().await.map_err(PowerApiError::DataAccessError)? {
        Some(status) => Ok(HttpResponse::Ok().json(status)),
        None => Err(PowerApiError::NotFound),
    }
}

async fn get_uptime(client: web::Data<PowerClient>) -> PowerApiResponse {
    match client.house_uptime().await.map_err(PowerApiError::DataAccessError)? {
        Some(uptime) => Ok(HttpResponse::Ok().json(uptime)),
        None => Err(PowerApiError::NotFound),
    }
}

async fn get_room_uptime(client: web::Data<PowerClient>, room: web::Path<String>) -> PowerApiResponse {
    match client
        .room_uptime(&room)
        .await
        .map_err(PowerApiError::DataAccessError)?
    {
        Some(uptime) => Ok(HttpResponse::Ok().json(uptime)),
        None => Err(PowerApiError::NotFound),
    }
}

async fn get_switches(client: web::Data<PowerClient>) -> PowerApiResponse {
    let switches = client.switches().await.map_err(PowerApiError::DataAccessError)?;
    Ok(HttpResponse::Ok().json(switches))
}

#[derive(Debug, Deserialize)]
struct OutageQuery {
    limit: Option<i64>,
}

async fn get_outages(client: web::Data<PowerClient>, query: web::Query<OutageQuery>) -> PowerApiResponse {
    let limit = query.limit.unwrap_or(DEFAULT_OUTAGE_LIMIT).clamp(1, MAX_OUTAGE_LIMIT);

    #[derive(serde::Serialize)]
    struct Row {
        #[serde(flatten)]
        outage: Outage,
        ongoing: bool,
        duration: Duration,
    }

    let rows: Vec<Row> = client
        .outages(limit)
        .await
        .map_err(PowerApiError::DataAccessError)?
        .into_iter()
        .map(|outage| Row {
            ongoing: outage.is_ongoing(),
            duration: outage.duration(),
            outage,
        })
        .collect();

    Ok(HttpResponse::Ok().json(rows))
}
