use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Value every request must carry in the `x-api-key` header.
pub const API_KEY: &str = "sunshine-api-key";
pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_VERSION: &str = "v1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub title: String,
    pub status: TicketStatus,
    pub assignee_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct CreateTicket {
    pub title: String,
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub assignee_id: Option<Uuid>,
}

/// Absent or `null` fields are left unchanged; unknown keys such as `id`
/// are ignored so a full record can be sent back as is.
#[derive(Deserialize)]
pub struct UpdateTicket {
    pub title: Option<String>,
    pub status: Option<TicketStatus>,
    pub assignee_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
}

#[derive(Default)]
pub struct Store {
    tickets: RwLock<HashMap<Uuid, Ticket>>,
    users: RwLock<HashMap<Uuid, User>>,
}

pub type Db = Arc<Store>;

pub fn app() -> Router {
    let db: Db = Arc::new(Store::default());
    let api = Router::new()
        .route("/tickets", get(list_tickets).post(create_ticket))
        .route("/tickets/{id}", get(get_ticket).put(update_ticket).delete(delete_ticket))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user))
        .with_state(db);
    Router::new()
        .nest(&format!("/api/{API_VERSION}"), api)
        .layer(middleware::from_fn(require_api_key))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn require_api_key(request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get(API_KEY_HEADER)
        .is_some_and(|value| value.as_bytes() == API_KEY.as_bytes());
    if !authorized {
        debug!(uri = %request.uri(), "rejected request without api key");
        return error_body(StatusCode::UNAUTHORIZED, "missing or invalid api key");
    }
    next.run(request).await
}

async fn list_tickets(State(db): State<Db>, Query(filter): Query<TicketFilter>) -> Json<Vec<Ticket>> {
    let tickets = db.tickets.read().await;
    Json(
        tickets
            .values()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .cloned()
            .collect(),
    )
}

async fn create_ticket(State(db): State<Db>, Json(input): Json<CreateTicket>) -> (StatusCode, Json<Ticket>) {
    let ticket = Ticket {
        id: Uuid::new_v4(),
        title: input.title,
        status: input.status.unwrap_or(TicketStatus::Open),
        assignee_id: input.assignee_id,
    };
    db.tickets.write().await.insert(ticket.id, ticket.clone());
    (StatusCode::CREATED, Json(ticket))
}

async fn get_ticket(State(db): State<Db>, Path(id): Path<Uuid>) -> Result<Json<Ticket>, Response> {
    let tickets = db.tickets.read().await;
    tickets
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, "ticket not found"))
}

async fn update_ticket(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateTicket>,
) -> Result<Json<Ticket>, Response> {
    let mut tickets = db.tickets.write().await;
    let ticket = tickets
        .get_mut(&id)
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, "ticket not found"))?;
    if let Some(title) = input.title {
        ticket.title = title;
    }
    if let Some(status) = input.status {
        ticket.status = status;
    }
    if let Some(assignee) = input.assignee_id {
        ticket.assignee_id = Some(assignee);
    }
    Ok(Json(ticket.clone()))
}

async fn delete_ticket(State(db): State<Db>, Path(id): Path<Uuid>) -> Result<StatusCode, Response> {
    let mut tickets = db.tickets.write().await;
    tickets
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, "ticket not found"))
}

async fn list_users(State(db): State<Db>) -> Json<Vec<User>> {
    let users = db.users.read().await;
    Json(users.values().cloned().collect())
}

async fn create_user(State(db): State<Db>, Json(input): Json<CreateUser>) -> (StatusCode, Json<User>) {
    let user = User {
        id: Uuid::new_v4(),
        name: input.name,
        email: input.email,
    };
    db.users.write().await.insert(user.id, user.clone());
    (StatusCode::CREATED, Json(user))
}

async fn get_user(State(db): State<Db>, Path(id): Path<Uuid>) -> Result<Json<User>, Response> {
    let users = db.users.read().await;
    users
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, "user not found"))
}
