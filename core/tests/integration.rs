//! Full lifecycle against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives users, tickets and
//! the ticket's related assignee through `UreqTransport` over real HTTP.
//! The API key is stored as an artifact and injected by the authenticator.

use std::sync::Arc;

use apikit_core::{
    ApiError, AppConfig, AppContext, HttpMethod, Mapped, Model, ModelSchema, ParamRule, RelatedDecl,
    UpdatePayload, UreqTransport,
};
use serde_json::{json, Value};

fn start_server() -> std::net::SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });
    addr
}

struct Api {
    app: AppContext,
    user: Arc<ModelSchema>,
    ticket: Arc<ModelSchema>,
    ticket_list: Arc<apikit_core::RouteDefinition>,
}

fn api(addr: std::net::SocketAddr, artifacts: &std::path::Path) -> Api {
    let config = AppConfig::new("tickets-it")
        .with_domain(format!("http://{addr}/api"))
        .with_url_arg("version", mock_server::API_VERSION)
        .with_update_payload(UpdatePayload::Changed)
        .with_artifact_dir(artifacts);
    let mut app = AppContext::from_config(config, UreqTransport::new());
    app.artifacts().write("api-key", mock_server::API_KEY).unwrap();
    app.set_authenticator(|req| {
        let key = req.app().artifacts().read("api-key")?;
        let key = String::from_utf8(key).map_err(|e| ApiError::Config(e.to_string()))?;
        req.template_mut().header(mock_server::API_KEY_HEADER, key);
        Ok(())
    });

    let users = app
        .route("/{version}/users/{id}", [HttpMethod::Get, HttpMethod::Post])
        .url_args([ParamRule::new("version").required()])
        .json();
    let tickets = app
        .route(
            "/{version}/tickets/{id}",
            [HttpMethod::Get, HttpMethod::Post, HttpMethod::Put, HttpMethod::Delete],
        )
        .url_args([ParamRule::new("version").required()])
        .json();
    let ticket_list = app
        .route("/{version}/tickets", [HttpMethod::Get])
        .url_args([ParamRule::new("version").required()])
        .params([ParamRule::new("status").options([json!("open"), json!("closed"), Value::Null])])
        .returns_many()
        .json();

    let user = ModelSchema::builder("User")
        .fields(["id", "name", "email"])
        .route(users)
        .build();
    let ticket = ModelSchema::builder("Ticket")
        .fields(["id", "title"])
        .field_with_default("status", "open")
        .field("assignee_id")
        .route(tickets)
        .related(RelatedDecl::model("assignee", &user).url_arg_from("id", "assignee_id"))
        .build();

    Api {
        app,
        user,
        ticket,
        ticket_list,
    }
}

#[test]
fn requests_without_api_key_are_rejected() {
    let addr = start_server();
    let mut app = AppContext::new("anonymous", format!("http://{addr}/api/v1"), UreqTransport::new());
    let route = app.route("/tickets", [HttpMethod::Get]).json();

    let err = app.request(&route).get().unwrap_err();
    assert_eq!(err.status_code(), Some(401));
}

#[test]
fn ticket_lifecycle() {
    let addr = start_server();
    let dir = tempfile::tempdir().unwrap();
    let Api {
        app,
        user,
        ticket,
        ticket_list,
    } = api(addr, dir.path());

    // Step 1: no tickets yet.
    let all = app.request(&ticket_list).map_to(&ticket).get().unwrap();
    assert_eq!(all, Mapped::Many(Vec::new()));

    // Step 2: create the assignee.
    let mut ada = Model::new(&user);
    ada.set("name", "Ada").unwrap().set("email", "ada@example.com").unwrap();
    let ada = ada.create(&app).unwrap().into_one().unwrap();
    let ada_id = ada.get("id").cloned().unwrap();
    assert!(ada_id.is_string());

    // Step 3: create a ticket assigned to her.
    let mut draft = Model::new(&ticket);
    draft.set("title", "Leak").unwrap().set("assignee_id", ada_id.clone()).unwrap();
    let mut leak = draft.create(&app).unwrap().into_one().unwrap();
    assert_eq!(leak.get("status"), Some(&json!("open")));
    assert_eq!(leak.get("assignee_id"), Some(&ada_id));

    // Step 4: the related assignee resolves through the users route.
    let assignee = leak.related(&app, "assignee").unwrap().cloned().unwrap().into_one().unwrap();
    assert_eq!(assignee, ada);

    // Step 5: filter by status; a bad status never leaves the client.
    let open = app
        .request(&ticket_list)
        .map_to(&ticket)
        .param("status", "open")
        .get()
        .unwrap()
        .into_many()
        .unwrap();
    assert_eq!(open, vec![leak.clone()]);
    let err = app.request(&ticket_list).param("status", "pending").get().unwrap_err();
    assert!(err.is_validation());

    // Step 6: changed-only update.
    leak.set("status", "closed").unwrap();
    let closed = leak.update(&app).unwrap().into_one().unwrap();
    assert_eq!(closed.get("status"), Some(&json!("closed")));
    assert_eq!(closed.get("title"), Some(&json!("Leak")));
    assert!(!leak.has_pending_changes());

    let open = app
        .request(&ticket_list)
        .param("status", "open")
        .get()
        .unwrap()
        .into_value();
    assert_eq!(open, json!([]));

    // Step 7: refetch through the record's identity.
    let fetched = leak.fetch(&app).unwrap().into_one().unwrap();
    assert_eq!(fetched, closed);

    // Step 8: delete, then the record is gone.
    leak.delete(&app).unwrap();
    let err = leak.fetch(&app).unwrap_err();
    assert!(err.is_not_found());
}
