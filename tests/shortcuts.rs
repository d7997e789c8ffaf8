use mssql_fabric_loader::{
    config::FabricConfig,
    fabric::{provision_shortcuts, CreateShortcutRequest, FabricError, ProvisionOutcome},
    pipeline::DATASET_NAME,
    table_folders,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use url::Url;
use warp::{http::StatusCode, Filter, Reply};

const TOKEN: &str = "test-token";
const WORKSPACE: &str = "ws-0001";
const ITEM: &str = "lakehouse-0002";

#[derive(Default)]
struct Mock {
    existing: Vec<String>,
    fail_for: Option<String>,
    accepted_without_create: Option<String>,
    list_status: Option<u16>,
    token_requests: Vec<HashMap<String, String>>,
    authorizations: Vec<String>,
    create_queries: Vec<HashMap<String, String>>,
    created: Vec<CreateShortcutRequest>,
}

type Shared = Arc<Mutex<Mock>>;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Serve the identity and shortcut endpoints on an ephemeral port.
fn serve(mock: Shared) -> SocketAddr {
    let state = warp::any().map({
        let mock = mock.clone();
        move || mock.clone()
    });

    let token = warp::post()
        .and(warp::path!(String / "oauth2" / "v2.0" / "token"))
        .and(warp::body::form::<HashMap<String, String>>())
        .and(state.clone())
        .map(|_tenant: String, form: HashMap<String, String>, mock: Shared| {
            let ok = form.get("client_secret").map(String::as_str) == Some("s3cret");
            mock.lock().unwrap().token_requests.push(form);
            if ok {
                warp::reply::json(&serde_json::json!({
                    "token_type": "Bearer",
                    "expires_in": 3599,
                    "access_token": TOKEN,
                }))
                .into_response()
            } else {
                warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({
                        "error": "invalid_client",
                        "error_description": "AADSTS7000215: Invalid client secret provided.",
                    })),
                    StatusCode::UNAUTHORIZED,
                )
                .into_response()
            }
        });

    let list = warp::get()
        .and(warp::path!("v1" / "workspaces" / String / "items" / String / "shortcuts"))
        .and(warp::header::<String>("authorization"))
        .and(state.clone())
        .map(|_ws: String, _item: String, auth: String, mock: Shared| {
            let mut m = mock.lock().unwrap();
            m.authorizations.push(auth);
            if let Some(status) = m.list_status {
                return warp::reply::with_status(
                    "forbidden",
                    StatusCode::from_u16(status).unwrap(),
                )
                .into_response();
            }
            let value: Vec<_> = m
                .existing
                .iter()
                .chain(m.created.iter().map(|r| &r.name))
                .map(|name| serde_json::json!({ "name": name, "path": "Tables/" }))
                .collect();
            warp::reply::json(&serde_json::json!({ "value": value })).into_response()
        });

    let create = warp::post()
        .and(warp::path!("v1" / "workspaces" / String / "items" / String / "shortcuts"))
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::header::<String>("authorization"))
        .and(warp::body::json::<CreateShortcutRequest>())
        .and(state)
        .map(
            |_ws: String,
             _item: String,
             query: HashMap<String, String>,
             auth: String,
             body: CreateShortcutRequest,
             mock: Shared| {
                let mut m = mock.lock().unwrap();
                m.authorizations.push(auth);
                m.create_queries.push(query);
                if m.fail_for.as_deref() == Some(body.name.as_str()) {
                    return warp::reply::with_status("internal error", StatusCode::INTERNAL_SERVER_ERROR)
                        .into_response();
                }
                if m.accepted_without_create.as_deref() == Some(body.name.as_str()) {
                    return warp::reply::with_status(warp::reply::json(&body), StatusCode::OK)
                        .into_response();
                }
                m.created.push(body.clone());
                warp::reply::with_status(warp::reply::json(&body), StatusCode::CREATED)
                    .into_response()
            },
        );

    let (addr, server) =
        warp::serve(token.or(list).or(create)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn fabric_config(addr: SocketAddr, secret: &str) -> FabricConfig {
    let base = Url::parse(&format!("http://{}/", addr)).unwrap();
    FabricConfig {
        client_id: "client-id".into(),
        client_secret: secret.into(),
        tenant_id: "tenant-id".into(),
        workspace_id: WORKSPACE.into(),
        item_id: ITEM.into(),
        api_base: base.clone(),
        authority_host: base,
    }
}

fn created_names(mock: &Shared) -> Vec<String> {
    mock.lock()
        .unwrap()
        .created
        .iter()
        .map(|r| r.name.clone())
        .collect()
}

#[tokio::test]
async fn empty_listing_creates_three_shortcuts() {
    init_logging();
    let mock = Shared::default();
    let addr = serve(mock.clone());

    let outcomes = provision_shortcuts(&fabric_config(addr, "s3cret"), DATASET_NAME, &table_folders())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|(_, o)| *o == ProvisionOutcome::Created));
    assert_eq!(created_names(&mock), ["products", "customers", "orders"]);

    let m = mock.lock().unwrap();
    assert_eq!(m.token_requests.len(), 1);
    let form = &m.token_requests[0];
    assert_eq!(form["grant_type"], "client_credentials");
    assert_eq!(form["client_id"], "client-id");
    assert_eq!(
        form["scope"],
        "https://analysis.windows.net/powerbi/api/.default"
    );

    assert!(m
        .authorizations
        .iter()
        .all(|a| a == &format!("Bearer {}", TOKEN)));
    assert!(m
        .create_queries
        .iter()
        .all(|q| q.get("shortcutConflictPolicy").map(String::as_str) == Some("CreateOrOverwrite")));

    let orders = &m.created[2];
    assert_eq!(orders.path, "Tables/");
    assert_eq!(orders.target.one_lake.workspace_id, WORKSPACE);
    assert_eq!(orders.target.one_lake.item_id, ITEM);
    assert_eq!(orders.target.one_lake.path, "Files/mssql_tables_dataset/orders");
}

#[tokio::test]
async fn existing_products_shortcut_is_skipped() {
    init_logging();
    let mock = Shared::new(Mutex::new(Mock {
        existing: vec!["Products".into()],
        ..Default::default()
    }));
    let addr = serve(mock.clone());

    let outcomes = provision_shortcuts(&fabric_config(addr, "s3cret"), DATASET_NAME, &table_folders())
        .await
        .unwrap();

    assert_eq!(outcomes[0], ("products".to_string(), ProvisionOutcome::AlreadyExists));
    assert_eq!(created_names(&mock), ["customers", "orders"]);
}

#[tokio::test]
async fn server_error_on_one_create_is_not_fatal() {
    init_logging();
    let mock = Shared::new(Mutex::new(Mock {
        fail_for: Some("orders".into()),
        ..Default::default()
    }));
    let addr = serve(mock.clone());

    let outcomes = provision_shortcuts(&fabric_config(addr, "s3cret"), DATASET_NAME, &table_folders())
        .await
        .unwrap();

    assert_eq!(created_names(&mock), ["products", "customers"]);
    assert!(matches!(
        outcomes[2].1,
        ProvisionOutcome::Failed { status: 500, .. }
    ));
}

#[tokio::test]
async fn ok_instead_of_created_counts_as_failure() {
    init_logging();
    let mock = Shared::new(Mutex::new(Mock {
        accepted_without_create: Some("customers".into()),
        ..Default::default()
    }));
    let addr = serve(mock.clone());

    let outcomes = provision_shortcuts(&fabric_config(addr, "s3cret"), DATASET_NAME, &table_folders())
        .await
        .unwrap();

    assert_eq!(outcomes[0].1, ProvisionOutcome::Created);
    assert!(matches!(
        outcomes[1],
        (ref folder, ProvisionOutcome::Failed { status: 200, .. }) if folder == "customers"
    ));
    assert_eq!(outcomes[2].1, ProvisionOutcome::Created);
    assert_eq!(created_names(&mock), ["products", "orders"]);
}

#[tokio::test]
async fn rejected_credentials_surface_identity_error() {
    init_logging();
    let mock = Shared::default();
    let addr = serve(mock.clone());

    let err = provision_shortcuts(&fabric_config(addr, "wrong"), DATASET_NAME, &table_folders())
        .await
        .unwrap_err();

    match err {
        FabricError::Auth { status, error, .. } => {
            assert_eq!(status, 401);
            assert_eq!(error, "invalid_client");
        }
        other => panic!("expected auth error, got {:?}", other),
    }
    assert!(created_names(&mock).is_empty());
}

#[tokio::test]
async fn listing_failure_aborts_provisioning() {
    init_logging();
    let mock = Shared::new(Mutex::new(Mock {
        list_status: Some(403),
        ..Default::default()
    }));
    let addr = serve(mock.clone());

    let err = provision_shortcuts(&fabric_config(addr, "s3cret"), DATASET_NAME, &table_folders())
        .await
        .unwrap_err();

    assert!(matches!(err, FabricError::Status { status: 403, .. }));
    assert!(created_names(&mock).is_empty());
}
