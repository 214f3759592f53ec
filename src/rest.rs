//! REST API layer using Axum.
//!
//! Routes are grouped per resource under versioned prefixes:
//! - `/auth/v1`: register/login (gated by the shared `apikey` header) and logout.
//! - `/vision/v1`, `/goal/v1`, `/task/v1`: create/show/update/delete, each
//!   scoped to the parent id carried in the request.
//! - `/ai/v1/generate`: AI task breakdown for a goal description.
//!
//! Protected routes pass `auth_middleware`, which verifies the bearer token
//! and attaches [`AuthUser`] to the request.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::ai::{CompletionProvider, GenerationError, TaskGenerator};
use crate::auth::{bearer_token, hash_password, AuthError, SessionAuthority};
use crate::config::Config;
use crate::error::{ApiError, MessageResponse};
use crate::models::{AuthUser, Goal, NewUser, PublicUser, Task, Vision};
use crate::storage::{StoreError, Storage};

pub mod goals;
pub mod tasks;
pub mod visions;

/// Shared app state for REST handlers (Arc-wrapped for concurrency)
pub struct AppState {
    pub storage: Storage,
    pub sessions: SessionAuthority,
    pub generator: TaskGenerator,
    api_key: String,
    bcrypt_cost: u32,
}

impl AppState {
    pub fn new(config: &Config, storage: Storage, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            sessions: SessionAuthority::new(
                config.jwt_secret.as_bytes(),
                config.jwt_expires_in,
                storage.clone(),
            ),
            generator: TaskGenerator::new(provider),
            api_key: config.api_key.clone(),
            bcrypt_cost: config.bcrypt_cost,
            storage,
        }
    }
}

// --- Shared request checks ---

pub(crate) fn require_text(value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation);
    }
    Ok(())
}

/// `search=` with nothing after it is a malformed filter, not "match all".
pub(crate) fn search_term(search: Option<String>) -> Result<Option<String>, ApiError> {
    match search {
        Some(term) if term.is_empty() => Err(ApiError::Validation),
        other => Ok(other),
    }
}

pub(crate) fn internal(operation: &'static str) -> impl FnOnce(StoreError) -> ApiError {
    move |err| ApiError::server(operation, err)
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

// --- Middleware ---

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let token = bearer_token(auth_header)?;
    let user_id = state.sessions.verify(token)?;

    req.extensions_mut().insert(AuthUser { user_id });
    Ok(next.run(req).await)
}

async fn api_key_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let matches = req
        .headers()
        .get("apikey")
        .map(|value| value.as_bytes() == state.api_key.as_bytes());
    match matches {
        None => Err(ApiError::Unauthorized("Unauthorized: API KEY not Found")),
        Some(false) => Err(ApiError::Unauthorized("Unauthorized: Invalid API KEY")),
        Some(true) => Ok(next.run(req).await),
    }
}

/// Create Axum router with every API route plus the Swagger UI
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let auth_routes = Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), api_key_middleware))
        .route("/logout", post(logout_handler));

    // Only creation is token-gated for visions
    let vision_routes = Router::new()
        .route("/create", post(visions::create_vision))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .route("/show", get(visions::show_visions))
        .route("/update", put(visions::update_vision))
        .route("/delete", delete(visions::delete_vision));

    let goal_routes = Router::new()
        .route("/create", post(goals::create_goal))
        .route("/show", get(goals::show_goals))
        .route("/update", put(goals::update_goal))
        .route("/delete", delete(goals::delete_goal))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let task_routes = Router::new()
        .route("/create", post(tasks::create_tasks))
        .route("/show", get(tasks::show_tasks))
        .route("/update", put(tasks::update_task))
        .route("/delete", delete(tasks::delete_task))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let ai_routes = Router::new()
        .route("/generate", post(generate_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/auth/v1", auth_routes)
        .nest("/vision/v1", vision_routes)
        .nest("/goal/v1", goal_routes)
        .nest("/task/v1", task_routes)
        .nest("/ai/v1", ai_routes)
        .route("/health", get(health_handler))
        .merge(SwaggerUi::new("/api-docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Auth ---

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub nickname: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_confirm: Option<String>,
}

impl RegisterRequest {
    fn validate(&self) -> Result<(), ApiError> {
        require_text(&self.name)?;
        require_text(&self.nickname)?;
        if !looks_like_email(&self.email) || self.password.chars().count() < 8 {
            return Err(ApiError::Validation);
        }
        if matches!(&self.password_confirm, Some(confirm) if confirm != &self.password) {
            return Err(ApiError::Validation);
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub error: bool,
    pub message: String,
    pub token: String,
    pub credentials: PublicUser,
}

#[utoipa::path(
    post,
    path = "/auth/v1/register",
    tag = "Authentication",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Registration successful", body = MessageResponse),
        (status = 400, description = "Validation error or email already in use", body = MessageResponse),
        (status = 401, description = "Missing or invalid API key", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    ),
    security(("apiKey" = []))
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    const OP: &str = "Register";
    let Json(payload) = payload.map_err(|_| ApiError::Validation)?;
    payload.validate()?;

    if state.storage.email_exists(&payload.email).map_err(internal(OP))? {
        return Err(ApiError::Conflict("Bad Request: Email Used"));
    }
    let password = payload.password;
    let cost = state.bcrypt_cost;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .map_err(|err| ApiError::server(OP, err))?
        .map_err(|err| ApiError::server(OP, err))?;
    let new = NewUser {
        name: payload.name,
        nickname: payload.nickname,
        email: payload.email,
        password_hash,
    };
    match state.storage.create_user(new, Utc::now()) {
        Ok(user) => info!(user_id = user.id, "user registered"),
        Err(StoreError::DuplicateEmail) => {
            return Err(ApiError::Conflict("Bad Request: Email Used"))
        }
        Err(err) => return Err(ApiError::server(OP, err)),
    }

    Ok(Json(MessageResponse::ok("Register: Succeed")))
}

#[utoipa::path(
    post,
    path = "/auth/v1/login",
    tag = "Authentication",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 401, description = "Bad API key, unknown email or wrong password", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    ),
    security(("apiKey" = []))
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(payload) = payload.map_err(|_| ApiError::Validation)?;
    if !looks_like_email(&payload.email) || payload.password.chars().count() < 8 {
        return Err(ApiError::Validation);
    }

    let sessions = state.sessions.clone();
    let LoginRequest { email, password } = payload;
    let outcome = tokio::task::spawn_blocking(move || sessions.authenticate(&email, &password))
        .await
        .map_err(|err| ApiError::server("Login", err))?;
    let session = match outcome {
        Ok(session) => session,
        Err(err @ (AuthError::InvalidEmail | AuthError::InvalidPassword)) => return Err(err.into()),
        Err(err) => return Err(ApiError::server("Login", err)),
    };
    info!(user_id = session.user.id, "user logged in");
    Ok(Json(LoginResponse {
        error: false,
        message: "Login: Succeed".to_string(),
        token: session.token,
        credentials: session.user,
    }))
}

/// Tells the client to drop its session cookie. The bearer token itself is
/// not revoked and stays valid until it expires.
#[utoipa::path(
    post,
    path = "/auth/v1/logout",
    tag = "Authentication",
    responses((status = 200, description = "Logout acknowledged", body = MessageResponse))
)]
pub async fn logout_handler() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, "usersSave=logout; Max-Age=0; Path=/; HttpOnly")],
        Json(MessageResponse::ok("Logout: Succeed")),
    )
}

// --- AI ---

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct GenerateRequest {
    pub prompt: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct GenerateResponse {
    pub error: bool,
    pub message: String,
    pub tasks: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/ai/v1/generate",
    tag = "AI",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Task generation successful", body = GenerateResponse),
        (status = 400, description = "Validation error or nothing usable generated", body = MessageResponse),
        (status = 401, description = "Token problem", body = MessageResponse),
        (status = 500, description = "Provider or server error", body = MessageResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(payload) = payload.map_err(|_| ApiError::Validation)?;
    require_text(&payload.prompt)?;

    let tasks = match state.generator.generate(&payload.prompt).await {
        Ok(tasks) => tasks,
        Err(GenerationError::Empty) => return Err(ApiError::GenerationFailed),
        Err(err) => return Err(ApiError::server("Generate Task", err)),
    };
    info!(user_id = auth.user_id, count = tasks.len(), "tasks generated");
    Ok(Json(GenerateResponse {
        error: false,
        message: "Generate Task: Succeed".to_string(),
        tasks,
    }))
}

/// Health check handler
async fn health_handler() -> Json<MessageResponse> {
    Json(MessageResponse::ok("MyPath API healthy"))
}

// --- OpenAPI ---

#[derive(OpenApi)]
#[openapi(
    info(title = "MyPath-Ai API Documentation"),
    paths(
        register_handler,
        login_handler,
        logout_handler,
        generate_handler,
        visions::create_vision,
        visions::show_visions,
        visions::update_vision,
        visions::delete_vision,
        goals::create_goal,
        goals::show_goals,
        goals::update_goal,
        goals::delete_goal,
        tasks::create_tasks,
        tasks::show_tasks,
        tasks::update_task,
        tasks::delete_task,
    ),
    components(schemas(
        MessageResponse,
        RegisterRequest,
        LoginRequest,
        LoginResponse,
        PublicUser,
        GenerateRequest,
        GenerateResponse,
        Vision,
        Goal,
        Task,
        visions::CreateVision,
        visions::UpdateVision,
        visions::VisionEntry,
        visions::VisionList,
        visions::VisionUpdated,
        goals::CreateGoal,
        goals::UpdateGoal,
        goals::GoalEntry,
        goals::GoalList,
        goals::GoalUpdated,
        tasks::TaskDraft,
        tasks::CreateTasks,
        tasks::UpdateTask,
        tasks::TaskEntry,
        tasks::TaskList,
        tasks::TaskUpdated,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication"),
        (name = "Visions"),
        (name = "Goals"),
        (name = "Tasks"),
        (name = "AI")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "apiKey",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("apikey"))),
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::ai::ScriptedProvider;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, StatusCode};
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt; // For .oneshot() testing

    pub const API_KEY: &str = "test-api-key";

    pub struct TestApp {
        pub router: Router,
        pub storage: Storage,
        _dir: TempDir,
    }

    impl TestApp {
        pub fn new() -> Self {
            Self::with_provider(ScriptedProvider::replying(&["1. Draft outline\n2. Review"]))
        }

        pub fn with_provider(provider: ScriptedProvider) -> Self {
            let dir = TempDir::new().expect("temp dir");
            let storage = Storage::open(dir.path()).expect("Storage for REST test");
            let config = Config::from_lookup(|key| match key {
                "API_KEY" => Some(API_KEY.to_string()),
                "JWT_SECRET" => Some("rest-test-secret".to_string()),
                "BCRYPT_COST" => Some("4".to_string()),
                _ => None,
            })
            .expect("test config");
            let state = AppState::new(&config, storage.clone(), Arc::new(provider));
            Self {
                router: create_router(state),
                storage,
                _dir: dir,
            }
        }

        pub async fn call(
            &self,
            method: Method,
            uri: &str,
            headers: &[(&str, &str)],
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            let body = match body {
                Some(json) => {
                    request = request.header("content-type", "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let response = self
                .router
                .clone()
                .oneshot(request.body(body).unwrap())
                .await
                .expect("request");
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, json)
        }

        /// Registers and logs in, returning (user id, bearer header value).
        pub async fn login_as(&self, email: &str) -> (u64, String) {
            let (status, _) = self
                .call(
                    Method::POST,
                    "/auth/v1/register",
                    &[("apikey", API_KEY)],
                    Some(serde_json::json!({
                        "name": "Ann",
                        "nickname": "ann",
                        "email": email,
                        "password": "password123",
                        "password_confirm": "password123"
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            let (status, body) = self
                .call(
                    Method::POST,
                    "/auth/v1/login",
                    &[("apikey", API_KEY)],
                    Some(serde_json::json!({ "email": email, "password": "password123" })),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            let id = body["credentials"]["id"].as_u64().unwrap();
            let token = body["token"].as_str().unwrap();
            (id, format!("Bearer {token}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{TestApp, API_KEY};
    use super::*;
    use crate::ai::ScriptedProvider;
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    fn ann(email: &str) -> serde_json::Value {
        json!({ "name": "Ann", "nickname": "ann", "email": email, "password": "password123" })
    }

    #[tokio::test]
    async fn test_rest_health_and_docs() {
        let app = TestApp::new();
        let (status, body) = app.call(Method::GET, "/health", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], false);

        let (status, doc) = app.call(Method::GET, "/openapi.json", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(doc["paths"]["/goal/v1/create"].is_object());
    }

    #[tokio::test]
    async fn register_requires_api_key() {
        let app = TestApp::new();
        let (status, body) = app
            .call(Method::POST, "/auth/v1/register", &[], Some(ann("a@x.com")))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Unauthorized: API KEY not Found");

        let (status, body) = app
            .call(
                Method::POST,
                "/auth/v1/register",
                &[("apikey", "wrong")],
                Some(ann("a@x.com")),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Unauthorized: Invalid API KEY");
    }

    #[tokio::test]
    async fn second_registration_with_same_email_conflicts() {
        let app = TestApp::new();
        let key = [("apikey", API_KEY)];
        let (status, body) = app
            .call(Method::POST, "/auth/v1/register", &key, Some(ann("a@x.com")))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Register: Succeed");

        let (status, body) = app
            .call(Method::POST, "/auth/v1/register", &key, Some(ann("a@x.com")))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], true);
        assert_eq!(body["message"], "Bad Request: Email Used");
        assert!(app.storage.find_user_by_email("a@x.com").unwrap().is_some());
    }

    #[tokio::test]
    async fn register_validates_shape() {
        let app = TestApp::new();
        let key = [("apikey", API_KEY)];
        let cases = [
            json!({
                "name": "Ann", "nickname": "ann", "email": "not-an-email", "password": "password123"
            }),
            json!({ "name": "Ann", "nickname": "ann", "email": "a@x.com", "password": "short" }),
            json!({ "name": "Ann", "email": "a@x.com", "password": "password123" }),
            json!({
                "name": "Ann", "nickname": "ann", "email": "a@x.com", "password": "password123",
                "password_confirm": "password124"
            }),
            json!({
                "name": "Ann", "nickname": "ann", "email": "a@x.com", "password": "password123",
                "role": "admin"
            }),
        ];
        for case in cases {
            let (status, body) = app
                .call(Method::POST, "/auth/v1/register", &key, Some(case))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["message"], "Bad Request: Validation");
        }
    }

    #[tokio::test]
    async fn login_reports_bad_email_and_password() {
        let app = TestApp::new();
        let (user_id, _) = app.login_as("a@x.com").await;
        let key = [("apikey", API_KEY)];

        let (status, body) = app
            .call(
                Method::POST,
                "/auth/v1/login",
                &key,
                Some(json!({ "email": "b@x.com", "password": "password123" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Unauthorized: Email Invalid");

        let (status, body) = app
            .call(
                Method::POST,
                "/auth/v1/login",
                &key,
                Some(json!({ "email": "a@x.com", "password": "password999" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Unauthorized: Password Invalid");

        let (status, body) = app
            .call(
                Method::POST,
                "/auth/v1/login",
                &key,
                Some(json!({ "email": "a@x.com", "password": "password123" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["credentials"]["id"], user_id);
        assert_eq!(body["credentials"]["nickname"], "ann");
        assert!(body["credentials"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn password_hashing_leaves_the_runtime_free() {
        let app = TestApp::new();
        let key = [("apikey", API_KEY)];
        let login = json!({ "email": "a@x.com", "password": "password123" });
        let order = std::sync::Mutex::new(Vec::new());

        let register = async {
            let (status, _) = app
                .call(Method::POST, "/auth/v1/register", &key, Some(ann("a@x.com")))
                .await;
            order.lock().unwrap().push(("register", status));
        };
        let health = async {
            let (status, _) = app.call(Method::GET, "/health", &[], None).await;
            order.lock().unwrap().push(("health", status));
        };
        tokio::join!(register, health);

        let sign_in = async {
            let (status, _) = app
                .call(Method::POST, "/auth/v1/login", &key, Some(login.clone()))
                .await;
            order.lock().unwrap().push(("login", status));
        };
        let health = async {
            let (status, _) = app.call(Method::GET, "/health", &[], None).await;
            order.lock().unwrap().push(("health", status));
        };
        tokio::join!(sign_in, health);

        assert_eq!(
            order.into_inner().unwrap(),
            vec![
                ("health", StatusCode::OK),
                ("register", StatusCode::OK),
                ("health", StatusCode::OK),
                ("login", StatusCode::OK),
            ]
        );
    }

    #[tokio::test]
    async fn bearer_failures_are_unauthorized() {
        let app = TestApp::new();
        let prompt = Some(json!({ "prompt": "Run a marathon" }));

        let (status, body) = app
            .call(Method::POST, "/ai/v1/generate", &[], prompt.clone())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Unauthorized: Token not found");

        let (status, body) = app
            .call(
                Method::POST,
                "/ai/v1/generate",
                &[("authorization", "Bearer nonsense")],
                prompt.clone(),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Unauthorized: Token is invalid");

        let (user_id, bearer) = app.login_as("a@x.com").await;
        app.storage.delete_user(user_id).unwrap();
        let (status, body) = app
            .call(
                Method::POST,
                "/ai/v1/generate",
                &[("authorization", bearer.as_str())],
                prompt,
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Unauthorized: Invalid user");
    }

    #[tokio::test]
    async fn logout_expires_cookie_without_touching_token() {
        let app = TestApp::new();
        let (_, bearer) = app.login_as("a@x.com").await;

        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/auth/v1/logout")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers().get(header::SET_COOKIE).unwrap();
        assert!(cookie.to_str().unwrap().starts_with("usersSave=logout"));
        assert!(cookie.to_str().unwrap().contains("Max-Age=0"));

        let (status, _) = app
            .call(
                Method::POST,
                "/ai/v1/generate",
                &[("authorization", bearer.as_str())],
                Some(json!({ "prompt": "Still logged in?" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn generate_returns_parsed_tasks() {
        let app = TestApp::new();
        let (_, bearer) = app.login_as("a@x.com").await;
        let (status, body) = app
            .call(
                Method::POST,
                "/ai/v1/generate",
                &[("authorization", bearer.as_str())],
                Some(json!({ "prompt": "Write a book" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Generate Task: Succeed");
        assert_eq!(body["tasks"], json!(["Draft outline", "Review"]));
    }

    #[tokio::test]
    async fn empty_generation_is_bad_request_and_provider_failure_is_500() {
        let empty = TestApp::with_provider(ScriptedProvider::replying(&[]));
        let (_, bearer) = empty.login_as("a@x.com").await;
        let (status, body) = empty
            .call(
                Method::POST,
                "/ai/v1/generate",
                &[("authorization", bearer.as_str())],
                Some(json!({ "prompt": "Write a book" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Bad Request: Generating Task Failed, Bad Prompt");

        let broken = TestApp::with_provider(ScriptedProvider::failing(502));
        let (_, bearer) = broken.login_as("a@x.com").await;
        let (status, body) = broken
            .call(
                Method::POST,
                "/ai/v1/generate",
                &[("authorization", bearer.as_str())],
                Some(json!({ "prompt": "Write a book" })),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Server Error: Generate Task");
    }
}
