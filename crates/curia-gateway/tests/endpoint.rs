//! End-to-end scenarios against the public endpoint.
//!
//! The full pipeline runs with a scripted chat backend and in-process
//! capability servers behind the real JSON-RPC dispatch: only the LLM and
//! the network between orchestrator and capability servers are faked.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};

use curia_agent::llm::client::ChatBackend;
use curia_agent::llm::types::{ChatReply, ChatRequest, FunctionCall, ToolCallRequest};
use curia_auth::RbacContext;
use curia_capability::{
    CapabilityDescriptor, CapabilityService, ExecutionResult, LocalTransport, QueryExecutor,
    StatementBlocklist, ToolDescriptor, ToolTransport, TransportFactory,
};
use curia_gateway::{AppState, AskResponse, Config, router};
use curia_resolver::{AccountRecord, AccountResolver, ResolverConfig};
use curia_store::{Database, SessionStore};

// ---------------------------------------------------------------------------
// Scripted chat backend
// ---------------------------------------------------------------------------

struct ScriptedChat {
    replies: Mutex<VecDeque<ChatReply>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl ScriptedChat {
    fn new(replies: Vec<ChatReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    fn with_delay(replies: Vec<ChatReply>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> curia_agent::Result<ChatReply> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| text("fallback answer")))
    }
}

fn text(content: &str) -> ChatReply {
    ChatReply {
        content: Some(content.into()),
        tool_calls: vec![],
    }
}

fn tools(calls: &[(&str, &str, &str)]) -> ChatReply {
    ChatReply {
        content: None,
        tool_calls: calls
            .iter()
            .map(|(id, name, args)| ToolCallRequest {
                id: (*id).to_owned(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: (*name).to_owned(),
                    arguments: (*args).to_owned(),
                },
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// In-process capability servers
// ---------------------------------------------------------------------------

struct SalesExecutor;

#[async_trait]
impl QueryExecutor for SalesExecutor {
    fn source(&self) -> &str {
        "sql"
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "query_sql".into(),
            description: "Run a read-only SQL query over sales data".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "accounts_mentioned": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["query"]
            }),
        }]
    }

    async fn execute(&self, _tool: &str, arguments: Value, rbac: &RbacContext) -> ExecutionResult {
        let rows = vec![
            json!({"account_id": "acc-ms", "account": "Microsoft", "revenue": 125000}),
            json!({"account_id": "acc-ct", "account": "Contoso", "revenue": 88000}),
        ];
        let visible: Vec<Value> = rows
            .into_iter()
            .filter(|r| rbac.can_access_entity(r["account_id"].as_str().unwrap_or_default()))
            .collect();
        ExecutionResult::rows("sql", visible)
            .with_query(arguments["query"].as_str().unwrap_or_default())
    }
}

struct GraphExecutor;

#[async_trait]
impl QueryExecutor for GraphExecutor {
    fn source(&self) -> &str {
        "graph"
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "query_graph".into(),
            description: "Traverse the relationship graph".into(),
            parameters: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}}
            }),
        }]
    }

    async fn execute(&self, _tool: &str, _arguments: Value, rbac: &RbacContext) -> ExecutionResult {
        if !rbac.can_access_entity("acc-ms") {
            return ExecutionResult::rows("graph", vec![]);
        }
        ExecutionResult::rows(
            "graph",
            vec![json!({"contact": "Jordan Lee", "role": "CTO", "account": "Microsoft"})],
        )
    }
}

struct LocalFactory {
    resolver: Arc<AccountResolver>,
}

impl TransportFactory for LocalFactory {
    fn create(
        &self,
        descriptor: &CapabilityDescriptor,
    ) -> curia_capability::Result<Arc<dyn ToolTransport>> {
        let executor: Arc<dyn QueryExecutor> = match descriptor.name.as_str() {
            "graph" => Arc::new(GraphExecutor),
            _ => Arc::new(SalesExecutor),
        };
        let service = CapabilityService::new(
            descriptor.name.clone(),
            vec![executor],
            StatementBlocklist::new(StatementBlocklist::default_patterns()),
        )
        .with_resolver(Arc::clone(&self.resolver));
        Ok(Arc::new(LocalTransport::new(Arc::new(service), None)))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct TestServer {
    base_url: String,
    http: reqwest::Client,
    sessions: SessionStore,
    chat: Arc<ScriptedChat>,
}

impl TestServer {
    async fn ask(&self, body: Value) -> AskResponse {
        let response = self
            .http
            .post(format!("{}/v1/ask", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("request should reach the test server");
        assert!(response.status().is_success(), "unexpected status");
        response.json().await.expect("response should be json")
    }
}

fn corpus() -> Vec<AccountRecord> {
    vec![
        AccountRecord {
            id: "acc-ms".into(),
            name: "Microsoft".into(),
            description: Some("cloud software".into()),
            industry: Some("technology".into()),
            entity_type: Some("customer".into()),
            aliases: vec!["MSFT".into()],
        },
        AccountRecord {
            id: "acc-ct".into(),
            name: "Contoso".into(),
            description: Some("retail network".into()),
            industry: Some("retail".into()),
            entity_type: Some("customer".into()),
            aliases: vec![],
        },
    ]
}

fn config(mode: &str, max_rounds: u32) -> Config {
    let toml_text = format!(
        r#"
        mode = "{mode}"
        max_rounds = {max_rounds}
        request_deadline_s = 5.0
        cache_ttl_s = 0

        [llm]
        model = "scripted"

        [capabilities.sales]
        url = "local://sales"

        [capabilities.graph]
        url = "local://graph"

        [roles_to_capabilities]
        sales_rep = ["sales"]
        sales_manager = ["sales", "graph"]

        "#
    );
    let mut config: Config = toml::from_str(&toml_text).unwrap();
    config.full_access_roles = vec!["admin".to_owned()];
    config
}

async fn server(config: Config, chat: Arc<ScriptedChat>) -> TestServer {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let sessions = SessionStore::new(db.clone());

    let resolver = Arc::new(AccountResolver::new(ResolverConfig::default()));
    resolver.fit(corpus()).unwrap();
    let factory = Arc::new(LocalFactory { resolver });

    let state = AppState::build(&config, chat.clone(), factory, db);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.ok();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        http: reqwest::Client::new(),
        sessions,
        chat,
    }
}

/// Unsigned compact JWT with the given claims (verification happens
/// upstream in production; the gateway only decodes).
fn bearer_token(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    format!("{header}.{payload}.sig")
}

// ---------------------------------------------------------------------------
// Seed scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn conversational_greeting() {
    let chat = ScriptedChat::new(vec![text("Hello! How can I help you today?")]);
    let server = server(config("development", 8), chat).await;

    let response = server.ask(json!({"message": "hello"})).await;

    assert!(response.final_answer);
    assert_eq!(response.execution_metadata.rounds, 1);
    assert_eq!(response.execution_metadata.total_tool_calls, 0);
    assert!(response.assistant_message.contains("Hello"));

    let session = server
        .sessions
        .get_session("dev", &response.session_id)
        .await
        .unwrap();
    assert_eq!(session.turns.len(), 1);
    assert_eq!(session.turns[0].turn_number, 1);
    assert!(session.turns[0].records.is_empty());
}

#[tokio::test]
async fn single_capability_data_question() {
    let chat = ScriptedChat::new(vec![
        tools(&[(
            "call_1",
            "sales__query_sql",
            r#"{"query":"SELECT revenue FROM sales","accounts_mentioned":["Microsoft"]}"#,
        )]),
        text("Microsoft's revenue is 125000."),
    ]);
    let server = server(config("development", 8), chat).await;

    let response = server
        .ask(json!({"message": "Show revenue for Microsoft"}))
        .await;

    assert!(response.final_answer);
    assert_eq!(response.execution_metadata.rounds, 2);
    assert_eq!(response.execution_metadata.final_round, Some(2));
    assert_eq!(response.execution_metadata.total_tool_calls, 1);
    assert!(response.assistant_message.contains("125000"));

    let session = server
        .sessions
        .get_session("dev", &response.session_id)
        .await
        .unwrap();
    let records = &session.turns[0].records;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["capability"], "sales");
    assert_eq!(records[0]["tool"], "query_sql");
    assert_eq!(records[0]["success"], true);
    assert_eq!(records[0]["row_count"], 2);
}

#[tokio::test]
async fn cross_capability_hybrid_question() {
    let chat = ScriptedChat::new(vec![
        tools(&[
            ("call_1", "sales__query_sql", r#"{"query":"SELECT revenue"}"#),
            ("call_2", "graph__query_graph", r#"{"query":"contacts of Microsoft"}"#),
        ]),
        text("Revenue is 125000 and the key contact is Jordan Lee."),
    ]);
    let server = server(config("development", 8), chat).await;

    let response = server
        .ask(json!({"message": "Show revenue and related contacts for Microsoft"}))
        .await;

    assert!(response.final_answer);
    assert_eq!(response.execution_metadata.total_tool_calls, 2);
    assert!(response.assistant_message.contains("Jordan Lee"));

    // Both records in one turn, preserving the emission order.
    let session = server
        .sessions
        .get_session("dev", &response.session_id)
        .await
        .unwrap();
    let records = &session.turns[0].records;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["capability"], "sales");
    assert_eq!(records[1]["capability"], "graph");
}

#[tokio::test]
async fn unsafe_payload_is_refused_but_answered() {
    let chat = ScriptedChat::new(vec![
        tools(&[(
            "call_1",
            "sales__query_sql",
            r#"{"query":"DROP TABLE accounts"}"#,
        )]),
        text("I can't run destructive statements against your data."),
    ]);
    let server = server(config("development", 8), chat).await;

    let response = server.ask(json!({"message": "drop the accounts table"})).await;

    assert!(response.final_answer);
    assert!(response.assistant_message.contains("destructive"));

    let session = server
        .sessions
        .get_session("dev", &response.session_id)
        .await
        .unwrap();
    let record = &session.turns[0].records[0];
    assert_eq!(record["success"], false);
    assert!(
        record["error"]
            .as_str()
            .unwrap()
            .starts_with("unsafe_payload")
    );
    // The follow-up round still ran.
    assert_eq!(response.execution_metadata.rounds, 2);
}

#[tokio::test]
async fn round_limit_breach_times_out() {
    let always = |id: &str| {
        tools(&[(id, "sales__query_sql", r#"{"query":"SELECT 1"}"#)])
    };
    let chat = ScriptedChat::new(vec![always("c1"), always("c2"), always("c3")]);
    let server = server(config("development", 2), chat).await;

    let response = server.ask(json!({"message": "loop forever"})).await;

    assert!(!response.final_answer);
    assert_eq!(response.execution_metadata.rounds, 2);
    assert!(!response.assistant_message.is_empty());

    // Partial rounds are not persisted.
    let session = server
        .sessions
        .get_session("dev", &response.session_id)
        .await
        .unwrap();
    assert!(session.turns.is_empty());
}

#[tokio::test]
async fn access_scope_filters_rows_to_zero() {
    let chat = ScriptedChat::new(vec![
        tools(&[(
            "call_1",
            "sales__query_sql",
            r#"{"query":"SELECT revenue","accounts_mentioned":["Contoso"]}"#,
        )]),
        text("I could not find any accessible data for that account."),
    ]);
    let server = server(config("production", 8), chat).await;

    // sales_rep reaches the sales capability but has an empty entity
    // scope, so row-level filtering strips everything.
    let token = bearer_token(json!({
        "email": "rep@example.com",
        "tid": "tenant-1",
        "oid": "oid-rep",
        "roles": ["sales_rep"],
    }));
    let response = server
        .ask(json!({"message": "Show revenue for Contoso", "token": token}))
        .await;

    assert!(response.final_answer);
    assert!(response.assistant_message.contains("accessible"));

    let session = server
        .sessions
        .get_session("rep@example.com", &response.session_id)
        .await
        .unwrap();
    let record = &session.turns[0].records[0];
    assert_eq!(record["success"], true);
    assert_eq!(record["row_count"], 0);
}

// ---------------------------------------------------------------------------
// Additional boundary behaviors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_capability_set_skips_the_llm() {
    let chat = ScriptedChat::new(vec![]);
    let server = server(config("production", 8), chat).await;

    let token = bearer_token(json!({
        "email": "intern@example.com",
        "tid": "tenant-1",
        "roles": ["intern"],
    }));
    let response = server
        .ask(json!({"message": "anything", "token": token}))
        .await;

    assert!(response.final_answer);
    assert!(response.assistant_message.contains("administrator"));
    assert_eq!(response.execution_metadata.rounds, 0);
    assert_eq!(server.chat.request_count(), 0);

    // Persisted as a turn with no execution records.
    let session = server
        .sessions
        .get_session("intern@example.com", &response.session_id)
        .await
        .unwrap();
    assert_eq!(session.turns.len(), 1);
    assert!(session.turns[0].records.is_empty());
}

#[tokio::test]
async fn deadline_expiry_returns_apology_without_persisting() {
    let chat = ScriptedChat::with_delay(
        vec![text("too late")],
        Duration::from_millis(300),
    );
    let mut config = config("development", 8);
    config.request_deadline_s = 0.05;
    let server = server(config, chat).await;

    let response = server.ask(json!({"message": "slow question"})).await;

    assert!(!response.final_answer);
    assert!(response.turn_id.is_none());

    let session = server
        .sessions
        .get_session("dev", &response.session_id)
        .await
        .unwrap();
    assert!(session.turns.is_empty());
}

#[tokio::test]
async fn session_history_reaches_the_model() {
    let chat = ScriptedChat::new(vec![
        text("The revenue is 125000."),
        text("As I said, 125000."),
    ]);
    let server = server(config("development", 8), chat).await;

    let first = server
        .ask(json!({"message": "Show revenue for Microsoft"}))
        .await;
    let second = server
        .ask(json!({
            "message": "What was that number again?",
            "session_id": first.session_id,
        }))
        .await;

    assert_eq!(first.session_id, second.session_id);

    // Strictly increasing turn numbers within the session.
    let session = server
        .sessions
        .get_session("dev", &second.session_id)
        .await
        .unwrap();
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.turns[0].turn_number, 1);
    assert_eq!(session.turns[1].turn_number, 2);

    // The second LLM call saw the first exchange as history.
    let requests = server.chat.requests();
    let history_texts: Vec<String> = requests[1]
        .messages
        .iter()
        .filter_map(|m| match m {
            curia_agent::ChatMessage::Assistant { content, .. } => content.clone(),
            curia_agent::ChatMessage::User { content } => Some(content.clone()),
            curia_agent::ChatMessage::System { .. } => None,
        })
        .collect();
    assert!(history_texts.iter().any(|t| t == "The revenue is 125000."));
    assert!(
        history_texts
            .iter()
            .any(|t| t == "What was that number again?")
    );
}

#[tokio::test]
async fn feedback_round_trip() {
    let chat = ScriptedChat::new(vec![text("answer")]);
    let server = server(config("development", 8), chat).await;

    let response = server.ask(json!({"message": "hello"})).await;

    let status = server
        .http
        .post(format!("{}/v1/feedback", server.base_url))
        .json(&json!({
            "session_id": response.session_id,
            "turn_number": 1,
            "rating": 1,
            "comment": "spot on",
        }))
        .send()
        .await
        .unwrap()
        .status();
    assert!(status.is_success());
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let chat = ScriptedChat::new(vec![]);
    let server = server(config("development", 8), chat).await;

    let status = server
        .http
        .post(format!("{}/v1/ask", server.base_url))
        .json(&json!({"message": "   "}))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
}
