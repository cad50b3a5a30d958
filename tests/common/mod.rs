//! In-process stand-ins for cluster processes.
//!
//! [`FakeClusterLauncher`] binds every port a real process would: coordinators answer the
//! rpc probe and serve the status endpoint over warp, workers serve CQL v4 and RESP from
//! models shared across the cluster.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use bytes::BytesMut;
use once_cell::sync::Lazy;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use warp::Filter;
use wire_conformance::protocol::cql::ColumnSpec;
use wire_conformance::protocol::cql::ColumnType;
use wire_conformance::protocol::cql::CqlValue;
use wire_conformance::protocol::cql::ErrorBody;
use wire_conformance::protocol::cql::Frame;
use wire_conformance::protocol::cql::Opcode;
use wire_conformance::protocol::cql::Query;
use wire_conformance::protocol::cql::QueryResult;
use wire_conformance::protocol::cql::Response;
use wire_conformance::protocol::cql::RowsResult;
use wire_conformance::protocol::cql::SchemaChange;
use wire_conformance::protocol::Command;
use wire_conformance::protocol::Reply;
use wire_conformance::ClusterSpec;
use wire_conformance::ClusterStatus;
use wire_conformance::HarnessConfig;
use wire_conformance::LaunchPlan;
use wire_conformance::NodeProcess;
use wire_conformance::ProcessClusterManager;
use wire_conformance::ProcessLauncher;
use wire_conformance::ProcessRole;
use wire_conformance::ProcessTemplate;
use wire_conformance::ReadinessPoller;
use wire_conformance::StartupError;
use wire_conformance::SuiteLifecycle;
use wire_conformance::WorkerState;
use wire_conformance::WorkerStatus;

pub const STATUS_PATH: &str = "/api/v1/cluster-status";

/// How long a BGSAVE keeps the fake "saving"
const BGSAVE_DURATION: Duration = Duration::from_millis(300);

static LOGGER_INIT: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

//-----------------------------------------------------------
// Cluster

/// Knobs and shared data of one fake cluster
#[derive(Default)]
pub struct ClusterState {
    /// Worker rpc addresses in launch order, as the status endpoint reports them
    workers: Mutex<Vec<SocketAddr>>,
    /// Only the first `n` launched workers are reported SERVING; the rest are JOINING
    serving_limit: Mutex<Option<usize>>,
    terminated: Mutex<Vec<String>>,
    /// CQL and RESP accept loops per worker index
    protocol_nodes: Mutex<BTreeMap<usize, Vec<JoinHandle<()>>>>,
    /// Set by the first status query. Connections before it are the manager's
    /// reachability probes and are not counted.
    status_served: AtomicBool,
    pub tables: Tables,
    pub kv: Arc<KvModel>,
    /// Tabular connections accepted, per worker index
    pub tabular_accepts: Mutex<BTreeMap<usize, usize>>,
    /// Key-value connections accepted, per worker index
    pub keyvalue_accepts: Mutex<BTreeMap<usize, usize>>,
}

impl ClusterState {
    pub fn limit_serving(
        &self,
        limit: usize,
    ) {
        *self.serving_limit.lock().unwrap() = Some(limit);
    }

    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }

    pub fn keyvalue_accepts(&self) -> BTreeMap<usize, usize> {
        self.keyvalue_accepts.lock().unwrap().clone()
    }

    pub fn tabular_accepts(&self) -> BTreeMap<usize, usize> {
        self.tabular_accepts.lock().unwrap().clone()
    }

    /// Close the worker's CQL and RESP listeners; new connections to them are refused.
    /// The status endpoint keeps reporting the worker as it did before.
    pub async fn break_worker(
        &self,
        index: usize,
    ) {
        let nodes = self.protocol_nodes.lock().unwrap().remove(&index).unwrap_or_default();
        for node in nodes {
            node.abort();
            let _ = node.await;
        }
    }

    fn stop_protocol_nodes(
        &self,
        index: usize,
    ) {
        if let Some(nodes) = self.protocol_nodes.lock().unwrap().remove(&index) {
            for node in nodes {
                node.abort();
            }
        }
    }

    fn status(&self) -> ClusterStatus {
        self.status_served.store(true, Ordering::SeqCst);
        let limit = self.serving_limit.lock().unwrap().unwrap_or(usize::MAX);
        let workers = self
            .workers
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, addr)| WorkerStatus {
                address: addr.to_string(),
                state: if i < limit {
                    WorkerState::Serving
                } else {
                    WorkerState::Joining
                },
            })
            .collect();
        ClusterStatus { workers }
    }
}

#[derive(Clone, Default)]
pub struct FakeClusterLauncher {
    pub state: Arc<ClusterState>,
}

impl FakeClusterLauncher {
    pub fn new(state: ClusterState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }
}

struct FakeNode {
    name: String,
    worker: Option<usize>,
    /// Ports nothing serves beyond accepting the connection
    listeners: Vec<std::net::TcpListener>,
    tasks: Vec<JoinHandle<()>>,
    http_shutdown: Option<oneshot::Sender<()>>,
    state: Arc<ClusterState>,
}

#[async_trait]
impl ProcessLauncher for FakeClusterLauncher {
    async fn launch(
        &self,
        plan: &LaunchPlan,
    ) -> Result<Box<dyn NodeProcess>, StartupError> {
        let bind = |addr: SocketAddr| {
            std::net::TcpListener::bind(addr).map_err(|source| StartupError::Spawn {
                name: plan.name.clone(),
                binary: plan.binary.clone(),
                source,
            })
        };
        let mut node = FakeNode {
            name: plan.name.clone(),
            worker: (plan.role == ProcessRole::Worker).then_some(plan.index),
            listeners: vec![bind(plan.rpc_addr())?],
            tasks: Vec::new(),
            http_shutdown: None,
            state: self.state.clone(),
        };

        match plan.role {
            ProcessRole::Coordinator => {
                let (tx, rx) = oneshot::channel::<()>();
                let state = self.state.clone();
                let route = warp::path!("api" / "v1" / "cluster-status")
                    .map(move || warp::reply::json(&state.status()));
                let (_, server) = warp::serve(route)
                    .try_bind_with_graceful_shutdown(SocketAddr::new(plan.host, plan.ports.http), async move {
                        let _ = rx.await;
                    })
                    .unwrap();
                node.tasks.push(tokio::spawn(server));
                node.http_shutdown = Some(tx);
            }
            ProcessRole::Worker => {
                self.state.workers.lock().unwrap().push(plan.rpc_addr());
                node.listeners
                    .push(bind(SocketAddr::new(plan.host, plan.ports.http))?);
                let tabular = SocketAddr::new(plan.host, plan.ports.tabular.unwrap());
                let keyvalue = SocketAddr::new(plan.host, plan.ports.keyvalue.unwrap());
                let nodes = vec![
                    spawn_cql_node(tabular, plan.index, self.state.clone()).await,
                    spawn_resp_node(keyvalue, plan.index, self.state.clone()).await,
                ];
                self.state.protocol_nodes.lock().unwrap().insert(plan.index, nodes);
            }
        }
        debug!(name = %plan.name, "fake process launched");
        Ok(Box::new(node))
    }
}

#[async_trait]
impl NodeProcess for FakeNode {
    fn id(&self) -> Option<u32> {
        None
    }

    fn try_exit_status(&mut self) -> Option<String> {
        None
    }

    fn kill(&mut self) {
        self.listeners.clear();
        for task in &self.tasks {
            task.abort();
        }
        if let Some(index) = self.worker {
            self.state.stop_protocol_nodes(index);
        }
    }

    async fn terminate(
        &mut self,
        _wait: Duration,
    ) {
        if let Some(tx) = self.http_shutdown.take() {
            let _ = tx.send(());
        }
        self.kill();
        self.state.terminated.lock().unwrap().push(self.name.clone());
    }
}

/// Config for a fake cluster of the given shape with short readiness polling
pub fn fake_config(
    coordinators: usize,
    workers: usize,
) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.cluster = ClusterSpec::new(coordinators, workers, Duration::from_secs(50));
    config.cluster.coordinator = ProcessTemplate::new("fake-coordinator", vec![]);
    config.cluster.worker = ProcessTemplate::new("fake-worker", vec![]);
    config.readiness.poll_interval_in_ms = 50;
    config.readiness.status_path = STATUS_PATH.to_string();
    config
}

pub fn lifecycle(
    config: HarnessConfig,
    launcher: &FakeClusterLauncher,
) -> SuiteLifecycle {
    let poller = ReadinessPoller::from_config(&config.readiness).unwrap();
    SuiteLifecycle::new(
        config,
        ProcessClusterManager::with_launcher(Arc::new(launcher.clone())),
        poller,
    )
}

fn count_accept(
    state: &ClusterState,
    accepts: &Mutex<BTreeMap<usize, usize>>,
    worker: usize,
) {
    if !state.status_served.load(Ordering::SeqCst) {
        return;
    }
    *accepts.lock().unwrap().entry(worker).or_default() += 1;
}

//-----------------------------------------------------------
// CQL

pub type Tables = Arc<Mutex<HashMap<String, Vec<Vec<CqlValue>>>>>;

async fn spawn_cql_node(
    addr: SocketAddr,
    worker: usize,
    state: Arc<ClusterState>,
) -> JoinHandle<()> {
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            count_accept(&state, &state.tabular_accepts, worker);
            tokio::spawn(serve_cql(socket, state.tables.clone()));
        }
    })
}

async fn serve_cql(
    mut socket: TcpStream,
    tables: Tables,
) {
    let mut input = BytesMut::new();
    let mut output = BytesMut::new();
    loop {
        match Frame::decode(&mut input) {
            Ok(Some(frame)) => {
                let response = answer_cql(&frame, &tables);
                response.into_frame(frame.stream).encode(&mut output);
                if socket.write_all(&output.split()).await.is_err() {
                    return;
                }
            }
            Ok(None) => match socket.read_buf(&mut input).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            Err(_) => return,
        }
    }
}

fn answer_cql(
    frame: &Frame,
    tables: &Tables,
) -> Response {
    match frame.opcode {
        Opcode::Startup => Response::Ready,
        Opcode::Options => Response::Supported(HashMap::from([
            ("CQL_VERSION".to_string(), vec!["3.4.2".to_string()]),
            ("COMPRESSION".to_string(), vec![]),
        ])),
        Opcode::Query => match Query::decode(frame.body.clone()) {
            Ok(query) => run_statement(&query, tables),
            Err(e) => Response::Error(ErrorBody::new(0x000A, e.to_string())),
        },
        other => Response::Error(ErrorBody::new(0x000A, format!("{other:?} not supported"))),
    }
}

fn run_statement(
    query: &Query,
    tables: &Tables,
) -> Response {
    let words: Vec<&str> = query.statement.split_whitespace().collect();
    let mut tables = tables.lock().unwrap();
    match words.as_slice() {
        ["CREATE", "KEYSPACE", "IF", "NOT", "EXISTS", keyspace, ..] => {
            Response::Result(QueryResult::SchemaChange(SchemaChange {
                change_type: "CREATED".to_string(),
                target: "KEYSPACE".to_string(),
                keyspace: keyspace.to_string(),
                name: None,
            }))
        }
        ["USE", keyspace] => Response::Result(QueryResult::SetKeyspace(keyspace.to_string())),
        ["CREATE", "TABLE", name, ..] => {
            if tables.contains_key(*name) {
                Response::Error(ErrorBody::new(0x2400, format!("Table {name} already exists")))
            } else {
                tables.insert(name.to_string(), Vec::new());
                Response::Result(QueryResult::Void)
            }
        }
        ["DROP", "TABLE", name] => match tables.remove(*name) {
            Some(_) => Response::Result(QueryResult::Void),
            None => Response::Error(ErrorBody::new(0x2200, format!("Table {name} does not exist"))),
        },
        ["INSERT", "INTO", name, ..] => {
            let Some(values) = query.statement.split("VALUES (").nth(1) else {
                return Response::Error(ErrorBody::new(0x2000, "missing VALUES"));
            };
            let row = values.trim_end_matches(')').split(", ").map(literal).collect();
            match tables.get_mut(*name) {
                Some(rows) => {
                    rows.push(row);
                    Response::Result(QueryResult::Void)
                }
                None => Response::Error(ErrorBody::new(0x2200, format!("Table {name} does not exist"))),
            }
        }
        ["SELECT", "*", "FROM", name] => match tables.get(*name) {
            Some(rows) => {
                let offset = query
                    .params
                    .paging_state
                    .as_ref()
                    .and_then(|s| String::from_utf8_lossy(s).parse::<usize>().ok())
                    .unwrap_or(0);
                let size = query.params.page_size.unwrap_or(5000).max(1) as usize;
                let end = (offset + size).min(rows.len());
                let next = (end < rows.len()).then(|| Bytes::from(end.to_string()));
                Response::Result(QueryResult::Rows(RowsResult::new(
                    fixture_columns(name),
                    rows[offset.min(end)..end].to_vec(),
                    next,
                )))
            }
            None => Response::Error(ErrorBody::new(0x2200, format!("Table {name} does not exist"))),
        },
        _ => Response::Error(ErrorBody::new(0x2000, format!("syntax error: {}", query.statement))),
    }
}

fn fixture_columns(table: &str) -> Vec<ColumnSpec> {
    let spec = |name: &str, ty| ColumnSpec {
        keyspace: "conformance".to_string(),
        table: table.to_string(),
        name: name.to_string(),
        ty,
    };
    vec![
        spec("h1", ColumnType::Int),
        spec("h2", ColumnType::Varchar),
        spec("r1", ColumnType::Int),
        spec("r2", ColumnType::Varchar),
        spec("v1", ColumnType::Int),
        spec("v2", ColumnType::Varchar),
    ]
}

fn literal(token: &str) -> CqlValue {
    match token.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        Some(text) => CqlValue::Text(text.replace("''", "'")),
        None => token.parse().map(CqlValue::Int).unwrap_or(CqlValue::Null),
    }
}

//-----------------------------------------------------------
// RESP

/// Cluster-wide key-value data and persistence bookkeeping
pub struct KvModel {
    data: Mutex<HashMap<String, Bytes>>,
    config: Mutex<BTreeMap<String, String>>,
    last_save: Mutex<i64>,
    bgsave_until: Mutex<Option<Instant>>,
    /// Commands handled across all workers
    pub commands: AtomicUsize,
}

impl Default for KvModel {
    fn default() -> Self {
        let config = [
            ("maxmemory", "0"),
            ("maxmemory-policy", "noeviction"),
            ("maxclients", "10000"),
            ("appendonly", "no"),
            ("save", "3600 1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            data: Mutex::default(),
            config: Mutex::new(config),
            last_save: Mutex::new(unix_now()),
            bgsave_until: Mutex::default(),
            commands: AtomicUsize::new(0),
        }
    }
}

impl KvModel {
    pub fn config_value(
        &self,
        key: &str,
    ) -> Option<String> {
        self.config.lock().unwrap().get(key).cloned()
    }

    fn saving(&self) -> bool {
        self.bgsave_until
            .lock()
            .unwrap()
            .is_some_and(|until| Instant::now() < until)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(1)
}

async fn spawn_resp_node(
    addr: SocketAddr,
    worker: usize,
    state: Arc<ClusterState>,
) -> JoinHandle<()> {
    let listener = TcpListener::bind(addr).await.unwrap();
    // one MONITOR feed per worker: a monitor sees only this worker's traffic
    let (feed, _) = broadcast::channel::<String>(256);
    tokio::spawn(async move {
        while let Ok((socket, client)) = listener.accept().await {
            count_accept(&state, &state.keyvalue_accepts, worker);
            tokio::spawn(serve_resp(socket, client, state.kv.clone(), feed.clone()));
        }
    })
}

async fn serve_resp(
    mut socket: TcpStream,
    client: SocketAddr,
    kv: Arc<KvModel>,
    feed: broadcast::Sender<String>,
) {
    let mut input = BytesMut::new();
    let mut output = BytesMut::new();
    let mut monitoring: Option<broadcast::Receiver<String>> = None;

    loop {
        loop {
            match Command::decode(&mut input) {
                Ok(Some(command)) => {
                    if command.name() == "MONITOR" {
                        // subscribed before the OK goes out
                        monitoring = Some(feed.subscribe());
                        Reply::ok().encode(&mut output);
                        continue;
                    }
                    let _ = feed.send(monitor_line(&client, &command));
                    answer_resp(&command, &kv).encode(&mut output);
                }
                Ok(None) => break,
                Err(e) => {
                    Reply::error(format!("ERR Protocol error: {e}")).encode(&mut output);
                    let _ = socket.write_all(&output).await;
                    return;
                }
            }
        }
        if !output.is_empty() && socket.write_all(&output.split()).await.is_err() {
            return;
        }

        tokio::select! {
            read = socket.read_buf(&mut input) => match read {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            line = next_feed_line(&mut monitoring) => {
                if let Some(line) = line {
                    Reply::status(line).encode(&mut output);
                }
            }
        }
    }
}

async fn next_feed_line(monitoring: &mut Option<broadcast::Receiver<String>>) -> Option<String> {
    match monitoring {
        Some(feed) => feed.recv().await.ok(),
        None => std::future::pending().await,
    }
}

fn monitor_line(
    client: &SocketAddr,
    command: &Command,
) -> String {
    let args = command
        .args()
        .iter()
        .map(|a| format!("\"{}\"", String::from_utf8_lossy(a)))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{}.000000 [0 {client}] {args}", unix_now())
}

fn answer_resp(
    command: &Command,
    kv: &KvModel,
) -> Reply {
    kv.commands.fetch_add(1, Ordering::SeqCst);
    let args: Vec<String> = command
        .args()
        .iter()
        .skip(1)
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect();
    let sub = args.first().map(|s| s.to_ascii_uppercase());

    match (command.name().as_str(), sub.as_deref()) {
        ("PING", _) => Reply::status("PONG"),
        ("AUTH", _) => Reply::ok(),
        ("SAVE", _) => {
            if kv.saving() {
                return Reply::error("ERR Background save already in progress");
            }
            *kv.last_save.lock().unwrap() = unix_now();
            Reply::ok()
        }
        ("BGSAVE", _) => {
            if kv.saving() {
                return Reply::error("ERR Background save already in progress");
            }
            *kv.bgsave_until.lock().unwrap() = Some(Instant::now() + BGSAVE_DURATION);
            *kv.last_save.lock().unwrap() = unix_now();
            Reply::status("Background saving started")
        }
        ("BGREWRITEAOF", _) => Reply::status("Background append only file rewriting started"),
        ("LASTSAVE", _) => Reply::Integer(*kv.last_save.lock().unwrap()),
        ("INFO", None) => Reply::bulk("# Server\r\nredis_version:6.0.0\r\n# Clients\r\nconnected_clients:1\r\n"),
        ("INFO", Some("SERVER")) => Reply::bulk("# Server\r\nredis_version:6.0.0\r\n"),
        ("INFO", Some(_)) => Reply::bulk(""),
        ("READONLY", _) => Reply::error("ERR This instance has cluster support disabled"),
        ("CONFIG", Some("GET")) => {
            let pattern = args.get(1).cloned().unwrap_or_default();
            let prefix = pattern.trim_end_matches('*');
            let wildcard = pattern.ends_with('*');
            let items = kv
                .config
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| if wildcard { k.starts_with(prefix) } else { k.as_str() == prefix })
                .flat_map(|(k, v)| [Reply::bulk(k.clone()), Reply::bulk(v.clone())])
                .collect();
            Reply::array(items)
        }
        ("CONFIG", Some("SET")) if args.len() == 3 => {
            kv.config
                .lock()
                .unwrap()
                .insert(args[1].clone(), args[2].clone());
            Reply::ok()
        }
        ("SYNC", _) => Reply::bulk(Bytes::from_static(b"REDIS0009\xff")),
        ("SET", _) if args.len() == 2 => {
            kv.data
                .lock()
                .unwrap()
                .insert(args[0].clone(), Bytes::from(args[1].clone()));
            Reply::ok()
        }
        ("GET", _) if args.len() == 1 => match kv.data.lock().unwrap().get(&args[0]) {
            Some(value) => Reply::bulk(value.clone()),
            None => Reply::null(),
        },
        ("INCR", _) if args.len() == 1 => {
            let mut data = kv.data.lock().unwrap();
            let current = data
                .get(&args[0])
                .map(|v| String::from_utf8_lossy(v).parse::<i64>())
                .unwrap_or(Ok(0));
            match current {
                Ok(n) => {
                    data.insert(args[0].clone(), Bytes::from((n + 1).to_string()));
                    Reply::Integer(n + 1)
                }
                Err(_) => Reply::error("ERR value is not an integer or out of range"),
            }
        }
        ("DEBUG", Some("OBJECT")) => match args.get(1).and_then(|k| kv.data.lock().unwrap().get(k).cloned()) {
            Some(value) => Reply::status(format!(
                "Value at:0x7f0000000000 refcount:1 encoding:embstr serializedlength:{} lru:0 lru_seconds_idle:0",
                value.len() + 1
            )),
            None => Reply::error("ERR no such key"),
        },
        ("DEBUG", Some("RELOAD")) => Reply::ok(),
        ("WAIT", _) => Reply::Integer(1),
        (name, _) => Reply::error(format!("ERR unknown command '{}'", name.to_ascii_lowercase())),
    }
}
