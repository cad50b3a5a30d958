//! Scripted in-process servers for session level unit tests.
//!
//! Each server answers every decoded request with whatever the test's handler returns and
//! records the requests it saw.

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;

use crate::protocol::cql::Frame;
use crate::protocol::cql::Response;
use crate::protocol::Command;
use crate::protocol::Reply;
use crate::ClusterHandle;
use crate::CoordinatorEndpoint;
use crate::WorkerEndpoint;

pub type Recorded<T> = Arc<Mutex<Vec<T>>>;

/// Reply produced by a CQL handler
pub enum CqlAnswer {
    Respond(Response),
    /// Raw frame, e.g. an EVENT or a frame with a foreign stream id
    Raw(Frame),
}

pub struct FakeServer<T> {
    pub addr: SocketAddr,
    pub requests: Recorded<T>,
}

impl<T: Clone> FakeServer<T> {
    pub fn requests(&self) -> Vec<T> {
        self.requests.lock().unwrap().clone()
    }
}

/// CQL v4 server; the handler sees each request frame and returns the frames to send back
pub async fn spawn_cql_server<H>(handler: H) -> FakeServer<Frame>
where
    H: Fn(&Frame) -> Vec<CqlAnswer> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Recorded<Frame> = Arc::default();
    let handler = Arc::new(handler);

    let recorded = requests.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let handler = handler.clone();
            let recorded = recorded.clone();
            tokio::spawn(serve(socket, Frame::decode, move |frame: Frame, out: &mut BytesMut| {
                recorded.lock().unwrap().push(frame.clone());
                for answer in handler(&frame) {
                    match answer {
                        CqlAnswer::Respond(response) => response.into_frame(frame.stream).encode(out),
                        CqlAnswer::Raw(raw) => raw.encode(out),
                    }
                }
            }));
        }
    });

    FakeServer { addr, requests }
}

/// RESP server; the handler returns the replies to send for each command
pub async fn spawn_resp_server<H>(handler: H) -> FakeServer<Command>
where
    H: Fn(&Command) -> Vec<Reply> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Recorded<Command> = Arc::default();
    let handler = Arc::new(handler);

    let recorded = requests.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let handler = handler.clone();
            let recorded = recorded.clone();
            tokio::spawn(serve(socket, Command::decode, move |command: Command, out: &mut BytesMut| {
                recorded.lock().unwrap().push(command.clone());
                for reply in handler(&command) {
                    reply.encode(out);
                }
            }));
        }
    });

    FakeServer { addr, requests }
}

async fn serve<T, D, A>(
    mut socket: TcpStream,
    decode: D,
    mut answer: A,
) where
    D: Fn(&mut BytesMut) -> Result<Option<T>, crate::ProtocolError>,
    A: FnMut(T, &mut BytesMut),
{
    let mut input = BytesMut::new();
    let mut output = BytesMut::new();
    loop {
        match decode(&mut input) {
            Ok(Some(request)) => {
                answer(request, &mut output);
                if !output.is_empty() && socket.write_all(&output.split()).await.is_err() {
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

/// Handle over one external worker whose tabular and key-value ports point at the given
/// servers (an unused port when `None`)
pub fn single_worker_handle(
    tabular: Option<SocketAddr>,
    keyvalue: Option<SocketAddr>,
) -> ClusterHandle {
    workers_handle(&[(tabular, keyvalue)])
}

pub fn workers_handle(workers: &[(Option<SocketAddr>, Option<SocketAddr>)]) -> ClusterHandle {
    let workers = workers
        .iter()
        .enumerate()
        .map(|(index, (tabular, keyvalue))| WorkerEndpoint {
            index,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rpc_port: 1,
            http_port: 1,
            tabular_port: tabular.map(|a| a.port()).unwrap_or(1),
            keyvalue_port: keyvalue.map(|a| a.port()).unwrap_or(1),
        })
        .collect();
    let coordinator = CoordinatorEndpoint {
        index: 0,
        rpc: SocketAddr::from(([127, 0, 0, 1], 1)),
        http: SocketAddr::from(([127, 0, 0, 1], 1)),
    };
    ClusterHandle::external(vec![coordinator], workers)
}
