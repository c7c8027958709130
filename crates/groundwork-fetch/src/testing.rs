//! In-process HTTP server for download tests.
//!
//! Each path is bound to a script of replies consumed one per request; the
//! last reply repeats once the script runs out. Unknown paths answer 404.
//! Dropping the server stops it via `Server::unblock`.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server, StatusCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Body(Vec<u8>),
    Status(u16),
    /// 200 with `body` sent `chunk` bytes at a time, pausing between chunks.
    Trickle {
        body: Vec<u8>,
        chunk: usize,
        pause: Duration,
    },
}

struct TrickleReader {
    body: Vec<u8>,
    pos: usize,
    chunk: usize,
    pause: Duration,
}

impl Read for TrickleReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.body.len() {
            return Ok(0);
        }
        if self.pos > 0 {
            std::thread::sleep(self.pause);
        }
        let n = self.chunk.max(1).min(buf.len()).min(self.body.len() - self.pos);
        buf[..n].copy_from_slice(&self.body[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[derive(Debug, Default)]
struct Route {
    script: VecDeque<Reply>,
    last: Option<Reply>,
    hits: usize,
    authorization: Option<String>,
}

type Routes = Arc<Mutex<HashMap<String, Route>>>;

pub struct ArtifactServer {
    pub port: u16,
    routes: Routes,
    server: Arc<Server>,
    handle: Option<JoinHandle<()>>,
}

impl ArtifactServer {
    /// Bind `127.0.0.1:0` and serve in a background thread.
    pub fn start() -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let routes: Routes = Arc::default();

        let srv = Arc::clone(&server);
        let table = Arc::clone(&routes);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                respond(&table, request);
            }
        });

        Self {
            port,
            routes,
            server,
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    /// Serve `body` with 200 on every request to `path`.
    pub fn serve(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.serve_sequence(path, vec![Reply::Body(body.into())]);
    }

    pub fn serve_sequence(&self, path: &str, replies: Vec<Reply>) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let route = routes.entry(path.to_owned()).or_default();
        route.script = replies.into();
        route.last = None;
    }

    pub fn hits(&self, path: &str) -> usize {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.get(path).map_or(0, |r| r.hits)
    }

    /// `Authorization` header of the most recent request to `path`.
    pub fn last_authorization(&self, path: &str) -> Option<String> {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.get(path).and_then(|r| r.authorization.clone())
    }
}

impl Drop for ArtifactServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn respond(routes: &Routes, request: Request) {
    let path = request.url().split('?').next().unwrap_or_default().to_owned();
    let authorization = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_owned());

    let reply = {
        let mut routes = routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.get_mut(&path).map(|route| {
            route.hits += 1;
            route.authorization = authorization;
            let next = route.script.pop_front().or_else(|| route.last.clone());
            if let Some(reply) = &next {
                route.last = Some(reply.clone());
            }
            next.unwrap_or(Reply::Status(404))
        })
    };

    let content_type =
        Header::from_bytes("Content-Type", "application/octet-stream").expect("static header");
    let _ = match reply.unwrap_or(Reply::Status(404)) {
        Reply::Body(data) => request.respond(Response::from_data(data).with_header(content_type)),
        Reply::Trickle { body, chunk, pause } => {
            let len = body.len();
            let reader = TrickleReader {
                body,
                pos: 0,
                chunk,
                pause,
            };
            request.respond(Response::new(
                StatusCode(200),
                vec![content_type],
                reader,
                Some(len),
                None,
            ))
        }
        Reply::Status(code) => {
            request.respond(Response::from_string(format!("status {code}")).with_status_code(StatusCode(code)))
        }
    };
}
