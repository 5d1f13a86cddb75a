//! Fixture-driven stand-in for the scrape backend. Serves recorded step
//! replies so a client run can be rehearsed without the real scraper.

use actix_web::dev::{Server, ServerHandle};
use actix_web::{App, HttpResponse, HttpServer, Responder, get, post, web};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Recorded backend answers. A `steps` entry that is a JSON string is
/// served as an HTML page instead of JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub steps: Vec<Value>,
    #[serde(default)]
    pub progress: Vec<Value>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture: {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing fixture: {}", path.display()))
    }
}

struct ReplayState {
    fixture: Fixture,
    progress_cursor: AtomicUsize,
}

#[derive(Deserialize)]
struct ScrapeReq {
    url: String,
    step: usize,
}

// -------------------------
// HTTP Handlers
// -------------------------

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body(
        "magic-price replay backend.\n\
         POST /scrape {\"url\":\"https://...\",\"step\":0}\n\
         GET  /progress\n\
         GET  /healthz",
    )
}

#[get("/healthz")]
async fn healthz() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

#[post("/scrape")]
async fn scrape_endpoint(
    state: web::Data<ReplayState>,
    body: web::Json<ScrapeReq>,
) -> impl Responder {
    info!(url = %body.url, step = body.step, "replaying step");
    match state.fixture.steps.get(body.step) {
        Some(Value::String(page)) => HttpResponse::BadGateway()
            .insert_header(("Content-Type", "text/html; charset=utf-8"))
            .body(page.clone()),
        Some(entry) => HttpResponse::Ok().json(entry),
        None => HttpResponse::NotFound().json(json!({
            "error": format!("no recorded reply for step {}", body.step),
            "step": body.step,
        })),
    }
}

#[get("/progress")]
async fn progress_endpoint(state: web::Data<ReplayState>) -> impl Responder {
    let entries = &state.fixture.progress;
    if entries.is_empty() {
        return HttpResponse::NotFound().finish();
    }
    let i = state
        .progress_cursor
        .fetch_add(1, Ordering::Relaxed)
        .min(entries.len() - 1);
    HttpResponse::Ok().json(&entries[i])
}

// -------------------------
// Server
// -------------------------

pub struct ReplayServer {
    addr: SocketAddr,
    server: Server,
}

impl ReplayServer {
    /// Binds without starting; port 0 picks a free port.
    pub fn bind(fixture: Fixture, host: &str, port: u16) -> Result<Self> {
        let state = web::Data::new(ReplayState {
            fixture,
            progress_cursor: AtomicUsize::new(0),
        });
        let http = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .service(index)
                .service(healthz)
                .service(scrape_endpoint)
                .service(progress_endpoint)
        })
        .workers(1)
        .disable_signals()
        .bind((host, port))
        .with_context(|| format!("binding replay server to {host}:{port}"))?;

        let addr = http
            .addrs()
            .first()
            .copied()
            .context("replay server has no bound address")?;
        Ok(Self {
            addr,
            server: http.run(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn handle(&self) -> ServerHandle {
        self.server.handle()
    }

    pub async fn run(self) -> std::io::Result<()> {
        self.server.await
    }
}
