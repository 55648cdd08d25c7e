use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// Product slugs served by the stub listing for `vino`.
pub const VINO_SLUGS: &[&str] = &["kyanti-ruffino", "prosecco-brut", "flaky-rose", "gone-merlot"];

/// Local stand-in for `/web-api/v1/product`. `flaky-rose` answers 429 once,
/// `gone-merlot` always answers 503.
pub struct ApiStub {
    pub base_url: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ApiStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start api stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let hits = Arc::new(Mutex::new(HashMap::<String, usize>::new()));
        let counter = Arc::clone(&hits);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
                let seen = {
                    let mut hits = counter.lock().expect("lock hits");
                    let entry = hits.entry(path.to_owned()).or_default();
                    *entry += 1;
                    *entry
                };

                if request.method() != &tiny_http::Method::Get {
                    let _ = request.respond(
                        tiny_http::Response::from_string("method not allowed")
                            .with_status_code(405),
                    );
                    continue;
                }
                if !query.contains("city_uuid=") {
                    let _ = request.respond(
                        tiny_http::Response::from_string("missing city_uuid").with_status_code(400),
                    );
                    continue;
                }

                let (status, body) = match path {
                    "/web-api/v1/product" => listing_response(query),
                    "/web-api/v1/product/flaky-rose" if seen == 1 => {
                        (429, Value::String("too many requests".to_owned()))
                    }
                    "/web-api/v1/product/gone-merlot" => {
                        (503, Value::String("unavailable".to_owned()))
                    }
                    other => match other.strip_prefix("/web-api/v1/product/") {
                        Some(slug) if VINO_SLUGS.contains(&slug) => (200, detail_payload(slug)),
                        _ => (404, json!({ "success": false })),
                    },
                };

                let header = tiny_http::Header::from_bytes(
                    &b"Content-Type"[..],
                    &b"application/json; charset=utf-8"[..],
                )
                .expect("content-type header");
                let _ = request.respond(
                    tiny_http::Response::from_string(body.to_string())
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });

        Self {
            base_url,
            hits,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn api_base(&self) -> String {
        format!("{}/web-api/v1", self.base_url)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits
            .lock()
            .expect("lock hits")
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for ApiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn listing_response(query: &str) -> (u16, Value) {
    let category = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("root_category_slug="))
        .unwrap_or("");
    if category != "vino" {
        return (200, json!({ "success": true, "results": [] }));
    }
    let results: Vec<Value> = VINO_SLUGS
        .iter()
        .map(|slug| json!({ "slug": slug, "name": slug }))
        .collect();
    (200, json!({ "success": true, "results": results }))
}

pub fn detail_payload(slug: &str) -> Value {
    json!({
        "success": true,
        "results": {
            "uuid": format!("uuid-{slug}"),
            "slug": slug,
            "name": "Вино столовое",
            "vendor_code": 1001,
            "price": 800,
            "prev_price": 1000,
            "available": true,
            "quantity_total": 3,
            "image_url": "/storage/product/1.png",
            "category": { "slug": "krasnoe", "name": "Красное", "parent": { "name": "Вино" } },
            "filter_labels": [{ "filter": "volume", "title": "0.75 л" }],
            "text_blocks": [{ "content": "Рубиновый цвет." }],
            "description_blocks": [
                { "code": "brand", "title": "Бренд", "type": "select",
                  "values": [{ "name": "Ruffino", "enabled": true }] },
            ],
        },
    })
}
