//! Plain HTTP/1.1 transport over `std::net`.
//!
//! One accept loop on a spawned thread; requests are handled serially. Routing is
//! a pure function of the parsed request so it can be exercised without sockets.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::recommend::Recommendation;
use crate::{ParkingError, ParkingService};

const MAX_REQUEST_BYTES: usize = 16 * 1024;
const ROUTES: [&str; 5] = ["/status", "/recommend?type=", "/confirm", "/reset", "/health"];

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: Arc<ParkingService>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: Arc<ParkingService>) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let service = self.service;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &service, shutdown_thread) {
                log::error!("parking api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, service: &ParkingService, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, service) {
                    log::warn!("parking api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, service: &ParkingService) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, &json!({"error": "forbidden"}))?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, &json!({"error": "bad_request"}))?;
            return Err(err);
        }
    };
    let (status, body) = route(&request, service);
    write_json_response(&mut stream, status, &body)
}

/// Map a parsed request onto a service operation.
pub fn route(request: &HttpRequest, service: &ParkingService) -> (u16, Value) {
    let expected = match request.path.as_str() {
        "/" | "/health" | "/status" | "/recommend" => "GET",
        "/confirm" | "/reset" => "POST",
        _ => return (404, json!({"error": "not_found"})),
    };
    if request.method != expected {
        return (405, json!({"error": "method_not_allowed"}));
    }

    match request.path.as_str() {
        "/" => (
            200,
            json!({
                "message": "Smart parking backend running",
                "routes": ROUTES,
            }),
        ),
        "/health" => (
            200,
            json!({
                "status": "ok",
                "refresh": service.refresh_stats(),
            }),
        ),
        "/status" => match service.status() {
            Ok(report) => to_json(200, &report),
            Err(err) => error_response(&err),
        },
        "/recommend" => {
            let vehicle_class = request.query_param("type").unwrap_or("compact");
            match service.recommend(vehicle_class) {
                Ok(Recommendation::Selected {
                    spot,
                    vehicle_class,
                }) => {
                    let (status, mut body) = to_json(200, &spot);
                    if let Value::Object(map) = &mut body {
                        map.insert("car_type".into(), json!(vehicle_class));
                    }
                    (status, body)
                }
                Ok(Recommendation::NoCandidate {
                    reason,
                    vehicle_class,
                }) => (
                    200,
                    json!({
                        "message": reason.message(),
                        "reason": reason,
                        "car_type": vehicle_class,
                    }),
                ),
                Err(err) => error_response(&err),
            }
        }
        "/confirm" => {
            let body: ConfirmRequest = match serde_json::from_slice(&request.body) {
                Ok(body) => body,
                Err(err) => {
                    return (
                        400,
                        json!({"error": format!("invalid request body: {}", err)}),
                    )
                }
            };
            match service.confirm(&body.id, body.confirm) {
                Ok(outcome) => (
                    200,
                    json!({
                        "success": true,
                        "message": format!("Spot {} marked as {}.", outcome.spot_id, outcome.state),
                        "id": outcome.spot_id,
                        "state": outcome.state,
                    }),
                ),
                Err(err) => error_response(&err),
            }
        }
        "/reset" => match service.reset() {
            Ok(count) => (
                200,
                json!({
                    "success": true,
                    "message": "All spots reset to FREE.",
                    "spots": count,
                }),
            ),
            Err(err) => error_response(&err),
        },
        _ => (404, json!({"error": "not_found"})),
    }
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    #[serde(default)]
    id: String,
    #[serde(default = "default_confirm")]
    confirm: bool,
}

fn default_confirm() -> bool {
    true
}

fn to_json<T: serde::Serialize>(status: u16, value: &T) -> (u16, Value) {
    match serde_json::to_value(value) {
        Ok(body) => (status, body),
        Err(err) => (500, json!({"error": err.to_string()})),
    }
}

fn error_response(err: &ParkingError) -> (u16, Value) {
    (err.status_code(), json!({"error": err.to_string()}))
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut request = parse_head(&text)?;

    let content_length: usize = match request.headers.get("content-length") {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    let body_start = header_end + 4;
    if body_start + content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request too large"));
    }
    while data.len() < body_start + content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        data.extend_from_slice(&buf[..n]);
    }
    request.body = data[body_start..body_start + content_length].to_vec();
    Ok(request)
}

fn parse_head(text: &str) -> Result<HttpRequest> {
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
        headers,
        body: Vec::new(),
    })
}

/// Decodes `+` and `%XX`. The first occurrence of a repeated key wins.
fn parse_query(query: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        out.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }
    out
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::{InMemoryOccupancyStore, NoopRefresh, ReservedSet, SharedOccupancy, SpotState};

    fn service() -> ParkingService {
        let store = InMemoryOccupancyStore::with_record(record(
            vec![
                spot("spot_1", SpotState::Free, 0),
                spot("spot_2", SpotState::Free, 100),
                spot("spot_3", SpotState::Occupied, 200),
            ],
            vec![entry(0, 90)],
        ));
        let state = SharedOccupancy::new(
            Arc::new(store),
            ReservedSet::new(["spot_1"]).expect("reserved"),
        );
        ParkingService::new(Arc::new(state), Arc::new(NoopRefresh))
    }

    fn req(method: &str, target: &str, body: &str) -> HttpRequest {
        let head = format!("{} {} HTTP/1.1\r\nHost: localhost\r\n", method, target);
        let mut request = parse_head(&head).expect("parse head");
        request.body = body.as_bytes().to_vec();
        request
    }

    #[test]
    fn parse_head_splits_query() {
        let r = req("GET", "/recommend?type=SUV&x", "");
        assert_eq!(r.path, "/recommend");
        assert_eq!(r.query_param("type"), Some("SUV"));
        assert_eq!(r.query_param("x"), Some(""));
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let r = req("GET", "/recommend?type=%73uv&type=sedan&note=two+words%21", "");
        assert_eq!(r.query_param("type"), Some("suv"));
        assert_eq!(r.query_param("note"), Some("two words!"));

        let svc = service();
        let (status, body) = route(&req("GET", "/recommend?type=%53UV", ""), &svc);
        assert_eq!(status, 200);
        assert_eq!(body["car_type"], "suv");
    }

    #[test]
    fn unknown_route_and_wrong_method() {
        let svc = service();
        assert_eq!(route(&req("GET", "/nope", ""), &svc).0, 404);
        assert_eq!(route(&req("POST", "/status", ""), &svc).0, 405);
        assert_eq!(route(&req("GET", "/confirm", ""), &svc).0, 405);
    }

    #[test]
    fn recommend_attaches_car_type() {
        let svc = service();
        let (status, body) = route(&req("GET", "/recommend?type=Sedan", ""), &svc);
        assert_eq!(status, 200);
        assert_eq!(body["id"], "spot_2");
        assert_eq!(body["car_type"], "sedan");

        let (status, body) = route(&req("GET", "/recommend?type=luxury", ""), &svc);
        assert_eq!(status, 200);
        assert_eq!(body["reason"], "no_premium_spot");
        assert!(body.get("id").is_none());
    }

    #[test]
    fn confirm_defaults_to_occupied() {
        let svc = service();
        let (status, body) = route(&req("POST", "/confirm", r#"{"id": "SPOT_2"}"#), &svc);
        assert_eq!(status, 200);
        assert_eq!(body["state"], "occupied");
        assert_eq!(body["message"], "Spot spot_2 marked as occupied.");
    }

    #[test]
    fn confirm_maps_errors_to_status_codes() {
        let svc = service();
        let (status, _) = route(&req("POST", "/confirm", r#"{"id":"spot_1","confirm":true}"#), &svc);
        assert_eq!(status, 403);
        let (status, _) = route(&req("POST", "/confirm", r#"{"id":"spot_7","confirm":false}"#), &svc);
        assert_eq!(status, 404);
        let (status, _) = route(&req("POST", "/confirm", "not json"), &svc);
        assert_eq!(status, 400);
    }

    #[test]
    fn status_includes_is_full_and_summary() {
        let svc = service();
        let (status, body) = route(&req("GET", "/status", ""), &svc);
        assert_eq!(status, 200);
        assert_eq!(body["is_full"], false);
        assert_eq!(body["summary"]["occupied"], 1);
        assert_eq!(body["spots"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn health_reports_missing_stats_as_null() {
        let svc = service();
        let (status, body) = route(&req("GET", "/health", ""), &svc);
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
        assert!(body["refresh"].is_null());
    }
}
