use std::io::Read;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

use crate::alarm::key::CorrelationKey;
use crate::alarm::runtime::{AlarmRuntime, AlarmSnapshot};
use crate::channel::AlarmChannel;

pub const MAX_BODY_BYTES: u64 = 64 * 1024;

const JSON: &str = "application/json; charset=utf-8";
const TEXT: &str = "text/plain; charset=utf-8";

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

pub struct ApiState {
    channel: AlarmChannel,
    runtime: Arc<AlarmRuntime>,
    server_started_unix_ms: i64,
    total_requests: AtomicU64,
}

impl ApiState {
    pub fn new(channel: AlarmChannel, runtime: Arc<AlarmRuntime>) -> Self {
        Self {
            channel,
            runtime,
            server_started_unix_ms: Local::now().timestamp_millis(),
            total_requests: AtomicU64::new(0),
        }
    }
}

pub struct ApiServer {
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn start(config: ApiServerConfig, state: ApiState) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start API server on {bind}: {err}"))?;
        info!(%bind, channel = %state.channel.name(), "method channel listening");
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let http_join = thread::spawn(move || run_server_loop(server, state, stop_for_thread));

        Ok(Self {
            stop,
            http_join: Some(http_join),
        })
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

fn run_server_loop(server: Server, state: ApiState, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => handle_request(request, &state),
            Ok(None) => continue,
            Err(_) => continue,
        }
    }
}

#[derive(Debug)]
struct ApiResponse {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl ApiResponse {
    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: TEXT,
            body: body.as_bytes().to_vec(),
        }
    }

    fn json<T: Serialize>(status: u16, payload: &T) -> Self {
        match serde_json::to_vec(payload) {
            Ok(body) => Self {
                status,
                content_type: JSON,
                body,
            },
            Err(_) => Self::text(500, "failed to encode response"),
        }
    }
}

fn handle_request(mut request: tiny_http::Request, state: &ApiState) {
    let Some(remote_addr) = request.remote_addr() else {
        let _ = send(request, ApiResponse::text(400, "missing remote address"));
        return;
    };
    if !is_local_network_ip(remote_addr.ip()) {
        let _ = send(request, ApiResponse::text(403, "forbidden: local network only"));
        return;
    }
    state.total_requests.fetch_add(1, Ordering::Relaxed);

    let mut body = Vec::new();
    if let Err(err) = request
        .as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
    {
        warn!(error = %err, "failed to read request body");
        let _ = send(request, ApiResponse::text(400, "unreadable request body"));
        return;
    }
    if body.len() as u64 > MAX_BODY_BYTES {
        let _ = send(request, ApiResponse::text(413, "request body too large"));
        return;
    }

    let method = request.method().clone();
    let url = request.url().to_string();
    let (path, _query) = split_path_query(&url);
    debug!(%method, %path, bytes = body.len(), "api request");
    let response = route(&method, path, &body, state);
    if let Err(err) = send(request, response) {
        debug!(error = %err, "failed to send response");
    }
}

fn route(method: &Method, path: &str, body: &[u8], state: &ApiState) -> ApiResponse {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (method, segments.as_slice()) {
        (Method::Get, ["healthz"]) => ApiResponse::text(200, "ok"),
        (Method::Get, ["v1"]) => {
            #[derive(Serialize)]
            struct ApiIndexResponse<'a> {
                channel: &'a str,
                channel_path: String,
                alarms_path: &'static str,
                health_path: &'static str,
            }

            ApiResponse::json(
                200,
                &ApiIndexResponse {
                    channel: state.channel.name(),
                    channel_path: format!("/v1/channels/{}", state.channel.name()),
                    alarms_path: "/v1/alarms",
                    health_path: "/healthz",
                },
            )
        }
        (Method::Get, ["v1", "alarms"]) => {
            #[derive(Serialize)]
            struct AlarmsResponse {
                alarms: Vec<AlarmSnapshot>,
                ringing: usize,
                server_started_unix_ms: i64,
                total_requests: u64,
            }

            ApiResponse::json(
                200,
                &AlarmsResponse {
                    alarms: state.runtime.snapshot(),
                    ringing: state.runtime.ringing_count(),
                    server_started_unix_ms: state.server_started_unix_ms,
                    total_requests: state.total_requests.load(Ordering::Relaxed),
                },
            )
        }
        (Method::Post, ["v1", "channels", name]) => {
            if *name != state.channel.name() {
                return ApiResponse::text(404, "unknown channel");
            }
            ApiResponse {
                status: 200,
                content_type: JSON,
                body: state.channel.handle_message(body),
            }
        }
        (Method::Post, ["v1", "alarms", key, "stop"]) => {
            #[derive(Serialize)]
            struct StopResponse {
                key: CorrelationKey,
                was_ringing: bool,
            }

            let Ok(key) = key.parse::<CorrelationKey>() else {
                return ApiResponse::text(400, "alarm key must be an integer");
            };
            let was_ringing = state.runtime.on_stop_action(key);
            ApiResponse::json(200, &StopResponse { key, was_ringing })
        }
        (_, ["healthz"] | ["v1"] | ["v1", "alarms"] | ["v1", "channels", _])
        | (_, ["v1", "alarms", _, "stop"]) => ApiResponse::text(405, "method not allowed"),
        _ => ApiResponse::text(404, "not found"),
    }
}

fn send(request: tiny_http::Request, response: ApiResponse) -> Result<()> {
    let content_type = Header::from_str(&format!("Content-Type: {}", response.content_type))
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(response.body)
            .with_status_code(StatusCode(response.status))
            .with_header(content_type),
    )?;
    Ok(())
}

fn split_path_query(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || is_ipv4_mapped_local(v6)
        }
    }
}

fn is_ipv4_mapped_local(v6: Ipv6Addr) -> bool {
    match v6.to_ipv4_mapped() {
        Some(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use serde_json::Value;

    use super::*;
    use crate::alarm::key::KeyScheme;
    use crate::alarm::model::AlarmPayload;
    use crate::alarm::runtime::RuntimeSettings;
    use crate::platform::fake::{Fakes, fake_platform};

    fn state() -> (ApiState, Fakes) {
        let (platform, fakes) = fake_platform();
        let runtime = Arc::new(AlarmRuntime::new(platform, RuntimeSettings::default()));
        let channel = AlarmChannel::new("alarm_channel", Arc::clone(&runtime));
        (ApiState::new(channel, runtime), fakes)
    }

    fn json_body(response: &ApiResponse) -> Value {
        serde_json::from_slice(&response.body).expect("json body")
    }

    #[test]
    fn local_network_ip_filter_accepts_private_and_loopback() {
        assert!(is_local_network_ip(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
        assert!(is_local_network_ip(IpAddr::V4(Ipv4Addr::new(
            192, 168, 1, 44
        ))));
        assert!(is_local_network_ip(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))));
        assert!(is_local_network_ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_local_network_ip(IpAddr::V6(Ipv6Addr::new(
            0xfc00, 0, 0, 0, 0, 0, 0, 1
        ))));
        assert!(!is_local_network_ip(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }

    #[test]
    fn split_path_query_separates_query() {
        assert_eq!(split_path_query("/v1/alarms?x=1"), ("/v1/alarms", "x=1"));
        assert_eq!(split_path_query("/healthz"), ("/healthz", ""));
    }

    #[test]
    fn channel_route_dispatches_method_calls() {
        let (state, fakes) = state();
        let body = br#"{"method":"setAlarm","args":{"year":2025,"month":6,"day":1,"hour":7,"minute":30,"label":"Wake up","alarmId":"morning"}}"#;
        let response = route(&Method::Post, "/v1/channels/alarm_channel", body, &state);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"[null]".to_vec());
        assert_eq!(fakes.scheduler.pending_len(), 1);
    }

    #[test]
    fn unknown_channel_is_not_found() {
        let (state, _fakes) = state();
        let response = route(&Method::Post, "/v1/channels/other", b"{}", &state);
        assert_eq!(response.status, 404);
    }

    #[test]
    fn stop_route_silences_alarm_by_key() {
        let (state, fakes) = state();
        let key = state.runtime.on_alarm_fired(AlarmPayload {
            identifier: Some("morning".to_string()),
            label: Some("Wake up".to_string()),
        });
        assert_eq!(key, KeyScheme::Sha256.derive("morning"));

        let response = route(&Method::Post, &format!("/v1/alarms/{key}/stop"), b"", &state);
        assert_eq!(response.status, 200);
        let body = json_body(&response);
        assert_eq!(body["was_ringing"], Value::Bool(true));
        assert!(!fakes.sounds.is_playing(key));
        assert!(!fakes.notifier.is_posted(key));
    }

    #[test]
    fn stop_route_rejects_non_numeric_key() {
        let (state, _fakes) = state();
        let response = route(&Method::Post, "/v1/alarms/morning/stop", b"", &state);
        assert_eq!(response.status, 400);
    }

    #[test]
    fn alarms_route_lists_snapshot() {
        let (state, _fakes) = state();
        state.runtime.on_alarm_fired(AlarmPayload {
            identifier: Some("nap".to_string()),
            label: None,
        });
        let response = route(&Method::Get, "/v1/alarms", b"", &state);
        let body = json_body(&response);
        assert_eq!(body["ringing"], Value::from(1));
        assert_eq!(body["alarms"][0]["phase"], Value::from("fired"));
        assert_eq!(body["alarms"][0]["label"], Value::from("Alarm"));
    }

    #[test]
    fn wrong_method_on_known_route() {
        let (state, _fakes) = state();
        let response = route(&Method::Get, "/v1/channels/alarm_channel", b"", &state);
        assert_eq!(response.status, 405);
        let response = route(&Method::Get, "/nope", b"", &state);
        assert_eq!(response.status, 404);
        let response = route(&Method::Get, "/healthz", b"", &state);
        assert_eq!(response.body, b"ok".to_vec());
    }
}
