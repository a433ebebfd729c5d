use crate::backend::{ServiceBackend, ServiceSpec};
use deploy_profile::ResolvedConfig;
use serde::{Deserialize, Serialize};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of one health check, the first failing stage winning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    /// TCP connect to the protocol port failed.
    Unreachable,
    /// HTTP status endpoint unreachable or non-2xx.
    HttpUnhealthy,
    /// Trivial query did not return the expected literal.
    ProtocolUnhealthy,
}

impl HealthState {
    pub fn is_healthy(self) -> bool {
        self == HealthState::Healthy
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unreachable => write!(f, "unreachable"),
            HealthState::HttpUnhealthy => write!(f, "http-unhealthy"),
            HealthState::ProtocolUnhealthy => write!(f, "protocol-unhealthy"),
        }
    }
}

/// Read-only health check. Safe to call concurrently; never mutates state.
pub trait HealthProbe: Send + Sync {
    fn check(&self) -> HealthState;
}

/// The real probe pipeline: TCP reachability on the protocol port, then an
/// HTTP GET against the status endpoint, then a protocol-level query through
/// the backend. Stages run in order and the first failure is returned.
pub struct EndpointProber {
    spec: ServiceSpec,
    backend: Arc<dyn ServiceBackend>,
    agent: ureq::Agent,
}

impl EndpointProber {
    pub fn new(config: &ResolvedConfig, backend: Arc<dyn ServiceBackend>) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::Agent::config_builder()
                .timeout_global(Some(Duration::from_secs(config.probe_timeout_secs)))
                .build(),
        );
        Self {
            spec: ServiceSpec::new(config),
            backend,
            agent,
        }
    }

    /// Address probes connect to. A wildcard bind means the service is
    /// reachable on loopback.
    fn probe_host(&self) -> &str {
        let bind = self.spec.config.bind_address.as_str();
        if bind == "0.0.0.0" || bind == "::" {
            "127.0.0.1"
        } else {
            bind
        }
    }

    fn tcp_stage(&self) -> bool {
        let timeout = Duration::from_secs(self.spec.config.probe_timeout_secs);
        let target = format!("{}:{}", self.probe_host(), self.spec.config.bolt_port);
        let Ok(mut addrs) = target.to_socket_addrs() else {
            return false;
        };
        addrs.any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
    }

    fn http_stage(&self) -> bool {
        let url = format!(
            "http://{}:{}/",
            self.probe_host(),
            self.spec.config.http_port
        );
        match self.agent.get(&url).call() {
            Ok(resp) => {
                let code = resp.status().as_u16();
                (200..300).contains(&code)
            }
            Err(e) => {
                debug!("http probe failed for {url}: {e}");
                false
            }
        }
    }

    fn protocol_stage(&self) -> bool {
        match self.backend.probe_query(&self.spec) {
            Ok(result) => result == "1",
            Err(e) => {
                debug!("protocol probe failed: {e}");
                false
            }
        }
    }
}

impl HealthProbe for EndpointProber {
    fn check(&self) -> HealthState {
        if !self.tcp_stage() {
            return HealthState::Unreachable;
        }
        if !self.http_stage() {
            return HealthState::HttpUnhealthy;
        }
        if !self.protocol_stage() {
            return HealthState::ProtocolUnhealthy;
        }
        HealthState::Healthy
    }
}

/// Probe that asks the backend directly instead of dialing endpoints. The
/// mock backend serves no sockets, so this is the probe that pairs with it.
pub struct QueryProber {
    spec: ServiceSpec,
    backend: Arc<dyn ServiceBackend>,
}

impl QueryProber {
    pub fn new(config: &ResolvedConfig, backend: Arc<dyn ServiceBackend>) -> Self {
        Self {
            spec: ServiceSpec::new(config),
            backend,
        }
    }
}

impl HealthProbe for QueryProber {
    fn check(&self) -> HealthState {
        match self.backend.probe_query(&self.spec) {
            Ok(result) if result == "1" => HealthState::Healthy,
            Ok(_) => HealthState::ProtocolUnhealthy,
            Err(e) => {
                debug!("backend probe failed: {e}");
                HealthState::Unreachable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use deploy_profile::resolve;
    use std::collections::BTreeMap;
    use std::net::TcpListener;

    fn config_with_ports(bolt: u16, http: u16) -> ResolvedConfig {
        let mut overrides = BTreeMap::new();
        overrides.insert("network.bolt_port".to_owned(), bolt.to_string());
        overrides.insert("network.http_port".to_owned(), http.to_string());
        overrides.insert("network.bind_address".to_owned(), "127.0.0.1".to_owned());
        resolve("dev", None, &overrides).unwrap()
    }

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn unreachable_when_nothing_listens() {
        let config = config_with_ports(free_port(), free_port());
        let prober = EndpointProber::new(&config, Arc::new(MockBackend::new()));
        assert_eq!(prober.check(), HealthState::Unreachable);
    }

    #[test]
    fn http_unhealthy_when_only_tcp_listens() {
        let bolt_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let bolt = bolt_listener.local_addr().unwrap().port();
        let config = config_with_ports(bolt, free_port());

        let prober = EndpointProber::new(&config, Arc::new(MockBackend::new()));
        assert_eq!(prober.check(), HealthState::HttpUnhealthy);
    }

    #[test]
    fn healthy_with_tcp_http_and_protocol() {
        let bolt_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let bolt = bolt_listener.local_addr().unwrap().port();

        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let http = server.server_addr().to_ip().unwrap().port();
        let handle = std::thread::spawn(move || {
            if let Ok(Some(req)) = server.recv_timeout(Duration::from_secs(5)) {
                let _ = req.respond(tiny_http::Response::from_string("{}"));
            }
        });

        let config = config_with_ports(bolt, http);
        let backend = Arc::new(MockBackend::new());
        backend.launch(&ServiceSpec::new(&config)).unwrap();

        let prober = EndpointProber::new(&config, backend);
        assert_eq!(prober.check(), HealthState::Healthy);
        handle.join().unwrap();
    }

    #[test]
    fn protocol_unhealthy_when_query_fails() {
        let bolt_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let bolt = bolt_listener.local_addr().unwrap().port();

        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let http = server.server_addr().to_ip().unwrap().port();
        let handle = std::thread::spawn(move || {
            if let Ok(Some(req)) = server.recv_timeout(Duration::from_secs(5)) {
                let _ = req.respond(tiny_http::Response::from_string("{}"));
            }
        });

        let config = config_with_ports(bolt, http);
        let backend = Arc::new(MockBackend::new());
        // not launched: probe_query reports not running
        let prober = EndpointProber::new(&config, backend);
        assert_eq!(prober.check(), HealthState::ProtocolUnhealthy);
        handle.join().unwrap();
    }

    #[test]
    fn query_prober_follows_backend_state() {
        let config = config_with_ports(free_port(), free_port());
        let backend = Arc::new(MockBackend::new());
        let prober = QueryProber::new(&config, Arc::clone(&backend) as _);

        assert_eq!(prober.check(), HealthState::Unreachable);
        backend.launch(&ServiceSpec::new(&config)).unwrap();
        assert_eq!(prober.check(), HealthState::Healthy);
    }
}
