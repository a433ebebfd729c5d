use crate::backend::{BackendStatus, ServiceBackend, ServiceSpec};
use crate::RuntimeError;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;

/// Docker backend: every operation shells out to the `docker` binary.
///
/// The service container runs detached with a named data volume
/// (`deploy-<name>-data`) so dumps taken by a one-off container and the live
/// service see the same `/data`. Memory and logging settings are passed as
/// the service's native environment variables.
pub struct DockerBackend;

impl Default for DockerBackend {
    fn default() -> Self {
        Self
    }
}

impl DockerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn volume_name(spec: &ServiceSpec) -> String {
        format!("{}-data", spec.container_name)
    }

    fn run(args: &[String]) -> Result<std::process::Output, RuntimeError> {
        debug!("docker {}", args.join(" "));
        let output = Command::new("docker").args(args).output()?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(output)
    }

    /// Environment variables handed to the service container. The variable
    /// names follow the managed database's own configuration convention.
    fn service_env(spec: &ServiceSpec) -> Vec<(String, String)> {
        let c = &spec.config;
        let mut env = vec![
            ("NEO4J_AUTH".to_owned(), format!("neo4j/{}", c.password)),
            (
                "NEO4J_server_memory_heap_initial__size".to_owned(),
                c.heap_initial_bytes.to_string(),
            ),
            (
                "NEO4J_server_memory_heap_max__size".to_owned(),
                c.heap_max_bytes.to_string(),
            ),
            (
                "NEO4J_server_memory_pagecache_size".to_owned(),
                c.page_cache_bytes.to_string(),
            ),
            (
                "NEO4J_server_logs_user_stdout__enabled".to_owned(),
                "true".to_owned(),
            ),
            (
                "NEO4J_db_logs_query_enabled".to_owned(),
                match c.log_level {
                    deploy_profile::LogLevel::Debug => "VERBOSE".to_owned(),
                    _ => "INFO".to_owned(),
                },
            ),
        ];
        if c.edition == deploy_profile::Edition::Enterprise {
            env.push((
                "NEO4J_ACCEPT_LICENSE_AGREEMENT".to_owned(),
                "yes".to_owned(),
            ));
        }
        if c.monitoring {
            env.push(("NEO4J_server_metrics_enabled".to_owned(), "true".to_owned()));
            env.push((
                "NEO4J_server_metrics_prometheus_enabled".to_owned(),
                "true".to_owned(),
            ));
            env.push((
                "NEO4J_server_metrics_prometheus_endpoint".to_owned(),
                format!("0.0.0.0:{}", c.metrics_port),
            ));
        }
        if c.tls {
            env.push((
                "NEO4J_server_https_enabled".to_owned(),
                "true".to_owned(),
            ));
        }
        env
    }
}

impl ServiceBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn available(&self) -> bool {
        Command::new("docker")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn launch(&self, spec: &ServiceSpec) -> Result<String, RuntimeError> {
        let c = &spec.config;
        let mut args: Vec<String> = vec![
            "run".into(),
            "--detach".into(),
            "--name".into(),
            spec.container_name.clone(),
            "--volume".into(),
            format!("{}:/data", Self::volume_name(spec)),
            "--publish".into(),
            format!("{}:{}:{}", c.bind_address, c.http_port, 7474),
            "--publish".into(),
            format!("{}:{}:{}", c.bind_address, c.bolt_port, 7687),
        ];
        if c.tls {
            args.push("--publish".into());
            args.push(format!("{}:{}:{}", c.bind_address, c.https_port, 7473));
            if let (Some(cert), Some(key)) = (&c.cert_path, &c.key_path) {
                args.push("--volume".into());
                args.push(format!("{cert}:/ssl/server.crt:ro"));
                args.push("--volume".into());
                args.push(format!("{key}:/ssl/server.key:ro"));
            }
        }
        if c.monitoring {
            args.push("--publish".into());
            args.push(format!("{}:{}:{}", c.bind_address, c.metrics_port, c.metrics_port));
        }
        for (key, value) in Self::service_env(spec) {
            args.push("--env".into());
            args.push(format!("{key}={value}"));
        }
        args.push(c.image.clone());

        let output = Self::run(&args)?;
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if container_id.is_empty() {
            return Err(RuntimeError::CommandFailed {
                command: "docker run".to_owned(),
                stderr: "no container id returned".to_owned(),
            });
        }
        Ok(container_id)
    }

    fn signal_stop(&self, spec: &ServiceSpec) -> Result<(), RuntimeError> {
        // SIGTERM only; the controller polls status() for the actual exit and
        // escalates to kill() itself on drain timeout.
        Self::run(&[
            "kill".into(),
            "--signal".into(),
            "SIGTERM".into(),
            spec.container_name.clone(),
        ])?;
        Ok(())
    }

    fn kill(&self, spec: &ServiceSpec) -> Result<(), RuntimeError> {
        Self::run(&["rm".into(), "--force".into(), spec.container_name.clone()])?;
        Ok(())
    }

    fn status(&self, spec: &ServiceSpec) -> Result<BackendStatus, RuntimeError> {
        let args = vec![
            "inspect".into(),
            "--format".into(),
            "{{.State.Running}} {{.Id}}".into(),
            spec.container_name.clone(),
        ];
        match Self::run(&args) {
            Ok(output) => {
                let text = String::from_utf8_lossy(&output.stdout);
                let mut parts = text.split_whitespace();
                let running = parts.next() == Some("true");
                let container_id = parts.next().map(str::to_owned);
                Ok(BackendStatus {
                    name: spec.name.clone(),
                    running,
                    container_id,
                })
            }
            // No such container: not running, no id.
            Err(RuntimeError::CommandFailed { stderr, .. })
                if stderr.contains("No such object") || stderr.contains("No such container") =>
            {
                Ok(BackendStatus {
                    name: spec.name.clone(),
                    running: false,
                    container_id: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn dump(
        &self,
        spec: &ServiceSpec,
        dest: &Path,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<(), RuntimeError> {
        let args = vec![
            "exec".into(),
            spec.container_name.clone(),
            "neo4j-admin".into(),
            "database".into(),
            "dump".into(),
            "neo4j".into(),
            "--to-stdout".into(),
        ];
        let command = format!("docker {}", args.join(" "));
        debug!("{command} > {}", dest.display());

        // Stream straight into the artifact and keep the child reapable so
        // a shutdown request can kill the dump mid-flight.
        let artifact = std::fs::File::create(dest)?;
        let mut child = Command::new("docker")
            .args(&args)
            .stdout(Stdio::from(artifact))
            .stderr(Stdio::piped())
            .spawn()?;
        let status = loop {
            if should_stop() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RuntimeError::Interrupted(command));
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => std::thread::sleep(Duration::from_millis(100)),
            }
        };
        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(RuntimeError::CommandFailed {
                command,
                stderr: stderr.trim().to_owned(),
            });
        }
        Ok(())
    }

    fn load(&self, spec: &ServiceSpec, source: &Path) -> Result<(), RuntimeError> {
        // The service is stopped here, so load runs in a one-off container
        // sharing the data volume.
        let args = vec![
            "run".into(),
            "--rm".into(),
            "--interactive".into(),
            "--volume".into(),
            format!("{}:/data", Self::volume_name(spec)),
            spec.config.image.clone(),
            "neo4j-admin".into(),
            "database".into(),
            "load".into(),
            "neo4j".into(),
            "--from-stdin".into(),
            "--overwrite-destination=true".into(),
        ];
        debug!("docker {} < {}", args.join(" "), source.display());
        let input = std::fs::File::open(source)?;
        let output = Command::new("docker")
            .args(&args)
            .stdin(Stdio::from(input))
            .output()?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }

    fn probe_query(&self, spec: &ServiceSpec) -> Result<String, RuntimeError> {
        let output = Self::run(&[
            "exec".into(),
            spec.container_name.clone(),
            "cypher-shell".into(),
            "--username".into(),
            "neo4j".into(),
            "--password".into(),
            spec.config.password.clone(),
            "--format".into(),
            "plain".into(),
            "RETURN 1;".into(),
        ])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .last()
            .map(|l| l.trim().to_owned())
            .ok_or_else(|| RuntimeError::ProbeFailed("empty query result".to_owned()))
    }

    fn tail_logs(&self, spec: &ServiceSpec, lines: u32) -> Result<String, RuntimeError> {
        let output = Self::run(&[
            "logs".into(),
            "--tail".into(),
            lines.to_string(),
            spec.container_name.clone(),
        ])?;
        // docker writes service logs to both streams
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr.trim());
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_profile::resolve;
    use std::collections::BTreeMap;

    fn spec_for(name: &str, overrides: &[(&str, &str)]) -> ServiceSpec {
        let mut map = BTreeMap::new();
        for (k, v) in overrides {
            map.insert((*k).to_owned(), (*v).to_owned());
        }
        ServiceSpec::new(&resolve(name, None, &map).unwrap())
    }

    #[test]
    fn volume_name_follows_container() {
        let spec = spec_for("dev", &[]);
        assert_eq!(DockerBackend::volume_name(&spec), "deploy-dev-data");
    }

    #[test]
    fn service_env_carries_memory_in_bytes() {
        let spec = spec_for("dev", &[("memory.heap_max", "2G")]);
        let env = DockerBackend::service_env(&spec);
        let heap = env
            .iter()
            .find(|(k, _)| k == "NEO4J_server_memory_heap_max__size")
            .unwrap();
        assert_eq!(heap.1, "2147483648");
    }

    #[test]
    fn enterprise_accepts_license() {
        let spec = spec_for("prod", &[]);
        let env = DockerBackend::service_env(&spec);
        assert!(env
            .iter()
            .any(|(k, _)| k == "NEO4J_ACCEPT_LICENSE_AGREEMENT"));
    }

    #[test]
    fn community_does_not_accept_license() {
        let spec = spec_for("dev", &[]);
        let env = DockerBackend::service_env(&spec);
        assert!(!env
            .iter()
            .any(|(k, _)| k == "NEO4J_ACCEPT_LICENSE_AGREEMENT"));
    }

    #[test]
    fn monitoring_enables_metrics_env() {
        let spec = spec_for("staging", &[]);
        let env = DockerBackend::service_env(&spec);
        assert!(env
            .iter()
            .any(|(k, v)| k == "NEO4J_server_metrics_prometheus_enabled" && v == "true"));
    }
}
