//! Agent configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration for the remote agent daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Host to bind the HTTP server to
    pub bind_host: String,

    /// Port to bind the HTTP server to
    pub port: u16,

    /// Interactive shell for `/ws/terminal`
    pub shell: String,

    /// Environment variables set for every PTY child
    pub default_env: Vec<(String, String)>,

    /// Directory holding the install/update scripts run by `/ws/deploy`
    pub script_dir: PathBuf,

    /// Script run for `type=install`
    pub install_script: String,

    /// Script run for any other `type`
    pub update_script: String,

    /// Trailing lines sent when a log session opens
    pub tail_lines: u32,

    /// Log keys exposed to `/ws/log` and `/api/log/download`
    pub logs: BTreeMap<String, LogSource>,

    /// Upstream consoles mounted under `/api/proxy/<name>/`
    pub proxies: Vec<ProxyRule>,
}

/// A log file, optionally with an alternative install location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSource {
    /// Preferred location
    pub path: PathBuf,

    /// Used when `path` is absent and this one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<PathBuf>,
}

impl LogSource {
    /// A log with a single known location
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback: None,
        }
    }

    /// A log that may live in one of two places
    pub fn with_fallback(path: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback: Some(fallback.into()),
        }
    }

    /// Pick the first location that exists, keeping the primary otherwise
    pub fn resolve(&self) -> PathBuf {
        if self.path.exists() {
            return self.path.clone();
        }
        match &self.fallback {
            Some(fallback) if fallback.exists() => fallback.clone(),
            _ => self.path.clone(),
        }
    }
}

/// An upstream admin console reached through the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRule {
    /// Mount name, the `<name>` in `/api/proxy/<name>/`
    pub name: String,

    /// Upstream base URL, e.g. `http://127.0.0.1:9001`
    pub target: String,

    /// Path fragments that mark where the upstream's own path starts.
    /// Checked in order; the last occurrence of the first one present wins.
    #[serde(default)]
    pub anchors: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let mut logs = BTreeMap::new();
        logs.insert("agent".to_string(), LogSource::at("/root/hl-agent.log"));
        logs.insert(
            "system".to_string(),
            LogSource::with_fallback("/var/log/messages", "/var/log/syslog"),
        );
        logs.insert(
            "nginx_access".to_string(),
            LogSource::with_fallback(
                "/var/log/nginx/access.log",
                "/usr/local/nginx/logs/access.log",
            ),
        );
        logs.insert(
            "nginx_error".to_string(),
            LogSource::with_fallback(
                "/var/log/nginx/error.log",
                "/usr/local/nginx/logs/error.log",
            ),
        );

        let proxies = vec![
            ProxyRule {
                name: "rabbitmq".to_string(),
                target: "http://127.0.0.1:15672".to_string(),
                anchors: vec![],
            },
            ProxyRule {
                name: "minio".to_string(),
                target: "http://127.0.0.1:9001".to_string(),
                anchors: [
                    "/static/",
                    "/api/v1/",
                    "/login",
                    "/ws/",
                    "/images/",
                    "/styles/",
                    "/loader.css",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
            },
        ];

        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 9898,
            shell: "/bin/bash".to_string(),
            default_env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            script_dir: PathBuf::from("/root/install"),
            install_script: "install.sh".to_string(),
            update_script: "update.sh".to_string(),
            tail_lines: 200,
            logs,
            proxies,
        }
    }
}

impl AgentConfig {
    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Resolve every log key to a concrete path
    pub fn resolve_logs(&self) -> BTreeMap<String, PathBuf> {
        self.logs
            .iter()
            .map(|(key, source)| (key.clone(), source.resolve()))
            .collect()
    }

    /// Script selected by a `/ws/deploy?type=` value
    pub fn script_for(&self, kind: Option<&str>) -> PathBuf {
        match kind {
            Some("install") => self.script_dir.join(&self.install_script),
            _ => self.script_dir.join(&self.update_script),
        }
    }

    /// Look up an upstream by mount name
    pub fn proxy(&self, name: &str) -> Option<&ProxyRule> {
        self.proxies.iter().find(|rule| rule.name == name)
    }
}
