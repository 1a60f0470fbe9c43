//! In-process SSH host for deploy tests
//!
//! Serves password auth, answers the launcher's commands from a small
//! process table instead of a shell, keeps SFTP uploads in memory and
//! connects `direct-tcpip` channels to local TCP ports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::KeyPair;
use russh_sftp::protocol::{FileAttributes, Handle, OpenFlags, Status, StatusCode};
use tokio::net::{TcpListener, TcpStream};

pub const USER: &str = "root";
pub const PASSWORD: &str = "correct horse";

/// Everything the launcher did to the host
#[derive(Debug, Default)]
struct HostRecord {
    commands: Vec<String>,
    files: HashMap<String, Vec<u8>>,
    /// Command lines of agents currently "running"
    agents: Vec<String>,
}

/// A listening fake host
pub struct FakeHost {
    pub port: u16,
    record: Arc<Mutex<HostRecord>>,
}

impl FakeHost {
    /// Start a host whose `uname -m` prints `arch`
    pub async fn start(arch: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut config = russh::server::Config::default();
        config.keys.push(KeyPair::generate_ed25519().unwrap());
        config.auth_rejection_time = Duration::from_millis(10);
        config.auth_rejection_time_initial = Some(Duration::from_secs(0));
        let config = Arc::new(config);

        let record = Arc::new(Mutex::new(HostRecord::default()));
        let shared = Arc::clone(&record);
        let arch = arch.to_string();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = HostHandler {
                    arch: arch.clone(),
                    record: Arc::clone(&shared),
                    channels: HashMap::new(),
                };
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    if let Ok(session) = russh::server::run_stream(config, socket, handler).await {
                        let _ = session.await;
                    }
                });
            }
        });

        Self { port, record }
    }

    /// Commands exec'd so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.record.lock().unwrap().commands.clone()
    }

    /// Contents of an uploaded file
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.record.lock().unwrap().files.get(path).cloned()
    }

    /// Number of agent processes alive
    pub fn running_agents(&self) -> usize {
        self.record.lock().unwrap().agents.len()
    }
}

struct HostHandler {
    arch: String,
    record: Arc<Mutex<HostRecord>>,
    /// Session channels not yet claimed by exec or a subsystem
    channels: HashMap<ChannelId, Channel<Msg>>,
}

/// First single-quoted word of a command line
fn first_quoted(command: &str) -> &str {
    command.split('\'').nth(1).unwrap_or("")
}

impl HostHandler {
    /// Returns (stdout, stderr, exit status)
    fn run(&self, command: &str) -> (String, String, u32) {
        let mut record = self.record.lock().unwrap();
        record.commands.push(command.to_string());

        if command == "uname -m" {
            return (format!("{}\n", self.arch), String::new(), 0);
        }

        if command.starts_with("pkill -f ") {
            // The bracket trick only keeps pkill from matching itself
            let needle = first_quoted(command).replace(['[', ']'], "");
            let before = record.agents.len();
            record.agents.retain(|agent| !agent.contains(&needle));
            let status = if record.agents.len() < before { 0 } else { 1 };
            return (String::new(), String::new(), status);
        }

        if command.starts_with("rm -f ") {
            record.files.remove(first_quoted(command));
            return (String::new(), String::new(), 0);
        }

        if command.starts_with("chmod 755 ") {
            let path = first_quoted(command);
            if !record.files.contains_key(path) {
                let stderr = format!("chmod: cannot access '{}': No such file or directory\n", path);
                return (String::new(), stderr, 1);
            }
            record.agents.push(command.to_string());
            return (String::new(), String::new(), 0);
        }

        (String::new(), format!("sh: {}: not found\n", command), 127)
    }
}

#[async_trait]
impl Handler for HostHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        let command = String::from_utf8_lossy(data).into_owned();
        let (stdout, stderr, status) = self.run(&command);

        session.channel_success(channel);
        if !stdout.is_empty() {
            session.data(channel, CryptoVec::from(stdout));
        }
        if !stderr.is_empty() {
            session.extended_data(channel, 1, CryptoVec::from(stderr));
        }
        session.exit_status_request(channel, status);
        session.eof(channel);
        session.close(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match (name, self.channels.remove(&channel)) {
            ("sftp", Some(claimed)) => {
                session.channel_success(channel);
                let store = SftpStore {
                    record: Arc::clone(&self.record),
                    open: HashMap::new(),
                    next_handle: 0,
                };
                russh_sftp::server::run(claimed.into_stream(), store).await;
            }
            _ => session.channel_failure(channel),
        }
        Ok(())
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Ok(port) = u16::try_from(port_to_connect) else {
            return Ok(false);
        };
        let Ok(mut target) = TcpStream::connect((host_to_connect, port)).await else {
            return Ok(false);
        };

        tokio::spawn(async move {
            let mut stream = channel.into_stream();
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut target).await;
        });
        Ok(true)
    }
}

/// Write-only SFTP server backed by the host record
struct SftpStore {
    record: Arc<Mutex<HostRecord>>,
    /// Handle -> (path, contents so far)
    open: HashMap<String, (String, Vec<u8>)>,
    next_handle: u32,
}

fn ok_status(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

impl russh_sftp::server::Handler for SftpStore {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        if !pflags.contains(OpenFlags::WRITE) {
            return Err(StatusCode::PermissionDenied);
        }
        self.next_handle += 1;
        let handle = self.next_handle.to_string();
        self.open.insert(handle.clone(), (filename, Vec::new()));
        Ok(Handle { id, handle })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let (_, contents) = self.open.get_mut(&handle).ok_or(StatusCode::Failure)?;
        let start = offset as usize;
        let end = start + data.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[start..end].copy_from_slice(&data);
        Ok(ok_status(id))
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        let (path, contents) = self.open.remove(&handle).ok_or(StatusCode::Failure)?;
        self.record.lock().unwrap().files.insert(path, contents);
        Ok(ok_status(id))
    }
}
