//! Agent binary upload over SFTP

use std::path::Path;

use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;

use hl_core::error::DeployError;

use crate::ssh::SshSession;

/// Copy `local` to `remote_path` on the host, replacing any existing file.
///
/// Returns the number of bytes written. A failure part way through leaves
/// a partial file behind; the next deploy's cleanup removes it.
pub async fn upload_file(
    session: &SshSession,
    local: &Path,
    remote_path: &str,
) -> Result<u64, DeployError> {
    let transfer_error = |reason: String| DeployError::Transfer {
        remote_path: remote_path.to_string(),
        reason,
    };

    let mut source = tokio::fs::File::open(local)
        .await
        .map_err(|e| transfer_error(format!("cannot open {}: {}", local.display(), e)))?;

    let channel = session
        .handle()
        .channel_open_session()
        .await
        .map_err(|e| transfer_error(format!("failed to open channel: {}", e)))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| transfer_error(format!("sftp subsystem unavailable: {}", e)))?;

    let sftp = SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| transfer_error(format!("sftp handshake failed: {}", e)))?;

    let mut remote = sftp
        .create(remote_path)
        .await
        .map_err(|e| transfer_error(e.to_string()))?;

    let written = tokio::io::copy(&mut source, &mut remote)
        .await
        .map_err(|e| transfer_error(e.to_string()))?;
    remote
        .shutdown()
        .await
        .map_err(|e| transfer_error(e.to_string()))?;

    if let Err(e) = sftp.close().await {
        tracing::debug!("sftp close failed: {}", e);
    }

    tracing::info!("Uploaded {} ({} bytes) to {}", local.display(), written, remote_path);
    Ok(written)
}
