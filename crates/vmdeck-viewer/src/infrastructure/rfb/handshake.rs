//! Version, security and initialisation exchange.
//!
//! Runs over any byte stream so the exact byte sequence can be scripted in
//! tests.  On success the stream is positioned at the first server-to-client
//! message and the server has been told our pixel format and encodings.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use vmdeck_core::protocol::codec::{
    check_server_version, check_string_len, parse_server_init, parse_version,
};
use vmdeck_core::protocol::{
    encode_client_message, ClientMessage, PixelFormat, ADVERTISED_ENCODINGS, CLIENT_VERSION,
    SECURITY_TYPE_NONE, SERVER_INIT_LEN, SHARED_FLAG, VERSION_LEN,
};

use super::{DesktopInfo, RfbError};

/// Performs the full client side of the handshake.
pub(super) async fn perform<S>(stream: &mut S) -> Result<DesktopInfo, RfbError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // ── Version ──────────────────────────────────────────────────────────────
    let mut banner = [0u8; VERSION_LEN];
    stream.read_exact(&mut banner).await?;
    let version = check_server_version(parse_version(&banner)?)?;
    stream.write_all(CLIENT_VERSION).await?;
    debug!(major = version.major, minor = version.minor, "version agreed");

    // ── Security ─────────────────────────────────────────────────────────────
    let count = stream.read_u8().await?;
    if count == 0 {
        let reason = read_string(stream, "rejection reason").await?;
        return Err(RfbError::Rejected(reason));
    }
    let mut offered = vec![0u8; count as usize];
    stream.read_exact(&mut offered).await?;
    if !offered.contains(&SECURITY_TYPE_NONE) {
        return Err(RfbError::NoSupportedSecurity(offered));
    }
    stream.write_all(&[SECURITY_TYPE_NONE]).await?;

    if version.sends_none_security_result() {
        let result = stream.read_u32().await?;
        if result != 0 {
            let reason = if version.sends_failure_reason() {
                read_string(stream, "security failure reason").await?
            } else {
                format!("security result {result}")
            };
            return Err(RfbError::SecurityFailed(reason));
        }
    }

    // ── Initialisation ───────────────────────────────────────────────────────
    stream.write_all(&[SHARED_FLAG]).await?;
    let mut init = [0u8; SERVER_INIT_LEN];
    stream.read_exact(&mut init).await?;
    let init = parse_server_init(&init)?;
    let name = read_string_of_len(stream, "desktop name", init.name_len).await?;

    let mut setup = encode_client_message(&ClientMessage::SetPixelFormat(
        PixelFormat::session_default(),
    ));
    setup.extend(encode_client_message(&ClientMessage::SetEncodings(
        ADVERTISED_ENCODINGS.to_vec(),
    )));
    stream.write_all(&setup).await?;
    stream.flush().await?;

    info!(
        width = init.width,
        height = init.height,
        desktop = %name,
        "rfb handshake complete"
    );
    Ok(DesktopInfo {
        version,
        width: init.width,
        height: init.height,
        name,
    })
}

async fn read_string<S>(stream: &mut S, field: &'static str) -> Result<String, RfbError>
where
    S: AsyncRead + Unpin,
{
    let len = stream.read_u32().await?;
    read_string_of_len(stream, field, len).await
}

async fn read_string_of_len<S>(
    stream: &mut S,
    field: &'static str,
    len: u32,
) -> Result<String, RfbError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; check_string_len(field, len)?];
    stream.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
