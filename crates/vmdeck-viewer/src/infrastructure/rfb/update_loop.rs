//! The framebuffer update pump.
//!
//! Requests an update, reads server messages until the update arrives,
//! applies its rectangles, publishes the composited frame and requests the
//! next incremental update.  Runs until the server disconnects, an I/O or
//! protocol error occurs, or the session signals shutdown.

use std::sync::Arc;

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, trace, warn};
use vmdeck_core::protocol::codec::{
    check_string_len, decode_raw_pixels, decode_rich_cursor, decode_x_cursor, parse_copy_rect,
    parse_rectangle_header, raw_len, rich_cursor_len, x_cursor_len, COPY_RECT_LEN,
};
use vmdeck_core::protocol::{
    encode_client_message, ClientMessage, Encoding, RectangleHeader, ServerMessageType,
    RECTANGLE_HEADER_LEN,
};
use vmdeck_core::{CursorShape, Framebuffer};

use super::{RfbError, Shared};

pub(super) struct UpdateLoop<R, W> {
    pub(super) reader: R,
    pub(super) writer: Arc<Mutex<W>>,
    pub(super) shared: Arc<Shared>,
    pub(super) framebuffer: Framebuffer,
    pub(super) cursor: CursorShape,
}

impl<R, W> UpdateLoop<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Drives the pump until it ends, then records the outcome on the session.
    pub(super) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let outcome = tokio::select! {
            // A dropped sender means the session already left Connected.
            _ = shutdown.changed() => Ok(()),
            result = self.pump() => result,
        };
        match outcome {
            Ok(()) => debug!("update loop stopped"),
            Err(e) => self.shared.fail(e.to_string()),
        }
    }

    async fn pump(&mut self) -> Result<(), RfbError> {
        self.request_update(false).await?;
        loop {
            let tag = self.reader.read_u8().await?;
            match ServerMessageType::try_from(tag) {
                Ok(ServerMessageType::FramebufferUpdate) => {
                    self.read_update().await?;
                    self.publish();
                    self.request_update(true).await?;
                }
                Ok(ServerMessageType::SetColorMapEntries) => self.skip_color_map().await?,
                Ok(ServerMessageType::Bell) => trace!("bell"),
                Ok(ServerMessageType::ServerCutText) => self.skip_cut_text().await?,
                Err(unknown) => warn!(tag = unknown, "skipping unknown server message type"),
            }
        }
    }

    async fn request_update(&mut self, incremental: bool) -> Result<(), RfbError> {
        let bytes = encode_client_message(&ClientMessage::FramebufferUpdateRequest {
            incremental,
            x: 0,
            y: 0,
            width: self.framebuffer.width(),
            height: self.framebuffer.height(),
        });
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        Ok(())
    }

    async fn read_update(&mut self) -> Result<(), RfbError> {
        let mut head = [0u8; 3];
        self.reader.read_exact(&mut head).await?;
        let count = u16::from_be_bytes([head[1], head[2]]);
        trace!(rectangles = count, "framebuffer update");

        for _ in 0..count {
            let mut buf = [0u8; RECTANGLE_HEADER_LEN];
            self.reader.read_exact(&mut buf).await?;
            let rect = parse_rectangle_header(&buf)?;
            self.apply_rectangle(&rect).await?;
        }
        Ok(())
    }

    async fn apply_rectangle(&mut self, rect: &RectangleHeader) -> Result<(), RfbError> {
        let (w, h) = (rect.width, rect.height);
        match Encoding::try_from(rect.encoding) {
            Ok(Encoding::Raw) => {
                let payload = self.read_payload(raw_len(w, h)).await?;
                self.framebuffer
                    .blit(rect.x, rect.y, w, h, &decode_raw_pixels(&payload));
            }
            Ok(Encoding::CopyRect) => {
                let payload = self.read_payload(COPY_RECT_LEN).await?;
                let (src_x, src_y) = parse_copy_rect(&payload)?;
                self.framebuffer.copy_rect(src_x, src_y, rect.x, rect.y, w, h);
            }
            Ok(Encoding::DesktopSize) => {
                info!(width = w, height = h, "desktop resized");
                self.framebuffer.resize(w, h);
            }
            Ok(Encoding::RichCursor) => {
                let payload = self.read_payload(rich_cursor_len(w, h)).await?;
                self.cursor = decode_rich_cursor(rect, &payload)?;
            }
            Ok(Encoding::XCursor) => {
                let payload = self.read_payload(x_cursor_len(w, h)).await?;
                self.cursor = decode_x_cursor(rect, &payload)?;
            }
            Err(id) => warn!(encoding = id, "skipping rectangle with unknown encoding"),
        }
        Ok(())
    }

    async fn read_payload(&mut self, len: usize) -> Result<Vec<u8>, RfbError> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Colour maps are unused in true-colour mode.
    async fn skip_color_map(&mut self) -> Result<(), RfbError> {
        let mut head = [0u8; 5];
        self.reader.read_exact(&mut head).await?;
        let colours = u16::from_be_bytes([head[3], head[4]]);
        self.skip(colours as u64 * 6).await
    }

    async fn skip_cut_text(&mut self) -> Result<(), RfbError> {
        let mut pad = [0u8; 3];
        self.reader.read_exact(&mut pad).await?;
        let len = self.reader.read_u32().await?;
        let len = check_string_len("server cut text", len)?;
        self.skip(len as u64).await
    }

    async fn skip(&mut self, len: u64) -> Result<(), RfbError> {
        let copied = io::copy(&mut (&mut self.reader).take(len), &mut io::sink()).await?;
        if copied < len {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        Ok(())
    }

    fn publish(&self) {
        let pointer = self.shared.pointer();
        let frame = self.framebuffer.composite(&self.cursor, pointer.0, pointer.1);
        self.shared.publish(frame);
    }
}
