//! Text-file publisher.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use portagent_core::Packet;
use tracing::info;

use super::{PublishError, Publisher, PublisherType};

/// Appends one line per packet to a file:
///
/// ```text
/// 2024-05-01T12:00:00.125Z instrument_data 7 T=12.5\r\n
/// ```
///
/// Fields are the receive timestamp, packet type, payload length and the
/// escaped payload. Every category is logged; each line is flushed as it
/// is written so the file can be tailed.
#[derive(Debug)]
pub struct LoggingPublisher {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LoggingPublisher {
    /// Opens `path` for appending, creating it and its directory if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PublishError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |e: std::io::Error| PublishError::Open {
            path: path.clone(),
            error: e.to_string(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(open_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_error)?;

        info!(path = %path.display(), "Logging packets");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared by every handler.
    fn log_packet(&mut self, packet: &Packet) -> Result<(), PublishError> {
        writeln!(
            self.writer,
            "{} {} {} {}",
            packet
                .timestamp()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            packet.packet_type(),
            packet.len(),
            packet.escaped_payload()
        )
        .and_then(|()| self.writer.flush())
        .map_err(|e| PublishError::Write {
            packet_type: packet.packet_type(),
            target: self.path.display().to_string(),
            error: e.to_string(),
        })
    }
}

impl Publisher for LoggingPublisher {
    fn publisher_type(&self) -> PublisherType {
        PublisherType::Log
    }

    fn handle_instrument_data(&mut self, packet: &Packet) -> Result<(), PublishError> {
        self.log_packet(packet)
    }

    fn handle_driver_data(&mut self, packet: &Packet) -> Result<(), PublishError> {
        self.log_packet(packet)
    }

    fn handle_command(&mut self, packet: &Packet) -> Result<(), PublishError> {
        self.log_packet(packet)
    }

    fn handle_status(&mut self, packet: &Packet) -> Result<(), PublishError> {
        self.log_packet(packet)
    }

    fn handle_fault(&mut self, packet: &Packet) -> Result<(), PublishError> {
        self.log_packet(packet)
    }

    fn handle_driver_command(&mut self, packet: &Packet) -> Result<(), PublishError> {
        self.log_packet(packet)
    }

    fn flush(&mut self) -> Result<(), PublishError> {
        self.writer.flush().map_err(|e| PublishError::Flush {
            target: self.path.display().to_string(),
            error: e.to_string(),
        })
    }
}
