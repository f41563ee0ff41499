//! Output sink for accepted events: a truncated file or standard output,
//! one JSON value per line.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};

use crate::config::OutputTarget;
use crate::error::SinkError;

pub enum EventSink {
    File(File),
    Stdout(Stdout),
}

impl EventSink {
    pub async fn open(target: &OutputTarget) -> Result<Self, SinkError> {
        match target {
            OutputTarget::File(path) => {
                let file = open_truncated(path).await?;
                Ok(EventSink::File(file))
            }
            OutputTarget::Stdout => Ok(EventSink::Stdout(tokio::io::stdout())),
        }
    }

    /// Appends one JSON value followed by a newline.
    pub async fn write_event(&mut self, event: &serde_json::Value) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event).map_err(|e| {
            SinkError::Write(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        line.push(b'\n');
        match self {
            EventSink::File(f) => f.write_all(&line).await?,
            EventSink::Stdout(s) => s.write_all(&line).await?,
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), SinkError> {
        let w: &mut (dyn AsyncWrite + Unpin + Send) = match self {
            EventSink::File(f) => f,
            EventSink::Stdout(s) => s,
        };
        w.flush().await?;
        Ok(())
    }
}

async fn open_truncated(path: &Path) -> Result<File, SinkError> {
    File::create(path)
        .await
        .map_err(|source| SinkError::Create {
            path: path.to_owned(),
            source,
        })
}
