//! Text-mode modem session used to deliver SMS notifications.
//!
//! A session is a short request/response exchange over a byte stream:
//! attention check (`AT`), text mode (`AT+CMGF=1`), address (`AT+CMGS="<number>"`),
//! wait for the `>` prompt, write the body terminated by Ctrl-Z, then wait
//! for the final `OK` or `ERROR`.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::{self, Instant},
};

use crate::settings::ModemSettings;

const CTRL_Z: u8 = 0x1A;
const NO_RESPONSE: &str = "no response";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open modem session: {reason}")]
    Open { reason: String },
    #[error("write failed during {stage}: {reason}")]
    Write {
        stage: &'static str,
        reason: String,
        transcript: String,
    },
    #[error("timed out waiting for {stage}")]
    Timeout {
        stage: &'static str,
        transcript: String,
    },
    #[error("modem rejected {stage}")]
    Rejected {
        stage: &'static str,
        transcript: String,
    },
    #[error("modem closed the session during {stage}")]
    Closed {
        stage: &'static str,
        transcript: String,
    },
}

impl TransportError {
    /// Raw modem text collected before the failure, or a placeholder.
    pub fn raw_response(&self) -> String {
        let transcript = match self {
            TransportError::Open { .. } => "",
            TransportError::Write { transcript, .. }
            | TransportError::Timeout { transcript, .. }
            | TransportError::Rejected { transcript, .. }
            | TransportError::Closed { transcript, .. } => transcript.as_str(),
        };
        let cleaned = squash_whitespace(transcript);
        if cleaned.is_empty() {
            NO_RESPONSE.to_string()
        } else {
            cleaned
        }
    }
}

fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Delivers one text message; `Ok` carries the modem's raw reply.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(
        &self,
        number: &str,
        body: &str,
        settings: &ModemSettings,
    ) -> Result<String, TransportError>;
}

/// Opens the byte stream a modem session runs over.
#[async_trait]
pub trait ModemConnector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    async fn open(&self, settings: &ModemSettings) -> std::io::Result<Self::Stream>;
}

/// Reaches the modem through a serial-over-IP gateway at `settings.address`.
/// Line parameters are applied by the gateway; they are logged here.
pub struct TcpModemConnector;

#[async_trait]
impl ModemConnector for TcpModemConnector {
    type Stream = TcpStream;

    async fn open(&self, settings: &ModemSettings) -> std::io::Result<TcpStream> {
        debug!(
            "Opening modem at {} ({} baud, {}{}{}, handshake {})",
            settings.address,
            settings.baud_rate,
            settings.data_bits,
            settings.parity.chars().next().unwrap_or('N'),
            settings.stop_bits,
            settings.handshake
        );
        match time::timeout(settings.read_timeout(), TcpStream::connect(&settings.address)).await {
            Ok(stream) => stream,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {} timed out", settings.address),
            )),
        }
    }
}

pub struct ModemTransport<C> {
    connector: C,
}

impl<C: ModemConnector> ModemTransport<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl<C: ModemConnector> MessageTransport for ModemTransport<C> {
    async fn send(
        &self,
        number: &str,
        body: &str,
        settings: &ModemSettings,
    ) -> Result<String, TransportError> {
        let mut stream = self
            .connector
            .open(settings)
            .await
            .map_err(|err| TransportError::Open {
                reason: err.to_string(),
            })?;

        let result = run_session(&mut stream, number, body, settings).await;
        if let Err(err) = stream.shutdown().await {
            debug!("Modem session shutdown failed: {err}");
        }
        if let Err(err) = &result {
            warn!("SMS to {number} failed: {err}");
        }
        result
    }
}

pub async fn run_session<S>(
    stream: &mut S,
    number: &str,
    body: &str,
    settings: &ModemSettings,
) -> Result<String, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session {
        stream,
        settings,
        transcript: String::new(),
    };

    session.command("AT", "attention", Expect::Ok).await?;
    session.command("AT+CMGF=1", "text mode", Expect::Ok).await?;
    session
        .command(&format!("AT+CMGS=\"{number}\""), "recipient prompt", Expect::Prompt)
        .await?;

    let mut payload = body.as_bytes().to_vec();
    payload.push(CTRL_Z);
    session.write(&payload, "message body").await?;
    session
        .wait_for("delivery", Expect::Ok, settings.response_timeout(), Some(body))
        .await?;

    Ok(squash_whitespace(&session.transcript))
}

#[derive(Debug, Clone, Copy)]
enum Expect {
    Ok,
    Prompt,
}

struct Session<'a, S> {
    stream: &'a mut S,
    settings: &'a ModemSettings,
    transcript: String,
}

impl<S> Session<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn command(
        &mut self,
        command: &str,
        stage: &'static str,
        expect: Expect,
    ) -> Result<(), TransportError> {
        let line = format!("{command}{}", self.settings.line_terminator);
        self.write(line.as_bytes(), stage).await?;
        self.wait_for(stage, expect, self.settings.read_timeout(), None)
            .await
    }

    async fn write(&mut self, bytes: &[u8], stage: &'static str) -> Result<(), TransportError> {
        let write = async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        };
        match time::timeout(self.settings.write_timeout(), write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(TransportError::Write {
                stage,
                reason: err.to_string(),
                transcript: self.transcript.clone(),
            }),
            Err(_) => Err(TransportError::Timeout {
                stage,
                transcript: self.transcript.clone(),
            }),
        }
    }

    async fn wait_for(
        &mut self,
        stage: &'static str,
        expect: Expect,
        timeout: Duration,
        echo: Option<&str>,
    ) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let start = self.transcript.len();
        let mut buffer = [0u8; 256];

        loop {
            let received = &self.transcript[start..];
            let reply = match echo {
                Some(body) => match after_echo(received, body) {
                    Some(rest) => classify(rest, expect),
                    None => Reply::Incomplete,
                },
                None => classify(received, expect),
            };
            match reply {
                Reply::Accepted => return Ok(()),
                Reply::Rejected => {
                    return Err(TransportError::Rejected {
                        stage,
                        transcript: self.transcript.clone(),
                    })
                }
                Reply::Incomplete => {}
            }

            let read = time::timeout_at(deadline, self.stream.read(&mut buffer)).await;
            match read {
                Ok(Ok(0)) => {
                    return Err(TransportError::Closed {
                        stage,
                        transcript: self.transcript.clone(),
                    })
                }
                Ok(Ok(n)) => self
                    .transcript
                    .push_str(&String::from_utf8_lossy(&buffer[..n])),
                Ok(Err(err)) => {
                    debug!("Modem read failed during {stage}: {err}");
                    return Err(TransportError::Closed {
                        stage,
                        transcript: self.transcript.clone(),
                    });
                }
                Err(_) => {
                    return Err(TransportError::Timeout {
                        stage,
                        transcript: self.transcript.clone(),
                    })
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Accepted,
    Rejected,
    Incomplete,
}

/// Text following the modem's echo of `body`, so that lines inside the
/// message are never read as the verdict. `None` while the echo is still
/// arriving; modems that do not echo get `received` back unchanged.
fn after_echo<'a>(received: &'a str, body: &str) -> Option<&'a str> {
    let trimmed = received.trim_start_matches(['\r', '\n', ' ']);
    if let Some(rest) = trimmed.strip_prefix(body) {
        return Some(rest);
    }
    if body.starts_with(trimmed) {
        return None;
    }
    Some(received)
}

/// Looks at whole lines only, so echoed text containing "OK" is ignored.
fn classify(text: &str, expect: Expect) -> Reply {
    for line in text.split(['\r', '\n']).map(str::trim) {
        if line.starts_with("ERROR") || line.contains("CMS ERROR") || line.contains("CME ERROR") {
            return Reply::Rejected;
        }
        match expect {
            Expect::Ok if line == "OK" => return Reply::Accepted,
            Expect::Prompt if line.starts_with('>') => return Reply::Accepted,
            _ => {}
        }
    }
    Reply::Incomplete
}
