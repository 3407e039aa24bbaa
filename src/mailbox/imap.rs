//! IMAP mailbox over TLS (rustls + webpki roots).
//!
//! Speaks just enough IMAP4rev1 for a read-only scan: LOGIN, SELECT,
//! SEARCH ALL, FETCH BODY.PEEK[], CLOSE and LOGOUT. Socket I/O is
//! blocking and runs on `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::MailboxConfig;
use crate::error::MailboxError;
use crate::mailbox::{Mailbox, MessageId};

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── Session ─────────────────────────────────────────────────────────

/// Completion status of a tagged command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    No,
    Bad,
}

/// Everything the server sent for one command.
#[derive(Debug)]
struct Response {
    status: Status,
    /// Text after the status word on the tagged line.
    text: String,
    /// Untagged lines (`* ...`), CRLF stripped.
    untagged: Vec<String>,
    /// Literal payloads (`{n}` blocks) in arrival order, each with the line
    /// that announced it.
    literals: Vec<(String, Vec<u8>)>,
}

/// A connected IMAP session over any byte stream.
struct ImapSession<S> {
    reader: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap a stream and consume the server greeting.
    fn start(stream: S) -> Result<Self, MailboxError> {
        let mut session = Self {
            reader: BufReader::new(stream),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(MailboxError::CommandFailed {
                command: "greeting".into(),
                reason: greeting,
            });
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "IMAP connection closed",
            )));
        }
        Ok(String::from_utf8_lossy(&buf)
            .trim_end_matches(['\r', '\n'])
            .to_string())
    }

    /// Send one command and collect the response up to its tagged line.
    fn command(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;

        let stream = self.reader.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let tag_prefix = format!("{tag} ");
        let mut untagged = Vec::new();
        let mut literals = Vec::new();

        loop {
            let line = self.read_line()?;

            if let Some(rest) = line.strip_prefix(&tag_prefix) {
                let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
                let status = match word.to_ascii_uppercase().as_str() {
                    "OK" => Status::Ok,
                    "NO" => Status::No,
                    _ => Status::Bad,
                };
                return Ok(Response {
                    status,
                    text: text.to_string(),
                    untagged,
                    literals,
                });
            }

            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.reader.read_exact(&mut literal)?;
                literals.push((line.clone(), literal));
            }
            untagged.push(line);
        }
    }

    /// Run a command and turn NO/BAD into `CommandFailed`.
    fn expect_ok(&mut self, verb: &str, cmd: &str) -> Result<Response, MailboxError> {
        let response = self.command(cmd)?;
        if response.status == Status::Ok {
            Ok(response)
        } else {
            Err(MailboxError::CommandFailed {
                command: verb.to_string(),
                reason: response.text,
            })
        }
    }

    fn login(&mut self, user: &str, password: &str) -> Result<(), MailboxError> {
        let response = self.command(&format!("LOGIN {} {}", quote(user), quote(password)))?;
        if response.status != Status::Ok {
            return Err(MailboxError::AuthFailed {
                user: user.to_string(),
                reason: response.text,
            });
        }
        Ok(())
    }

    fn select(&mut self, mailbox: &str) -> Result<(), MailboxError> {
        let response = self.command(&format!("SELECT {}", quote(mailbox)))?;
        if response.status != Status::Ok {
            return Err(MailboxError::SelectFailed {
                mailbox: mailbox.to_string(),
                reason: response.text,
            });
        }
        Ok(())
    }

    fn search_all(&mut self) -> Result<Vec<MessageId>, MailboxError> {
        let response = self.expect_ok("SEARCH", "SEARCH ALL")?;
        Ok(parse_search(&response.untagged))
    }

    /// Body of one message. Literals announced for any other message id
    /// (leftovers of an earlier, interrupted command) are ignored.
    fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>, MailboxError> {
        let response = self.expect_ok("FETCH", &format!("FETCH {id} BODY.PEEK[]"))?;
        let prefix = format!("* {id} FETCH ");
        response
            .literals
            .into_iter()
            .find(|(line, _)| line.to_ascii_uppercase().starts_with(&prefix))
            .map(|(_, body)| body)
            .ok_or_else(|| MailboxError::CommandFailed {
                command: "FETCH".into(),
                reason: format!("no message body returned for {id}"),
            })
    }

    /// CLOSE then LOGOUT. Best effort: the server may already be gone.
    fn logout(&mut self) {
        if let Err(e) = self.command("CLOSE") {
            debug!(error = %e, "IMAP CLOSE failed");
        }
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP LOGOUT failed");
        }
    }
}

/// Parse `{123}` at the end of a line into a literal length.
fn literal_len(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let start = inner.rfind('{')?;
    inner[start + 1..].trim_end_matches('+').parse().ok()
}

/// Collect ids from `* SEARCH 1 2 3` lines.
fn parse_search(lines: &[String]) -> Vec<MessageId> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(str::split_whitespace)
        .map(MessageId::from)
        .collect()
}

/// Quote an IMAP string argument.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Open a TLS connection and read the greeting.
fn connect(config: &MailboxConfig) -> Result<ImapSession<TlsStream>, MailboxError> {
    let connect_failed = |reason: String| MailboxError::ConnectFailed {
        host: config.host.clone(),
        port: config.port,
        reason,
    };

    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .map_err(|e| connect_failed(e.to_string()))?;
    tcp.set_read_timeout(Some(config.read_timeout))?;
    tcp.set_write_timeout(Some(config.read_timeout))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name =
        ServerName::try_from(config.host.clone()).map_err(|e| connect_failed(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connect_failed(e.to_string()))?;

    ImapSession::start(rustls::StreamOwned::new(conn, tcp))
}

// ── Mailbox ─────────────────────────────────────────────────────────

type Connector<S> =
    Arc<dyn Fn(&MailboxConfig) -> Result<ImapSession<S>, MailboxError> + Send + Sync>;

/// Read-only IMAP mailbox.
pub struct ImapMailbox<S = TlsStream> {
    config: MailboxConfig,
    connector: Connector<S>,
    session: Option<ImapSession<S>>,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config,
            connector: Arc::new(connect),
            session: None,
        }
    }
}

impl<S: Read + Write + Send + 'static> ImapMailbox<S> {
    /// Run a blocking operation against the open session.
    ///
    /// A session whose command failed below the protocol level (I/O error,
    /// timeout) may still have unread replies in flight, so it is dropped
    /// and later calls see `NotOpen`.
    async fn with_session<T, F>(&mut self, command: &str, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession<S>) -> Result<T, MailboxError> + Send + 'static,
    {
        let mut session = self.session.take().ok_or(MailboxError::NotOpen)?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| MailboxError::CommandFailed {
            command: command.to_string(),
            reason: format!("IMAP task panicked: {e}"),
        })?;

        match &result {
            Err(e) if !matches!(e, MailboxError::CommandFailed { .. }) => {
                warn!(command, error = %e, "Dropping IMAP session after transport failure");
            }
            _ => self.session = Some(session),
        }
        result
    }
}

#[async_trait]
impl<S: Read + Write + Send + 'static> Mailbox for ImapMailbox<S> {
    fn name(&self) -> &str {
        "imap"
    }

    async fn open(&mut self) -> Result<(), MailboxError> {
        let config = self.config.clone();
        let connector = Arc::clone(&self.connector);
        let mailbox = config.mailbox_name();

        let session = tokio::task::spawn_blocking(move || {
            let mut session = connector(&config)?;
            session.login(&config.username, config.password.expose_secret())?;
            session.select(&config.mailbox_name())?;
            Ok::<_, MailboxError>(session)
        })
        .await
        .map_err(|e| MailboxError::CommandFailed {
            command: "open".into(),
            reason: format!("IMAP task panicked: {e}"),
        })??;

        info!(host = %self.config.host, mailbox = %mailbox, "Mailbox opened");
        self.session = Some(session);
        Ok(())
    }

    async fn list_message_ids(&mut self) -> Result<Vec<MessageId>, MailboxError> {
        self.with_session("SEARCH", |s| s.search_all()).await
    }

    async fn fetch_raw(&mut self, id: &MessageId) -> Result<Vec<u8>, MailboxError> {
        let id = id.clone();
        self.with_session("FETCH", move |s| s.fetch(&id)).await
    }

    async fn close(&mut self) -> Result<(), MailboxError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        if let Err(e) = tokio::task::spawn_blocking(move || session.logout()).await {
            warn!(error = %e, "IMAP logout task panicked");
        }
        info!(host = %self.config.host, "Mailbox closed");
        Ok(())
    }
}
