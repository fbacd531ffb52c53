//! Email transports: raw IMAP over rustls for the mailbox, SMTP via lettre
//! for outbound.
//!
//! Both protocols are blocking; every call runs on the blocking pool via
//! `spawn_blocking`, one at a time.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox as Address, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::channels::email_types::{InboundEmail, OutgoingEmail};
use crate::channels::{Mailbox, Sender};
use crate::config::{ImapConfig, SmtpConfig};
use crate::error::ChannelError;

/// Socket read/write timeout for the IMAP connection.
const IMAP_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for one SMTP send, connect included.
const SMTP_TIMEOUT: Duration = Duration::from_secs(20);

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── IMAP mailbox ────────────────────────────────────────────────────

/// Production mailbox: one IMAP session per sweep.
pub struct ImapMailbox {
    config: ImapConfig,
    session: Arc<Mutex<Option<ImapSession<TlsStream>>>>,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` against the open session on the blocking pool.
    async fn with_session<T, F>(&self, op: F) -> Result<T, ChannelError>
    where
        F: FnOnce(&mut ImapSession<TlsStream>) -> Result<T, ChannelError> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| ChannelError::Protocol("IMAP session lock poisoned".into()))?;
            let session = guard.as_mut().ok_or(ChannelError::NotConnected)?;
            op(session)
        })
        .await
        .map_err(|e| ChannelError::Task(e.to_string()))?
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn login(&self) -> Result<(), ChannelError> {
        let config = self.config.clone();
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut opened = ImapSession::new(connect_tls(&config.host, config.port)?)?;
            opened.login(&config.user, config.password.expose_secret())?;
            opened.select(&config.folder)?;
            let mut guard = session
                .lock()
                .map_err(|_| ChannelError::Protocol("IMAP session lock poisoned".into()))?;
            // A session left over from a sweep whose logout failed is simply dropped.
            *guard = Some(opened);
            Ok::<(), ChannelError>(())
        })
        .await
        .map_err(|e| ChannelError::Task(e.to_string()))??;

        info!(host = %self.config.host, folder = %self.config.folder, "IMAP login succeeded");
        Ok(())
    }

    async fn list_unseen(&self) -> Result<Vec<InboundEmail>, ChannelError> {
        self.with_session(|session| session.fetch_unseen()).await
    }

    async fn flag_seen(&self, uid: &str) -> Result<(), ChannelError> {
        let uid = uid.to_string();
        self.with_session(move |session| session.flag_seen(&uid)).await
    }

    async fn move_to(&self, uid: &str, folder: &str) -> Result<(), ChannelError> {
        let uid = uid.to_string();
        let folder = folder.to_string();
        self.with_session(move |session| session.move_to(&uid, &folder))
            .await
    }

    async fn logout(&self) -> Result<(), ChannelError> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let taken = session
                .lock()
                .map_err(|_| ChannelError::Protocol("IMAP session lock poisoned".into()))?
                .take();
            match taken {
                Some(mut session) => session.logout(),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| ChannelError::Task(e.to_string()))?
    }
}

/// Open a TCP connection with timeouts and wrap it in TLS.
fn connect_tls(host: &str, port: u16) -> Result<TlsStream, ChannelError> {
    let connect_err = |reason: String| ChannelError::ConnectFailed {
        host: host.to_string(),
        reason,
    };

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| connect_err(e.to_string()))?
        .next()
        .ok_or_else(|| connect_err("host resolved to no addresses".into()))?;
    let tcp = TcpStream::connect_timeout(&addr, IMAP_IO_TIMEOUT)
        .map_err(|e| connect_err(e.to_string()))?;
    tcp.set_read_timeout(Some(IMAP_IO_TIMEOUT))?;
    tcp.set_write_timeout(Some(IMAP_IO_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| connect_err(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connect_err(e.to_string()))?;
    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// One untagged or tagged response line, with any literals it carried.
#[derive(Debug, Default)]
struct ResponseLine {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// A blocking IMAP client session over any byte stream.
pub(crate) struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap a connected stream and consume the server greeting.
    pub(crate) fn new(stream: S) -> Result<Self, ChannelError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(ChannelError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }
        Ok(session)
    }

    pub(crate) fn login(&mut self, user: &str, password: &str) -> Result<(), ChannelError> {
        let cmd = format!("LOGIN {} {}", quote(user), quote(password));
        self.command(&cmd, "LOGIN")
            .map(|_| ())
            .map_err(|e| match e {
                ChannelError::CommandRejected { response, .. } => ChannelError::AuthFailed {
                    user: user.to_string(),
                    reason: response,
                },
                other => other,
            })
    }

    pub(crate) fn select(&mut self, folder: &str) -> Result<(), ChannelError> {
        self.command(&format!("SELECT {}", quote(folder)), "SELECT")
            .map(|_| ())
    }

    /// `UID SEARCH UNSEEN`, then `BODY.PEEK[]` each hit so nothing gets flagged.
    pub(crate) fn fetch_unseen(&mut self) -> Result<Vec<InboundEmail>, ChannelError> {
        let lines = self.command("UID SEARCH UNSEEN", "UID SEARCH")?;
        let uids = parse_search(&lines);
        debug!(count = uids.len(), "IMAP search returned unseen UIDs");

        let mut messages = Vec::with_capacity(uids.len());
        for uid in uids {
            let lines = self.command(&format!("UID FETCH {uid} BODY.PEEK[]"), "UID FETCH")?;
            let raw = lines
                .iter()
                .filter(|l| l.text.starts_with("* ") && l.text.contains("FETCH"))
                .find_map(|l| l.literals.first());

            match raw.and_then(|raw| InboundEmail::parse(&uid, raw)) {
                Some(message) => messages.push(message),
                None => {
                    // Flag it here, or every later sweep fetches it again.
                    warn!(uid = %uid, "Unparsable message, marking as seen");
                    if let Err(e) = self.flag_seen(&uid) {
                        warn!(uid = %uid, error = %e, "Failed to mark unparsable message as seen");
                    }
                }
            }
        }
        Ok(messages)
    }

    pub(crate) fn flag_seen(&mut self, uid: &str) -> Result<(), ChannelError> {
        self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Seen)"), "UID STORE")
            .map(|_| ())
    }

    /// `UID MOVE`, or copy + delete + expunge on servers without MOVE.
    pub(crate) fn move_to(&mut self, uid: &str, folder: &str) -> Result<(), ChannelError> {
        match self.command(&format!("UID MOVE {uid} {}", quote(folder)), "UID MOVE") {
            Ok(_) => Ok(()),
            Err(ChannelError::CommandRejected { response, .. }) => {
                debug!(uid = %uid, response = %response, "UID MOVE rejected, falling back to COPY");
                self.command(&format!("UID COPY {uid} {}", quote(folder)), "UID COPY")?;
                self.command(
                    &format!("UID STORE {uid} +FLAGS.SILENT (\\Deleted)"),
                    "UID STORE",
                )?;
                self.command("EXPUNGE", "EXPUNGE")?;
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    pub(crate) fn logout(&mut self) -> Result<(), ChannelError> {
        self.command("LOGOUT", "LOGOUT").map(|_| ())
    }

    /// Send one tagged command and collect the response up to its tagged status.
    ///
    /// `label` is what appears in errors, so credentials never leak into logs.
    fn command(&mut self, cmd: &str, label: &str) -> Result<Vec<ResponseLine>, ChannelError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let writer = self.stream.get_mut();
        writer.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        writer.flush()?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_response_line()?;
            if let Some(status) = line.text.strip_prefix(&format!("{tag} ")) {
                if status.starts_with("OK") {
                    return Ok(lines);
                }
                return Err(ChannelError::CommandRejected {
                    command: label.to_string(),
                    response: status.trim_end().to_string(),
                });
            }
            if line.text.starts_with("* BYE") && label != "LOGOUT" {
                return Err(ChannelError::Protocol(format!(
                    "server closed connection: {}",
                    line.text.trim_end()
                )));
            }
            lines.push(line);
        }
    }

    /// Read a logical response line, pulling in `{n}` literals as they appear.
    fn read_response_line(&mut self) -> Result<ResponseLine, ChannelError> {
        let mut response = ResponseLine::default();
        loop {
            let line = self.read_line()?;
            match literal_len(&line) {
                Some(len) => {
                    let mut literal = vec![0u8; len];
                    self.stream.read_exact(&mut literal)?;
                    response.text.push_str(&line);
                    response.literals.push(literal);
                }
                None => {
                    response.text.push_str(&line);
                    return Ok(response);
                }
            }
        }
    }

    fn read_line(&mut self) -> Result<String, ChannelError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(ChannelError::Protocol("IMAP connection closed".into()));
        }
        Ok(String::from_utf8_lossy(&buf).to_string())
    }
}

/// Quote a string for use as an IMAP quoted string.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// If a line ends with a `{n}` literal announcement, return `n`.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let open = trimmed.strip_suffix('}')?.rfind('{')?;
    trimmed[open + 1..trimmed.len() - 1].parse().ok()
}

/// Collect UIDs from `* SEARCH` lines.
fn parse_search(lines: &[ResponseLine]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| l.text.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}

// ── SMTP sender ─────────────────────────────────────────────────────

/// Production sender: one authenticated SMTP connection per message.
pub struct SmtpSender {
    config: SmtpConfig,
}

impl SmtpSender {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<SmtpTransport, ChannelError> {
        let creds = Credentials::new(
            self.config.user.clone(),
            self.config.password.expose_secret().to_string(),
        );

        // 587 is submission with STARTTLS; everything else gets implicit TLS.
        let builder = if self.config.port == 587 {
            SmtpTransport::starttls_relay(&self.config.host)
        } else {
            SmtpTransport::relay(&self.config.host)
        }
        .map_err(|e| ChannelError::SendFailed {
            reason: format!("SMTP relay error: {e}"),
        })?;

        Ok(builder
            .port(self.config.port)
            .credentials(creds)
            .timeout(Some(SMTP_TIMEOUT))
            .build())
    }
}

#[async_trait]
impl Sender for SmtpSender {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), ChannelError> {
        let message = build_message(email)?;
        let transport = self.transport()?;

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| ChannelError::Task(e.to_string()))?
            .map_err(|e| ChannelError::SendFailed {
                reason: format!("SMTP send failed: {e}"),
            })?;

        info!(to = %email.to, cc = %email.cc.join(", "), "Email sent");
        Ok(())
    }
}

fn parse_address(address: &str) -> Result<Address, ChannelError> {
    address.parse().map_err(|e| ChannelError::InvalidAddress {
        address: address.to_string(),
        reason: format!("{e}"),
    })
}

/// Turn an envelope into a multipart message with one plain-text part.
fn build_message(email: &OutgoingEmail) -> Result<Message, ChannelError> {
    let mut builder = Message::builder()
        .from(parse_address(&email.from)?)
        .to(parse_address(&email.to)?)
        .subject(email.subject.clone());

    for cc in &email.cc {
        builder = builder.cc(parse_address(cc)?);
    }
    if let Some(id) = &email.in_reply_to {
        builder = builder.in_reply_to(id.clone());
    }
    if let Some(refs) = &email.references {
        builder = builder.references(refs.clone());
    }

    builder
        .multipart(MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone())))
        .map_err(|e| ChannelError::SendFailed {
            reason: format!("Failed to build email: {e}"),
        })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Replays canned server output and records what the client wrote.
    struct ScriptedStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl ScriptedStream {
        fn new(script: &str) -> Self {
            Self {
                input: Cursor::new(script.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn written(session: &mut ImapSession<ScriptedStream>) -> String {
        String::from_utf8_lossy(&session.stream.get_ref().output).to_string()
    }

    const MESSAGE: &str = "From: alice@buyer.example\r\nSubject: Hi\r\n\r\nHello\r\n";

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn literal_len_detects_announcement() {
        assert_eq!(literal_len("* 1 FETCH (UID 9 BODY[] {42}\r\n"), Some(42));
        assert_eq!(literal_len("* OK done\r\n"), None);
        assert_eq!(literal_len("* 1 FETCH {abc}\r\n"), None);
    }

    #[test]
    fn search_parsing_collects_uids() {
        let lines = vec![
            ResponseLine {
                text: "* SEARCH 4 8 15\r\n".into(),
                literals: vec![],
            },
            ResponseLine {
                text: "* 3 EXISTS\r\n".into(),
                literals: vec![],
            },
        ];
        assert_eq!(parse_search(&lines), vec!["4", "8", "15"]);
    }

    #[test]
    fn empty_search_yields_nothing() {
        let lines = vec![ResponseLine {
            text: "* SEARCH\r\n".into(),
            literals: vec![],
        }];
        assert!(parse_search(&lines).is_empty());
    }

    #[test]
    fn bad_greeting_is_rejected() {
        let result = ImapSession::new(ScriptedStream::new("* BYE go away\r\n"));
        assert!(matches!(result, Err(ChannelError::Protocol(_))));
    }

    #[test]
    fn login_rejection_maps_to_auth_failed() {
        let stream = ScriptedStream::new("* OK ready\r\nA1 NO [AUTHENTICATIONFAILED] bad creds\r\n");
        let mut session = ImapSession::new(stream).unwrap();
        let err = session.login("user", "secret").unwrap_err();
        assert!(matches!(err, ChannelError::AuthFailed { .. }));
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn fetch_unseen_reads_literals() {
        let script = format!(
            "* OK ready\r\n\
             * SEARCH 12\r\n\
             A1 OK SEARCH completed\r\n\
             * 1 FETCH (UID 12 BODY[] {{{}}}\r\n{})\r\n\
             A2 OK FETCH completed\r\n",
            MESSAGE.len(),
            MESSAGE
        );
        let mut session = ImapSession::new(ScriptedStream::new(&script)).unwrap();
        let messages = session.fetch_unseen().unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].uid, "12");
        assert_eq!(messages[0].sender, "alice@buyer.example");
        assert_eq!(messages[0].subject, "Hi");

        let sent = written(&mut session);
        assert!(sent.contains("A1 UID SEARCH UNSEEN\r\n"));
        assert!(sent.contains("A2 UID FETCH 12 BODY.PEEK[]\r\n"));
    }

    #[test]
    fn fetch_unseen_flags_unparsable_message() {
        let script = "* OK ready\r\n\
                      * SEARCH 12\r\n\
                      A1 OK SEARCH completed\r\n\
                      * 1 FETCH (UID 12 BODY[] {0}\r\n)\r\n\
                      A2 OK FETCH completed\r\n\
                      A3 OK STORE completed\r\n";
        let mut session = ImapSession::new(ScriptedStream::new(script)).unwrap();
        let messages = session.fetch_unseen().unwrap();

        assert!(messages.is_empty());
        assert!(written(&mut session).contains("A3 UID STORE 12 +FLAGS.SILENT (\\Seen)\r\n"));
    }

    #[test]
    fn fetch_unseen_flags_message_with_no_body() {
        let script = "* OK ready\r\n\
                      * SEARCH 12 13\r\n\
                      A1 OK SEARCH completed\r\n\
                      A2 OK FETCH completed\r\n\
                      A3 OK STORE completed\r\n\
                      A4 OK FETCH completed\r\n\
                      A5 NO STORE failed\r\n";
        let mut session = ImapSession::new(ScriptedStream::new(script)).unwrap();
        // A failed flag on a skipped message does not abort the listing.
        let messages = session.fetch_unseen().unwrap();

        assert!(messages.is_empty());
        let sent = written(&mut session);
        assert!(sent.contains("A3 UID STORE 12 +FLAGS.SILENT (\\Seen)\r\n"));
        assert!(sent.contains("A5 UID STORE 13 +FLAGS.SILENT (\\Seen)\r\n"));
    }

    #[test]
    fn flag_seen_uses_silent_store() {
        let stream = ScriptedStream::new("* OK ready\r\nA1 OK STORE completed\r\n");
        let mut session = ImapSession::new(stream).unwrap();
        session.flag_seen("12").unwrap();
        assert!(written(&mut session).contains("A1 UID STORE 12 +FLAGS.SILENT (\\Seen)\r\n"));
    }

    #[test]
    fn move_falls_back_to_copy_when_unsupported() {
        let script = "* OK ready\r\n\
                      A1 BAD unknown command\r\n\
                      A2 OK COPY completed\r\n\
                      A3 OK STORE completed\r\n\
                      A4 OK EXPUNGE completed\r\n";
        let mut session = ImapSession::new(ScriptedStream::new(script)).unwrap();
        session.move_to("12", "Trash").unwrap();

        let sent = written(&mut session);
        assert!(sent.contains("A1 UID MOVE 12 \"Trash\""));
        assert!(sent.contains("A2 UID COPY 12 \"Trash\""));
        assert!(sent.contains("A3 UID STORE 12 +FLAGS.SILENT (\\Deleted)"));
        assert!(sent.contains("A4 EXPUNGE"));
    }

    #[test]
    fn move_fails_when_copy_fails() {
        let script = "* OK ready\r\nA1 NO no MOVE\r\nA2 NO [TRYCREATE] no such mailbox\r\n";
        let mut session = ImapSession::new(ScriptedStream::new(script)).unwrap();
        let err = session.move_to("12", "Trash").unwrap_err();
        assert!(matches!(err, ChannelError::CommandRejected { ref command, .. } if command == "UID COPY"));
    }

    #[test]
    fn closed_connection_is_protocol_error() {
        let mut session = ImapSession::new(ScriptedStream::new("* OK ready\r\n")).unwrap();
        assert!(matches!(
            session.flag_seen("1"),
            Err(ChannelError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn mailbox_ops_without_login_fail() {
        let mailbox = ImapMailbox::new(ImapConfig {
            host: "imap.test.com".into(),
            port: 993,
            user: "user".into(),
            password: secrecy::SecretString::from("pass"),
            folder: "INBOX".into(),
            trash_folder: "Trash".into(),
        });
        assert!(matches!(
            mailbox.flag_seen("1").await,
            Err(ChannelError::NotConnected)
        ));
        // Logging out with no session is a no-op.
        assert!(mailbox.logout().await.is_ok());
    }

    fn reply() -> OutgoingEmail {
        OutgoingEmail {
            from: "sales@example.com".into(),
            to: "alice@buyer.example".into(),
            cc: vec!["boss@example.com".into(), "team@example.com".into()],
            subject: "Re: Quote".into(),
            body: "Dear friend,\nThanks".into(),
            in_reply_to: Some("<abc123@buyer.example>".into()),
            references: Some("<abc123@buyer.example>".into()),
        }
    }

    #[test]
    fn build_message_sets_threading_and_cc() {
        let message = build_message(&reply()).unwrap();
        let formatted = String::from_utf8_lossy(&message.formatted()).to_string();
        assert!(formatted.contains("In-Reply-To: <abc123@buyer.example>"));
        assert!(formatted.contains("References: <abc123@buyer.example>"));
        assert!(formatted.contains("boss@example.com"));
        assert!(formatted.contains("Subject: Re: Quote"));
        assert!(formatted.contains("multipart/mixed"));
        assert!(formatted.contains("text/plain; charset=utf-8"));

        let envelope = message.envelope();
        assert_eq!(envelope.to().len(), 3);
    }

    #[test]
    fn build_message_rejects_bad_address() {
        let mut email = reply();
        email.to = "not an address".into();
        assert!(matches!(
            build_message(&email),
            Err(ChannelError::InvalidAddress { .. })
        ));
    }
}
