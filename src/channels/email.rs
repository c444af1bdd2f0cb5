//! Email channel: a minimal blocking IMAP4rev1 client over implicit TLS.
//!
//! Only the handful of commands a mailbox poll needs: LOGIN, SELECT,
//! UID SEARCH, UID FETCH, UID STORE, EXPUNGE and LOGOUT. The blocking
//! session is driven from async code through [`ImapMailbox`], which hops
//! onto `spawn_blocking` for every round trip.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, trace};

use crate::error::ChannelError;

const CHANNEL: &str = "email";

/// Socket read/write timeout for the IMAP connection.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest literal the server may announce before the connection is rejected.
pub const MAX_LITERAL_LEN: usize = 64 * 1024 * 1024;

/// TLS stream used for real IMAP connections.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Completion status of a tagged IMAP command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

/// One logical response line, with any `{n}` literals it carried.
#[derive(Debug, Clone, Default)]
pub struct ResponseLine {
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

/// Everything the server sent back for one command.
#[derive(Debug, Clone)]
pub struct Response {
    pub untagged: Vec<ResponseLine>,
    pub status: Status,
    /// Human-readable text after the status word.
    pub text: String,
}

/// A logged-out or logged-in IMAP session over any byte stream.
pub struct ImapSession<S: Read + Write> {
    reader: BufReader<S>,
    next_tag: u32,
}

impl ImapSession<TlsStream> {
    /// Open a TCP connection, wrap it in TLS and read the greeting.
    pub fn connect(host: &str, port: u16) -> Result<Self, ChannelError> {
        let connect_err = |reason: String| ChannelError::Connect {
            name: CHANNEL.into(),
            reason,
        };

        let tcp = TcpStream::connect((host, port))
            .map_err(|e| connect_err(format!("TCP connect to {host}:{port}: {e}")))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))
            .and_then(|()| tcp.set_write_timeout(Some(IO_TIMEOUT)))
            .map_err(|e| connect_err(e.to_string()))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| connect_err(format!("invalid server name {host}: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connect_err(format!("TLS setup: {e}")))?;

        debug!(host, port, "IMAP connection established");
        Self::from_stream(rustls::StreamOwned::new(conn, tcp))
    }
}

impl<S: Read + Write> ImapSession<S> {
    /// Start a session on an already-connected stream. Reads the greeting.
    pub fn from_stream(stream: S) -> Result<Self, ChannelError> {
        let mut session = Self {
            reader: BufReader::new(stream),
            next_tag: 1,
        };
        let greeting = session.read_response_line()?;
        if !(greeting.text.starts_with("* OK") || greeting.text.starts_with("* PREAUTH")) {
            return Err(ChannelError::protocol(
                CHANNEL,
                format!("unexpected greeting: {}", greeting.text),
            ));
        }
        Ok(session)
    }

    pub fn login(&mut self, username: &str, password: &SecretString) -> Result<(), ChannelError> {
        let cmd = format!(
            "LOGIN {} {}",
            quote(username)?,
            quote(password.expose_secret())?
        );
        let resp = self.command(&cmd)?;
        if resp.status != Status::Ok {
            return Err(ChannelError::AuthFailed {
                name: CHANNEL.into(),
                reason: resp.text,
            });
        }
        Ok(())
    }

    pub fn select(&mut self, mailbox: &str) -> Result<(), ChannelError> {
        let resp = self.command(&format!("SELECT {}", quote(mailbox)?))?;
        expect_ok(&resp, "SELECT")?;
        Ok(())
    }

    /// UIDs of unseen messages whose `From` header contains `sender`.
    pub fn search_unseen_from(&mut self, sender: &str) -> Result<Vec<u32>, ChannelError> {
        let resp = self.command(&format!("UID SEARCH UNSEEN HEADER From {}", quote(sender)?))?;
        expect_ok(&resp, "SEARCH")?;
        Ok(parse_search(&resp.untagged))
    }

    /// Raw RFC 822 bytes of a message. Does not set `\Seen`.
    pub fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>, ChannelError> {
        let resp = self.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        expect_ok(&resp, "FETCH")?;
        resp.untagged
            .into_iter()
            .find(|line| line.text.contains(" FETCH ") && !line.literals.is_empty())
            .and_then(|line| line.literals.into_iter().next())
            .ok_or_else(|| ChannelError::protocol(CHANNEL, format!("no body returned for UID {uid}")))
    }

    /// Add a system flag such as `\Seen` or `\Deleted`.
    pub fn add_flag(&mut self, uid: u32, flag: &str) -> Result<(), ChannelError> {
        let resp = self.command(&format!("UID STORE {uid} +FLAGS.SILENT ({flag})"))?;
        expect_ok(&resp, "STORE")?;
        Ok(())
    }

    pub fn expunge(&mut self) -> Result<(), ChannelError> {
        let resp = self.command("EXPUNGE")?;
        expect_ok(&resp, "EXPUNGE")?;
        Ok(())
    }

    pub fn logout(&mut self) -> Result<(), ChannelError> {
        self.command("LOGOUT").map(|_| ())
    }

    /// Send one tagged command and collect its response.
    pub fn command(&mut self, cmd: &str) -> Result<Response, ChannelError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let verb = cmd.split(' ').take(2).collect::<Vec<_>>().join(" ");
        trace!(%tag, %verb, "IMAP command");

        let stream = self.reader.get_mut();
        stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|e| io_err("write", e))?;

        let prefix = format!("{tag} ");
        let mut untagged = Vec::new();
        loop {
            let line = self.read_response_line()?;
            if let Some(rest) = line.text.strip_prefix(&prefix) {
                let (status, text) = parse_status(rest)?;
                return Ok(Response {
                    untagged,
                    status,
                    text,
                });
            }
            untagged.push(line);
        }
    }

    /// Read one response line, pulling in any literals it announces.
    fn read_response_line(&mut self) -> Result<ResponseLine, ChannelError> {
        let mut out = ResponseLine::default();
        loop {
            let mut raw = Vec::new();
            let n = self
                .reader
                .read_until(b'\n', &mut raw)
                .map_err(|e| io_err("read", e))?;
            if n == 0 {
                return Err(ChannelError::protocol(CHANNEL, "connection closed by server"));
            }
            let line = String::from_utf8_lossy(trim_crlf(&raw)).into_owned();
            let literal = literal_len(&line);
            out.text.push_str(&line);

            let Some(len) = literal else {
                return Ok(out);
            };
            if len > MAX_LITERAL_LEN {
                return Err(ChannelError::protocol(
                    CHANNEL,
                    format!("literal of {len} bytes exceeds limit of {MAX_LITERAL_LEN}"),
                ));
            }
            let mut buf = vec![0u8; len];
            self.reader
                .read_exact(&mut buf)
                .map_err(|e| io_err("read literal", e))?;
            out.literals.push(buf);
        }
    }

    #[cfg(test)]
    fn stream(&self) -> &S {
        self.reader.get_ref()
    }
}

fn io_err(op: &str, e: std::io::Error) -> ChannelError {
    ChannelError::protocol(CHANNEL, format!("IMAP {op} failed: {e}"))
}

fn expect_ok(resp: &Response, what: &str) -> Result<(), ChannelError> {
    if resp.status == Status::Ok {
        Ok(())
    } else {
        Err(ChannelError::protocol(
            CHANNEL,
            format!("{what} failed ({:?}): {}", resp.status, resp.text),
        ))
    }
}

fn trim_crlf(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    raw.strip_suffix(b"\r").unwrap_or(raw)
}

/// Length of a `{n}` or `{n+}` literal announced at the end of a line.
fn literal_len(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

fn parse_status(rest: &str) -> Result<(Status, String), ChannelError> {
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        _ => {
            return Err(ChannelError::protocol(
                CHANNEL,
                format!("malformed tagged response: {rest}"),
            ));
        }
    };
    Ok((status, text.to_string()))
}

fn parse_search(untagged: &[ResponseLine]) -> Vec<u32> {
    untagged
        .iter()
        .filter_map(|line| line.text.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// Encode an IMAP quoted string.
pub fn quote(value: &str) -> Result<String, ChannelError> {
    if value.contains(['\r', '\n']) {
        return Err(ChannelError::protocol(
            CHANNEL,
            "line breaks are not allowed in IMAP strings",
        ));
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    Ok(format!("\"{escaped}\""))
}

// ── Async seam ──────────────────────────────────────────────────────

/// The mailbox operations one watch run needs.
#[async_trait]
pub trait Mailbox: Send {
    async fn search_unseen_from(&mut self, sender: &str) -> Result<Vec<u32>, ChannelError>;

    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>, ChannelError>;

    async fn mark_seen(&mut self, uid: u32) -> Result<(), ChannelError>;

    async fn mark_deleted(&mut self, uid: u32) -> Result<(), ChannelError>;

    async fn expunge(&mut self) -> Result<(), ChannelError>;

    async fn logout(&mut self) -> Result<(), ChannelError>;
}

/// [`Mailbox`] over a real TLS IMAP session.
pub struct ImapMailbox {
    session: Option<ImapSession<TlsStream>>,
}

impl ImapMailbox {
    /// Connect, log in and select `mailbox`.
    pub async fn open(
        host: &str,
        port: u16,
        username: &str,
        password: &SecretString,
        mailbox: &str,
    ) -> Result<Self, ChannelError> {
        let host = host.to_string();
        let username = username.to_string();
        let password = password.clone();
        let mailbox = mailbox.to_string();

        let session = tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::connect(&host, port)?;
            session.login(&username, &password)?;
            tracing::info!(user = %username, "Logged in");
            session.select(&mailbox)?;
            Ok::<_, ChannelError>(session)
        })
        .await
        .map_err(|e| ChannelError::protocol(CHANNEL, format!("IMAP task panicked: {e}")))??;

        Ok(Self {
            session: Some(session),
        })
    }

    /// Run a blocking session call on the blocking pool.
    async fn with_session<T, F>(&mut self, op: F) -> Result<T, ChannelError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession<TlsStream>) -> Result<T, ChannelError> + Send + 'static,
    {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| ChannelError::protocol(CHANNEL, "IMAP session is closed"))?;

        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| ChannelError::protocol(CHANNEL, format!("IMAP task panicked: {e}")))?;

        self.session = Some(session);
        result
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn search_unseen_from(&mut self, sender: &str) -> Result<Vec<u32>, ChannelError> {
        let sender = sender.to_string();
        self.with_session(move |s| s.search_unseen_from(&sender))
            .await
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>, ChannelError> {
        self.with_session(move |s| s.fetch_raw(uid)).await
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), ChannelError> {
        self.with_session(move |s| s.add_flag(uid, "\\Seen")).await
    }

    async fn mark_deleted(&mut self, uid: u32) -> Result<(), ChannelError> {
        self.with_session(move |s| s.add_flag(uid, "\\Deleted"))
            .await
    }

    async fn expunge(&mut self) -> Result<(), ChannelError> {
        self.with_session(|s| s.expunge()).await
    }

    async fn logout(&mut self) -> Result<(), ChannelError> {
        let result = self.with_session(|s| s.logout()).await;
        self.session = None;
        result
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Replays a canned server transcript and records what the client wrote.
    struct ScriptedStream {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl ScriptedStream {
        fn new(script: &[u8]) -> Self {
            Self {
                input: Cursor::new(script.to_vec()),
                written: Vec::new(),
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
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn session(script: &[u8]) -> ImapSession<ScriptedStream> {
        ImapSession::from_stream(ScriptedStream::new(script)).unwrap()
    }

    fn written(session: &ImapSession<ScriptedStream>) -> String {
        String::from_utf8_lossy(&session.stream().written).into_owned()
    }

    // ── Greeting ────────────────────────────────────────────────────

    #[test]
    fn greeting_ok_accepted() {
        session(b"* OK IMAP4rev1 ready\r\n");
    }

    #[test]
    fn greeting_bye_rejected() {
        let err = ImapSession::from_stream(ScriptedStream::new(b"* BYE go away\r\n"))
            .err()
            .unwrap();
        assert!(matches!(err, ChannelError::Protocol { .. }));
    }

    #[test]
    fn closed_connection_is_error() {
        assert!(ImapSession::from_stream(ScriptedStream::new(b"")).is_err());
    }

    // ── Login ───────────────────────────────────────────────────────

    #[test]
    fn login_sends_quoted_credentials() {
        let mut s = session(b"* OK ready\r\nA1 OK LOGIN completed\r\n");
        s.login("me@example.com", &SecretString::from("pa\"ss"))
            .unwrap();
        assert_eq!(written(&s), "A1 LOGIN \"me@example.com\" \"pa\\\"ss\"\r\n");
    }

    #[test]
    fn login_rejected_is_auth_failure() {
        let mut s = session(b"* OK ready\r\nA1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n");
        let err = s.login("me", &SecretString::from("bad")).unwrap_err();
        match err {
            ChannelError::AuthFailed { reason, .. } => {
                assert!(reason.contains("Invalid credentials"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    // ── Search ──────────────────────────────────────────────────────

    #[test]
    fn search_parses_uids() {
        let mut s = session(
            b"* OK ready\r\n\
* SEARCH 4 17 230\r\n\
A1 OK SEARCH completed\r\n",
        );
        let uids = s.search_unseen_from("facebookmail.com").unwrap();
        assert_eq!(uids, vec![4, 17, 230]);
        assert_eq!(
            written(&s),
            "A1 UID SEARCH UNSEEN HEADER From \"facebookmail.com\"\r\n"
        );
    }

    #[test]
    fn search_empty_result() {
        let mut s = session(b"* OK ready\r\n* SEARCH\r\nA1 OK done\r\n");
        assert!(s.search_unseen_from("x").unwrap().is_empty());
    }

    #[test]
    fn search_ignores_unrelated_untagged() {
        let mut s = session(b"* OK ready\r\n* 3 EXISTS\r\n* SEARCH 9\r\nA1 OK done\r\n");
        assert_eq!(s.search_unseen_from("x").unwrap(), vec![9]);
    }

    #[test]
    fn search_bad_is_error() {
        let mut s = session(b"* OK ready\r\nA1 BAD parse error\r\n");
        assert!(matches!(
            s.search_unseen_from("x"),
            Err(ChannelError::Protocol { .. })
        ));
    }

    // ── Fetch ───────────────────────────────────────────────────────

    #[test]
    fn fetch_reads_literal_exactly() {
        let body = b"Subject: hi\r\n\r\nline one\r\nA1 OK not a tag\r\n";
        let mut script = b"* OK ready\r\n".to_vec();
        script.extend_from_slice(format!("* 1 FETCH (UID 42 BODY[] {{{}}}\r\n", body.len()).as_bytes());
        script.extend_from_slice(body);
        script.extend_from_slice(b")\r\nA1 OK FETCH completed\r\n");

        let mut s = session(&script);
        let raw = s.fetch_raw(42).unwrap();
        assert_eq!(raw, body);
        assert_eq!(written(&s), "A1 UID FETCH 42 BODY.PEEK[]\r\n");
    }

    #[test]
    fn fetch_skips_flag_updates() {
        let mut script = b"* OK ready\r\n* 2 FETCH (FLAGS (\\Seen))\r\n".to_vec();
        script.extend_from_slice(b"* 1 FETCH (UID 7 BODY[] {5}\r\nhello)\r\nA1 OK done\r\n");
        let mut s = session(&script);
        assert_eq!(s.fetch_raw(7).unwrap(), b"hello");
    }

    #[test]
    fn fetch_rejects_oversized_literal() {
        let script = format!(
            "* OK ready\r\n* 1 FETCH (UID 3 BODY[] {{{}}}\r\nshort)\r\nA1 OK done\r\n",
            MAX_LITERAL_LEN + 1
        );
        let mut s = session(script.as_bytes());
        let err = s.fetch_raw(3).unwrap_err();
        assert!(matches!(err, ChannelError::Protocol { .. }));
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[test]
    fn fetch_without_body_is_error() {
        let mut s = session(b"* OK ready\r\nA1 OK no such message\r\n");
        assert!(matches!(s.fetch_raw(99), Err(ChannelError::Protocol { .. })));
    }

    // ── Store / expunge / logout ────────────────────────────────────

    #[test]
    fn flags_and_expunge_use_sequential_tags() {
        let mut s = session(
            b"* OK ready\r\n\
A1 OK STORE completed\r\n\
A2 OK STORE completed\r\n\
* 3 EXPUNGE\r\n\
A3 OK EXPUNGE completed\r\n\
* BYE logging out\r\n\
A4 OK LOGOUT completed\r\n",
        );
        s.add_flag(5, "\\Seen").unwrap();
        s.add_flag(6, "\\Deleted").unwrap();
        s.expunge().unwrap();
        s.logout().unwrap();
        assert_eq!(
            written(&s),
            "A1 UID STORE 5 +FLAGS.SILENT (\\Seen)\r\n\
A2 UID STORE 6 +FLAGS.SILENT (\\Deleted)\r\n\
A3 EXPUNGE\r\n\
A4 LOGOUT\r\n"
        );
    }

    #[test]
    fn select_no_is_error() {
        let mut s = session(b"* OK ready\r\nA1 NO Mailbox doesn't exist\r\n");
        assert!(s.select("Nope").is_err());
    }

    // ── Helpers ─────────────────────────────────────────────────────

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote(r#"a"b\c"#).unwrap(), r#""a\"b\\c""#);
    }

    #[test]
    fn quote_rejects_line_breaks() {
        assert!(quote("a\r\nA2 LOGOUT").is_err());
    }

    #[test]
    fn literal_len_detection() {
        assert_eq!(literal_len("* 1 FETCH (BODY[] {123}"), Some(123));
        assert_eq!(literal_len("* 1 FETCH (BODY[] {12+}"), Some(12));
        assert_eq!(literal_len("* OK {not a literal}"), None);
        assert_eq!(literal_len("* OK plain"), None);
    }

    #[test]
    fn parse_status_words() {
        assert_eq!(parse_status("OK done").unwrap().0, Status::Ok);
        assert_eq!(parse_status("no nope").unwrap().0, Status::No);
        assert_eq!(parse_status("BAD").unwrap().0, Status::Bad);
        assert!(parse_status("MAYBE").is_err());
    }
}
