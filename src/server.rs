//! TCP/TLS front end
//!
//! One worker thread per accepted connection. A worker reads a PDU,
//! parses the envelope, dispatches it and writes the response PDUs, in a
//! loop until the client unbinds, the read deadline passes or the
//! connection dies. Writes to a slow client block only that client's
//! worker; there is no shared write queue.

use crate::ber_writer::BerWriter;
use crate::handler::{disconnection_notice, Disposition, Handler, ResponseSink, SessionState};
use crate::ldap::{ProtocolOpTag, ResultCode};
use crate::ldap_parser::parse_message;
use crate::ldap_writer::write_message;
use log::{debug, error, info, warn};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Hard cap on a single PDU; anything larger is hostile or broken
const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// A plaintext or TLS-wrapped client connection
enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl Stream {
    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        let timeout = (!timeout.is_zero()).then_some(timeout);
        match self {
            Stream::Plain(s) => s.set_read_timeout(timeout),
            Stream::Tls(s) => s.sock.set_read_timeout(timeout),
        }
    }

    fn is_tls(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// Encodes one message at a time into a reused buffer and writes it out
struct StreamSink<'a> {
    stream: &'a mut Stream,
    writer: BerWriter,
}

impl ResponseSink for StreamSink<'_> {
    fn send(&mut self, msg: &crate::ldap::LdapMessage<'_>) -> io::Result<()> {
        self.writer.reset();
        write_message(&mut self.writer, msg);
        self.stream.write_all(self.writer.as_bytes())?;
        self.stream.flush()
    }
}

#[derive(Debug)]
pub struct Server {
    handler: Arc<Handler>,
    read_timeout: Duration,
}

impl Server {
    pub fn new(handler: Arc<Handler>, read_timeout: Duration) -> Self {
        Server {
            handler,
            read_timeout,
        }
    }

    /// Accept loop for plaintext LDAP; blocks the calling thread
    pub fn serve_plaintext(&self, listener: TcpListener) -> io::Result<()> {
        info!("listening on ldap://{}", listener.local_addr()?);
        loop {
            let (socket, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };
            let handler = self.handler.clone();
            let read_timeout = self.read_timeout;
            thread::spawn(move || {
                serve_connection(handler, Stream::Plain(socket), peer, read_timeout);
            });
        }
    }

    /// Accept loop for LDAPS; blocks the calling thread
    pub fn serve_tls(&self, listener: TcpListener, tls: Arc<ServerConfig>) -> io::Result<()> {
        info!("listening on ldaps://{}", listener.local_addr()?);
        loop {
            let (socket, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };
            let handler = self.handler.clone();
            let read_timeout = self.read_timeout;
            let tls = tls.clone();
            thread::spawn(move || match ServerConnection::new(tls) {
                Ok(conn) => {
                    let stream = Stream::Tls(Box::new(StreamOwned::new(conn, socket)));
                    serve_connection(handler, stream, peer, read_timeout);
                }
                Err(e) => warn!("TLS session setup failed for {}: {}", peer, e),
            });
        }
    }
}

fn serve_connection(
    handler: Arc<Handler>,
    mut stream: Stream,
    peer: SocketAddr,
    read_timeout: Duration,
) {
    if let Err(e) = stream.set_read_timeout(read_timeout) {
        warn!("cannot set read deadline for {}: {}", peer, e);
        return;
    }
    debug!(
        "connection from {}{}",
        peer,
        if stream.is_tls() { " (tls)" } else { "" }
    );
    let mut session = SessionState::new(stream.is_tls());
    loop {
        let mut pdu = match read_pdu(&mut stream) {
            Ok(Some(pdu)) => pdu,
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                debug!("read deadline for {} passed, closing", peer);
                break;
            }
            Err(e) => {
                debug!("read from {} failed: {}", peer, e);
                break;
            }
        };
        let outcome = {
            let mut sink = StreamSink {
                stream: &mut stream,
                writer: BerWriter::with_capacity(256),
            };
            let raw = match parse_message(&pdu) {
                Ok(raw) => raw,
                Err(e) => {
                    // BER is not self-synchronizing: a broken PDU poisons
                    // the whole stream, so notify and close
                    warn!(
                        "malformed PDU from {} (offset {:?}): {}",
                        peer,
                        e.offset(),
                        e
                    );
                    let _ = sink.send(&disconnection_notice(
                        ResultCode::ProtocolError,
                        "malformed PDU",
                    ));
                    break;
                }
            };
            let is_bind = raw.op.tag == ProtocolOpTag::BindRequest;
            (handler.handle(&mut session, &raw, &mut sink), is_bind)
        };
        let (disposition, is_bind) = outcome;
        if is_bind {
            // simple-bind credentials live in this buffer
            pdu.fill(0);
        }
        match disposition {
            Ok(Disposition::Continue) => {}
            Ok(Disposition::Close) => break,
            Ok(Disposition::Fatal) => {
                error!("fatal backend state, node refuses further service");
                std::process::exit(1);
            }
            Err(e) => {
                debug!("write to {} failed: {}", peer, e);
                break;
            }
        }
    }
    debug!("connection from {} closed", peer);
}

/// Read exactly one BER TLV from the stream
///
/// The outer header is decoded incrementally to learn the message length,
/// then the content is read in full. Returns Ok(None) on a clean close
/// before the first byte.
fn read_pdu(stream: &mut Stream) -> io::Result<Option<Vec<u8>>> {
    let mut first = [0u8; 1];
    if stream.read(&mut first)? == 0 {
        return Ok(None);
    }
    let mut header = vec![first[0]];
    let mut len_first = [0u8; 1];
    stream.read_exact(&mut len_first)?;
    header.push(len_first[0]);
    let content_len = if len_first[0] & 0x80 == 0 {
        len_first[0] as usize
    } else {
        let count = (len_first[0] & 0x7f) as usize;
        if count == 0 || count > 8 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsupported message length encoding",
            ));
        }
        let mut len_bytes = vec![0u8; count];
        stream.read_exact(&mut len_bytes)?;
        header.extend_from_slice(&len_bytes);
        len_bytes.iter().fold(0usize, |len, &b| (len << 8) | b as usize)
    };
    if content_len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "message exceeds size limit",
        ));
    }
    let mut pdu = header;
    let at = pdu.len();
    pdu.resize(at + content_len, 0);
    stream.read_exact(&mut pdu[at..])?;
    Ok(Some(pdu))
}

/// Build the TLS acceptor from PEM cert chain + private key files
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> io::Result<Arc<ServerConfig>> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key in key file"))?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, Entry, MemoryBackend};
    use crate::handler::SimpleBindHandler;
    use crate::ldap::*;
    use crate::ldap_writer::message_to_bytes;
    use crate::raft_log::{RaftLog, LOG_FILE_NAME};
    use crate::replication::LocalReplicator;
    use std::borrow::Cow;

    fn start_server() -> (tempfile::TempDir, SocketAddr) {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(RaftLog::open(&dir.path().join(LOG_FILE_NAME)).unwrap());
        let backend = Arc::new(MemoryBackend::new());
        let mut seed = Entry::new("dc=example,dc=com");
        seed.set_attribute("objectClass", vec![b"domain".to_vec()]);
        backend.apply_put(0, "dc=example,dc=com", seed).unwrap();
        let replicator = Arc::new(LocalReplicator::new(log, backend.clone()));
        let binds = Arc::new(SimpleBindHandler::new(
            backend.clone(),
            "cn=admin",
            &b"secret"[..],
            true,
        ));
        let handler = Arc::new(Handler::new(
            backend,
            binds,
            replicator,
            Duration::from_secs(5),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(handler, Duration::from_secs(10));
        thread::spawn(move || {
            let _ = server.serve_plaintext(listener);
        });
        (dir, addr)
    }

    fn exchange(stream: &mut TcpStream, msg: &LdapMessage<'_>) -> Vec<u8> {
        stream.write_all(&message_to_bytes(msg)).unwrap();
        read_one(stream)
    }

    fn read_one(stream: &mut TcpStream) -> Vec<u8> {
        let mut plain = Stream::Plain(stream.try_clone().unwrap());
        read_pdu(&mut plain).unwrap().expect("server closed early")
    }

    #[test]
    fn test_end_to_end_session() {
        let (_dir, addr) = start_server();
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        // anonymous bind
        let response = exchange(
            &mut client,
            &LdapMessage::new(
                MessageID(1),
                ProtocolOp::BindRequest(BindRequest {
                    version: 3,
                    name: LdapDN(Cow::Borrowed("")),
                    authentication: AuthenticationChoice::Simple(Cow::Borrowed(b"")),
                }),
            ),
        );
        let parsed = LdapMessage::parse(&response).unwrap();
        assert_eq!(parsed.message_id, MessageID(1));
        assert_eq!(
            parsed.protocol_op.result().unwrap().result_code,
            ResultCode::Success
        );

        // add an entry
        let response = exchange(
            &mut client,
            &LdapMessage::new(
                MessageID(2),
                ProtocolOp::AddRequest(AddRequest {
                    entry: LdapDN(Cow::Borrowed("cn=bob,dc=example,dc=com")),
                    attributes: vec![crate::filter::Attribute {
                        attr_type: LdapString(Cow::Borrowed("cn")),
                        attr_vals: vec![crate::filter::AttributeValue(Cow::Borrowed(b"bob"))],
                    }],
                }),
            ),
        );
        assert_eq!(
            LdapMessage::parse(&response)
                .unwrap()
                .protocol_op
                .result()
                .unwrap()
                .result_code,
            ResultCode::Success
        );

        // search it back: one entry, then done
        client
            .write_all(&message_to_bytes(&LdapMessage::new(
                MessageID(3),
                ProtocolOp::SearchRequest(SearchRequest {
                    base_object: LdapDN(Cow::Borrowed("dc=example,dc=com")),
                    scope: SearchScope::WholeSubtree,
                    deref_aliases: DerefAliases::NeverDerefAliases,
                    size_limit: 0,
                    time_limit: 0,
                    types_only: false,
                    filter: crate::filter::Filter::EqualityMatch(
                        crate::filter::AttributeValueAssertion {
                            attribute_desc: LdapString(Cow::Borrowed("cn")),
                            assertion_value: Cow::Borrowed(b"bob"),
                        },
                    ),
                    attributes: vec![],
                }),
            )))
            .unwrap();
        let entry = read_one(&mut client);
        let entry = LdapMessage::parse(&entry).unwrap();
        match &entry.protocol_op {
            ProtocolOp::SearchResultEntry(e) => {
                assert_eq!(&e.object_name.0, "cn=bob,dc=example,dc=com");
            }
            op => panic!("unexpected {:?}", op.tag()),
        }
        let done = read_one(&mut client);
        assert_eq!(
            LdapMessage::parse(&done)
                .unwrap()
                .protocol_op
                .result()
                .unwrap()
                .result_code,
            ResultCode::Success
        );

        // unbind closes the connection
        client
            .write_all(&message_to_bytes(&LdapMessage::new(
                MessageID(4),
                ProtocolOp::UnbindRequest,
            )))
            .unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_malformed_pdu_gets_disconnection_notice() {
        let (_dir, addr) = start_server();
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        // valid framing, garbage inside: sequence containing a boolean
        client.write_all(&[0x30, 0x03, 0x01, 0x01, 0x00]).unwrap();
        let response = read_one(&mut client);
        let msg = LdapMessage::parse(&response).unwrap();
        assert_eq!(msg.message_id, MessageID(0));
        match &msg.protocol_op {
            ProtocolOp::ExtendedResponse(resp) => {
                assert_eq!(resp.result.result_code, ResultCode::ProtocolError);
                assert_eq!(
                    resp.response_name.as_ref().map(|o| o.0.as_ref()),
                    Some(crate::handler::NOTICE_OF_DISCONNECTION_OID)
                );
            }
            op => panic!("unexpected {:?}", op.tag()),
        }
        // then the connection is gone
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
    }
}
