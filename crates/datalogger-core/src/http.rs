//! HTTP/1.1 POST transport over an async byte stream
//!
//! Each request opens a fresh connection, writes the request with
//! `reqwless`, reads only the response head and closes the connection.
//! Anything beyond the status code is irrelevant to the commit decision.

use core::fmt::Write as _;

use embedded_io::ErrorKind;
use embedded_io_async::{Read, Write};
use log::{debug, warn};
use reqwless::headers::ContentType;
use reqwless::request::{Method, Request, RequestBuilder};
use reqwless::response::Response;
use thiserror_no_std::Error;

use crate::config::Endpoint;
use crate::uploader::{PostError, Transport};

/// Buffer for the response head.
const RESPONSE_HEAD_MAX: usize = 512;

/// Room for `host:port` in the `Host` header.
const HOST_HEADER_MAX: usize = 96;

const CLOSE_CONNECTION: &[(&str, &str)] = &[("Connection", "close")];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    #[error("Could not connect to the endpoint")]
    Connect,
    #[error("I/O error: {0:?}")]
    Io(ErrorKind),
    #[error("Response did not start with a valid HTTP status line")]
    MalformedResponse,
    #[error("Request head does not fit in its buffer")]
    RequestTooLarge,
}

/// Opens byte-stream connections to the endpoint (a TCP socket on the device)
pub trait Connector {
    type Connection<'c>: Read + Write
    where
        Self: 'c;
    type Error: core::fmt::Debug;

    fn connect(
        &mut self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<Self::Connection<'_>, Self::Error>>;
}

/// [`Transport`] that POSTs line protocol to a plain-HTTP endpoint
pub struct HttpTransport<'a, C> {
    connector: C,
    endpoint: Endpoint<'a>,
    host_header: heapless::String<HOST_HEADER_MAX>,
}

impl<'a, C: Connector> HttpTransport<'a, C> {
    pub fn new(connector: C, endpoint: Endpoint<'a>) -> Result<Self, HttpError> {
        let mut host_header = heapless::String::new();
        write!(host_header, "{}", endpoint.host).map_err(|_| HttpError::RequestTooLarge)?;
        if endpoint.port != Endpoint::DEFAULT_PORT {
            write!(host_header, ":{}", endpoint.port).map_err(|_| HttpError::RequestTooLarge)?;
        }
        Ok(Self {
            connector,
            endpoint,
            host_header,
        })
    }

    pub fn endpoint(&self) -> &Endpoint<'a> {
        &self.endpoint
    }
}

impl<C: Connector> Transport for HttpTransport<'_, C> {
    type Error = HttpError;

    async fn post(&mut self, body: &[u8]) -> Result<u16, PostError<HttpError>> {
        let request = Request::post(self.endpoint.path)
            .host(self.host_header.as_str())
            .content_type(ContentType::TextPlain)
            .headers(CLOSE_CONNECTION)
            .body(body)
            .build();

        let mut connection = self
            .connector
            .connect(self.endpoint.host, self.endpoint.port)
            .await
            .map_err(|e| {
                warn!(
                    "Failed to connect to {}:{}: {:?}",
                    self.endpoint.host, self.endpoint.port, e
                );
                PostError::Failed(HttpError::Connect)
            })?;

        request
            .write_header(&mut connection)
            .await
            .map_err(client_error)?;
        connection
            .write_all(body)
            .await
            .map_err(|e| io_error(embedded_io::Error::kind(&e)))?;
        connection
            .flush()
            .await
            .map_err(|e| io_error(embedded_io::Error::kind(&e)))?;
        debug!("Sent {} byte body to {}", body.len(), self.endpoint.path);

        let mut head = [0u8; RESPONSE_HEAD_MAX];
        let response = Response::read(&mut connection, Method::POST, &mut head)
            .await
            .map_err(client_error)?;
        Ok(response.status.0)
    }
}

/// Timeouts and interruptions are worth another attempt; everything else is not.
fn io_error(kind: ErrorKind) -> PostError<HttpError> {
    match kind {
        ErrorKind::TimedOut | ErrorKind::Interrupted => PostError::TryAgain,
        kind => PostError::Failed(HttpError::Io(kind)),
    }
}

fn client_error(e: reqwless::Error) -> PostError<HttpError> {
    match e {
        reqwless::Error::Network(kind) => io_error(kind),
        reqwless::Error::BufferTooSmall => PostError::Failed(HttpError::RequestTooLarge),
        other => {
            debug!("HTTP client error: {:?}", other);
            PostError::Failed(HttpError::MalformedResponse)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec::Vec;
    use embassy_futures::block_on;

    /// In-memory connection serving a canned response in small chunks
    struct MockConnection<'c> {
        written: &'c mut Vec<u8>,
        response: &'c [u8],
        read_error: Option<ErrorKind>,
    }

    impl embedded_io_async::ErrorType for MockConnection<'_> {
        type Error = ErrorKind;
    }

    impl Read for MockConnection<'_> {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
            if let Some(kind) = self.read_error {
                return Err(kind);
            }
            let n = buf.len().min(self.response.len()).min(5);
            buf[..n].copy_from_slice(&self.response[..n]);
            self.response = &self.response[n..];
            Ok(n)
        }
    }

    impl Write for MockConnection<'_> {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), ErrorKind> {
            Ok(())
        }
    }

    struct MockConnector {
        written: Vec<u8>,
        response: &'static [u8],
        read_error: Option<ErrorKind>,
        refuse: bool,
        connected_to: Option<(String, u16)>,
    }

    impl MockConnector {
        fn responding(response: &'static [u8]) -> Self {
            Self {
                written: Vec::new(),
                response,
                read_error: None,
                refuse: false,
                connected_to: None,
            }
        }
    }

    impl Connector for MockConnector {
        type Connection<'c> = MockConnection<'c>;
        type Error = &'static str;

        async fn connect(&mut self, host: &str, port: u16) -> Result<MockConnection<'_>, &'static str> {
            if self.refuse {
                return Err("connection refused");
            }
            self.connected_to = Some((String::from(host), port));
            self.written.clear();
            Ok(MockConnection {
                written: &mut self.written,
                response: self.response,
                read_error: self.read_error,
            })
        }
    }

    fn endpoint() -> Endpoint<'static> {
        Endpoint::parse("http://monitor.local:8086/write?db=garden").unwrap()
    }

    fn http_transport(connector: MockConnector) -> HttpTransport<'static, MockConnector> {
        HttpTransport::new(connector, endpoint()).unwrap()
    }

    #[test]
    fn test_post_writes_request_and_reads_status() {
        let connector = MockConnector::responding(b"HTTP/1.1 204 No Content\r\nDate: today\r\n\r\n");
        let mut transport = http_transport(connector);

        let body = b"environment,sensor=humidity value=48.3 1\n";
        assert_eq!(block_on(transport.post(body)), Ok(204));

        let connector = &transport.connector;
        assert_eq!(
            connector.connected_to,
            Some((String::from("monitor.local"), 8086))
        );
        let request = core::str::from_utf8(&connector.written).unwrap();
        assert!(request.starts_with("POST /write?db=garden HTTP/1.1\r\n"));
        assert!(request.contains("\r\nHost: monitor.local:8086\r\n"));
        assert!(request.contains("\r\nContent-Type: text/plain"));
        assert!(request.contains("\r\nContent-Length: 41\r\n"));
        assert!(request.contains("\r\nConnection: close\r\n"));
        assert!(request.ends_with("\r\n\r\nenvironment,sensor=humidity value=48.3 1\n"));
    }

    #[test]
    fn test_default_port_omitted_from_host() {
        let connector = MockConnector::responding(b"HTTP/1.0 400 Bad Request\r\n\r\n");
        let endpoint = Endpoint::parse("http://monitor.local/write").unwrap();
        let mut transport = HttpTransport::new(connector, endpoint).unwrap();

        assert_eq!(block_on(transport.post(b"x")), Ok(400));
        let request = core::str::from_utf8(&transport.connector.written).unwrap();
        assert!(request.contains("\r\nHost: monitor.local\r\n"));
    }

    #[test]
    fn test_oversized_host_is_rejected_up_front() {
        let url: &'static str = alloc::format!("http://{}/write", "h".repeat(200)).leak();
        let endpoint = Endpoint::parse(url).unwrap();
        assert!(matches!(
            HttpTransport::new(MockConnector::responding(b""), endpoint),
            Err(HttpError::RequestTooLarge)
        ));
    }

    #[test]
    fn test_connect_failure() {
        let mut connector = MockConnector::responding(b"");
        connector.refuse = true;
        let mut transport = http_transport(connector);

        assert_eq!(
            block_on(transport.post(b"x")),
            Err(PostError::Failed(HttpError::Connect))
        );
    }

    #[test]
    fn test_timeout_asks_to_try_again() {
        let mut connector = MockConnector::responding(b"");
        connector.read_error = Some(ErrorKind::TimedOut);
        let mut transport = http_transport(connector);
        assert_eq!(block_on(transport.post(b"x")), Err(PostError::TryAgain));
    }

    #[test]
    fn test_reset_is_a_failure() {
        let mut connector = MockConnector::responding(b"");
        connector.read_error = Some(ErrorKind::ConnectionReset);
        let mut transport = http_transport(connector);
        assert_eq!(
            block_on(transport.post(b"x")),
            Err(PostError::Failed(HttpError::Io(ErrorKind::ConnectionReset)))
        );
    }

    #[test]
    fn test_garbage_response() {
        let connector = MockConnector::responding(b"SSH-2.0-OpenSSH_9.6\r\n\r\n");
        let mut transport = http_transport(connector);
        assert_eq!(
            block_on(transport.post(b"x")),
            Err(PostError::Failed(HttpError::MalformedResponse))
        );

        // Peer closes without answering
        let connector = MockConnector::responding(b"");
        let mut transport = http_transport(connector);
        assert!(matches!(
            block_on(transport.post(b"x")),
            Err(PostError::Failed(_))
        ));
    }

    #[test]
    fn test_io_error_mapping() {
        assert_eq!(io_error(ErrorKind::TimedOut), PostError::TryAgain);
        assert_eq!(io_error(ErrorKind::Interrupted), PostError::TryAgain);
        assert_eq!(
            io_error(ErrorKind::BrokenPipe),
            PostError::Failed(HttpError::Io(ErrorKind::BrokenPipe))
        );
        assert_eq!(
            client_error(reqwless::Error::Network(ErrorKind::TimedOut)),
            PostError::TryAgain
        );
        assert_eq!(
            client_error(reqwless::Error::Codec),
            PostError::Failed(HttpError::MalformedResponse)
        );
    }
}
