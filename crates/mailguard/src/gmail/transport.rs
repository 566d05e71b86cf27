//! Delivery of the OAuth redirect back to the flow
//!
//! [`LoopbackTransport`] listens on an ephemeral 127.0.0.1 port and serves a
//! single callback request. [`ManualTransport`] prints the consent URL and
//! reads the redirect URL the user pastes back, for headless machines.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use log::{debug, warn};
use url::Url;

use super::auth::{AuthError, CallbackParams};

/// Path the redirect URI points at
pub const CALLBACK_PATH: &str = "/oauth2callback";

/// Redirect URI for the manual flow. Nothing listens on port 1, so the
/// browser shows a connection error and the user copies the address bar.
pub const MANUAL_REDIRECT_URI: &str = "http://127.0.0.1:1/oauth2callback";

/// How long the interactive flow waits for the browser
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Channel that delivers the authorization redirect to the flow
pub trait CallbackTransport {
    /// Get ready to receive a callback; returns the redirect URI to register
    fn prepare(&mut self) -> Result<String, AuthError>;

    /// Show `authorization_url` to the user and wait for the redirect
    fn receive(&mut self, authorization_url: &Url) -> Result<CallbackParams, AuthError>;

    /// Release any resources held for this attempt
    fn shutdown(&mut self);
}

/// Interactive transport backed by a loopback HTTP listener
pub struct LoopbackTransport {
    listener: Option<TcpListener>,
    timeout: Duration,
    open_browser: bool,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            listener: None,
            timeout: DEFAULT_CALLBACK_TIMEOUT,
            open_browser: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Skip launching a browser; the URL is still printed
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Wait for a request on the callback path, answering anything else with 404.
    /// A connection that fails or stalls is dropped and the wait goes on.
    fn wait_for_callback(&self, listener: &TcpListener) -> Result<CallbackParams, AuthError> {
        let deadline = Instant::now() + self.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AuthError::Timeout(self.timeout));
            }

            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("Accepted callback connection from {}", peer);
                    match handle_request(stream, remaining.min(REQUEST_READ_TIMEOUT)) {
                        Ok(Some(params)) => return Ok(params),
                        Ok(None) => {}
                        Err(e) => debug!("Dropped connection from {}: {}", peer, e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL.min(remaining));
                }
                Err(e) => return Err(AuthError::Listener(e)),
            }
        }
    }
}

impl CallbackTransport for LoopbackTransport {
    fn prepare(&mut self) -> Result<String, AuthError> {
        let listener = TcpListener::bind("127.0.0.1:0").map_err(AuthError::Listener)?;
        listener.set_nonblocking(true).map_err(AuthError::Listener)?;
        let port = listener.local_addr().map_err(AuthError::Listener)?.port();
        self.listener = Some(listener);

        debug!("Listening for OAuth callback on 127.0.0.1:{}", port);
        Ok(format!("http://127.0.0.1:{port}{CALLBACK_PATH}"))
    }

    fn receive(&mut self, authorization_url: &Url) -> Result<CallbackParams, AuthError> {
        let listener = self.listener.as_ref().ok_or_else(|| {
            AuthError::Listener(io::Error::new(
                io::ErrorKind::NotConnected,
                "callback listener was not prepared",
            ))
        })?;

        eprintln!("\nOpen this URL in your browser to authorize mailguard:\n");
        eprintln!("  {authorization_url}\n");
        if self.open_browser
            && let Err(e) = open::that(authorization_url.as_str())
        {
            warn!("Failed to open browser: {}. Please open the URL manually.", e);
        }
        eprintln!("Waiting for authorization...");

        self.wait_for_callback(listener)
    }

    fn shutdown(&mut self) {
        if self.listener.take().is_some() {
            debug!("Closed OAuth callback listener");
        }
    }
}

/// Serve one HTTP request. Returns the params if it hit the callback path.
fn handle_request(
    mut stream: TcpStream,
    read_timeout: Duration,
) -> Result<Option<CallbackParams>, AuthError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(read_timeout))?;

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // Drain headers so the browser sees a clean response
    let mut header = String::new();
    while reader.read_line(&mut header)? > 0 && !header.trim_end().is_empty() {
        header.clear();
    }
    drop(reader);

    // Format: GET /oauth2callback?code=AUTH_CODE&state=... HTTP/1.1
    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let url = match Url::parse(&format!("http://127.0.0.1{target}")) {
        Ok(url) => url,
        Err(e) => {
            debug!("Rejecting unparseable request target: {}", e);
            write_response(&mut stream, "400 Bad Request", "Bad request.");
            return Ok(None);
        }
    };

    if url.path() != CALLBACK_PATH {
        debug!("Ignoring request for {}", url.path());
        write_response(&mut stream, "404 Not Found", "Not found.");
        return Ok(None);
    }

    let params = CallbackParams::from_url(&url);
    if params.code.is_some() && params.error.is_none() {
        write_response(
            &mut stream,
            "200 OK",
            "Authorization received. You can close this window.",
        );
    } else {
        write_response(
            &mut stream,
            "400 Bad Request",
            "Authorization failed. Return to the terminal for details.",
        );
    }
    Ok(Some(params))
}

fn write_response(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
        status, body
    );
    stream.write_all(response.as_bytes()).ok();
}

/// Copy/paste transport for machines without a local browser
pub struct ManualTransport<R, W> {
    input: R,
    output: W,
}

impl ManualTransport<io::StdinLock<'static>, io::Stderr> {
    /// Prompt on stderr and read the pasted URL from stdin
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> ManualTransport<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> CallbackTransport for ManualTransport<R, W> {
    fn prepare(&mut self) -> Result<String, AuthError> {
        Ok(MANUAL_REDIRECT_URI.to_string())
    }

    fn receive(&mut self, authorization_url: &Url) -> Result<CallbackParams, AuthError> {
        writeln!(
            self.output,
            "\nOpen this URL in any browser to authorize mailguard:\n\n  {authorization_url}\n"
        )?;
        writeln!(
            self.output,
            "After approving, the browser will fail to load a 127.0.0.1 page.\n\
             Paste that page's full address here and press Enter:"
        )?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(AuthError::InvalidCallback(
                "no redirect URL was entered".to_string(),
            ));
        }
        CallbackParams::parse(&line)
    }

    fn shutdown(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::net::TcpStream;

    fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(stream, "GET {path} HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n").unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn port_of(redirect_uri: &str) -> u16 {
        Url::parse(redirect_uri).unwrap().port().unwrap()
    }

    fn dummy_url() -> Url {
        Url::parse("https://accounts.google.com/o/oauth2/v2/auth?x=1").unwrap()
    }

    #[test]
    fn test_loopback_ignores_other_paths() {
        let mut transport = LoopbackTransport::new()
            .without_browser()
            .with_timeout(Duration::from_secs(10));
        let redirect = transport.prepare().unwrap();
        assert!(redirect.starts_with("http://127.0.0.1:"));
        assert!(redirect.ends_with(CALLBACK_PATH));

        let port = port_of(&redirect);
        let client = std::thread::spawn(move || {
            let favicon = get(port, "/favicon.ico");
            let callback = get(port, "/oauth2callback?code=abc&state=xyz");
            (favicon, callback)
        });

        let params = transport.receive(&dummy_url()).unwrap();
        transport.shutdown();
        let (favicon, callback) = client.join().unwrap();

        assert!(favicon.starts_with("HTTP/1.1 404"));
        assert!(callback.starts_with("HTTP/1.1 200"));
        assert_eq!(params.code.as_deref(), Some("abc"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
        assert!(!transport.is_listening());
    }

    #[test]
    fn test_loopback_survives_idle_connection() {
        let mut transport = LoopbackTransport::new()
            .without_browser()
            .with_timeout(Duration::from_secs(20));
        let port = port_of(&transport.prepare().unwrap());

        let client = std::thread::spawn(move || {
            // Connects like a browser preconnect and never sends a request
            let idle = TcpStream::connect(("127.0.0.1", port)).unwrap();
            let callback = get(port, "/oauth2callback?code=abc&state=xyz");
            drop(idle);
            callback
        });

        let params = transport.receive(&dummy_url()).unwrap();
        let response = client.join().unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert_eq!(params.code.as_deref(), Some("abc"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
    }

    #[test]
    fn test_loopback_rejects_garbage_and_keeps_waiting() {
        let mut transport = LoopbackTransport::new()
            .without_browser()
            .with_timeout(Duration::from_secs(10));
        let port = port_of(&transport.prepare().unwrap());

        let client = std::thread::spawn(move || {
            // "http://127.0.0.1:99999" has an out-of-range port
            let garbage = get(port, ":99999");
            let callback = get(port, "/oauth2callback?code=abc&state=xyz");
            (garbage, callback)
        });

        let params = transport.receive(&dummy_url()).unwrap();
        let (garbage, callback) = client.join().unwrap();

        assert!(garbage.starts_with("HTTP/1.1 400"));
        assert!(callback.starts_with("HTTP/1.1 200"));
        assert_eq!(params.code.as_deref(), Some("abc"));
    }

    #[test]
    fn test_loopback_reports_error_callback() {
        let mut transport = LoopbackTransport::new()
            .without_browser()
            .with_timeout(Duration::from_secs(10));
        let port = port_of(&transport.prepare().unwrap());

        let client =
            std::thread::spawn(move || get(port, "/oauth2callback?error=access_denied&state=s"));
        let params = transport.receive(&dummy_url()).unwrap();
        let response = client.join().unwrap();

        assert!(response.starts_with("HTTP/1.1 400"));
        assert_eq!(params.error.as_deref(), Some("access_denied"));
    }

    #[test]
    fn test_loopback_times_out() {
        let mut transport = LoopbackTransport::new()
            .without_browser()
            .with_timeout(Duration::from_millis(50));
        transport.prepare().unwrap();

        let err = transport.receive(&dummy_url()).unwrap_err();
        assert!(matches!(err, AuthError::Timeout(_)));
        transport.shutdown();
        assert!(!transport.is_listening());
    }

    #[test]
    fn test_receive_without_prepare_fails() {
        let mut transport = LoopbackTransport::new().without_browser();
        assert!(matches!(
            transport.receive(&dummy_url()),
            Err(AuthError::Listener(_))
        ));
    }

    #[test]
    fn test_manual_accepts_full_url() {
        let input = Cursor::new("http://127.0.0.1:1/oauth2callback?state=s&code=c\n");
        let mut output = Vec::new();
        let mut transport = ManualTransport::new(input, &mut output);

        assert_eq!(transport.prepare().unwrap(), MANUAL_REDIRECT_URI);
        let params = transport.receive(&dummy_url()).unwrap();
        assert_eq!(params.code.as_deref(), Some("c"));
        drop(transport);

        let prompt = String::from_utf8(output).unwrap();
        assert!(prompt.contains("accounts.google.com"));
    }

    #[test]
    fn test_manual_accepts_bare_query() {
        let input = Cursor::new("state=s&code=c&scope=a\n");
        let mut transport = ManualTransport::new(input, Vec::new());
        let params = transport.receive(&dummy_url()).unwrap();

        assert_eq!(params.state.as_deref(), Some("s"));
        assert_eq!(params.scope.as_deref(), Some("a"));
    }

    #[test]
    fn test_manual_empty_input_is_error() {
        let mut transport = ManualTransport::new(Cursor::new(""), Vec::new());
        assert!(matches!(
            transport.receive(&dummy_url()),
            Err(AuthError::InvalidCallback(_))
        ));
    }
}
