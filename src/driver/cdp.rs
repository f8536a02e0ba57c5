//! Live browser driver over the Chrome DevTools Protocol.
//!
//! Chrome is started with a persistent profile and `--remote-debugging-port=0`; the
//! chosen port is read back from `DevToolsActivePort` in the profile directory. All
//! page commands go through one flattened target session on a single WebSocket.
//! Elements are addressed by a token attribute stamped onto them at query time, so a
//! handle stays valid for as long as the node stays in the document.

use super::PageDriver;
use crate::config::BrowserConfig;
use crate::error::DriverError;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TAG_ATTRIBUTE: &str = "data-follower-sweep";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct CdpRequest<'a> {
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CdpMessage {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<CdpFault>,
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CdpFault {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BrowserVersion {
    #[serde(rename = "Browser")]
    browser: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// One WebSocket to the browser; commands are strictly sequential
struct CdpConnection {
    socket: Socket,
    next_id: u64,
}

impl CdpConnection {
    async fn connect(ws_url: &str) -> Result<Self, DriverError> {
        let (socket, _) = connect_async(ws_url)
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("DevTools connection failed: {e}")))?;
        Ok(Self { socket, next_id: 1 })
    }

    async fn call(
        &mut self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value, DriverError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = serde_json::to_string(&CdpRequest {
            id,
            method,
            params,
            session_id,
        })
        .map_err(|e| DriverError::Protocol(e.to_string()))?;
        trace!("CDP send: {}", request);

        self.socket
            .send(Message::Text(request))
            .await
            .map_err(|e| DriverError::Protocol(format!("{method}: {e}")))?;

        tokio::time::timeout(COMMAND_TIMEOUT, self.read_response(id, method))
            .await
            .map_err(|_| DriverError::timeout(method, COMMAND_TIMEOUT))?
    }

    async fn read_response(&mut self, id: u64, method: &str) -> Result<Value, DriverError> {
        while let Some(frame) = self.socket.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => return Err(DriverError::SessionClosed),
                Ok(_) => continue,
                Err(e) => return Err(DriverError::Protocol(format!("{method}: {e}"))),
            };

            let message: CdpMessage = match serde_json::from_str(&text) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Unparseable DevTools message: {}", e);
                    continue;
                }
            };

            if message.id != Some(id) {
                if let Some(event) = message.method {
                    trace!("CDP event: {}", event);
                }
                continue;
            }

            return match message.error {
                Some(fault) => Err(DriverError::Protocol(format!(
                    "{method}: {} ({})",
                    fault.message, fault.code
                ))),
                None => Ok(message.result.unwrap_or(Value::Null)),
            };
        }
        Err(DriverError::SessionClosed)
    }
}

/// Handle to a stamped DOM node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdpElement(String);

impl CdpElement {
    fn selector(&self) -> String {
        format!("[{TAG_ATTRIBUTE}=\"{}\"]", self.0)
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn query_script(scope: Option<&CdpElement>, selector: &str) -> String {
    let root = match scope {
        Some(element) => format!("document.querySelector({})", js_string(&element.selector())),
        None => "document".to_string(),
    };
    format!(
        r#"(() => {{
  const root = {root};
  if (!root) return null;
  window.__followerSweepNext = window.__followerSweepNext || 0;
  return Array.from(root.querySelectorAll({selector})).map((el) => {{
    if (!el.hasAttribute('{TAG_ATTRIBUTE}')) {{
      window.__followerSweepNext += 1;
      el.setAttribute('{TAG_ATTRIBUTE}', Math.floor(performance.timeOrigin) + '-' + window.__followerSweepNext);
    }}
    return el.getAttribute('{TAG_ATTRIBUTE}');
  }});
}})()"#,
        selector = js_string(selector),
    )
}

fn element_script(element: &CdpElement, body: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({});
  if (!el) throw new Error('stale element');
  {body}
}})()"#,
        js_string(&element.selector())
    )
}

/// First line of `DevToolsActivePort` is the debugging port
fn parse_active_port(contents: &str) -> Option<u16> {
    contents.lines().next()?.trim().parse().ok()
}

/// Well-known Chrome/Chromium locations, then `PATH`
pub fn find_chrome() -> Option<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    };

    if let Some(found) = candidates.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Some(found);
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser", "chrome"]
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

/// The page the session drives
pub struct CdpPage {
    connection: Mutex<CdpConnection>,
    session_id: String,
    slow_mo: Duration,
    navigation_timeout: Duration,
}

impl CdpPage {
    fn new(connection: CdpConnection, session_id: String, slow_mo: Duration, navigation_timeout: Duration) -> Self {
        Self {
            connection: Mutex::new(connection),
            session_id,
            slow_mo,
            navigation_timeout,
        }
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, DriverError> {
        self.connection
            .lock()
            .await
            .call(method, params, Some(&self.session_id))
            .await
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, DriverError> {
        let result = self
            .call(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let description = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("unknown script error");
            if description.contains("stale element") {
                return Err(DriverError::ElementNotFound {
                    selector: "stale element handle".to_string(),
                });
            }
            return Err(DriverError::Evaluation(description.to_string()));
        }

        Ok(result["result"]["value"].clone())
    }

    async fn settle(&self) {
        if !self.slow_mo.is_zero() {
            tokio::time::sleep(self.slow_mo).await;
        }
    }

    async fn query(&self, scope: Option<&CdpElement>, selector: &str) -> Result<Vec<CdpElement>, DriverError> {
        let value = self.evaluate(&query_script(scope, selector)).await?;
        match value {
            Value::Array(tokens) => Ok(tokens
                .into_iter()
                .filter_map(|token| token.as_str().map(|t| CdpElement(t.to_string())))
                .collect()),
            Value::Null if scope.is_some() => Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            }),
            _ => Ok(Vec::new()),
        }
    }

    async fn wait_until_ready(&self) -> Result<(), DriverError> {
        let started = Instant::now();
        loop {
            // The execution context is replaced mid-navigation; treat failures as not ready
            if let Ok(state) = self.evaluate("document.readyState").await {
                if matches!(state.as_str(), Some("interactive" | "complete")) {
                    return Ok(());
                }
            }
            if started.elapsed() >= self.navigation_timeout {
                return Err(DriverError::timeout("document ready", self.navigation_timeout));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn mouse_click(&self, x: f64, y: f64) -> Result<(), DriverError> {
        for event in ["mouseMoved", "mousePressed", "mouseReleased"] {
            self.call(
                "Input.dispatchMouseEvent",
                Some(json!({
                    "type": event,
                    "x": x,
                    "y": y,
                    "button": "left",
                    "clickCount": 1,
                })),
            )
            .await?;
        }
        Ok(())
    }
}

impl PageDriver for CdpPage {
    type Element = CdpElement;

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let result = self.call("Page.navigate", Some(json!({ "url": url }))).await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            return Err(DriverError::Protocol(format!("navigation to {url} failed: {error}")));
        }
        self.wait_until_ready().await?;
        debug!("Navigated to {}", url);
        Ok(())
    }

    async fn reload(&self) -> Result<(), DriverError> {
        self.call("Page.reload", Some(json!({}))).await?;
        self.wait_until_ready().await
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<CdpElement>, DriverError> {
        self.query(None, selector).await
    }

    async fn query_all_within(
        &self,
        scope: &CdpElement,
        selector: &str,
    ) -> Result<Vec<CdpElement>, DriverError> {
        self.query(Some(scope), selector).await
    }

    async fn text(&self, element: &CdpElement) -> Result<String, DriverError> {
        let value = self
            .evaluate(&element_script(element, "return el.innerText || el.textContent || '';"))
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(&self, element: &CdpElement, name: &str) -> Result<Option<String>, DriverError> {
        let body = format!("return el.getAttribute({});", js_string(name));
        let value = self.evaluate(&element_script(element, &body)).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click(&self, element: &CdpElement) -> Result<(), DriverError> {
        let rect = self
            .evaluate(&element_script(
                element,
                "el.scrollIntoView({block: 'center', inline: 'nearest'});
  const r = el.getBoundingClientRect();
  return {x: r.left + r.width / 2, y: r.top + r.height / 2, w: r.width, h: r.height};",
            ))
            .await?;

        let (x, y) = (rect["x"].as_f64(), rect["y"].as_f64());
        let visible = rect["w"].as_f64().unwrap_or(0.0) > 0.0 && rect["h"].as_f64().unwrap_or(0.0) > 0.0;
        match (x, y) {
            (Some(x), Some(y)) if visible => self.mouse_click(x, y).await?,
            _ => {
                self.evaluate(&element_script(element, "el.click(); return true;"))
                    .await?;
            }
        }
        self.settle().await;
        Ok(())
    }

    async fn scroll_into_view(&self, element: &CdpElement) -> Result<(), DriverError> {
        self.evaluate(&element_script(
            element,
            "el.scrollIntoView({block: 'center', inline: 'nearest'}); return true;",
        ))
        .await?;
        self.settle().await;
        Ok(())
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<(), DriverError> {
        self.evaluate(&format!("window.scrollBy(0, {delta_y})")).await?;
        self.settle().await;
        Ok(())
    }

    async fn scroll_to_top(&self) -> Result<(), DriverError> {
        self.evaluate("window.scrollTo(0, 0)").await?;
        self.settle().await;
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        self.evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await?;
        self.settle().await;
        Ok(())
    }

    async fn scroll_height(&self) -> Result<i64, DriverError> {
        let value = self.evaluate("document.body.scrollHeight").await?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|h| h as i64))
            .ok_or_else(|| DriverError::Evaluation(format!("unexpected scroll height: {value}")))
    }

    async fn press_escape(&self) -> Result<(), DriverError> {
        for kind in ["keyDown", "keyUp"] {
            self.call(
                "Input.dispatchKeyEvent",
                Some(json!({
                    "type": kind,
                    "key": "Escape",
                    "code": "Escape",
                    "windowsVirtualKeyCode": 27,
                    "nativeVirtualKeyCode": 27,
                })),
            )
            .await?;
        }
        self.settle().await;
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        let result = self
            .call(
                "Page.captureScreenshot",
                Some(json!({
                    "format": "png",
                    "captureBeyondViewport": true,
                })),
            )
            .await?;

        let data = result["data"]
            .as_str()
            .ok_or_else(|| DriverError::Screenshot("response carried no image data".to_string()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| DriverError::Screenshot(e.to_string()))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| DriverError::Screenshot(format!("{}: {e}", path.display())))
    }
}

/// A Chrome process with a persistent profile and the page attached to it
pub struct ChromeSession {
    config: BrowserConfig,
    headless: bool,
    child: Option<Child>,
    page: CdpPage,
}

impl ChromeSession {
    pub async fn launch(config: &BrowserConfig, headless: bool) -> Result<Self, DriverError> {
        let executable = config
            .executable
            .clone()
            .or_else(find_chrome)
            .ok_or_else(|| {
                DriverError::LaunchFailed(
                    "no Chrome or Chromium executable found; set browser.executable".to_string(),
                )
            })?;

        tokio::fs::create_dir_all(&config.user_data_dir)
            .await
            .map_err(|e| {
                DriverError::LaunchFailed(format!(
                    "cannot create profile directory {}: {e}",
                    config.user_data_dir.display()
                ))
            })?;

        let port_file = config.user_data_dir.join("DevToolsActivePort");
        // A stale file from a previous run would point at a dead port
        let _ = tokio::fs::remove_file(&port_file).await;

        info!(
            "Launching {} ({}) with profile {}",
            executable.display(),
            if headless { "headless" } else { "headful" },
            config.user_data_dir.display()
        );

        let mut command = Command::new(&executable);
        command
            .arg("--remote-debugging-port=0")
            .arg(format!("--user-data-dir={}", config.user_data_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("about:blank")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if headless {
            command.arg("--headless=new");
        }
        if let (Some(width), Some(height)) = (config.window_width, config.window_height) {
            command.arg(format!("--window-size={width},{height}"));
        }

        let mut child = command
            .spawn()
            .map_err(|e| DriverError::LaunchFailed(format!("{}: {e}", executable.display())))?;

        let launch_timeout = Duration::from_secs(config.launch_timeout_secs);
        let port = match Self::wait_for_port(&port_file, launch_timeout).await {
            Ok(port) => port,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e);
            }
        };

        match Self::attach(config, port).await {
            Ok(page) => Ok(Self {
                config: config.clone(),
                headless,
                child: Some(child),
                page,
            }),
            Err(e) => {
                let _ = child.kill().await;
                Err(e)
            }
        }
    }

    async fn wait_for_port(port_file: &Path, timeout: Duration) -> Result<u16, DriverError> {
        let started = Instant::now();
        loop {
            if let Ok(contents) = tokio::fs::read_to_string(port_file).await {
                if let Some(port) = parse_active_port(&contents) {
                    debug!("DevTools listening on port {}", port);
                    return Ok(port);
                }
            }
            if started.elapsed() >= timeout {
                return Err(DriverError::LaunchFailed(format!(
                    "browser did not open a DevTools port within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn attach(config: &BrowserConfig, port: u16) -> Result<CdpPage, DriverError> {
        let version: BrowserVersion = reqwest::get(format!("http://127.0.0.1:{port}/json/version"))
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("DevTools endpoint unavailable: {e}")))?
            .json()
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("DevTools version response: {e}")))?;
        info!("Connected to {}", version.browser);

        let mut connection = CdpConnection::connect(&version.web_socket_debugger_url).await?;

        let targets = connection.call("Target.getTargets", None, None).await?;
        let existing = targets["targetInfos"]
            .as_array()
            .and_then(|infos| infos.iter().find(|info| info["type"] == "page"))
            .and_then(|info| info["targetId"].as_str())
            .map(str::to_string);
        let target_id = match existing {
            Some(id) => id,
            None => connection
                .call("Target.createTarget", Some(json!({ "url": "about:blank" })), None)
                .await?["targetId"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| DriverError::Protocol("createTarget returned no targetId".to_string()))?,
        };

        let attached = connection
            .call(
                "Target.attachToTarget",
                Some(json!({ "targetId": target_id, "flatten": true })),
                None,
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| DriverError::Protocol("attachToTarget returned no sessionId".to_string()))?
            .to_string();

        connection.call("Page.enable", None, Some(&session_id)).await?;
        if let (Some(width), Some(height)) = (config.window_width, config.window_height) {
            connection
                .call(
                    "Emulation.setDeviceMetricsOverride",
                    Some(json!({
                        "width": width,
                        "height": height,
                        "deviceScaleFactor": 1,
                        "mobile": false,
                    })),
                    Some(&session_id),
                )
                .await?;
        }

        Ok(CdpPage::new(
            connection,
            session_id,
            Duration::from_millis(config.slow_mo_ms),
            Duration::from_secs(config.navigation_timeout_secs),
        ))
    }

    pub fn page(&self) -> &CdpPage {
        &self.page
    }

    pub fn is_headless(&self) -> bool {
        self.headless
    }

    /// Close this browser and start a headless one on the same profile
    pub async fn relaunch_headless(&mut self) -> Result<(), DriverError> {
        info!("Switching to headless browser");
        self.close().await;
        let relaunched = Self::launch(&self.config, true).await?;
        *self = relaunched;
        Ok(())
    }

    /// Shut the browser down. Safe to call more than once.
    pub async fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Err(e) = self
            .page
            .connection
            .lock()
            .await
            .call("Browser.close", None, None)
            .await
        {
            debug!("Browser.close failed: {}", e);
        }

        match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!("Browser exited with {}", status),
            _ => {
                warn!("Browser did not exit in time, killing it");
                let _ = child.kill().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Answers each request with the next canned result, preceded by a noise event
    async fn spawn_mock_devtools(results: Vec<Value>) -> (String, tokio::task::JoinHandle<Vec<Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut seen = Vec::new();

            for result in results {
                let Some(Ok(Message::Text(text))) = ws.next().await else {
                    break;
                };
                let request: Value = serde_json::from_str(&text).unwrap();
                let id = request["id"].clone();
                seen.push(request);

                let event = json!({"method": "Page.frameNavigated", "params": {}});
                ws.send(Message::Text(event.to_string())).await.unwrap();

                let reply = if result.get("error").is_some() {
                    json!({"id": id, "error": result["error"]})
                } else {
                    json!({"id": id, "result": result})
                };
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
            seen
        });

        (url, handle)
    }

    async fn connect_page(url: &str) -> CdpPage {
        let connection = CdpConnection::connect(url).await.unwrap();
        CdpPage::new(connection, "session-1".to_string(), Duration::ZERO, Duration::from_secs(1))
    }

    #[test]
    fn test_parse_active_port() {
        assert_eq!(parse_active_port("9222\n/devtools/browser/abc\n"), Some(9222));
        assert_eq!(parse_active_port(""), None);
        assert_eq!(parse_active_port("not-a-port"), None);
    }

    #[test]
    fn test_scripts_escape_selectors() {
        let script = query_script(None, r#"[data-testid="UserCell"]"#);
        assert!(script.contains(r#"querySelectorAll("[data-testid=\"UserCell\"]")"#));
        assert!(script.contains("const root = document;"));

        let element = CdpElement("1700000000000-7".to_string());
        let scoped = query_script(Some(&element), "a");
        assert!(scoped.contains(r#"[data-follower-sweep=\"1700000000000-7\"]"#));

        let body = element_script(&element, "return 1;");
        assert!(body.contains("throw new Error('stale element')"));
    }

    #[tokio::test]
    async fn test_evaluate_skips_events_and_reads_value() {
        let (url, server) = spawn_mock_devtools(vec![
            json!({"result": {"type": "number", "value": 2400}}),
            json!({"result": {"type": "object", "value": ["1-1", "1-2"]}}),
        ])
        .await;
        let page = connect_page(&url).await;

        assert_eq!(page.scroll_height().await.unwrap(), 2400);
        let cells = page.query_all(r#"[data-testid="UserCell"]"#).await.unwrap();
        assert_eq!(cells, vec![CdpElement("1-1".to_string()), CdpElement("1-2".to_string())]);

        let seen = server.await.unwrap();
        assert_eq!(seen[0]["method"], "Runtime.evaluate");
        assert_eq!(seen[0]["sessionId"], "session-1");
        assert_eq!(seen[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_protocol_error_and_exception_mapping() {
        let (url, server) = spawn_mock_devtools(vec![
            json!({"error": {"code": -32000, "message": "Cannot navigate to invalid URL"}}),
            json!({
                "result": {"type": "object"},
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": {"description": "Error: stale element"}
                }
            }),
        ])
        .await;
        let page = connect_page(&url).await;

        let nav = page.navigate("nonsense").await;
        assert!(matches!(nav, Err(DriverError::Protocol(message)) if message.contains("invalid URL")));

        let text = page.text(&CdpElement("gone".to_string())).await;
        assert!(matches!(text, Err(DriverError::ElementNotFound { .. })));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_socket_reports_session_closed() {
        let (url, server) = spawn_mock_devtools(Vec::new()).await;
        let page = connect_page(&url).await;
        server.await.unwrap();

        let result = page.scroll_height().await;
        assert!(matches!(
            result,
            Err(DriverError::SessionClosed) | Err(DriverError::Protocol(_))
        ));
    }
}
