//! Chrome engine over the DevTools protocol

use super::{
    first_matching, BrowserEngine, BrowserLauncher, LaunchOptions, ObservedResponse, PageRequest,
    RequestMatcher,
};
use crate::error::FetchError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as ChromeBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
    FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

const SELECTOR_TIMEOUT: Duration = Duration::from_secs(30);
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const BODY_ATTEMPTS: usize = 20;

/// Launches headless Chrome, or connects to a running instance
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeLauncher;

impl ChromeLauncher {
    /// Create a launcher
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn BrowserEngine>, FetchError> {
        let (browser, mut handler) = match &options.endpoint {
            Some(endpoint) => {
                debug!(endpoint = %endpoint, "Connecting to browser");
                ChromeBrowser::connect(endpoint.clone())
                    .await
                    .map_err(cdp_error)?
            }
            None => {
                let mut args = vec!["--disable-gpu".to_string()];
                if let Some(proxy) = &options.proxy {
                    args.push(format!("--proxy-server={}", proxy.url()));
                }
                let config = BrowserConfig::builder()
                    .no_sandbox()
                    .args(args)
                    .build()
                    .map_err(FetchError::Browser)?;
                debug!("Launching headless browser");
                ChromeBrowser::launch(config).await.map_err(cdp_error)?
            }
        };

        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Arc::new(ChromeEngine {
            browser: Mutex::new(browser),
            handler_task,
            owned: options.endpoint.is_none(),
        }))
    }
}

struct ChromeEngine {
    browser: Mutex<ChromeBrowser>,
    handler_task: JoinHandle<()>,
    // Connected browsers are left running on close
    owned: bool,
}

impl ChromeEngine {
    async fn open_page(
        &self,
        request: &PageRequest,
    ) -> Result<(Page, Vec<JoinHandle<()>>), FetchError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(cdp_error)?;

        if let Some(user_agent) = &request.user_agent {
            page.execute(SetUserAgentOverrideParams::new(user_agent.clone()))
                .await
                .map_err(cdp_error)?;
        }

        let mut tasks = Vec::new();

        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(cdp_error)?;
        let intercept_page = page.clone();
        let filter = request.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let request_id = event.request_id.clone();
                let outcome = if filter.blocks(event.resource_type.as_ref()) {
                    intercept_page
                        .execute(FailRequestParams::new(request_id, ErrorReason::BlockedByClient))
                        .await
                        .map(|_| ())
                } else {
                    intercept_page
                        .execute(ContinueRequestParams::new(request_id))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = outcome {
                    debug!(error = %e, "Request interception failed");
                }
            }
        }));

        if let Some((username, password)) = request.proxy_credentials.clone() {
            let mut challenges = page
                .event_listener::<EventAuthRequired>()
                .await
                .map_err(cdp_error)?;
            let auth_page = page.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = challenges.next().await {
                    let response = AuthChallengeResponse {
                        response: AuthChallengeResponseResponse::ProvideCredentials,
                        username: Some(username.clone()),
                        password: Some(password.clone()),
                    };
                    if let Err(e) = auth_page
                        .execute(ContinueWithAuthParams::new(event.request_id.clone(), response))
                        .await
                    {
                        debug!(error = %e, "Proxy authentication failed");
                    }
                }
            }));
        }

        page.execute(EnableParams {
            patterns: None,
            handle_auth_requests: Some(request.proxy_credentials.is_some()),
        })
        .await
        .map_err(cdp_error)?;

        Ok((page, tasks))
    }
}

#[async_trait]
impl BrowserEngine for ChromeEngine {
    async fn content(&self, request: &PageRequest) -> Result<String, FetchError> {
        let (page, tasks) = self.open_page(request).await?;
        let result = load_content(&page, request).await;
        release(page, tasks).await;
        result
    }

    async fn capture(
        &self,
        request: &PageRequest,
        matcher: &RequestMatcher,
    ) -> Result<String, FetchError> {
        let (page, tasks) = self.open_page(request).await?;
        let result = capture_body(&page, request, matcher).await;
        release(page, tasks).await;
        result
    }

    async fn close(&self) -> Result<(), FetchError> {
        let mut browser = self.browser.lock().await;
        let result = if self.owned {
            let closed = browser.close().await.map(|_| ()).map_err(cdp_error);
            if let Err(e) = browser.wait().await {
                debug!(error = %e, "Browser process did not exit cleanly");
            }
            closed
        } else {
            Ok(())
        };
        self.handler_task.abort();
        result
    }
}

async fn load_content(page: &Page, request: &PageRequest) -> Result<String, FetchError> {
    page.goto(request.url.as_str()).await.map_err(cdp_error)?;
    page.wait_for_navigation().await.map_err(cdp_error)?;
    if let Some(path) = &request.screenshot {
        let params = ScreenshotParams::builder().full_page(true).build();
        page.save_screenshot(params, path).await.map_err(cdp_error)?;
        debug!(path = %path.display(), "Saved screenshot");
    }
    if let Some(selector) = &request.wait_for_selector {
        wait_for_selector(page, selector).await?;
    }
    page.content().await.map_err(cdp_error)
}

async fn capture_body(
    page: &Page,
    request: &PageRequest,
    matcher: &RequestMatcher,
) -> Result<String, FetchError> {
    let responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(cdp_error)?
        .map(|event| ObservedResponse {
            url: event.response.url.clone(),
            id: event.request_id.clone(),
        });
    let receiver = first_matching(responses, matcher.clone());

    page.goto(request.url.as_str()).await.map_err(cdp_error)?;

    let unmatched = || {
        FetchError::Browser(format!(
            "no response matched {} - {}",
            matcher.key(),
            request.url
        ))
    };
    let observed = tokio::time::timeout(CAPTURE_TIMEOUT, receiver)
        .await
        .map_err(|_| unmatched())?
        .map_err(|_| unmatched())?;

    response_body(page, observed.id).await
}

// The body is only available once loading finished, so poll briefly
async fn response_body(page: &Page, request_id: RequestId) -> Result<String, FetchError> {
    let mut last_error = None;
    for _ in 0..BODY_ATTEMPTS {
        match page.execute(GetResponseBodyParams::new(request_id.clone())).await {
            Ok(response) if response.result.base64_encoded => {
                return Err(FetchError::Browser("matched response has a binary body".into()));
            }
            Ok(response) => return Ok(response.result.body.clone()),
            Err(e) => {
                last_error = Some(e);
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
    Err(last_error
        .map(cdp_error)
        .unwrap_or_else(|| FetchError::Browser("response body unavailable".into())))
}

async fn wait_for_selector(page: &Page, selector: &str) -> Result<(), FetchError> {
    let deadline = Instant::now() + SELECTOR_TIMEOUT;
    loop {
        if page.find_element(selector).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(FetchError::Browser(format!(
                "timed out waiting for selector {}",
                selector
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn release(page: Page, tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        task.abort();
    }
    if let Err(e) = page.close().await {
        debug!(error = %e, "Failed to close page");
    }
}

fn cdp_error(err: CdpError) -> FetchError {
    FetchError::Browser(err.to_string())
}
