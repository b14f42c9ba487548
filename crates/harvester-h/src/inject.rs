use chromiumoxide::Page;
use serde::Deserialize;
use std::error::Error;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Attribute used to hand elements found by script back to CDP queries.
pub const REF_ATTRIBUTE: &str = "data-harvester-ref";

/// Maximum retries for context errors during page navigation.
const MAX_CONTEXT_RETRIES: u32 = 10;

/// Delay between retries when context is not found (page navigating).
const CONTEXT_RETRY_DELAY: Duration = Duration::from_millis(100);

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resource count must hold still this long for the page to count as idle.
const IDLE_QUIET_PERIOD: Duration = Duration::from_millis(500);

const IDLE_PROBE_JS: &str = "(() => ({ ready: document.readyState, resources: performance.getEntriesByType('resource').length }))()";

/// Check if an error indicates the page context is unavailable (e.g., during navigation).
fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("-32000")
}

/// Retry an async operation that may fail due to context errors during page navigation.
/// Returns immediately on success or non-context errors; retries only on context errors.
async fn retry_on_context_error<T, E, F, Fut>(
    operation_name: &str,
    mut operation: F,
) -> Result<T, Box<dyn Error + Send + Sync>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..MAX_CONTEXT_RETRIES {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let err_str = e.to_string();
                if is_context_error(&err_str) {
                    tracing::debug!(
                        "{} context error (attempt {}/{}), retrying...",
                        operation_name,
                        attempt + 1,
                        MAX_CONTEXT_RETRIES
                    );
                    last_error = Some(err_str);
                    tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
                    continue;
                }
                return Err(err_str.into());
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| format!("{} failed after retries", operation_name))
        .into())
}

#[derive(Debug, Deserialize)]
struct IdleProbe {
    ready: String,
    resources: u64,
}

async fn probe_idle(page: &Page) -> Result<IdleProbe, Box<dyn Error + Send + Sync>> {
    let probe = retry_on_context_error("Idle probe", || page.evaluate(IDLE_PROBE_JS)).await?;
    probe
        .into_value::<IdleProbe>()
        .map_err(|e| format!("Failed to read idle probe: {}", e).into())
}

/// Poll until the document is complete and no new resources load for
/// [`IDLE_QUIET_PERIOD`]. The caller bounds this with a timeout.
pub async fn wait_for_quiescence(page: &Page) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut last_count = None;
    let mut stable_since = Instant::now();

    loop {
        let probe = probe_idle(page).await?;
        if probe.ready == "complete" {
            if last_count == Some(probe.resources) {
                if stable_since.elapsed() >= IDLE_QUIET_PERIOD {
                    return Ok(());
                }
            } else {
                last_count = Some(probe.resources);
                stable_since = Instant::now();
            }
        } else {
            last_count = None;
        }
        tokio::time::sleep(IDLE_POLL_INTERVAL).await;
    }
}

/// Script that tags the deepest element whose text matches and reports
/// whether one was found.
pub fn text_locator_script(text: &str, scope: Option<&str>, exact: bool, marker: u32) -> String {
    let text = serde_json::Value::String(text.to_string());
    let scope = serde_json::Value::String(scope.unwrap_or("*").to_string());
    format!(
        r#"(() => {{
  const want = {text};
  const scope = {scope};
  const exact = {exact};
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  const target = exact ? norm(want) : norm(want).toLowerCase();
  const label = (el) => el.tagName === 'INPUT' ? el.value : (el.innerText !== undefined ? el.innerText : el.textContent);
  const matches = (el) => {{
    const t = norm(label(el));
    return exact ? t === target : t.toLowerCase().includes(target);
  }};
  let nodes;
  try {{ nodes = Array.from(document.querySelectorAll(scope)); }} catch (e) {{ return false; }}
  const hits = nodes.filter(matches);
  const deepest = hits.filter((el) => !hits.some((o) => o !== el && el.contains(o)));
  const hit = deepest[0] || hits[0];
  if (!hit) return false;
  hit.setAttribute('{attr}', '{marker}');
  return true;
}})()"#,
        text = text,
        scope = scope,
        exact = exact,
        attr = REF_ATTRIBUTE,
        marker = marker,
    )
}

pub async fn tag_text_match(
    page: &Page,
    text: &str,
    scope: Option<&str>,
    exact: bool,
    marker: u32,
) -> Result<bool, Box<dyn Error + Send + Sync>> {
    let script = text_locator_script(text, scope, exact, marker);
    let result =
        retry_on_context_error("Text locator", || page.evaluate(script.as_str())).await?;
    result
        .into_value::<bool>()
        .map_err(|e| format!("Failed to read text locator result: {}", e).into())
}
