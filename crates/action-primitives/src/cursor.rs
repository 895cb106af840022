//! Best-effort visual cursor overlay.
//!
//! Injection is idempotent and every update runs on a detached task, so a page that
//! rejects the overlay never blocks or fails the action that triggered it.

use std::sync::Arc;

use cdp_adapter::PageDriver;
use tokio::task::JoinHandle;
use tracing::trace;

const ENSURE_CURSOR: &str = r#"(() => {
  if (document.getElementById('__waypoint_cursor')) return false;
  const cursor = document.createElement('div');
  cursor.id = '__waypoint_cursor';
  cursor.style.cssText = 'position:fixed;top:0;left:0;width:14px;height:14px;margin:-7px 0 0 -7px;' +
    'border-radius:50%;background:rgba(37,99,235,0.55);border:2px solid #fff;' +
    'box-shadow:0 0 4px rgba(0,0,0,0.4);pointer-events:none;z-index:2147483647;' +
    'transition:transform 80ms linear;';
  (document.body || document.documentElement).appendChild(cursor);
  return true;
})()"#;

fn move_expression(x: f64, y: f64) -> String {
    format!(
        "(() => {{ const c = document.getElementById('__waypoint_cursor'); \
         if (c) c.style.transform = 'translate({x}px, {y}px)'; }})()"
    )
}

fn pulse_expression(x: f64, y: f64) -> String {
    format!(
        "(() => {{ const p = document.createElement('div'); \
         p.style.cssText = 'position:fixed;left:{x}px;top:{y}px;width:24px;height:24px;margin:-12px 0 0 -12px;\
border-radius:50%;border:2px solid rgba(37,99,235,0.8);pointer-events:none;z-index:2147483646;\
transition:transform 300ms ease-out, opacity 300ms ease-out;'; \
         (document.body || document.documentElement).appendChild(p); \
         requestAnimationFrame(() => {{ p.style.transform = 'scale(2)'; p.style.opacity = '0'; }}); \
         setTimeout(() => p.remove(), 350); }})()"
    )
}

/// Cursor feedback for one page.
#[derive(Debug, Clone, Copy)]
pub struct CursorOverlay {
    enabled: bool,
}

impl CursorOverlay {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Moves the cursor to `(x, y)`, injecting it first if needed.
    pub fn move_to<D>(&self, driver: &Arc<D>, x: f64, y: f64) -> Option<JoinHandle<()>>
    where
        D: PageDriver + 'static,
    {
        self.spawn(driver, vec![ENSURE_CURSOR.to_string(), move_expression(x, y)])
    }

    /// Moves the cursor and plays a click ripple.
    pub fn click_at<D>(&self, driver: &Arc<D>, x: f64, y: f64) -> Option<JoinHandle<()>>
    where
        D: PageDriver + 'static,
    {
        self.spawn(
            driver,
            vec![
                ENSURE_CURSOR.to_string(),
                move_expression(x, y),
                pulse_expression(x, y),
            ],
        )
    }

    fn spawn<D>(&self, driver: &Arc<D>, scripts: Vec<String>) -> Option<JoinHandle<()>>
    where
        D: PageDriver + 'static,
    {
        if !self.enabled {
            return None;
        }
        let driver = Arc::clone(driver);
        Some(tokio::spawn(async move {
            for script in scripts {
                if let Err(err) = driver.evaluate(&script).await {
                    trace!(error = %err, "cursor overlay update skipped");
                    return;
                }
            }
        }))
    }
}
