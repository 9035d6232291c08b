//! Chromium over the DevTools protocol.
//!
//! Element handles are `data-mocrun-ref` attributes assigned by an injected
//! query helper, so a handle stays valid exactly as long as the element is
//! attached. Role and accessible-name matching runs inside the page.
//!
//! Each actor gets its own browser and profile directory:
//! ```text
//! <profiles_dir>/<actor>/   # Chromium user data dir
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::layout::Point;
use futures::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{ElementHandle, ElementState, Key, Locator, Page};
use crate::Result;
use crate::config::BrowserConfig;
use crate::error::{Error, InteractionError};

// =============================================================================
// Profiles
// =============================================================================

/// Profile directory for one actor.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub profiles_root: PathBuf,
    pub actor: String,
}

impl BrowserProfile {
    /// Does not touch the disk; see [`BrowserProfile::ensure_dir`].
    #[must_use]
    pub fn new(profiles_root: impl Into<PathBuf>, actor: &str) -> Self {
        Self {
            profiles_root: profiles_root.into(),
            actor: sanitize_path_component(actor),
        }
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.profiles_root.join(&self.actor)
    }

    pub fn ensure_dir(&self) -> Result<PathBuf> {
        let dir = self.path();
        std::fs::create_dir_all(&dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }

        debug!(profile_dir = %dir.display(), actor = %self.actor, "Browser profile directory ensured");
        Ok(dir)
    }
}

fn sanitize_path_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// =============================================================================
// Browser
// =============================================================================

/// A launched Chromium process and its protocol handler task.
pub struct CdpBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
    action_timeout: Duration,
}

impl fmt::Debug for CdpBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdpBrowser")
            .field("navigation_timeout", &self.navigation_timeout)
            .field("action_timeout", &self.action_timeout)
            .finish_non_exhaustive()
    }
}

impl CdpBrowser {
    #[instrument(level = "info", skip_all, fields(actor = %profile.actor, headless = config.headless))]
    pub async fn launch(config: &BrowserConfig, profile: &BrowserProfile) -> Result<Self> {
        let user_data_dir = profile.ensure_dir()?;

        let mut builder = LaunchConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .viewport(Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
                ..Viewport::default()
            })
            .request_timeout(Duration::from_millis(config.navigation_timeout_ms))
            .user_data_dir(user_data_dir);
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &config.executable {
            builder = builder.chrome_executable(executable);
        }
        let launch = builder
            .build()
            .map_err(|e| Error::Runtime(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(launch)
            .await
            .map_err(|e| Error::Runtime(format!("failed to launch chromium: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    warn!(error = %err, "CDP handler stopped");
                    break;
                }
            }
        });

        info!("Browser launched");
        Ok(Self {
            browser,
            handler,
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
            action_timeout: Duration::from_millis(config.action_timeout_ms),
        })
    }

    /// Open a blank tab.
    pub async fn new_page(&self) -> Result<CdpPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| Error::Runtime(format!("failed to open page: {e}")))?;
        Ok(CdpPage {
            page,
            navigation_timeout: self.navigation_timeout,
            action_timeout: self.action_timeout,
        })
    }

    pub async fn close(mut self) -> Result<()> {
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "Browser close failed");
        }
        // The handler ends once the connection drops.
        let _ = self.handler.await;
        Ok(())
    }
}

// =============================================================================
// Page
// =============================================================================

/// A Chromium tab.
#[derive(Debug, Clone)]
pub struct CdpPage {
    page: chromiumoxide::Page,
    navigation_timeout: Duration,
    action_timeout: Duration,
}

/// Reply envelope produced by the injected helpers.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
#[serde(bound = "T: DeserializeOwned")]
enum Reply<T> {
    Ok { value: T },
    Detached,
    Intercepted,
    Error { message: String },
}

#[derive(Debug, Deserialize)]
struct StateReply {
    visible: bool,
    enabled: bool,
    checked: Option<bool>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ClickTarget {
    x: f64,
    y: f64,
}

fn backend(err: impl fmt::Display) -> Error {
    InteractionError::Backend(err.to_string()).into()
}

fn json_arg<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

impl CdpPage {
    #[must_use]
    pub fn inner(&self) -> &chromiumoxide::Page {
        &self.page
    }

    /// Run `window.__mocrun.<call>` after making sure the helpers exist.
    async fn call<T: DeserializeOwned>(&self, element: Option<&ElementHandle>, call: String) -> Result<T> {
        let expression = format!("(() => {{ {HELPERS} return window.__mocrun.{call}; }})()");
        let evaluation = tokio::time::timeout(self.action_timeout, self.page.evaluate(expression))
            .await
            .map_err(|_| InteractionError::Timeout {
                what: format!("page script {}", call.split('(').next().unwrap_or_default()),
                waited_ms: u64::try_from(self.action_timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(backend)?;
        let reply: Reply<T> = evaluation.into_value().map_err(backend)?;

        let descriptor = || element.map_or_else(String::new, |e| e.token().to_string());
        match reply {
            Reply::Ok { value } => Ok(value),
            Reply::Detached => Err(InteractionError::Detached {
                descriptor: descriptor(),
            }
            .into()),
            Reply::Intercepted => Err(InteractionError::Intercepted {
                descriptor: descriptor(),
            }
            .into()),
            Reply::Error { message } => Err(backend(message)),
        }
    }

    async fn mouse_click(&self, x: f64, y: f64) -> Result<()> {
        self.page.click(Point::new(x, y)).await.map_err(backend)?;
        Ok(())
    }

    async fn dispatch_key(&self, key: Key, kind: DispatchKeyEventType) -> Result<()> {
        let (code, virtual_code, text) = match key {
            Key::Escape => ("Escape", 27, None),
            Key::Enter => ("Enter", 13, Some("\r")),
            Key::PageDown => ("PageDown", 34, None),
            Key::Tab => ("Tab", 9, None),
        };
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(key.as_str())
            .code(code)
            .windows_virtual_key_code(virtual_code)
            .native_virtual_key_code(virtual_code);
        if let (Some(text), DispatchKeyEventType::KeyDown) = (text, kind) {
            builder = builder.text(text);
        }
        let params = builder.build().map_err(backend)?;
        self.page.execute(params).await.map_err(backend)?;
        Ok(())
    }
}

impl Page for CdpPage {
    async fn query(
        &self,
        locator: &Locator,
        within: Option<&ElementHandle>,
    ) -> Result<Vec<ElementHandle>> {
        let within_arg = json_arg(&within.map(ElementHandle::token))?;
        let refs: Vec<String> = self
            .call(
                within,
                format!("query({}, {within_arg})", json_arg(locator)?),
            )
            .await?;
        Ok(refs.into_iter().map(ElementHandle::new).collect())
    }

    async fn inspect(&self, element: &ElementHandle) -> Result<ElementState> {
        let state: StateReply = self
            .call(Some(element), format!("inspect({})", json_arg(&element.token())?))
            .await?;
        Ok(ElementState {
            attached: true,
            visible: state.visible,
            enabled: state.enabled,
            checked: state.checked,
            text: state.text,
        })
    }

    #[instrument(level = "trace", skip(self), fields(element = %element))]
    async fn click(&self, element: &ElementHandle, force: bool) -> Result<()> {
        let token = json_arg(&element.token())?;
        if force {
            return self
                .call::<bool>(Some(element), format!("forceClick({token})"))
                .await
                .map(|_| ());
        }
        let target: ClickTarget = self
            .call(Some(element), format!("clickTarget({token})"))
            .await?;
        self.mouse_click(target.x, target.y).await
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<()> {
        self.call::<bool>(
            Some(element),
            format!("fill({}, {})", json_arg(&element.token())?, json_arg(&value)?),
        )
        .await
        .map(|_| ())
    }

    async fn press(&self, key: Key) -> Result<()> {
        self.dispatch_key(key, DispatchKeyEventType::KeyDown).await?;
        self.dispatch_key(key, DispatchKeyEventType::KeyUp).await
    }

    async fn click_neutral(&self) -> Result<()> {
        self.mouse_click(50.0, 50.0).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn goto(&self, url: &str) -> Result<()> {
        tokio::time::timeout(self.navigation_timeout, self.page.goto(url))
            .await
            .map_err(|_| InteractionError::Timeout {
                what: format!("navigation to {url}"),
                waited_ms: u64::try_from(self.navigation_timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(backend)?;
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.page.url().await.map_err(backend)?.unwrap_or_default())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.page.get_title().await.map_err(backend)?.unwrap_or_default())
    }
}

// =============================================================================
// Injected helpers
// =============================================================================

/// Installed once per document; navigation drops them with the window.
const HELPERS: &str = r#"
if (!window.__mocrun) {
  window.__mocrun = (() => {
    const ATTR = 'data-mocrun-ref';
    let seq = 0;
    const IMPLICIT = {
      button: 'button, input[type=button], input[type=submit], input[type=reset]',
      checkbox: 'input[type=checkbox]',
      radio: 'input[type=radio]',
      textbox: 'textarea, input:not([type]), input[type=text], input[type=email], input[type=search], input[type=tel], input[type=url], input[type=password], input[type=number]',
      combobox: 'select:not([multiple])',
      listbox: 'select[multiple]',
      option: 'option',
      link: 'a[href]',
      heading: 'h1, h2, h3, h4, h5, h6',
      dialog: 'dialog',
      row: 'tr',
      cell: 'td',
      columnheader: 'th',
      table: 'table',
    };
    const ok = (value) => ({ status: 'ok', value });
    const detached = { status: 'detached' };
    const textOf = (el) => (el.innerText ?? el.textContent ?? '').replace(/\s+/g, ' ').trim();
    const textById = (id) => { const el = document.getElementById(id); return el ? textOf(el) : ''; };
    const nameOf = (el) => {
      const aria = el.getAttribute('aria-label');
      if (aria && aria.trim()) return aria.trim();
      const by = el.getAttribute('aria-labelledby');
      if (by) {
        const joined = by.split(/\s+/).map(textById).join(' ').trim();
        if (joined) return joined;
      }
      if (el.labels && el.labels.length) {
        const label = Array.from(el.labels).map(textOf).join(' ').trim();
        if (label) return label;
      }
      const tag = el.tagName;
      if (tag === 'INPUT' && ['button', 'submit', 'reset'].includes(el.type)) return (el.value || '').trim();
      if (tag === 'INPUT' || tag === 'TEXTAREA' || tag === 'SELECT') {
        return (el.getAttribute('placeholder') || el.getAttribute('title') || '').trim();
      }
      if (tag === 'IMG') return (el.getAttribute('alt') || '').trim();
      return textOf(el) || (el.getAttribute('title') || '').trim();
    };
    const matches = (m, candidate) => {
      if (!m) return true;
      if (m.mode === 'exact') return candidate.trim() === m.value.trim();
      return candidate.toLowerCase().includes(m.value.trim().toLowerCase());
    };
    const byRef = (ref) => {
      const el = document.querySelector(`[${ATTR}="${CSS.escape(ref)}"]`);
      return el && el.isConnected ? el : null;
    };
    const refOf = (el) => {
      if (!el.hasAttribute(ATTR)) el.setAttribute(ATTR, `m${++seq}-${Date.now()}`);
      return el.getAttribute(ATTR);
    };
    const candidates = (loc, root) => {
      switch (loc.by) {
        case 'role': {
          const implicit = IMPLICIT[loc.role];
          const selector = `[role="${CSS.escape(loc.role)}"]` + (implicit ? `, ${implicit}` : '');
          return Array.from(root.querySelectorAll(selector)).filter((el) => {
            const explicit = el.getAttribute('role');
            return (!explicit || explicit === loc.role) && matches(loc.name, nameOf(el));
          });
        }
        case 'id':
          return Array.from(root.querySelectorAll(`#${CSS.escape(loc.id)}`));
        case 'text':
          return Array.from(root.querySelectorAll('body *:not(script):not(style)')).filter(
            (el) => matches(loc.text, textOf(el)) && !Array.from(el.children).some((c) => matches(loc.text, textOf(c)))
          );
        case 'placeholder':
          return Array.from(root.querySelectorAll('[placeholder]')).filter((el) =>
            matches(loc.placeholder, el.getAttribute('placeholder') || '')
          );
        case 'css':
          return Array.from(root.querySelectorAll(loc.selector));
        default:
          return [];
      }
    };
    const isVisible = (el) => {
      if (!el.getClientRects().length) return false;
      const style = getComputedStyle(el);
      return style.visibility !== 'hidden' && style.display !== 'none';
    };
    return {
      query(loc, within) {
        let root = document;
        if (within) {
          root = byRef(within);
          if (!root) return detached;
        }
        try {
          return ok(candidates(loc, root).map(refOf));
        } catch (e) {
          return { status: 'error', message: String(e) };
        }
      },
      inspect(ref) {
        const el = byRef(ref);
        if (!el) return detached;
        const checkable = el.tagName === 'INPUT' && (el.type === 'checkbox' || el.type === 'radio');
        const aria = el.getAttribute('aria-checked');
        return ok({
          visible: isVisible(el),
          enabled: !el.disabled && el.getAttribute('aria-disabled') !== 'true',
          checked: checkable ? el.checked : aria === null ? null : aria === 'true',
          text: textOf(el),
        });
      },
      clickTarget(ref) {
        const el = byRef(ref);
        if (!el) return detached;
        el.scrollIntoView({ block: 'center', inline: 'center' });
        const rect = el.getBoundingClientRect();
        const x = rect.left + rect.width / 2;
        const y = rect.top + rect.height / 2;
        const hit = document.elementFromPoint(x, y);
        const onTarget = hit && (hit === el || el.contains(hit) ||
          (el.labels && Array.from(el.labels).some((l) => l.contains(hit))));
        if (!onTarget) return { status: 'intercepted' };
        return ok({ x, y });
      },
      forceClick(ref) {
        const el = byRef(ref);
        if (!el) return detached;
        el.click();
        return ok(true);
      },
      fill(ref, value) {
        const el = byRef(ref);
        if (!el) return detached;
        el.focus();
        if (el.isContentEditable) {
          el.textContent = value;
        } else {
          const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
          const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
          setter.call(el, value);
        }
        el.dispatchEvent(new Event('input', { bubbles: true }));
        el.dispatchEvent(new Event('change', { bubbles: true }));
        return ok(true);
      },
    };
  })();
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_paths_are_sanitized() {
        let profile = BrowserProfile::new("/tmp/profiles", "owner/../x");
        assert_eq!(profile.path(), PathBuf::from("/tmp/profiles/owner_.._x"));
    }

    #[test]
    fn replies_decode_by_status() {
        let ok: Reply<Vec<String>> =
            serde_json::from_str(r#"{"status":"ok","value":["m1-0"]}"#).unwrap();
        assert!(matches!(ok, Reply::Ok { value } if value == vec!["m1-0".to_string()]));

        let gone: Reply<bool> = serde_json::from_str(r#"{"status":"detached"}"#).unwrap();
        assert!(matches!(gone, Reply::Detached));
    }
}
