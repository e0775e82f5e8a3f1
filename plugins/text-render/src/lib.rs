//! Lightweight markup rendering.
//!
//! Installing the plugin registers one render provider per transformation.
//! Enabled providers run in priority order, highest first. The plugin serves
//! `/render?text=...` with the rendered HTML.
use std::sync::RwLock;

use async_trait::async_trait;
use log::{debug, warn};
use ubercms_core::dispatch::RequestContext;
use ubercms_core::plugin_system::descriptor::PluginId;
use ubercms_core::plugin_system::error::HookError;
use ubercms_core::plugin_system::loader::PluginFactories;
use ubercms_core::plugin_system::traits::{HookResult, Plugin};
use ubercms_core::plugin_system::version::VersionRange;
use ubercms_core::plugin_system::LifecycleContext;
use ubercms_core::storage::{PersistenceError, PluginStore};

pub const CLASS_PATH: &str = "ubercms.text_render";
const COMPATIBLE_API_REQ: &str = "^0.1";
pub const ROUTE: &str = "render";

/// Provider titles with their default priority.
pub const PROVIDERS: [(&str, i32); 3] = [("escape", 100), ("headings", 50), ("emphasis", 10)];

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn headings(text: &str) -> String {
    text.lines()
        .map(|line| {
            let level = line.chars().take_while(|c| *c == '#').count();
            match line[level..].strip_prefix(' ') {
                Some(title) if (1..=6).contains(&level) => format!("<h{level}>{}</h{level}>", title.trim()),
                _ => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `*text*` becomes `<em>text</em>`; an unpaired marker is left alone.
fn emphasis(text: &str) -> String {
    let parts: Vec<&str> = text.split('*').collect();
    if parts.len() < 3 {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let pairs = (parts.len() - 1) / 2;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            let closing = i % 2 == 0;
            if i <= pairs * 2 {
                out.push_str(if closing { "</em>" } else { "<em>" });
            } else {
                out.push('*');
            }
        }
        out.push_str(part);
    }
    out
}

fn apply(provider: &str, text: &str) -> String {
    match provider {
        "escape" => escape(text),
        "headings" => headings(text),
        "emphasis" => emphasis(text),
        other => {
            warn!("Unknown render provider '{}' skipped", other);
            text.to_string()
        }
    }
}

/// `+` and `%XX` decoding for query values. Invalid escapes are kept as-is.
fn decode_query_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match value.get(i + 1..i + 3).and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[derive(Debug)]
pub struct TextRenderPlugin {
    id: PluginId,
    /// Enabled provider titles, highest priority first.
    pipeline: RwLock<Vec<String>>,
}

impl TextRenderPlugin {
    pub fn new(id: PluginId) -> Self {
        Self {
            id,
            pipeline: RwLock::new(Vec::new()),
        }
    }

    /// Reload the enabled providers from storage.
    fn load_pipeline(&self, store: &dyn PluginStore) -> Result<usize, PersistenceError> {
        let titles: Vec<String> = store
            .render_providers(Some(self.id))?
            .into_iter()
            .filter(|p| p.enabled)
            .map(|p| p.title)
            .collect();
        let count = titles.len();
        *self.pipeline.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = titles;
        Ok(count)
    }

    pub fn render(&self, text: &str) -> String {
        let pipeline = self.pipeline.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        pipeline.iter().fold(text.to_string(), |acc, provider| apply(provider, &acc))
    }
}

pub fn register(factories: &mut PluginFactories) {
    factories.register(CLASS_PATH, |args| Ok(Box::new(TextRenderPlugin::new(args.id)) as Box<dyn Plugin>));
}

#[async_trait]
impl Plugin for TextRenderPlugin {
    fn name(&self) -> &str {
        "text-render"
    }

    fn compatible_api_versions(&self) -> Vec<VersionRange> {
        match VersionRange::from_constraint(COMPATIBLE_API_REQ) {
            Ok(range) => vec![range],
            Err(e) => {
                log::error!("Failed to parse API requirement '{}': {}", COMPATIBLE_API_REQ, e);
                vec![]
            }
        }
    }

    async fn install(&self, ctx: &mut LifecycleContext<'_>) -> HookResult {
        for (title, priority) in PROVIDERS {
            ctx.add_render_provider(title, priority);
        }
        ctx.handlers_mut().runtime_start = true;
        Ok(format!("Registered {} render providers", PROVIDERS.len()))
    }

    async fn uninstall(&self, ctx: &mut LifecycleContext<'_>) -> HookResult {
        ctx.remove_render_providers();
        Ok(String::new())
    }

    async fn enable(&self, ctx: &mut LifecycleContext<'_>) -> HookResult {
        ctx.claim_route(ROUTE);
        let count = self.load_pipeline(ctx.store()).map_err(HookError::from_error)?;
        Ok(format!("Serving /{} with {} providers", ROUTE, count))
    }

    async fn on_runtime_start(&self, store: &dyn PluginStore) -> Result<bool, HookError> {
        let count = self.load_pipeline(store).map_err(HookError::from_error)?;
        debug!("text-render loaded {} providers", count);
        Ok(count > 0)
    }

    async fn handle_request(&self, request: &mut RequestContext) -> Result<bool, HookError> {
        if !request.path_info().trim_matches('/').is_empty() {
            return Ok(false);
        }
        let text = request
            .query
            .get("text")
            .map(|v| decode_query_value(v))
            .ok_or_else(|| HookError::failed("missing 'text' query parameter"))?;
        let body = self.render(&text);
        request.response.set(200, "text/html; charset=utf-8", body);
        Ok(true)
    }
}
