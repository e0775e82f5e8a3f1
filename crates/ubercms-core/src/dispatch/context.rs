use std::collections::{BTreeMap, HashMap};

use crate::plugin_system::resources::normalize_module;

/// Response being built for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl Default for Response {
    fn default() -> Self {
        Self::with_status(200)
    }
}

impl Response {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8".to_string(),
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    /// Replace status, content type and body in one go.
    pub fn set(&mut self, status: u16, content_type: &str, body: impl Into<String>) {
        self.status = status;
        self.content_type = content_type.to_string();
        self.body = body.into();
    }
}

/// Everything a handler knows about one inbound request.
///
/// Built once per request and owned by the task dispatching it; nothing in
/// here is shared between requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    path: String,
    module: String,
    path_info: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    /// Scratch values handlers pass to each other during this request.
    pub items: HashMap<String, serde_json::Value>,
    pub response: Response,
}

impl RequestContext {
    /// Parse `target` (`/module/rest?key=value`). An empty path routes to
    /// `default_module`.
    pub fn new(method: &str, target: &str, default_module: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, HashMap::new()),
        };
        let trimmed = path.trim().trim_start_matches('/');
        let (first, rest) = match trimmed.split_once('/') {
            Some((first, rest)) => (first, format!("/{}", rest)),
            None => (trimmed, String::new()),
        };
        let module = if first.is_empty() {
            normalize_module(default_module)
        } else {
            normalize_module(first)
        };

        Self {
            method: method.to_uppercase(),
            path: format!("/{}", trimmed),
            module,
            path_info: rest,
            query,
            headers: HashMap::new(),
            items: HashMap::new(),
            response: Response::default(),
        }
    }

    pub fn get(target: &str, default_module: &str) -> Self {
        Self::new("GET", target, default_module)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    /// Path without the query string, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Lower-cased first path segment used for routing.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Everything after the module segment, e.g. `/2024/05` for `/blog/2024/05`.
    pub fn path_info(&self) -> &str {
        &self.path_info
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
