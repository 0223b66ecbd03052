//! Cache Key Module
//!
//! Turns method, path, query and selected request headers into a
//! deterministic cache key.
//!
//! Queries are held in an arena ([`Query`]) so that structures handed over by
//! other layers may share or even reference their own nodes. Key layout:
//!
//! ```text
//! GET /widgets?{"page":"2","tags":["b","a"]}:vary:en|gzip
//! ```

use axum::http::HeaderMap;
use serde_json::Value;
use url::form_urlencoded;

/// Written in place of a container that was already visited in this key.
pub const CIRCULAR_SENTINEL: &str = "[Circular]";

/// Written in place of containers nested deeper than [`MAX_ENCODE_DEPTH`].
pub const DEPTH_SENTINEL: &str = "[MaxDepth]";

/// Separator between the base key and the vary segment.
pub const VARY_SEPARATOR: &str = ":vary:";

/// Deepest container nesting encoded into a key.
pub const MAX_ENCODE_DEPTH: usize = 64;

/// Deepest bracket nesting honoured when parsing a query string.
const MAX_PARSE_DEPTH: usize = 16;

// == Query Graph ==
/// Handle to a node inside a [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Leaf value of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Str(String),
}

#[derive(Debug, Clone)]
enum Node {
    Scalar(Scalar),
    Array(Vec<NodeId>),
    Object(Vec<(String, NodeId)>),
}

/// Arena-allocated query structure. The root is an object, or an array of
/// pairs for queries built with [`Query::from_pairs`].
#[derive(Debug, Clone)]
pub struct Query {
    nodes: Vec<Node>,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::Object(Vec::new())],
        }
    }

    /// The top-level object.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// True when the top level holds nothing.
    pub fn is_empty(&self) -> bool {
        match self.nodes.first() {
            Some(Node::Object(fields)) => fields.is_empty(),
            Some(Node::Array(items)) => items.is_empty(),
            _ => true,
        }
    }

    pub fn scalar(&mut self, value: Scalar) -> NodeId {
        self.alloc(Node::Scalar(value))
    }

    pub fn string(&mut self, value: impl Into<String>) -> NodeId {
        self.scalar(Scalar::Str(value.into()))
    }

    pub fn array(&mut self) -> NodeId {
        self.alloc(Node::Array(Vec::new()))
    }

    pub fn object(&mut self) -> NodeId {
        self.alloc(Node::Object(Vec::new()))
    }

    /// Appends `child` to an array node. No-op if `array` is not an array.
    pub fn push(&mut self, array: NodeId, child: NodeId) {
        if let Some(Node::Array(items)) = self.nodes.get_mut(array.0) {
            items.push(child);
        }
    }

    /// Sets `key` on an object node, replacing any previous value.
    /// No-op if `object` is not an object.
    pub fn insert(&mut self, object: NodeId, key: impl Into<String>, child: NodeId) {
        let key = key.into();
        if let Some(Node::Object(fields)) = self.nodes.get_mut(object.0) {
            match fields.iter_mut().find(|(k, _)| *k == key) {
                Some(field) => field.1 = child,
                None => fields.push((key, child)),
            }
        }
    }

    /// Looks up `key` on an object node.
    pub fn get(&self, object: NodeId, key: &str) -> Option<NodeId> {
        match self.nodes.get(object.0) {
            Some(Node::Object(fields)) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| *v),
            _ => None,
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    fn is_array(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.0), Some(Node::Array(_)))
    }

    fn is_object(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.0), Some(Node::Object(_)))
    }

    // == Parse ==
    /// Parses a raw (still percent-encoded) query string.
    ///
    /// - `a=1&a=2` and `a[]=1&a[]=2` produce arrays in request order
    /// - `f[x]=1` produces a nested object
    /// - keys with unbalanced brackets are taken literally
    /// - if a plain and a bracketed key collide (`a=1&a[x]=2`), the whole
    ///   query falls back to its decoded pair list, see [`Query::from_pairs`]
    pub fn parse(raw: &str) -> Self {
        let pairs: Vec<(String, String)> = form_urlencoded::parse(raw.as_bytes())
            .into_owned()
            .collect();

        let mut query = Self::new();
        let root = query.root();

        for (key, value) in &pairs {
            let segments = split_key(key);
            if !query.assign(root, &segments, value.clone()) {
                return Self::from_pairs(&pairs);
            }
        }

        query
    }

    /// Builds a query whose root is the ordered list of `[key, value]` pairs.
    ///
    /// An array root never encodes like an object root, so these keys cannot
    /// meet keys of structured queries.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut query = Self {
            nodes: vec![Node::Array(Vec::new())],
        };
        let root = query.root();

        for (key, value) in pairs {
            let pair = query.array();
            let key = query.string(key.clone());
            let value = query.string(value.clone());
            query.push(pair, key);
            query.push(pair, value);
            query.push(root, pair);
        }

        query
    }

    /// Places `value` under `segments`. Returns false, leaving the query
    /// partly written, when doing so would replace an existing value of
    /// another shape.
    fn assign(&mut self, parent: NodeId, segments: &[String], value: String) -> bool {
        let Some((segment, rest)) = segments.split_first() else {
            return true;
        };

        if rest.is_empty() {
            let leaf = self.string(value);
            if self.is_array(parent) {
                self.push(parent, leaf);
                return true;
            }
            match self.get(parent, segment) {
                Some(existing) if self.is_object(existing) => return false,
                Some(existing) if self.is_array(existing) => self.push(existing, leaf),
                Some(existing) => {
                    // A repeated plain key turns into an array
                    let list = self.array();
                    self.push(list, existing);
                    self.push(list, leaf);
                    self.insert(parent, segment.clone(), list);
                }
                None => self.insert(parent, segment.clone(), leaf),
            }
            return true;
        }

        let wants_array = rest[0].is_empty();
        let child = if self.is_array(parent) {
            let child = if wants_array { self.array() } else { self.object() };
            self.push(parent, child);
            child
        } else {
            match self.get(parent, segment) {
                Some(existing) if wants_array && self.is_array(existing) => existing,
                Some(existing) if !wants_array && self.is_object(existing) => existing,
                Some(_) => return false,
                None => {
                    let child = if wants_array { self.array() } else { self.object() };
                    self.insert(parent, segment.clone(), child);
                    child
                }
            }
        };

        self.assign(child, rest, value)
    }

    // == From JSON ==
    /// Builds a query from a JSON object. Non-object values give an empty query.
    pub fn from_json(value: &Value) -> Self {
        let mut query = Self::new();
        let root = query.root();

        if let Value::Object(map) = value {
            for (key, field) in map {
                let child = query.alloc_json(field);
                query.insert(root, key.clone(), child);
            }
        }

        query
    }

    fn alloc_json(&mut self, value: &Value) -> NodeId {
        match value {
            Value::Null => self.scalar(Scalar::Null),
            Value::Bool(b) => self.scalar(Scalar::Bool(*b)),
            Value::Number(n) => self.scalar(Scalar::Number(n.clone())),
            Value::String(s) => self.string(s.clone()),
            Value::Array(items) => {
                let list = self.array();
                for item in items {
                    let child = self.alloc_json(item);
                    self.push(list, child);
                }
                list
            }
            Value::Object(map) => {
                let object = self.object();
                for (key, field) in map {
                    let child = self.alloc_json(field);
                    self.insert(object, key.clone(), child);
                }
                object
            }
        }
    }
}

impl From<&Value> for Query {
    fn from(value: &Value) -> Self {
        Query::from_json(value)
    }
}

/// Splits `a[b][]` into `["a", "b", ""]`. Malformed keys come back whole.
fn split_key(key: &str) -> Vec<String> {
    let literal = || vec![key.to_string()];

    let Some(open) = key.find('[') else {
        return literal();
    };
    if open == 0 {
        return literal();
    }

    let mut segments = vec![key[..open].to_string()];
    let mut rest = &key[open..];

    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix('[') else {
            return literal();
        };
        let Some(close) = inner.find(']') else {
            return literal();
        };
        segments.push(inner[..close].to_string());
        rest = &inner[close + 1..];
    }

    if segments.len() > MAX_PARSE_DEPTH {
        return literal();
    }
    segments
}

// == Canonicalize ==
/// Produces the cache key for a request.
///
/// Query keys are sorted at every level, arrays keep their order, and a
/// container reached twice within one call is written as [`CIRCULAR_SENTINEL`].
/// When `vary_names` is given, a `:vary:` segment with each named header's
/// value (empty if absent) is appended in the given order.
pub fn canonicalize(
    method: &str,
    path: &str,
    query: &Query,
    vary_names: Option<&[String]>,
    headers: Option<&HeaderMap>,
) -> String {
    let base = base_key(method, path, query);
    match vary_names {
        Some(names) => with_vary(&base, names, headers),
        None => base,
    }
}

/// Key for a request without any vary dimension.
pub fn base_key(method: &str, path: &str, query: &Query) -> String {
    let mut encoder = Encoder {
        query,
        seen: vec![false; query.nodes.len()],
        out: String::with_capacity(path.len() + 32),
    };

    encoder.out.push_str(&method.to_ascii_uppercase());
    encoder.out.push(' ');
    encoder.out.push_str(path);
    encoder.out.push('?');
    encoder.write_node(query.root(), 0);

    encoder.out
}

/// Appends the vary segment for `names` to an existing base key.
pub fn with_vary(base: &str, names: &[String], headers: Option<&HeaderMap>) -> String {
    let values: Vec<String> = names
        .iter()
        .map(|name| header_value(headers, name))
        .map(|value| escape_vary_value(&value))
        .collect();

    format!("{}{}{}", base, VARY_SEPARATOR, values.join("|"))
}

fn header_value(headers: Option<&HeaderMap>, name: &str) -> String {
    let Some(headers) = headers else {
        return String::new();
    };
    headers
        .get_all(name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape_vary_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('|', "\\|")
}

struct Encoder<'q> {
    query: &'q Query,
    /// Containers already written during this call
    seen: Vec<bool>,
    out: String,
}

impl Encoder<'_> {
    fn write_node(&mut self, id: NodeId, depth: usize) {
        let query = self.query;
        let Some(node) = query.nodes.get(id.0) else {
            self.out.push_str("null");
            return;
        };

        if let Node::Scalar(scalar) = node {
            self.write_scalar(scalar);
            return;
        }

        if self.seen[id.0] {
            self.out.push_str(CIRCULAR_SENTINEL);
            return;
        }
        if depth >= MAX_ENCODE_DEPTH {
            self.out.push_str(DEPTH_SENTINEL);
            return;
        }
        self.seen[id.0] = true;

        match node {
            Node::Array(items) => {
                self.out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    self.write_node(*item, depth + 1);
                }
                self.out.push(']');
            }
            Node::Object(fields) => {
                let mut sorted: Vec<&(String, NodeId)> = fields.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));

                self.out.push('{');
                for (i, (key, child)) in sorted.into_iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    self.write_string(key);
                    self.out.push(':');
                    self.write_node(*child, depth + 1);
                }
                self.out.push('}');
            }
            Node::Scalar(_) => {}
        }
    }

    fn write_scalar(&mut self, scalar: &Scalar) {
        match scalar {
            Scalar::Null => self.out.push_str("null"),
            Scalar::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
            Scalar::Number(n) => self.out.push_str(&n.to_string()),
            Scalar::Str(s) => self.write_string(s),
        }
    }

    fn write_string(&mut self, s: &str) {
        // Serializing a str to JSON cannot fail
        let quoted = serde_json::to_string(s).unwrap_or_default();
        self.out.push_str(&quoted);
    }
}
