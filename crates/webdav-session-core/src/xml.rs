//! Mapping between WebDAV XML bodies and typed values.
//!
//! Replies are read into a small element tree with resolved namespaces, so
//! servers are free to choose any prefixes (`D:`, `d:`, `lp1:`, none).

use std::collections::HashMap;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use tracing::debug;

use crate::error::{DavError, Result};
use crate::property::{DavProperty, PropertyDiff, QualifiedName, DAV_NS};
use crate::token::LockToken;
use crate::types::{Depth, LockRequest, LockScope, LockTimeout};

/// A decoded `multistatus` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiStatus {
    pub entries: Vec<MultiStatusEntry>,
}

/// One `response` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiStatusEntry {
    pub href: Option<String>,
    pub propstats: Vec<PropStat>,
    /// Response-level status line, used by non-PROPFIND replies.
    pub status: Option<String>,
}

/// One `propstat` group: properties sharing a status line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropStat {
    pub status: Option<String>,
    pub properties: Vec<DavProperty>,
}

impl PropStat {
    pub fn is_not_found(&self) -> bool {
        self.status.as_deref().is_some_and(|s| s.contains("404"))
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status.as_deref().and_then(status_code)
    }
}

/// One `activelock` from a `lockdiscovery` property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveLock {
    pub scope: Option<LockScope>,
    pub depth: Option<Depth>,
    pub owner: Option<String>,
    pub timeout: Option<LockTimeout>,
    pub token: Option<LockToken>,
    /// `lockroot/href`, as sent (may be relative).
    pub root: Option<String>,
}

/// Numeric code of an HTTP status line (`HTTP/1.1 404 Not Found`).
pub fn status_code(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}

impl MultiStatus {
    pub fn parse(text: &str) -> Result<Self> {
        let root = parse_tree(text)?;
        if !root.is_dav("multistatus") {
            return Err(DavError::Malformed(format!(
                "Expected DAV:multistatus, got {{{}}}{}",
                root.namespace, root.name
            )));
        }

        let entries = root
            .dav_children("response")
            .map(|response| MultiStatusEntry {
                href: response
                    .dav_child("href")
                    .map(|h| h.text.clone())
                    .filter(|h| !h.is_empty()),
                propstats: response
                    .dav_children("propstat")
                    .map(|ps| PropStat {
                        status: ps.dav_child("status").map(|s| s.text.clone()),
                        properties: ps
                            .dav_child("prop")
                            .map(|p| p.children.clone())
                            .unwrap_or_default(),
                    })
                    .collect(),
                status: response.dav_child("status").map(|s| s.text.clone()),
            })
            .collect::<Vec<_>>();

        debug!("Parsed multistatus with {} entries", entries.len());
        Ok(Self { entries })
    }

    /// Status lines of every entry or propstat that did not succeed.
    pub fn failures(&self) -> Vec<String> {
        let is_failure =
            |line: &String| !status_code(line).is_some_and(|c| (200..300).contains(&c));
        self.entries
            .iter()
            .flat_map(|entry| {
                entry
                    .status
                    .iter()
                    .chain(entry.propstats.iter().filter_map(|ps| ps.status.as_ref()))
                    .filter(|line| is_failure(line))
                    .map(move |line| match &entry.href {
                        Some(href) => format!("{}: {}", href, line),
                        None => line.clone(),
                    })
            })
            .collect()
    }
}

/// Read every `activelock` found under a `lockdiscovery` element anywhere in
/// the document (a LOCK reply is a bare `prop`, a PROPFIND reply nests it).
pub fn parse_lock_discovery(text: &str) -> Result<Vec<ActiveLock>> {
    let root = parse_tree(text)?;
    let mut found = Vec::new();
    collect_active_locks(&root, &mut found);
    Ok(found)
}

fn collect_active_locks(element: &DavProperty, out: &mut Vec<ActiveLock>) {
    if element.is_dav("lockdiscovery") {
        out.extend(element.dav_children("activelock").map(active_lock));
        return;
    }
    for child in &element.children {
        collect_active_locks(child, out);
    }
}

/// Decode one `activelock` element.
pub fn active_lock(element: &DavProperty) -> ActiveLock {
    let scope = element.dav_child("lockscope").and_then(|s| {
        if s.dav_child("exclusive").is_some() {
            Some(LockScope::Exclusive)
        } else if s.dav_child("shared").is_some() {
            Some(LockScope::Shared)
        } else {
            None
        }
    });

    let owner = element.dav_child("owner").map(|o| match o.dav_child("href") {
        Some(href) => href.text.clone(),
        None => o.text.clone(),
    });

    let token = element
        .dav_child("locktoken")
        .and_then(|t| t.dav_child("href"))
        .and_then(|href| {
            let token = LockToken::parse(&href.text);
            if token.is_none() {
                debug!("Ignoring unparseable lock token {:?}", href.text);
            }
            token
        });

    ActiveLock {
        scope,
        depth: element.dav_child("depth").and_then(|d| Depth::parse(&d.text)),
        owner,
        timeout: element
            .dav_child("timeout")
            .and_then(|t| LockTimeout::parse(&t.text)),
        token,
        root: element
            .dav_child("lockroot")
            .and_then(|r| r.dav_child("href"))
            .map(|h| h.text.clone()),
    }
}

/// Parse a document into an element tree.
pub fn parse_tree(text: &str) -> Result<DavProperty> {
    let mut reader = NsReader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<DavProperty> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_resolved_event() {
            Ok((ns, Event::Start(e))) => {
                stack.push(element(ns, e.local_name().as_ref()));
            }
            Ok((ns, Event::Empty(e))) => {
                let el = element(ns, e.local_name().as_ref());
                attach(&mut stack, &mut root, el);
            }
            Ok((_, Event::End(_))) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| DavError::Malformed("Unbalanced XML end tag".to_string()))?;
                attach(&mut stack, &mut root, el);
            }
            Ok((_, Event::Text(t))) => {
                let text = t
                    .unescape()
                    .map_err(|e| DavError::Malformed(format!("Invalid XML text: {}", e)))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok((_, Event::CData(c))) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok((_, Event::Eof)) => break,
            Ok(_) => {}
            Err(e) => return Err(DavError::Malformed(format!("Invalid XML: {}", e))),
        }
    }

    if !stack.is_empty() {
        return Err(DavError::Malformed("Unclosed XML element".to_string()));
    }
    root.ok_or_else(|| DavError::Malformed("Empty XML document".to_string()))
}

fn element(ns: ResolveResult<'_>, local_name: &[u8]) -> DavProperty {
    let namespace = match ns {
        ResolveResult::Bound(Namespace(uri)) => String::from_utf8_lossy(uri).into_owned(),
        _ => String::new(),
    };
    DavProperty {
        namespace,
        name: String::from_utf8_lossy(local_name).into_owned(),
        ..Default::default()
    }
}

fn attach(stack: &mut [DavProperty], root: &mut Option<DavProperty>, el: DavProperty) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}

const XML_DECL: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// PROPFIND body asking for all live properties plus `include`.
pub fn propfind_body(include: &[QualifiedName]) -> String {
    let prefixes = Prefixes::new(include.iter());
    let mut body = format!(
        r#"{}<D:propfind xmlns:D="DAV:"{}><D:allprop/>"#,
        XML_DECL,
        prefixes.declarations()
    );
    if !include.is_empty() {
        body.push_str("<D:include>");
        for name in include {
            body.push_str(&format!("<{}/>", prefixes.tag(name)));
        }
        body.push_str("</D:include>");
    }
    body.push_str("</D:propfind>");
    body
}

/// `lockinfo` body for a LOCK request.
pub fn lockinfo_body(request: &LockRequest) -> String {
    let mut body = format!(
        r#"{}<D:lockinfo xmlns:D="DAV:"><D:lockscope><D:{}/></D:lockscope><D:locktype><D:write/></D:locktype>"#,
        XML_DECL,
        request.scope.element_name()
    );
    if let Some(owner) = &request.owner {
        body.push_str(&format!("<D:owner>{}</D:owner>", escape(owner.as_str())));
    }
    body.push_str("</D:lockinfo>");
    body
}

/// `propertyupdate` body for a PROPPATCH request.
pub fn proppatch_body(diff: &PropertyDiff) -> String {
    let prefixes = Prefixes::new(diff.set.iter().map(|(n, _)| n).chain(diff.remove.iter()));
    let mut body = format!(
        r#"{}<D:propertyupdate xmlns:D="DAV:"{}>"#,
        XML_DECL,
        prefixes.declarations()
    );
    if !diff.set.is_empty() {
        body.push_str("<D:set><D:prop>");
        for (name, value) in &diff.set {
            let tag = prefixes.tag(name);
            body.push_str(&format!("<{0}>{1}</{0}>", tag, escape(value.as_str())));
        }
        body.push_str("</D:prop></D:set>");
    }
    if !diff.remove.is_empty() {
        body.push_str("<D:remove><D:prop>");
        for name in &diff.remove {
            body.push_str(&format!("<{}/>", prefixes.tag(name)));
        }
        body.push_str("</D:prop></D:remove>");
    }
    body.push_str("</D:propertyupdate>");
    body
}

/// Namespace prefix assignment for request bodies. `DAV:` is always `D`.
struct Prefixes<'a> {
    assigned: Vec<(&'a str, String)>,
    index: HashMap<&'a str, usize>,
}

impl<'a> Prefixes<'a> {
    fn new(names: impl Iterator<Item = &'a QualifiedName>) -> Self {
        let mut assigned = Vec::new();
        let mut index = HashMap::new();
        for name in names {
            let ns = name.namespace.as_str();
            // No-namespace names are written bare; no default xmlns is declared.
            if ns.is_empty() || ns == DAV_NS || index.contains_key(ns) {
                continue;
            }
            index.insert(ns, assigned.len());
            assigned.push((ns, format!("ns{}", assigned.len())));
        }
        Self { assigned, index }
    }

    fn declarations(&self) -> String {
        self.assigned
            .iter()
            .map(|(ns, prefix)| format!(r#" xmlns:{}="{}""#, prefix, escape(*ns)))
            .collect()
    }

    fn tag(&self, name: &QualifiedName) -> String {
        if name.namespace == DAV_NS {
            return format!("D:{}", name.name);
        }
        match self.index.get(name.namespace.as_str()) {
            Some(&i) => format!("{}:{}", self.assigned[i].1, name.name),
            None => name.name.clone(),
        }
    }
}
