use serde::Serialize;

/// Namespace of the core WebDAV vocabulary.
pub const DAV_NS: &str = "DAV:";

/// A namespaced property name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QualifiedName {
    pub namespace: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn dav(name: impl Into<String>) -> Self {
        Self::new(DAV_NS, name)
    }
}

/// One XML element from a server reply: a property, or any element nested
/// inside one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DavProperty {
    pub namespace: String,
    pub name: String,
    /// Concatenated, unescaped, trimmed text content.
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DavProperty>,
}

impl DavProperty {
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace == namespace
    }

    pub fn is_dav(&self, name: &str) -> bool {
        self.is(DAV_NS, name)
    }

    pub fn child(&self, namespace: &str, name: &str) -> Option<&DavProperty> {
        self.children.iter().find(|c| c.is(namespace, name))
    }

    pub fn dav_child(&self, name: &str) -> Option<&DavProperty> {
        self.child(DAV_NS, name)
    }

    pub fn dav_children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DavProperty> {
        self.children.iter().filter(move |c| c.is_dav(name))
    }
}

/// Changes to apply to a resource's dead properties with PROPPATCH.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyDiff {
    pub set: Vec<(QualifiedName, String)>,
    pub remove: Vec<QualifiedName>,
}

impl PropertyDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: QualifiedName, value: impl Into<String>) -> Self {
        self.set.push((name, value.into()));
        self
    }

    pub fn remove(mut self, name: QualifiedName) -> Self {
        self.remove.push(name);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}
