//! Lexical forms of a WebDAV lock token.
//!
//! A lock token is an absolute URI (`opaquelocktoken:...`, `urn:uuid:...`).
//! On the wire it travels as a Coded-URL (`<uri>`) in the `Lock-Token`
//! header and as a list (`(<uri>)`) inside `If` headers. Each wrapper owns
//! exactly one instance of the layer below it and formats back to the
//! exact text it was parsed from.

use std::fmt;

use url::Url;

/// An absolute URI, kept verbatim.
///
/// Validity is checked with [`Url::parse`], but the original text is kept
/// instead of the normalized serialization so that it can be echoed back to
/// the server byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbsoluteUri(String);

impl AbsoluteUri {
    /// Parse `text` as an absolute URI. Returns `None` for relative
    /// references, empty text, or text carrying whitespace.
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() || text.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return None;
        }
        Url::parse(text).ok()?;
        Some(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AbsoluteUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An absolute URI in angle brackets (RFC 4918 Coded-URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodedUrl(AbsoluteUri);

impl CodedUrl {
    pub fn new(uri: AbsoluteUri) -> Self {
        Self(uri)
    }

    /// Parse `<absolute-uri>`. Exactly one layer of brackets is stripped.
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text.strip_prefix('<')?.strip_suffix('>')?;
        AbsoluteUri::parse(inner).map(Self)
    }

    pub fn uri(&self) -> &AbsoluteUri {
        &self.0
    }
}

impl fmt::Display for CodedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// A Coded-URL in parentheses: one untagged condition list of an `If`
/// header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConditionalList(CodedUrl);

impl ConditionalList {
    pub fn new(coded: CodedUrl) -> Self {
        Self(coded)
    }

    /// Parse `(<absolute-uri>)`.
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text.strip_prefix('(')?.strip_suffix(')')?;
        CodedUrl::parse(inner).map(Self)
    }

    pub fn coded(&self) -> &CodedUrl {
        &self.0
    }
}

impl fmt::Display for ConditionalList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0)
    }
}

/// The credential granted by a successful LOCK.
///
/// Both wire projections are derived once at construction and cannot be
/// changed independently of the underlying URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken {
    list: ConditionalList,
    header: String,
    condition: String,
}

impl LockToken {
    pub fn new(uri: AbsoluteUri) -> Self {
        let coded = CodedUrl::new(uri);
        let header = coded.to_string();
        let list = ConditionalList::new(coded);
        let condition = list.to_string();
        Self {
            list,
            header,
            condition,
        }
    }

    /// Build a token from a bare URI, as found in a lockdiscovery `href`.
    pub fn parse(text: &str) -> Option<Self> {
        AbsoluteUri::parse(text).map(Self::new)
    }

    /// Build a token from a `Lock-Token` response header value.
    pub fn parse_header(text: &str) -> Option<Self> {
        CodedUrl::parse(text.trim()).map(|coded| Self::new(coded.uri().clone()))
    }

    pub fn uri(&self) -> &AbsoluteUri {
        self.list.coded().uri()
    }

    pub fn coded(&self) -> &CodedUrl {
        self.list.coded()
    }

    pub fn conditional_list(&self) -> &ConditionalList {
        &self.list
    }

    /// Value for the `Lock-Token` request header (`<uri>`).
    pub fn header_value(&self) -> &str {
        &self.header
    }

    /// Untagged `If` list for this token (`(<uri>)`).
    pub fn if_value(&self) -> &str {
        &self.condition
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.uri(), f)
    }
}

/// Build an `If` header for a request whose source and/or destination are
/// covered by held locks.
///
/// A lone source token is sent as an untagged list, which applies to the
/// request URI. A destination token is always tagged with its resource, and
/// when both apply each list stays separately delimited:
/// `<src> (<token>) <dst> (<token>)`.
pub fn if_header(
    source: Option<(&Url, &LockToken)>,
    destination: Option<(&Url, &LockToken)>,
) -> Option<String> {
    match (source, destination) {
        (None, None) => None,
        (Some((_, token)), None) => Some(token.if_value().to_string()),
        (None, Some((dst, token))) => Some(format!("<{}> {}", dst, token.if_value())),
        (Some((src, src_token)), Some((dst, dst_token))) => Some(format!(
            "<{}> {} <{}> {}",
            src,
            src_token.if_value(),
            dst,
            dst_token.if_value()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absolute() {
        assert!(AbsoluteUri::parse("http://host/res").is_some());
        assert!(AbsoluteUri::parse("opaquelocktoken:e71d4fae-5dec-22d6-fea5-00a0c91e6be4").is_some());
        assert!(AbsoluteUri::parse("urn:uuid:f81d4fae-7dec-11d0-a765-00a0c91e6bf6").is_some());

        assert_eq!(AbsoluteUri::parse("/relative/path"), None);
        assert_eq!(AbsoluteUri::parse("res"), None);
        assert_eq!(AbsoluteUri::parse(""), None);
        assert_eq!(AbsoluteUri::parse(" http://host/res"), None);
        assert_eq!(AbsoluteUri::parse("http://host/a b"), None);
    }

    #[test]
    fn test_parse_coded() {
        let coded = CodedUrl::parse("<http://host/res>").unwrap();
        assert_eq!(coded.uri().as_str(), "http://host/res");

        assert_eq!(CodedUrl::parse("http://host/res"), None);
        assert_eq!(CodedUrl::parse("<http://host/res"), None);
        assert_eq!(CodedUrl::parse("http://host/res>"), None);
        assert_eq!(CodedUrl::parse("<<http://host/res>>"), None);
        assert_eq!(CodedUrl::parse("</relative>"), None);
        assert_eq!(CodedUrl::parse("<>"), None);
    }

    #[test]
    fn test_parse_conditional_list() {
        let list = ConditionalList::parse("(<opaquelocktoken:abc-123>)").unwrap();
        assert_eq!(list.coded().uri().as_str(), "opaquelocktoken:abc-123");

        assert_eq!(ConditionalList::parse("<opaquelocktoken:abc-123>"), None);
        assert_eq!(ConditionalList::parse("(opaquelocktoken:abc-123)"), None);
        assert_eq!(ConditionalList::parse("(<opaquelocktoken:abc-123>"), None);
        assert_eq!(ConditionalList::parse("()"), None);
    }

    #[test]
    fn test_format_reproduces_input() {
        let inputs = [
            "http://host/res",
            "HTTP://Host:8080/a%20b/?q=1",
            "opaquelocktoken:e71d4fae-5dec-22d6-fea5-00a0c91e6be4",
            "urn:uuid:f81d4fae-7dec-11d0-a765-00a0c91e6bf6",
        ];
        for input in inputs {
            assert_eq!(AbsoluteUri::parse(input).unwrap().to_string(), input);

            let coded = format!("<{}>", input);
            assert_eq!(CodedUrl::parse(&coded).unwrap().to_string(), coded);

            let list = format!("(<{}>)", input);
            assert_eq!(ConditionalList::parse(&list).unwrap().to_string(), list);
        }
    }

    #[test]
    fn test_coded_scenario() {
        let coded = CodedUrl::parse("<http://host/res>").unwrap();
        assert_eq!(coded.uri().to_string(), "http://host/res");

        let list = ConditionalList::new(coded);
        assert_eq!(list.to_string(), "(<http://host/res>)");
    }

    #[test]
    fn test_lock_token_projections() {
        let token = LockToken::parse("opaquelocktoken:abc-123").unwrap();
        assert_eq!(token.uri().as_str(), "opaquelocktoken:abc-123");
        assert_eq!(token.header_value(), "<opaquelocktoken:abc-123>");
        assert_eq!(token.if_value(), "(<opaquelocktoken:abc-123>)");
        assert_eq!(token.coded().to_string(), token.header_value());
        assert_eq!(token.conditional_list().to_string(), token.if_value());

        let from_header = LockToken::parse_header(" <opaquelocktoken:abc-123> ").unwrap();
        assert_eq!(from_header, token);
        assert_eq!(LockToken::parse_header("opaquelocktoken:abc-123"), None);
    }

    #[test]
    fn test_if_header() {
        let src = Url::parse("http://host/a/doc.txt").unwrap();
        let dst = Url::parse("http://host/b/doc.txt").unwrap();
        let t1 = LockToken::parse("opaquelocktoken:1").unwrap();
        let t2 = LockToken::parse("opaquelocktoken:2").unwrap();

        assert_eq!(if_header(None, None), None);
        assert_eq!(
            if_header(Some((&src, &t1)), None).as_deref(),
            Some("(<opaquelocktoken:1>)")
        );
        assert_eq!(
            if_header(None, Some((&dst, &t2))).as_deref(),
            Some("<http://host/b/doc.txt> (<opaquelocktoken:2>)")
        );
        assert_eq!(
            if_header(Some((&src, &t1)), Some((&dst, &t2))).as_deref(),
            Some(
                "<http://host/a/doc.txt> (<opaquelocktoken:1>) \
                 <http://host/b/doc.txt> (<opaquelocktoken:2>)"
            )
        );
    }
}
