//! Turns a PROPFIND multistatus into resource descriptors.
//!
//! Providers disagree on which properties they send and how they spell
//! names, so every field except the location and name is optional. A value
//! that is present but malformed leaves its field unset; the entry is still
//! listed.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::property::{DavProperty, DAV_NS};
use crate::uri::{combine, last_segment, normalize_for_compare};
use crate::xml::{MultiStatus, MultiStatusEntry};

/// One listed resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDescriptor {
    /// Absolute location, resolved against the requested URL.
    pub href: Url,
    pub name: String,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub content_language: Option<String>,
    pub etag: Option<String>,
    pub created_at: Option<DateTime<FixedOffset>>,
    pub modified_at: Option<DateTime<FixedOffset>>,
    pub quota_used_bytes: Option<u64>,
    pub quota_available_bytes: Option<u64>,
    /// Every property not mapped to a field above.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<DavProperty>,
}

impl ResourceDescriptor {
    fn new(href: Url) -> Self {
        Self {
            href,
            name: String::new(),
            is_collection: false,
            content_length: None,
            content_type: None,
            content_language: None,
            etag: None,
            created_at: None,
            modified_at: None,
            quota_used_bytes: None,
            quota_available_bytes: None,
            properties: Vec::new(),
        }
    }

    /// Look up an unmapped property.
    pub fn property(&self, namespace: &str, name: &str) -> Option<&DavProperty> {
        self.properties.iter().find(|p| p.is(namespace, name))
    }
}

/// Decode the children listed in `multistatus`, in document order.
///
/// `requested` must be the URL the PROPFIND was sent to; relative hrefs are
/// resolved against it and the entry describing it is left out.
pub fn decode(multistatus: &MultiStatus, requested: &Url) -> Vec<ResourceDescriptor> {
    let root_key = normalize_for_compare(requested.as_str());

    multistatus
        .entries
        .iter()
        .filter_map(|entry| {
            let location = resolve(entry, requested)?;
            if normalize_for_compare(location.as_str()) == root_key {
                return None;
            }
            describe(entry, location)
        })
        .collect()
}

/// Decode the entry describing `requested` itself (a Depth 0 PROPFIND).
pub fn decode_self(multistatus: &MultiStatus, requested: &Url) -> Option<ResourceDescriptor> {
    let root_key = normalize_for_compare(requested.as_str());

    multistatus.entries.iter().find_map(|entry| {
        let location = resolve(entry, requested)?;
        if normalize_for_compare(location.as_str()) != root_key {
            return None;
        }
        describe(entry, location)
    })
}

fn resolve(entry: &MultiStatusEntry, requested: &Url) -> Option<Url> {
    let href = entry.href.as_deref().filter(|h| !h.is_empty())?;
    match combine(requested, href, false) {
        Ok(url) => Some(url),
        Err(e) => {
            debug!("Skipping entry with unresolvable href {:?}: {}", href, e);
            None
        }
    }
}

fn describe(entry: &MultiStatusEntry, location: Url) -> Option<ResourceDescriptor> {
    let props: Vec<&DavProperty> = entry
        .propstats
        .iter()
        .filter(|ps| !ps.is_not_found())
        .flat_map(|ps| ps.properties.iter())
        .collect();

    if props
        .iter()
        .any(|p| p.is_dav("ishidden") && is_true(&p.text))
    {
        debug!("Skipping hidden entry {}", location);
        return None;
    }

    let mut descriptor = ResourceDescriptor::new(location);
    let mut explicit_collection = None;
    let mut marked_collection = false;
    let mut display_name = None;
    let mut provider_name = None;

    for prop in props {
        if prop.namespace != DAV_NS {
            if prop.name == "name" && !prop.text.is_empty() && provider_name.is_none() {
                provider_name = Some(prop.text.clone());
            }
            descriptor.properties.push(prop.clone());
            continue;
        }

        match prop.name.as_str() {
            "displayname" => display_name = Some(prop.text.clone()),
            "iscollection" => explicit_collection = Some(is_true(&prop.text)),
            "resourcetype" => marked_collection = prop.dav_child("collection").is_some(),
            "getcontentlength" => descriptor.content_length = number(prop),
            "getcontenttype" => descriptor.content_type = text(prop),
            "getcontentlanguage" => descriptor.content_language = text(prop),
            "getetag" => descriptor.etag = text(prop),
            "creationdate" => {
                descriptor.created_at = date(prop, DateTime::parse_from_rfc3339);
            }
            "getlastmodified" => {
                descriptor.modified_at = date(prop, DateTime::parse_from_rfc2822);
            }
            "quota-used-bytes" => descriptor.quota_used_bytes = number(prop),
            "quota-available-bytes" => descriptor.quota_available_bytes = number(prop),
            "ishidden" => {}
            _ => descriptor.properties.push(prop.clone()),
        }
    }

    descriptor.is_collection = explicit_collection.unwrap_or(marked_collection);
    descriptor.name = display_name
        .filter(|n| !n.is_empty() && is_text_safe(n))
        .or(provider_name)
        .or_else(|| last_segment(&descriptor.href))
        .unwrap_or_default();

    Some(descriptor)
}

fn is_true(text: &str) -> bool {
    let text = text.trim();
    text == "1" || text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("t")
}

/// Rejects names carrying undecoded bytes (replacement or control
/// characters), which some providers leak into `displayname`.
fn is_text_safe(name: &str) -> bool {
    !name.chars().any(|c| c == char::REPLACEMENT_CHARACTER || c.is_control())
}

fn text(prop: &DavProperty) -> Option<String> {
    Some(prop.text.clone()).filter(|t| !t.is_empty())
}

fn number(prop: &DavProperty) -> Option<u64> {
    if prop.text.is_empty() {
        return None;
    }
    match prop.text.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            debug!("Ignoring malformed {} value {:?}", prop.name, prop.text);
            None
        }
    }
}

fn date<E>(
    prop: &DavProperty,
    parse: impl Fn(&str) -> Result<DateTime<FixedOffset>, E>,
) -> Option<DateTime<FixedOffset>> {
    if prop.text.is_empty() {
        return None;
    }
    match parse(&prop.text) {
        Ok(dt) => Some(dt),
        Err(_) => {
            debug!("Ignoring malformed {} value {:?}", prop.name, prop.text);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn listing(responses: &str) -> MultiStatus {
        let xml = format!(
            r#"<D:multistatus xmlns:D="DAV:" xmlns:P="urn:example:provider">{}</D:multistatus>"#,
            responses
        );
        MultiStatus::parse(&xml).unwrap()
    }

    fn response(href: &str, props: &str) -> String {
        format!(
            "<D:response><D:href>{}</D:href><D:propstat><D:prop>{}</D:prop>\
             <D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>",
            href, props
        )
    }

    #[test]
    fn test_decode_file_in_folder() {
        let ms = listing(&format!(
            "{}{}",
            response("http://host/folder/", "<D:resourcetype><D:collection/></D:resourcetype>"),
            response(
                "http://host/folder/file.txt",
                "<D:displayname>file.txt</D:displayname>"
            ),
        ));

        let items = decode(&ms, &url("http://host/folder/"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "file.txt");
        assert!(!items[0].is_collection);
        assert_eq!(items[0].href.as_str(), "http://host/folder/file.txt");
    }

    #[test]
    fn test_self_entry_only_yields_nothing() {
        let ms = listing(&response(
            "/folder/",
            "<D:resourcetype><D:collection/></D:resourcetype>",
        ));
        assert!(decode(&ms, &url("http://host/folder/")).is_empty());

        // trailing slash and port differences still identify the root
        let ms = listing(&response("http://host:80/folder", ""));
        assert!(decode(&ms, &url("http://host/folder/")).is_empty());
    }

    #[test]
    fn test_skips_missing_href() {
        let ms = listing(
            "<D:response><D:propstat><D:prop><D:displayname>ghost</D:displayname></D:prop>\
             <D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>\
             <D:response><D:href></D:href></D:response>",
        );
        assert!(decode(&ms, &url("http://host/folder/")).is_empty());
    }

    #[test]
    fn test_hidden_entries_are_skipped() {
        let ms = listing(&format!(
            "{}{}",
            response(
                "/folder/secret.txt",
                "<D:displayname>secret.txt</D:displayname><D:ishidden>1</D:ishidden>\
                 <D:getcontentlength>10</D:getcontentlength>"
            ),
            response("/folder/plain.txt", "<D:ishidden>0</D:ishidden>"),
        ));
        let items = decode(&ms, &url("http://host/folder/"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "plain.txt");
    }

    #[test]
    fn test_not_found_propstat_is_ignored() {
        let ms = listing(
            "<D:response><D:href>/folder/doc.txt</D:href>\
             <D:propstat><D:prop><D:getcontentlength>5</D:getcontentlength></D:prop>\
             <D:status>HTTP/1.1 200 OK</D:status></D:propstat>\
             <D:propstat><D:prop><D:ishidden>1</D:ishidden><D:displayname>bogus</D:displayname></D:prop>\
             <D:status>HTTP/1.1 404 Not Found</D:status></D:propstat>\
             </D:response>",
        );
        let items = decode(&ms, &url("http://host/folder/"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "doc.txt");
        assert_eq!(items[0].content_length, Some(5));
    }

    #[test]
    fn test_collection_precedence() {
        let ms = listing(&format!(
            "{}{}{}",
            response("/f/a/", "<D:resourcetype><D:collection/></D:resourcetype>"),
            response(
                "/f/b/",
                "<D:iscollection>0</D:iscollection><D:resourcetype><D:collection/></D:resourcetype>"
            ),
            response("/f/c", "<D:resourcetype/><D:iscollection>true</D:iscollection>"),
        ));
        let items = decode(&ms, &url("http://host/f/"));
        let flags: Vec<bool> = items.iter().map(|i| i.is_collection).collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn test_name_precedence() {
        let ms = listing(&format!(
            "{}{}{}{}",
            response(
                "/f/one",
                "<D:displayname>Display</D:displayname><P:name>Provider</P:name>"
            ),
            response("/f/two", "<D:displayname>Bad\u{FFFD}Name</D:displayname><P:name>Provider</P:name>"),
            response("/f/three", "<D:displayname></D:displayname>"),
            response("/f/My%20Folder/", "<D:resourcetype><D:collection/></D:resourcetype>"),
        ));
        let names: Vec<String> = decode(&ms, &url("http://host/f/"))
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["Display", "Provider", "three", "My Folder"]);
    }

    #[test]
    fn test_properties_are_mapped() {
        let ms = listing(&response(
            "/f/report.pdf",
            "<D:getcontentlength>1024</D:getcontentlength>\
             <D:getcontenttype>application/pdf</D:getcontenttype>\
             <D:getcontentlanguage>en</D:getcontentlanguage>\
             <D:getetag>\"abc\"</D:getetag>\
             <D:creationdate>2024-03-01T10:20:30Z</D:creationdate>\
             <D:getlastmodified>Mon, 12 Jan 1998 09:25:56 GMT</D:getlastmodified>\
             <D:quota-used-bytes>100</D:quota-used-bytes>\
             <D:quota-available-bytes>900</D:quota-available-bytes>\
             <D:supportedlock/>\
             <P:color>red</P:color>",
        ));
        let item = &decode(&ms, &url("http://host/f/"))[0];
        assert_eq!(item.content_length, Some(1024));
        assert_eq!(item.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(item.content_language.as_deref(), Some("en"));
        assert_eq!(item.etag.as_deref(), Some("\"abc\""));
        let created = item.created_at.unwrap();
        assert_eq!((created.year(), created.month(), created.day()), (2024, 3, 1));
        let modified = item.modified_at.unwrap();
        assert_eq!((modified.year(), modified.hour()), (1998, 9));
        assert_eq!(item.quota_used_bytes, Some(100));
        assert_eq!(item.quota_available_bytes, Some(900));
        assert_eq!(item.property("urn:example:provider", "color").unwrap().text, "red");
        assert!(item.property(DAV_NS, "supportedlock").is_some());
    }

    #[test]
    fn test_malformed_values_leave_field_unset() {
        let ms = listing(&response(
            "/f/odd.bin",
            "<D:getcontentlength>lots</D:getcontentlength>\
             <D:creationdate>yesterday</D:creationdate>\
             <D:getlastmodified>2024-01-01</D:getlastmodified>\
             <D:quota-available-bytes>-3</D:quota-available-bytes>\
             <D:getcontenttype>application/octet-stream</D:getcontenttype>",
        ));
        let items = decode(&ms, &url("http://host/f/"));
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.content_length, None);
        assert_eq!(item.created_at, None);
        assert_eq!(item.modified_at, None);
        assert_eq!(item.quota_available_bytes, None);
        assert_eq!(item.content_type.as_deref(), Some("application/octet-stream"));
    }

    #[test]
    fn test_document_order_and_relative_hrefs() {
        let ms = listing(&format!(
            "{}{}{}",
            response("zeta.txt", ""),
            response("/f/alpha.txt", ""),
            response("sub/", "<D:resourcetype><D:collection/></D:resourcetype>"),
        ));
        let hrefs: Vec<String> = decode(&ms, &url("http://host/f/"))
            .into_iter()
            .map(|i| i.href.to_string())
            .collect();
        assert_eq!(
            hrefs,
            vec![
                "http://host/f/zeta.txt",
                "http://host/f/alpha.txt",
                "http://host/f/sub/"
            ]
        );
    }

    #[test]
    fn test_decode_self() {
        let ms = listing(&format!(
            "{}{}",
            response(
                "/f/",
                "<D:displayname>Files</D:displayname><D:resourcetype><D:collection/></D:resourcetype>"
            ),
            response("/f/child", ""),
        ));
        let me = decode_self(&ms, &url("http://host/f/")).unwrap();
        assert_eq!(me.name, "Files");
        assert!(me.is_collection);

        assert!(decode_self(&ms, &url("http://host/elsewhere/")).is_none());
    }
}
