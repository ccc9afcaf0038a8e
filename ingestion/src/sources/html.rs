//! Minimal HTML scanning for the health.gov.au listing pages.
//!
//! Only two things are needed: the links inside the collection's
//! `paragraphs-items` block, and the spreadsheet link on each resource page.
//! Both are found by scanning tags and their attributes.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::collections::HashMap;

use crate::error::{FetchError, FetchResult};

/// MIME type the resource pages advertise for xlsx attachments.
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

static ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<a\b([^>]*)>").unwrap());

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});

static DIV_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<(/?)div\b[^>]*>").unwrap());

/// Attributes of a tag's inner text (`href="..." class="..."`), names lowercased.
pub fn attributes(tag_inner: &str) -> HashMap<String, String> {
    ATTRIBUTE
        .captures_iter(tag_inner)
        .filter_map(|c| {
            let name = c.get(1)?.as_str().to_ascii_lowercase();
            let value = c.get(2).or_else(|| c.get(3)).or_else(|| c.get(4))?;
            Some((name, decode_entities(value.as_str())))
        })
        .collect()
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

fn has_class(attrs: &HashMap<String, String>, class: &str) -> bool {
    attrs
        .get("class")
        .is_some_and(|c| c.split_whitespace().any(|x| x == class))
}

/// Contents of the first `<div>` carrying `class`, nested divs included.
pub fn div_with_class<'a>(html: &'a str, class: &str) -> Option<&'a str> {
    let mut depth = 0usize;
    let mut start = None;

    for m in DIV_TAG.captures_iter(html) {
        let whole = m.get(0)?;
        let closing = !m[1].is_empty();
        match (start, closing) {
            (None, false) => {
                let inner = &whole.as_str()[4..whole.as_str().len() - 1];
                if has_class(&attributes(inner), class) {
                    start = Some(whole.end());
                    depth = 1;
                }
            }
            (None, true) => {}
            (Some(_), false) => depth += 1,
            (Some(s), true) => {
                depth -= 1;
                if depth == 0 {
                    return Some(&html[s..whole.start()]);
                }
            }
        }
    }

    // Unclosed block: take the rest of the document
    start.map(|s| &html[s..])
}

/// Every `href` of the anchors in `html`, in document order.
pub fn anchor_hrefs(html: &str) -> Vec<String> {
    ANCHOR
        .captures_iter(html)
        .filter_map(|c| attributes(&c[1]).remove("href"))
        .filter(|h| !h.is_empty() && !h.starts_with('#'))
        .collect()
}

/// Links listed in a collection page's `paragraphs-items` block.
pub fn collection_links(html: &str) -> Option<Vec<String>> {
    div_with_class(html, "paragraphs-items").map(anchor_hrefs)
}

/// The xlsx download link on a resource page.
pub fn xlsx_link(html: &str) -> Option<String> {
    ANCHOR.captures_iter(html).find_map(|c| {
        let mut attrs = attributes(&c[1]);
        let is_xlsx = has_class(&attrs, "health-file__link")
            && attrs.get("data-filetype").map(String::as_str) == Some(XLSX_MIME);
        if is_xlsx {
            attrs.remove("href")
        } else {
            None
        }
    })
}

/// Resolve `href` against the page it was found on.
pub fn resolve_url(base: &str, href: &str) -> FetchResult<String> {
    let invalid = |message: String| FetchError::InvalidUrl {
        base: base.to_string(),
        href: href.to_string(),
        message,
    };
    let resolved = Url::parse(base)
        .and_then(|b| b.join(href))
        .map_err(|e| invalid(e.to_string()))?;
    Ok(resolved.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
<html><body>
  <nav><a href="/about">About</a></nav>
  <div class="field paragraphs-items">
    <div class="item"><a href="/resources/publications/covid-19-vaccine-rollout-update-5-september-2021">5 September</a></div>
    <div class="item"><A HREF='/resources/publications/covid-19-vaccine-rollout-update-4-september-2021'>4 September</A></div>
  </div>
  <footer><a href="/contact">Contact</a></footer>
</body></html>"#;

    const RESOURCE: &str = r#"
<a class="health-file__link" data-filetype="application/pdf" href="/file.pdf">PDF</a>
<a class="health-file__link" data-filetype="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
   href="/sites/default/files/documents/2021/09/covid-19-vaccine-rollout-update-5-september-2021.xlsx">XLSX</a>
"#;

    #[test]
    fn test_collection_links_scoped_to_block() {
        let links = collection_links(LISTING).unwrap();
        assert_eq!(links.len(), 2);
        assert!(links[0].ends_with("5-september-2021"));
        assert!(links[1].ends_with("4-september-2021"));
    }

    #[test]
    fn test_collection_links_missing_block() {
        assert!(collection_links("<div class=\"other\"></div>").is_none());
    }

    #[test]
    fn test_xlsx_link() {
        let link = xlsx_link(RESOURCE).unwrap();
        assert!(link.ends_with("5-september-2021.xlsx"));
        assert!(xlsx_link("<a href=\"/x.xlsx\">x</a>").is_none());
    }

    #[test]
    fn test_attributes_decode_entities() {
        let attrs = attributes(r#" href="/a?x=1&amp;y=2" data-id=7"#);
        assert_eq!(attrs["href"], "/a?x=1&y=2");
        assert_eq!(attrs["data-id"], "7");
    }

    #[test]
    fn test_resolve_url() {
        let base = "https://www.health.gov.au/";
        assert_eq!(
            resolve_url(base, "/resources/x").unwrap(),
            "https://www.health.gov.au/resources/x"
        );
        assert_eq!(
            resolve_url(base, "https://other.org/f.xlsx").unwrap(),
            "https://other.org/f.xlsx"
        );
        assert_eq!(
            resolve_url(base, "files/a.xlsx").unwrap(),
            "https://www.health.gov.au/files/a.xlsx"
        );
    }

    #[test]
    fn test_resolve_url_relative_to_page() {
        let page = "https://www.health.gov.au/resources/collections/c";
        assert_eq!(
            resolve_url(page, "../publications/p").unwrap(),
            "https://www.health.gov.au/resources/publications/p"
        );
        assert_eq!(
            resolve_url(page, "?page=2").unwrap(),
            "https://www.health.gov.au/resources/collections/c?page=2"
        );
        assert_eq!(
            resolve_url(page, "//cdn.health.gov.au/a.xlsx").unwrap(),
            "https://cdn.health.gov.au/a.xlsx"
        );
    }

    #[test]
    fn test_resolve_url_bad_base() {
        let err = resolve_url("not a url", "/x").unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }
}
