//! Request header profiles.
//!
//! Every request is sent with the common browser headers plus an overlay for
//! its [`RequestRole`]. A site contributes one [`HeaderProfile`] constant; the
//! merge logic here never changes when a site is added.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Browser identity shared by every site and role.
pub const COMMON_HEADERS: &[(&str, &str)] = &[
    (
        "user-agent",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36",
    ),
    ("accept-language", "en-US,en;q=0.9"),
    ("sec-ch-ua", "\"Not=A?Brand\";v=\"24\", \"Chromium\";v=\"140\""),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Linux\""),
];

/// What a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestRole {
    /// JSON listing / API call.
    Api,
    /// HTML page navigation.
    Page,
    /// Binary image fetch.
    Image,
}

/// Per-site header overlays, one per role.
///
/// Names must be lowercase; values must be visible ASCII.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderProfile {
    /// Site identifier, for logs.
    pub site: &'static str,
    /// Overlay for [`RequestRole::Api`].
    pub api: &'static [(&'static str, &'static str)],
    /// Overlay for [`RequestRole::Page`].
    pub page: &'static [(&'static str, &'static str)],
    /// Overlay for [`RequestRole::Image`].
    pub image: &'static [(&'static str, &'static str)],
}

impl HeaderProfile {
    /// Common headers merged with the overlay for `role`; overlay wins.
    #[must_use]
    pub fn headers(&self, role: RequestRole) -> HeaderMap {
        let overlay = match role {
            RequestRole::Api => self.api,
            RequestRole::Page => self.page,
            RequestRole::Image => self.image,
        };

        let mut map = HeaderMap::with_capacity(COMMON_HEADERS.len() + overlay.len());
        for &(name, value) in COMMON_HEADERS.iter().chain(overlay) {
            map.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        map
    }
}
