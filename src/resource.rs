//! Formatting of stored records into API resources.
//!
//! Everything here is a pure transform. Request-specific inputs such as the
//! host a response is served from travel in an explicit [`RequestContext`].

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paging::{Page, PageResult};
use crate::PagingError;

static IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(<img.*?src\s*=\s*['"])(.*?)(['"])"#).expect("static regex is valid")
});

/// Errors raised while validating or formatting a request.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResourceError {
    /// A field the endpoint requires is absent from the request body.
    #[error("missing required request field: {0}")]
    MissingField(String),
}

impl ResourceError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            ResourceError::MissingField(_) => "missing_field",
        }
    }
}

/// Where the current request was served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Host header value, e.g. `example.com:8080`.
    pub host: String,
    /// Whether the request came in over TLS.
    pub https: bool,
}

impl RequestContext {
    /// Builds a context.
    pub fn new(host: impl Into<String>, https: bool) -> Self {
        Self {
            host: host.into(),
            https,
        }
    }

    /// Builds a context from a CGI-style `HTTPS` flag: any non-empty value
    /// other than `off` means TLS.
    pub fn from_https_flag(host: impl Into<String>, flag: Option<&str>) -> Self {
        let https = flag.is_some_and(|flag| !flag.is_empty() && !flag.eq_ignore_ascii_case("off"));
        Self::new(host, https)
    }

    /// `https` or `http`.
    pub fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    /// `scheme://host`, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.host)
    }

    /// Absolute URL of an uploaded file.
    ///
    /// Paths already served from this host are returned as they are. Otherwise
    /// every `public://` and `files/` is stripped and the rest is placed under
    /// `/files/`.
    pub fn file_url(&self, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }
        let base = self.base_url();
        if path.contains(&base) {
            return path.to_string();
        }
        let path = path.replace("public://", "").replace("files/", "");
        format!("{base}/files/{path}")
    }

    /// Absolute URL of a static asset.
    pub fn asset_url(&self, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }
        format!("{}/assets/{path}", self.base_url())
    }

    /// Rewrites the `src` of every `<img>` tag through [`Self::file_url`].
    pub fn filter_html(&self, text: &str) -> String {
        IMG_SRC
            .replace_all(text, |caps: &Captures<'_>| {
                format!("{}{}{}", &caps[1], self.file_url(&caps[2]), &caps[3])
            })
            .into_owned()
    }

    /// Projects a [`User`] into its public summary.
    pub fn simple_user(&self, user: &User) -> SimpleUser {
        SimpleUser {
            id: user.id,
            nickname: user.nickname.clone(),
            title: user.title.clone(),
            roles: user.roles.clone(),
            avatar: self.file_url(&user.small_avatar),
        }
    }
}

/// Client platform guessed from a user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// iPhone, iPad or iPod.
    Ios,
    /// Android phone or tablet.
    Android,
    /// Anything else.
    Unknown,
}

impl Device {
    /// Wire name of the device.
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Ios => "ios",
            Device::Android => "android",
            Device::Unknown => "unknown",
        }
    }
}

/// Guesses the client platform from a `User-Agent` header.
pub fn guess_device(user_agent: &str) -> Device {
    let user_agent = user_agent.to_ascii_lowercase();
    if ["iphone", "ipad", "ipod"]
        .iter()
        .any(|keyword| user_agent.contains(keyword))
    {
        return Device::Ios;
    }
    if user_agent.contains("android") {
        return Device::Android;
    }
    Device::Unknown
}

/// Fails on the first field in `required` that `request` lacks.
pub fn check_required_fields(
    required: &[&str],
    request: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), ResourceError> {
    match required.iter().find(|field| !request.contains_key(**field)) {
        Some(field) => Err(ResourceError::MissingField(field.to_string())),
        None => Ok(()),
    }
}

/// A stored user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account id.
    pub id: u64,
    /// Display name.
    pub nickname: String,
    /// Headline shown under the name.
    pub title: String,
    /// Role names.
    pub roles: Vec<String>,
    /// Stored path of the small avatar, possibly empty.
    pub small_avatar: String,
}

/// Public summary of a [`User`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleUser {
    /// Account id.
    pub id: u64,
    /// Display name.
    pub nickname: String,
    /// Headline shown under the name.
    pub title: String,
    /// Role names.
    pub roles: Vec<String>,
    /// Absolute avatar URL, empty when the user has none.
    pub avatar: String,
}

/// A projection from a stored shape to a client-facing one.
pub trait Formatter {
    /// Stored shape.
    type Input;
    /// Client-facing shape.
    type Output;

    /// Projects one item.
    fn format(&self, ctx: &RequestContext, input: &Self::Input) -> Self::Output;

    /// Projects every item, keeping order.
    fn format_all<'a>(
        &self,
        ctx: &RequestContext,
        inputs: impl IntoIterator<Item = &'a Self::Input>,
    ) -> Vec<Self::Output>
    where
        Self::Input: 'a,
    {
        inputs
            .into_iter()
            .map(|input| self.format(ctx, input))
            .collect()
    }

    /// Projects the resources of a page, keeping its paging state.
    fn format_page(&self, ctx: &RequestContext, page: &Page<Self::Input>) -> Page<Self::Output> {
        Page {
            resources: self.format_all(ctx, &page.resources),
            next: page.next,
        }
    }
}

/// [`Formatter`] producing [`SimpleUser`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleUserFormatter;

impl Formatter for SimpleUserFormatter {
    type Input = User;
    type Output = SimpleUser;

    fn format(&self, ctx: &RequestContext, input: &User) -> SimpleUser {
        ctx.simple_user(input)
    }
}

/// Response body of a listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    /// A cursor-paged listing: `{ "resources": [...], "next": {...} }`.
    Paged {
        /// Rows of this page.
        resources: Vec<T>,
        /// State for the following page.
        next: PageResult,
    },
    /// A listing with a total count: `{ "resources": [...], "total": n }`.
    Counted {
        /// Rows of this listing.
        resources: Vec<T>,
        /// Total number of rows, 0 when unknown.
        #[serde(default)]
        total: u64,
    },
}

impl<T> Envelope<T> {
    /// Wraps rows with a total count; `None` counts as 0.
    pub fn counted(resources: Vec<T>, total: Option<u64>) -> Self {
        Envelope::Counted {
            resources,
            total: total.unwrap_or(0),
        }
    }

    /// Rows carried by the envelope.
    pub fn resources(&self) -> &[T] {
        match self {
            Envelope::Paged { resources, .. } | Envelope::Counted { resources, .. } => resources,
        }
    }
}

impl<T> From<Page<T>> for Envelope<T> {
    fn from(page: Page<T>) -> Self {
        Envelope::Paged {
            resources: page.resources,
            next: page.next,
        }
    }
}

/// Error payload: `{ "code": ..., "message": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Error response body: `{ "error": { "code": ..., "message": ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error.
    pub error: ApiError,
}

impl ErrorEnvelope {
    /// Builds an error body.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiError {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

impl From<&PagingError> for ErrorEnvelope {
    fn from(err: &PagingError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<&ResourceError> for ErrorEnvelope {
    fn from(err: &ResourceError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::new("edu.example.com", false)
    }

    #[test]
    fn https_flag_parsing() {
        let host = "edu.example.com";
        assert!(!RequestContext::from_https_flag(host, None).https);
        assert!(!RequestContext::from_https_flag(host, Some("")).https);
        assert!(!RequestContext::from_https_flag(host, Some("OFF")).https);
        assert!(RequestContext::from_https_flag(host, Some("on")).https);
        assert!(RequestContext::from_https_flag(host, Some("1")).https);
        assert_eq!(
            RequestContext::from_https_flag(host, Some("on")).base_url(),
            "https://edu.example.com"
        );
    }

    #[test]
    fn file_urls() {
        let ctx = ctx();
        assert_eq!(ctx.file_url(""), "");
        assert_eq!(
            ctx.file_url("public://course/2024/cover.png"),
            "http://edu.example.com/files/course/2024/cover.png"
        );
        assert_eq!(
            ctx.file_url("files/user/avatar.jpg"),
            "http://edu.example.com/files/user/avatar.jpg"
        );
        assert_eq!(
            ctx.file_url("http://edu.example.com/files/a.png"),
            "http://edu.example.com/files/a.png"
        );
        assert_eq!(ctx.asset_url(""), "");
        assert_eq!(
            ctx.asset_url("img/default/avatar.png"),
            "http://edu.example.com/assets/img/default/avatar.png"
        );
    }

    #[test]
    fn filter_html_rewrites_image_sources_only() {
        let html = r#"<p>See <a href="files/doc.pdf">doc</a></p><IMG class="x" SRC = 'public://a.png'><img src="files/b.png"/><img src="public://a.png">"#;
        assert_eq!(
            ctx().filter_html(html),
            r#"<p>See <a href="files/doc.pdf">doc</a></p><IMG class="x" SRC = 'http://edu.example.com/files/a.png'><img src="http://edu.example.com/files/b.png"/><img src="http://edu.example.com/files/a.png">"#
        );
        assert_eq!(ctx().filter_html("no images"), "no images");
    }

    #[test]
    fn device_guessing() {
        assert_eq!(
            guess_device("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)"),
            Device::Ios
        );
        assert_eq!(guess_device("Mozilla/5.0 (iPad; CPU OS 16_0)"), Device::Ios);
        assert_eq!(
            guess_device("Mozilla/5.0 (Linux; Android 14; Pixel 8)"),
            Device::Android
        );
        assert_eq!(guess_device("curl/8.4.0"), Device::Unknown);
        assert_eq!(serde_json::to_value(Device::Ios).unwrap(), json!("ios"));
        assert_eq!(Device::Unknown.as_str(), "unknown");
    }

    #[test]
    fn required_fields() {
        let body = json!({ "title": "Intro", "price": 0 });
        let body = body.as_object().unwrap();
        assert_eq!(check_required_fields(&["title", "price"], body), Ok(()));
        assert_eq!(
            check_required_fields(&["title", "about", "cover"], body),
            Err(ResourceError::MissingField("about".to_string()))
        );
    }

    #[test]
    fn simple_users_resolve_avatars() {
        let users = vec![
            User {
                id: 7,
                nickname: "ada".to_string(),
                title: "editor".to_string(),
                roles: vec!["ROLE_USER".to_string(), "ROLE_TEACHER".to_string()],
                small_avatar: "public://user/7.png".to_string(),
            },
            User {
                id: 8,
                nickname: "bob".to_string(),
                title: String::new(),
                roles: vec!["ROLE_USER".to_string()],
                small_avatar: String::new(),
            },
        ];
        let simple = SimpleUserFormatter.format_all(&ctx(), &users);
        assert_eq!(simple[0].avatar, "http://edu.example.com/files/user/7.png");
        assert_eq!(simple[0].roles.len(), 2);
        assert_eq!(simple[1].avatar, "");
        assert_eq!(
            serde_json::to_value(&simple[1]).unwrap(),
            json!({ "id": 8, "nickname": "bob", "title": "", "roles": ["ROLE_USER"], "avatar": "" })
        );
    }

    #[test]
    fn envelopes() {
        let counted = Envelope::counted(vec!["a"], None);
        assert_eq!(
            serde_json::to_value(&counted).unwrap(),
            json!({ "resources": ["a"], "total": 0 })
        );

        let paged: Envelope<&str> = Page {
            resources: vec!["b"],
            next: PageResult::new(9, 0, 1, false).unwrap(),
        }
        .into();
        assert_eq!(paged.resources(), ["b"]);
        assert_eq!(
            serde_json::to_value(&paged).unwrap(),
            json!({ "resources": ["b"], "next": { "cursor": 9, "start": 0, "limit": 1, "eof": false } })
        );

        let error = ErrorEnvelope::from(&PagingError::InvalidArgument(
            "limit must be positive, got 0".into(),
        ));
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({ "error": { "code": "invalid_argument", "message": "invalid argument: limit must be positive, got 0" } })
        );
    }
}
