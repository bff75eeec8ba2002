//! Threads content model
//!
//! Posts and replies are deserialized straight from Graph API payloads. The
//! API is loose about a few fields (`is_quote_post` arrives as a bool or an
//! integer, `children` arrives wrapped in a `{"data": [...]}` envelope), so
//! those are normalized here. Nested records stay structured until the
//! storage layer flattens them to JSON text.

use serde::{Deserialize, Deserializer, Serialize};

/// Media type reported by the Threads API
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MediaType {
    TextPost,
    Image,
    Video,
    CarouselAlbum,
    Audio,
    QuoteFacade,
    /// A repost; it has no conversation of its own
    RepostFacade,
    /// Anything the API adds later
    Other(String),
}

impl MediaType {
    pub fn as_str(&self) -> &str {
        match self {
            MediaType::TextPost => "TEXT_POST",
            MediaType::Image => "IMAGE",
            MediaType::Video => "VIDEO",
            MediaType::CarouselAlbum => "CAROUSEL_ALBUM",
            MediaType::Audio => "AUDIO",
            MediaType::QuoteFacade => "QUOTE_FACADE",
            MediaType::RepostFacade => "REPOST_FACADE",
            MediaType::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "TEXT_POST" => MediaType::TextPost,
            "IMAGE" => MediaType::Image,
            "VIDEO" => MediaType::Video,
            "CAROUSEL_ALBUM" => MediaType::CarouselAlbum,
            "AUDIO" => MediaType::Audio,
            "QUOTE_FACADE" => MediaType::QuoteFacade,
            "REPOST_FACADE" => MediaType::RepostFacade,
            other => MediaType::Other(other.to_string()),
        }
    }
}

impl From<String> for MediaType {
    fn from(s: String) -> Self {
        MediaType::parse(&s)
    }
}

impl From<MediaType> for String {
    fn from(media_type: MediaType) -> Self {
        media_type.as_str().to_string()
    }
}

/// One item of a carousel post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildMedia {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
}

/// Reference to another post (root of a conversation, or the replied-to item)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub id: String,
}

/// A post owned by the authenticated account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_children",
        skip_serializing_if = "Option::is_none"
    )]
    pub children: Option<Vec<ChildMedia>>,
    /// Origin-server time as sent by the API (e.g. `2024-07-01T12:00:00+0000`)
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_quote_post: bool,
}

impl Post {
    /// Minimal post, mostly useful for tests and fixtures
    pub fn new(id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: None,
            media_type: Some(MediaType::TextPost),
            media_url: None,
            thumbnail_url: None,
            permalink: None,
            children: None,
            timestamp: Some(timestamp.into()),
            is_quote_post: false,
        }
    }
}

/// A reply from a post's conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub shortcode: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_children",
        skip_serializing_if = "Option::is_none"
    )]
    pub children: Option<Vec<ChildMedia>>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub has_replies: bool,
    #[serde(default)]
    pub root_post: Option<PostRef>,
    #[serde(default)]
    pub replied_to: Option<PostRef>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_reply: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_reply_owned_by_me: bool,
    #[serde(default)]
    pub hide_status: Option<String>,
}

impl Reply {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: Some(text.into()),
            username: None,
            permalink: None,
            timestamp: None,
            media_type: Some(MediaType::TextPost),
            media_url: None,
            shortcode: None,
            thumbnail_url: None,
            children: None,
            has_replies: false,
            root_post: None,
            replied_to: None,
            is_reply: true,
            is_reply_owned_by_me: false,
            hide_status: None,
        }
    }
}

/// Accepts `{"data": [...]}`, a bare list, or null
fn deserialize_children<'de, D>(deserializer: D) -> Result<Option<Vec<ChildMedia>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Children {
        Envelope { data: Vec<ChildMedia> },
        List(Vec<ChildMedia>),
    }

    Ok(
        Option::<Children>::deserialize(deserializer)?.map(|children| match children {
            Children::Envelope { data } => data,
            Children::List(list) => list,
        }),
    )
}

/// Accepts `true`/`false`, `0`/`1`, or null (false)
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(i)) => i != 0,
        None => false,
    })
}
