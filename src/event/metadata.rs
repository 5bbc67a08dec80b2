use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Content metadata shared by articles and videos.
///
/// Only needed for content the collector cannot crawl itself (app-only
/// content); otherwise leave it out of pageviews entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    /// Canonical url of the content. For videos this is the video id.
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub thumb_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub publication_date_millis: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    #[serde(flatten)]
    pub content: ContentMetadata,
    pub duration_seconds: u32,
}

impl VideoMetadata {
    pub fn new(video_id: impl Into<String>, duration_seconds: u32) -> Self {
        Self {
            content: ContentMetadata {
                link: Some(video_id.into()),
                ..ContentMetadata::default()
            },
            duration_seconds,
        }
    }

    pub fn video_id(&self) -> Option<&str> {
        self.content.link.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Metadata {
    Article(ContentMetadata),
    Video(VideoMetadata),
}

impl Metadata {
    pub fn content(&self) -> &ContentMetadata {
        match self {
            Self::Article(content) => content,
            Self::Video(video) => &video.content,
        }
    }

    /// Wire shape of the metadata block attached to an event.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut output = Map::new();
        write_content(self.content(), &mut output);
        match self {
            Self::Article(_) => {}
            Self::Video(video) => {
                output.insert("duration".to_string(), Value::from(video.duration_seconds));
            }
        }
        output
    }
}

impl From<ContentMetadata> for Metadata {
    fn from(content: ContentMetadata) -> Self {
        Self::Article(content)
    }
}

impl From<VideoMetadata> for Metadata {
    fn from(video: VideoMetadata) -> Self {
        Self::Video(video)
    }
}

fn write_content(content: &ContentMetadata, output: &mut Map<String, Value>) {
    if let Some(authors) = &content.authors {
        output.insert("authors".to_string(), Value::from(authors.clone()));
    }
    if let Some(link) = &content.link {
        output.insert("link".to_string(), Value::from(link.clone()));
    }
    if let Some(section) = &content.section {
        output.insert("section".to_string(), Value::from(section.clone()));
    }
    if let Some(tags) = &content.tags {
        output.insert("tags".to_string(), Value::from(tags.clone()));
    }
    if let Some(thumb_url) = &content.thumb_url {
        output.insert("thumb_url".to_string(), Value::from(thumb_url.clone()));
    }
    if let Some(title) = &content.title {
        output.insert("title".to_string(), Value::from(title.clone()));
    }
    if let Some(millis) = content.publication_date_millis {
        output.insert("pub_date_tmsp".to_string(), Value::from(millis / 1000));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn article_metadata_skips_missing_fields() {
        let metadata = Metadata::Article(ContentMetadata {
            authors: Some(vec!["Ann".to_string()]),
            link: Some("https://example.com/a".to_string()),
            title: Some("A".to_string()),
            publication_date_millis: Some(1_700_000_123_456),
            ..ContentMetadata::default()
        });

        assert_eq!(
            Value::Object(metadata.to_map()),
            json!({
                "authors": ["Ann"],
                "link": "https://example.com/a",
                "title": "A",
                "pub_date_tmsp": 1_700_000_123
            })
        );
    }

    #[test]
    fn video_metadata_adds_duration() {
        let metadata = Metadata::from(VideoMetadata::new("video-7", 90));

        assert_eq!(
            Value::Object(metadata.to_map()),
            json!({ "link": "video-7", "duration": 90 })
        );
    }
}
