//! Announcement board: parsed from messages in the announcement channel, persisted as JSON.
//!
//! Message format:
//!
//! ```text
//! # Title
//! Body text, one or more lines
//! https://example.com/image.png   (optional; otherwise the first image attachment)
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::channels::Attachment;

/// Reply posted when an announcement was accepted.
pub const ACCEPTED_REPLY: &str = "Announcement added to the website board.";

/// Reply posted when a message in the announcement channel could not be parsed.
pub const FORMAT_REPLY: &str =
    "Invalid announcement format. Use:\n# Title\nText\n[image link]";

/// One board entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnnouncementError {
    #[error("first line must be a `#` title")]
    MissingTitle,
    #[error("announcement body is empty")]
    MissingContent,
}

/// Parse an announcement from message text and attachments.
pub fn parse_announcement(
    text: &str,
    attachments: &[Attachment],
) -> Result<Announcement, AnnouncementError> {
    let mut lines = text.lines().map(str::trim);
    let title = lines
        .next()
        .and_then(|l| l.strip_prefix('#'))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(AnnouncementError::MissingTitle)?;

    let mut body = Vec::new();
    let mut image_url = None;
    for line in lines {
        if line.starts_with("http://") || line.starts_with("https://") {
            image_url = Some(line.to_string());
            break;
        }
        body.push(line);
    }
    let content = body.join("\n").trim().to_string();
    if content.is_empty() {
        return Err(AnnouncementError::MissingContent);
    }
    if image_url.is_none() {
        image_url = attachments
            .iter()
            .find(|a| {
                a.content_type
                    .as_deref()
                    .is_some_and(|t| t.starts_with("image"))
            })
            .map(|a| a.url.clone());
    }
    Ok(Announcement {
        title,
        content,
        image_url,
    })
}

/// Most-recent-first bounded list; can load/save from a JSON file.
pub struct AnnouncementStore {
    path: Option<PathBuf>,
    max: usize,
    entries: RwLock<Vec<Announcement>>,
}

impl AnnouncementStore {
    /// Load store from path; if file missing or invalid, starts empty.
    pub async fn load(path: impl AsRef<Path>, max: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut entries: Vec<Announcement> = match tokio::fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                log::warn!("ignoring unreadable announcements file {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        entries.truncate(max);
        Self {
            path: Some(path),
            max,
            entries: RwLock::new(entries),
        }
    }

    /// Store that is never written to disk.
    pub fn in_memory(max: usize) -> Self {
        Self {
            path: None,
            max,
            entries: RwLock::new(Vec::new()),
        }
    }

    async fn save(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let entries = self.entries.read().await;
        let json = serde_json::to_string_pretty(&*entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await
    }

    /// Put an announcement at the front, drop the oldest beyond the limit, and persist.
    pub async fn add(&self, announcement: Announcement) -> anyhow::Result<()> {
        {
            let mut entries = self.entries.write().await;
            entries.insert(0, announcement);
            entries.truncate(self.max);
        }
        self.save().await.map_err(anyhow::Error::from)
    }

    /// Current board, newest first.
    pub async fn list(&self) -> Vec<Announcement> {
        self.entries.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(url: &str) -> Attachment {
        Attachment {
            url: url.to_string(),
            content_type: Some("image/png".to_string()),
        }
    }

    #[test]
    fn parses_title_body_and_link() {
        let a = parse_announcement(
            "# Maintenance\nServers restart at 10:00.\nBe ready.\nhttps://img.example/x.png\nignored",
            &[],
        )
        .unwrap();
        assert_eq!(a.title, "Maintenance");
        assert_eq!(a.content, "Servers restart at 10:00.\nBe ready.");
        assert_eq!(a.image_url.as_deref(), Some("https://img.example/x.png"));
    }

    #[test]
    fn falls_back_to_image_attachment() {
        let attachments = vec![
            Attachment {
                url: "https://cdn.example/notes.txt".to_string(),
                content_type: Some("text/plain".to_string()),
            },
            image("https://cdn.example/banner.png"),
        ];
        let a = parse_announcement("#Event\nJoin us", &attachments).unwrap();
        assert_eq!(a.image_url.as_deref(), Some("https://cdn.example/banner.png"));

        let a = parse_announcement("#Event\nJoin us\nhttp://link.example", &attachments).unwrap();
        assert_eq!(a.image_url.as_deref(), Some("http://link.example"));
    }

    #[test]
    fn requires_title_and_body() {
        assert_eq!(
            parse_announcement("No hash\nbody", &[]).unwrap_err(),
            AnnouncementError::MissingTitle
        );
        assert_eq!(
            parse_announcement("#   \nbody", &[]).unwrap_err(),
            AnnouncementError::MissingTitle
        );
        assert_eq!(
            parse_announcement("# Title\n\n  ", &[]).unwrap_err(),
            AnnouncementError::MissingContent
        );
        assert_eq!(
            parse_announcement("# Title\nhttps://only.link", &[image("https://x")]).unwrap_err(),
            AnnouncementError::MissingContent
        );
    }

    fn entry(n: usize) -> Announcement {
        Announcement {
            title: format!("t{}", n),
            content: "c".to_string(),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn keeps_newest_first_within_limit() {
        let store = AnnouncementStore::in_memory(4);
        for n in 0..6 {
            store.add(entry(n)).await.unwrap();
        }
        let titles: Vec<String> = store.list().await.into_iter().map(|a| a.title).collect();
        assert_eq!(titles, vec!["t5", "t4", "t3", "t2"]);
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = std::env::temp_dir().join(format!("helpdesk-ann-{}", uuid::Uuid::new_v4()));
        let path = dir.join("announcements.json");
        let store = AnnouncementStore::load(&path, 2).await;
        assert!(store.list().await.is_empty());
        store.add(entry(1)).await.unwrap();
        store.add(entry(2)).await.unwrap();

        let reloaded = AnnouncementStore::load(&path, 1).await;
        assert_eq!(reloaded.list().await, vec![entry(2)]);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn strips_only_one_leading_hash() {
        let a = parse_announcement("## Patch notes\nFixed login.", &[]).unwrap();
        assert_eq!(a.title, "# Patch notes");
    }
}
