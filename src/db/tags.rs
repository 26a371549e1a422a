//! Object/scene tag storage for the Tagger's output.

use anyhow::{Context, Result};

use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Object,
    Scene,
}

impl TagKind {
    fn prefix(self) -> &'static str {
        match self {
            TagKind::Object => "object",
            TagKind::Scene => "scene",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            TagKind::Object => "object",
            TagKind::Scene => "scene",
        }
    }
}

/// Normalizes a label into the slug used for its deterministic tag id:
/// lowercase, spaces collapsed to underscores, anything else stripped.
fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

impl Database {
    /// Ensures the `ai_tags` row for `(kind, name)` exists and returns its
    /// deterministic id.
    pub fn ensure_tag(&self, kind: TagKind, name: &str) -> Result<String> {
        let id = format!("{}_{}", kind.prefix(), slugify(name));
        let mut conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO ai_tags (id, type, name) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, updated_at = NOW()
            "#,
            &[&id, &kind.as_str(), &name],
        )
        .context("upsert ai_tags row")?;
        Ok(id)
    }

    pub fn insert_photo_tag(&self, photo_id: &str, tag_id: &str, confidence: f32) -> Result<()> {
        let mut conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO photo_tags (photo_id, tag_id, confidence) VALUES ($1, $2, $3)
            ON CONFLICT (photo_id, tag_id) DO UPDATE SET confidence = EXCLUDED.confidence
            "#,
            &[&photo_id, &tag_id, &confidence],
        )
        .context("upsert photo_tag edge")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_multi_word_labels() {
        assert_eq!(slugify("living room"), "living_room");
        assert_eq!(slugify("Train Station"), "train_station");
        assert_eq!(slugify("café"), "café"); // non-ascii alphanumerics kept
    }
}
