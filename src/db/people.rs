//! Person/Face storage backing the online clusterer and the per-photo
//! face edge writes.

use anyhow::{Context, Result};
use serde::Serialize;

use super::Database;
use crate::faces::BoundingBox;

#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Face {
    pub id: String,
    pub person_id: String,
    pub embedding: Vec<f32>,
}

impl Database {
    /// Loads the full face gallery: every (person_id, face_id, embedding)
    /// triple previously written by the clusterer. Used once to seed the
    /// in-memory gallery the clusterer scans against.
    pub fn load_face_gallery(&self) -> Result<Vec<Face>> {
        let mut conn = self.conn()?;
        let rows = conn
            .query(
                "SELECT id, person_id, embedding FROM faces WHERE embedding IS NOT NULL",
                &[],
            )
            .context("load face gallery")?;

        Ok(rows
            .into_iter()
            .map(|row| Face {
                id: row.get(0),
                person_id: row.get(1),
                embedding: row.get::<_, Vec<f32>>(2),
            })
            .collect())
    }

    pub fn person_count(&self) -> Result<i64> {
        let mut conn = self.conn()?;
        let row = conn
            .query_one("SELECT COUNT(*) FROM persons", &[])
            .context("count persons")?;
        Ok(row.get(0))
    }

    pub fn insert_person(&self, id: &str, name: &str) -> Result<()> {
        let mut conn = self.conn()?;
        conn.execute(
            "INSERT INTO persons (id, name, name_source) VALUES ($1, $2, 'auto')
             ON CONFLICT (id) DO NOTHING",
            &[&id, &name],
        )
        .context("insert person")?;
        Ok(())
    }

    pub fn insert_face(&self, id: &str, person_id: &str, embedding: &[f32]) -> Result<()> {
        let mut conn = self.conn()?;
        conn.execute(
            "INSERT INTO faces (id, person_id, embedding) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO NOTHING",
            &[&id, &person_id, &embedding],
        )
        .context("insert face")?;
        Ok(())
    }

    /// Writes the photo-face edge produced for one detection. Natural
    /// uniqueness on (photo_id, face_id): a conflicting insert is skipped
    /// rather than treated as an error.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_photo_face(
        &self,
        photo_id: &str,
        face_id: &str,
        bbox: &BoundingBox,
        embedding: &[f32],
        confidence: f32,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO photo_faces (photo_id, face_id, box_x, box_y, box_w, box_h, embedding, confidence)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (photo_id, face_id) DO NOTHING
            "#,
            &[
                &photo_id,
                &face_id,
                &(bbox.x as f64),
                &(bbox.y as f64),
                &(bbox.w as f64),
                &(bbox.h as f64),
                &embedding,
                &confidence,
            ],
        )
        .context("insert photo_face edge")?;
        Ok(())
    }
}
