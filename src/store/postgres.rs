//! Postgres-backed [`SlideStore`] over the `media`, `slides` and
//! `modules_rels` tables (see `migrations/`).

use super::{
    InstalledPage, MediaSource, PageInstall, PersistenceResult, PreviousSlide, RetirementReport,
    SlideStore, StoreClaim,
};
use crate::error::PersistenceError;
use crate::model::{
    MediaRecord, ModuleSlideLink, ModuleSummary, SizeVariant, SlideKind, SlideRecord,
    DEFAULT_FOCAL_POINT, SLIDES_PATH,
};
use crate::naming::DocumentName;
use crate::pipeline::derive::{CARD, THUMBNAIL};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres};
use std::collections::HashSet;

#[derive(Debug, sqlx::FromRow)]
struct MediaRow {
    id: i64,
    url: Option<String>,
    filename: String,
    mime_type: String,
    filesize: i64,
    width: i32,
    height: i32,
    focal_x: i32,
    focal_y: i32,
    sizes_thumbnail_width: Option<i32>,
    sizes_thumbnail_height: Option<i32>,
    sizes_thumbnail_mime_type: Option<String>,
    sizes_thumbnail_filesize: Option<i64>,
    sizes_thumbnail_filename: Option<String>,
    sizes_card_width: Option<i32>,
    sizes_card_height: Option<i32>,
    sizes_card_mime_type: Option<String>,
    sizes_card_filesize: Option<i64>,
    sizes_card_filename: Option<String>,
}

fn size_variant(
    name: &str,
    width: Option<i32>,
    height: Option<i32>,
    mime_type: Option<String>,
    filesize: Option<i64>,
    filename: Option<String>,
) -> Option<SizeVariant> {
    Some(SizeVariant {
        name: name.to_string(),
        width: width? as u32,
        height: height? as u32,
        filename: filename?,
        filesize: filesize.unwrap_or(0) as u64,
        mime_type: mime_type.unwrap_or_else(|| "image/jpeg".into()),
    })
}

impl From<MediaRow> for MediaRecord {
    fn from(r: MediaRow) -> Self {
        let variants = [
            size_variant(
                THUMBNAIL,
                r.sizes_thumbnail_width,
                r.sizes_thumbnail_height,
                r.sizes_thumbnail_mime_type,
                r.sizes_thumbnail_filesize,
                r.sizes_thumbnail_filename,
            ),
            size_variant(
                CARD,
                r.sizes_card_width,
                r.sizes_card_height,
                r.sizes_card_mime_type,
                r.sizes_card_filesize,
                r.sizes_card_filename,
            ),
        ]
        .into_iter()
        .flatten()
        .collect();

        MediaRecord {
            id: r.id,
            filename: r.filename,
            url: r.url,
            width: r.width as u32,
            height: r.height as u32,
            filesize: r.filesize as u64,
            mime_type: r.mime_type,
            focal_x: r.focal_x as u32,
            focal_y: r.focal_y as u32,
            variants,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SlideRow {
    order: Option<i32>,
    path: String,
    id: i64,
    title: String,
    content: String,
    #[sqlx(rename = "type")]
    kind: String,
    image_id: i64,
    slide_image: String,
    links: Vec<String>,
}

const MEDIA_COLUMNS: &str = "id, url, filename, mime_type, filesize, width, height, focal_x, focal_y, \
    sizes_thumbnail_width, sizes_thumbnail_height, sizes_thumbnail_mime_type, \
    sizes_thumbnail_filesize, sizes_thumbnail_filename, sizes_card_width, sizes_card_height, \
    sizes_card_mime_type, sizes_card_filesize, sizes_card_filename";

/// [`SlideStore`] on a Postgres pool.
#[derive(Clone)]
pub struct PgSlideStore {
    pool: PgPool,
}

impl PgSlideStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> PersistenceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled migrations.
    pub async fn migrate(&self) -> PersistenceResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PersistenceError::Database(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn variant_of<'a>(variants: &'a [SizeVariant], name: &str) -> Option<&'a SizeVariant> {
    variants.iter().find(|v| v.name == name)
}

/// Session holding a run's advisory lock.
///
/// The connection is detached from the pool, so dropping it ends the
/// session and Postgres releases the lock with it.
struct AdvisoryLock {
    _conn: PgConnection,
}

/// First advisory lock key; the second is `hashtext(document)`.
fn advisory_key(module_id: i64) -> i32 {
    // Ids past i32::MAX fold onto smaller ones; a collision only serializes.
    (module_id & i64::from(i32::MAX)) as i32
}

#[async_trait]
impl SlideStore for PgSlideStore {
    #[tracing::instrument(skip(self), fields(db.operation = "advisory_lock"))]
    async fn claim_run(&self, module_id: i64, document: &DocumentName) -> PersistenceResult<Option<StoreClaim>> {
        let mut conn = self.pool.acquire().await?;
        let locked = sqlx::query_scalar::<Postgres, bool>("SELECT pg_try_advisory_lock($1, hashtext($2))")
            .bind(advisory_key(module_id))
            .bind(document.as_str())
            .fetch_one(&mut *conn)
            .await?;
        if !locked {
            // Back to the pool; this session holds nothing.
            return Ok(None);
        }
        Ok(Some(StoreClaim::new(AdvisoryLock { _conn: conn.detach() })))
    }

    #[tracing::instrument(skip(self), fields(db.table = "slides", db.operation = "select"))]
    async fn find_document_slides(
        &self,
        module_id: i64,
        document: &DocumentName,
    ) -> PersistenceResult<Vec<PreviousSlide>> {
        let rows = sqlx::query_as::<Postgres, (i64, i64, String, Option<i32>)>(
            r#"
            SELECT s.id, m.id, m.filename, mr."order"
            FROM slides s
            JOIN modules_rels mr ON mr.slides_id = s.id
            JOIN media m ON m.id = s.image_id
            WHERE mr.parent_id = $1 AND m.filename LIKE $2 ESCAPE '\'
            ORDER BY mr."order" NULLS LAST, s.id
            "#,
        )
        .bind(module_id)
        .bind(document.like_pattern())
        .fetch_all(&self.pool)
        .await?;

        // LIKE only narrows; exact ownership is decided by the name parser.
        Ok(rows
            .into_iter()
            .filter_map(|(slide_id, media_id, filename, order)| {
                let page = document.page_of(&filename)?;
                Some(PreviousSlide {
                    slide_id,
                    media_id,
                    filename,
                    page,
                    order: order.map(|o| o as usize),
                })
            })
            .collect())
    }

    #[tracing::instrument(skip(self), fields(db.table = "media", db.operation = "select"))]
    async fn find_media_by_filename(&self, filename: &str) -> PersistenceResult<Option<MediaRecord>> {
        let row = sqlx::query_as::<Postgres, MediaRow>(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media WHERE filename = $1"
        ))
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MediaRecord::from))
    }

    #[tracing::instrument(skip(self, slides, keep_media), fields(db.operation = "delete", slides = slides.len()))]
    async fn retire(
        &self,
        module_id: i64,
        slides: &[PreviousSlide],
        keep_media: &HashSet<String>,
    ) -> PersistenceResult<RetirementReport> {
        if slides.is_empty() {
            return Ok(RetirementReport::default());
        }
        let slide_ids: Vec<i64> = slides.iter().map(|s| s.slide_id).collect();
        let media_ids: Vec<i64> = slides.iter().map(|s| s.media_id).collect();
        let keep: Vec<String> = keep_media.iter().cloned().collect();

        let mut tx = self.pool.begin().await?;

        let links = sqlx::query("DELETE FROM modules_rels WHERE slides_id = ANY($1)")
            .bind(&slide_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let slides_removed = sqlx::query("DELETE FROM slides WHERE id = ANY($1)")
            .bind(&slide_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let media = sqlx::query(
            r#"
            DELETE FROM media
            WHERE id = ANY($1)
              AND filename <> ALL($2)
              AND NOT EXISTS (SELECT 1 FROM slides s WHERE s.image_id = media.id)
            "#,
        )
        .bind(&media_ids)
        .bind(&keep)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        tracing::debug!(module_id, links, slides = slides_removed, media, "Retired slide set");
        Ok(RetirementReport {
            links: links as usize,
            slides: slides_removed as usize,
            media: media as usize,
        })
    }

    #[tracing::instrument(skip(self, page), fields(db.operation = "insert", order = page.order))]
    async fn install_page(&self, module_id: i64, page: &PageInstall) -> PersistenceResult<InstalledPage> {
        // Dropping `tx` on any early return rolls the whole page back.
        let mut tx = self.pool.begin().await?;

        let (media_id, media_reused) = match page.media {
            MediaSource::Existing { media_id } => {
                let exists = sqlx::query_scalar::<Postgres, bool>(
                    "SELECT EXISTS(SELECT 1 FROM media WHERE id = $1)",
                )
                .bind(media_id)
                .fetch_one(&mut *tx)
                .await?;
                if !exists {
                    return Err(PersistenceError::MissingMedia { media_id });
                }
                (media_id, true)
            }
            MediaSource::New(ref m) => {
                let thumb = variant_of(&m.variants, THUMBNAIL);
                let card = variant_of(&m.variants, CARD);
                // A conflicting row keeps its URL unless it never got one.
                let (id, inserted) = sqlx::query_as::<Postgres, (i64, bool)>(
                    r#"
                    INSERT INTO media (
                        url, filename, mime_type, filesize, width, height,
                        focal_x, focal_y, sizes_thumbnail_width, sizes_thumbnail_height,
                        sizes_thumbnail_mime_type, sizes_thumbnail_filesize,
                        sizes_thumbnail_filename, sizes_card_width, sizes_card_height,
                        sizes_card_mime_type, sizes_card_filesize, sizes_card_filename,
                        prefix
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, 'media')
                    ON CONFLICT (filename) DO UPDATE SET url = COALESCE(media.url, EXCLUDED.url)
                    RETURNING id, (xmax = 0) AS inserted
                    "#,
                )
                .bind(&m.url)
                .bind(&m.filename)
                .bind(&m.mime_type)
                .bind(m.filesize as i64)
                .bind(m.width as i32)
                .bind(m.height as i32)
                .bind(DEFAULT_FOCAL_POINT as i32)
                .bind(thumb.map(|v| v.width as i32))
                .bind(thumb.map(|v| v.height as i32))
                .bind(thumb.map(|v| v.mime_type.clone()))
                .bind(thumb.map(|v| v.filesize as i64))
                .bind(thumb.map(|v| v.filename.clone()))
                .bind(card.map(|v| v.width as i32))
                .bind(card.map(|v| v.height as i32))
                .bind(card.map(|v| v.mime_type.clone()))
                .bind(card.map(|v| v.filesize as i64))
                .bind(card.map(|v| v.filename.clone()))
                .fetch_one(&mut *tx)
                .await?;
                (id, !inserted)
            }
        };

        let slide_id = sqlx::query_scalar::<Postgres, i64>(
            r#"
            INSERT INTO slides (title, content, image_id, type, slide_image, links)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&page.slide.title)
        .bind(&page.slide.content)
        .bind(media_id)
        .bind(page.slide.kind.as_str())
        .bind(&page.slide.image_url)
        .bind(&page.slide.links)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO modules_rels (parent_id, slides_id, "order", path) VALUES ($1, $2, $3, $4)"#,
        )
        .bind(module_id)
        .bind(slide_id)
        .bind(page.order as i32)
        .bind(SLIDES_PATH)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                PersistenceError::DuplicateLink { module_id, slide_id }
            }
            other => other.into(),
        })?;

        tx.commit().await?;

        Ok(InstalledPage {
            media_id,
            slide_id,
            media_reused,
        })
    }

    #[tracing::instrument(skip(self, order), fields(db.table = "modules_rels", db.operation = "update"))]
    async fn set_order(&self, module_id: i64, order: &[(i64, usize)]) -> PersistenceResult<()> {
        let mut tx = self.pool.begin().await?;
        for &(slide_id, ord) in order {
            let updated = sqlx::query(
                r#"UPDATE modules_rels SET "order" = $1 WHERE parent_id = $2 AND slides_id = $3"#,
            )
            .bind(ord as i32)
            .bind(module_id)
            .bind(slide_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if updated == 0 {
                return Err(PersistenceError::MissingSlide { slide_id });
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn module_slides(&self, module_id: i64) -> PersistenceResult<Vec<(ModuleSlideLink, SlideRecord)>> {
        let rows = sqlx::query_as::<Postgres, SlideRow>(
            r#"
            SELECT mr."order", mr.path, s.id, s.title, s.content, s.type, s.image_id, s.slide_image,
                   COALESCE(s.links, '{}') AS links
            FROM modules_rels mr
            JOIN slides s ON s.id = mr.slides_id
            WHERE mr.parent_id = $1
            ORDER BY mr."order" NULLS LAST, s.id
            "#,
        )
        .bind(module_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    ModuleSlideLink {
                        module_id,
                        slide_id: r.id,
                        order: r.order.unwrap_or(0) as usize,
                        path: r.path,
                    },
                    SlideRecord {
                        id: r.id,
                        title: r.title,
                        content: r.content,
                        kind: SlideKind::parse_or(&r.kind, SlideKind::Regular),
                        media_id: r.image_id,
                        image_url: r.slide_image,
                        links: r.links,
                    },
                )
            })
            .collect())
    }

    async fn modules(&self, course_id: Option<i64>) -> PersistenceResult<Vec<ModuleSummary>> {
        let rows = match course_id {
            Some(course) => {
                sqlx::query_as::<Postgres, (i64, String)>(
                    r#"
                    SELECT DISTINCT m.id, m.title
                    FROM modules m
                    JOIN courses_rels cr ON cr.modules_id = m.id
                    WHERE cr.parent_id = $1
                    ORDER BY m.title
                    "#,
                )
                .bind(course)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<Postgres, (i64, String)>("SELECT id, title FROM modules ORDER BY title")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows
            .into_iter()
            .map(|(id, title)| ModuleSummary { id, title })
            .collect())
    }
}
