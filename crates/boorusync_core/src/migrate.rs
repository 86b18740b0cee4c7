use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::destination::{AttachOutcome, DestinationApi, Post, Tag, TagCategory};
use crate::media::{self, Transcoder};
use crate::source::{FALLBACK_CATEGORY_COLOR, SourceApi, SourceCategory, SourceTagRecord};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Identity rule for every tag and category comparison.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub page_size: u32,
    pub start_page: u32,
    /// Stop after scanning this many posts. Zero means no limit.
    pub max_posts: usize,
    pub dry_run: bool,
    pub fail_fast: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            start_page: 1,
            max_posts: 0,
            dry_run: false,
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub scanned: usize,
    pub processed: usize,
    pub skipped_by_type: usize,
    pub matched: usize,
    pub discovered_tags: usize,
    pub added_tags: usize,
    pub failures: usize,
    pub aborted: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostTagDelta {
    pub discovered: usize,
    pub added: usize,
}

/// Caches destination taxonomy state for the length of a run. Every write
/// goes through here, so the caches never fall behind the service.
pub struct TagReconciler {
    source_categories: BTreeMap<String, SourceCategory>,
    categories_by_name: BTreeMap<String, TagCategory>,
    tags_by_name: BTreeMap<String, Tag>,
    dry_run: bool,
}

impl TagReconciler {
    pub fn load<D: DestinationApi, S: SourceApi>(
        destination: &mut D,
        source: &mut S,
        dry_run: bool,
    ) -> Result<Self> {
        let mut source_categories = BTreeMap::new();
        for category in source.tag_categories()? {
            source_categories.insert(normalize_name(&category.name), category);
        }
        let mut categories_by_name = BTreeMap::new();
        for category in destination.tag_categories()? {
            categories_by_name.insert(normalize_name(&category.name), category);
        }
        let mut tags_by_name = BTreeMap::new();
        for tag in destination.all_tags()? {
            tags_by_name.insert(normalize_name(&tag.name), tag);
        }
        Ok(Self {
            source_categories,
            categories_by_name,
            tags_by_name,
            dry_run,
        })
    }

    /// Returns the destination id for a category name, creating the category
    /// on demand. `None`, blank names, and dry-run creations yield `Ok(None)`.
    /// Existing categories are returned as-is, never re-colored or reordered.
    pub fn ensure_category<D: DestinationApi>(
        &mut self,
        destination: &mut D,
        name: Option<&str>,
    ) -> Result<Option<i64>> {
        let Some(name) = name else {
            return Ok(None);
        };
        let key = normalize_name(name);
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(existing) = self.categories_by_name.get(&key) {
            return Ok(Some(existing.id));
        }

        let (display_name, color, order) = match self.source_categories.get(&key) {
            Some(source) => (source.name.clone(), source.color.clone(), source.order),
            None => (
                name.trim().to_string(),
                FALLBACK_CATEGORY_COLOR.to_string(),
                0,
            ),
        };
        if self.dry_run {
            println!(
                "[dry-run] create category: name='{display_name}', color='{color}', order={order}"
            );
            return Ok(None);
        }
        let created = destination.create_tag_category(&display_name, &color, order)?;
        println!("[category] created '{}' (id={})", created.name, created.id);
        let id = created.id;
        self.categories_by_name.insert(key, created);
        Ok(Some(id))
    }

    /// Returns the destination tag for a canonical name, creating it or
    /// moving it to `category_id` on demand. Dry-run creations yield
    /// `Ok(None)`; dry-run moves return the existing record unmodified.
    pub fn ensure_tag<D: DestinationApi>(
        &mut self,
        destination: &mut D,
        name: &str,
        category_id: Option<i64>,
    ) -> Result<Option<Tag>> {
        let key = normalize_name(name);
        if let Some(existing) = self.tags_by_name.get(&key).cloned() {
            if existing.category_id == category_id {
                return Ok(Some(existing));
            }
            if self.dry_run {
                println!(
                    "[dry-run] update tag category: '{}' {} -> {}",
                    existing.name,
                    category_label(existing.category_id),
                    category_label(category_id)
                );
                return Ok(Some(existing));
            }
            let updated = destination.update_tag(existing.id, &existing.name, category_id)?;
            println!(
                "[tag] updated '{}' (id={}) category={}",
                updated.name,
                updated.id,
                category_label(updated.category_id)
            );
            self.tags_by_name.insert(key, updated.clone());
            return Ok(Some(updated));
        }

        if self.dry_run {
            println!(
                "[dry-run] create tag: '{name}' categoryId={}",
                category_label(category_id)
            );
            return Ok(None);
        }
        let created = destination.create_tag(name, category_id)?;
        println!(
            "[tag] created '{}' (id={}) category={}",
            created.name,
            created.id,
            category_label(created.category_id)
        );
        self.tags_by_name.insert(key, created.clone());
        Ok(Some(created))
    }

    /// Mirrors the matched source post's tags onto one destination post.
    /// Duplicate canonical names count once; the first occurrence wins.
    pub fn migrate_post_tags<D: DestinationApi>(
        &mut self,
        destination: &mut D,
        post_id: i64,
        current_tags: &[String],
        source_tags: &[SourceTagRecord],
    ) -> Result<PostTagDelta> {
        let mut present: BTreeSet<String> = current_tags
            .iter()
            .map(|name| normalize_name(name))
            .filter(|name| !name.is_empty())
            .collect();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut delta = PostTagDelta::default();

        for record in source_tags {
            let Some(first_alias) = record.names.first() else {
                continue;
            };
            let canonical = normalize_name(first_alias);
            if canonical.is_empty() {
                continue;
            }
            if !seen.insert(canonical.clone()) {
                continue;
            }
            delta.discovered += 1;

            let category_id = self.ensure_category(destination, record.category.as_deref())?;
            self.ensure_tag(destination, &canonical, category_id)?;

            if present.contains(&canonical) {
                continue;
            }
            if self.dry_run {
                println!("[dry-run] add tag '{canonical}' to post {post_id}");
                delta.added += 1;
                present.insert(canonical);
                continue;
            }
            match destination.attach_tag(post_id, &canonical)? {
                AttachOutcome::Attached => {
                    println!("[post:{post_id}] +tag '{canonical}'");
                    delta.added += 1;
                    present.insert(canonical);
                }
                AttachOutcome::AlreadyPresent => {
                    present.insert(canonical);
                }
            }
        }
        Ok(delta)
    }
}

/// Walks the destination catalog page by page and reconciles every eligible
/// post. Page fetches and the initial taxonomy load are fatal; everything
/// below the per-post boundary is caught and counted.
pub fn run_migration<D, S, T>(
    destination: &mut D,
    source: &mut S,
    transcoder: &T,
    options: &MigrationOptions,
) -> Result<MigrationReport>
where
    D: DestinationApi,
    S: SourceApi,
    T: Transcoder,
{
    let mut reconciler = TagReconciler::load(destination, source, options.dry_run)?;
    let mut report = MigrationReport::default();
    let max_posts = (options.max_posts > 0).then_some(options.max_posts);
    let mut page = options.start_page;

    'pages: loop {
        let fetched = destination.posts_page(page, options.page_size)?;
        if fetched.items.is_empty() {
            break;
        }
        match fetched.total {
            Some(total) => println!(
                "[page {page}] fetched {} of {total} posts",
                fetched.items.len()
            ),
            None => println!("[page {page}] fetched {} posts", fetched.items.len()),
        }

        for post in &fetched.items {
            if let Some(limit) = max_posts
                && report.scanned >= limit
            {
                println!("[done] reached --max-posts limit");
                break 'pages;
            }
            report.scanned += 1;

            if !media::is_supported_content_type(&post.content_type) {
                report.skipped_by_type += 1;
                continue;
            }
            report.processed += 1;

            if let Err(error) = process_post(
                destination,
                source,
                transcoder,
                &mut reconciler,
                post,
                &mut report,
            ) {
                report.failures += 1;
                eprintln!("[error] post {}: {error:#}", post.id);
                if options.fail_fast {
                    report.aborted = Some(format!("post {}: {error:#}", post.id));
                    break 'pages;
                }
            }
        }

        if fetched.items.len() < options.page_size as usize {
            break;
        }
        page += 1;
    }

    Ok(report)
}

fn process_post<D, S, T>(
    destination: &mut D,
    source: &mut S,
    transcoder: &T,
    reconciler: &mut TagReconciler,
    post: &Post,
    report: &mut MigrationReport,
) -> Result<()>
where
    D: DestinationApi,
    S: SourceApi,
    T: Transcoder,
{
    let mut upload = destination.post_content(post.id)?;
    let mut upload_mime = if post.content_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        post.content_type.clone()
    };
    let mut filename = upload_filename(&post.relative_path, post.id);

    if transcoder.needs_transcode(&post.content_type) {
        upload = transcoder.transcode(&upload)?;
        upload_mime = media::JPEG_CONTENT_TYPE.to_string();
        filename = media::jpeg_filename(&filename);
    }

    let result = source.reverse_search(&upload, &filename, &upload_mime)?;
    let Some(exact) = result.exact else {
        return Ok(());
    };
    report.matched += 1;
    if let Some(source_post_id) = exact.post_id {
        println!(
            "[post:{}] exact match: source post {source_post_id}",
            post.id
        );
    }
    let delta = reconciler.migrate_post_tags(destination, post.id, &post.tag_names, &exact.tags)?;
    report.discovered_tags += delta.discovered;
    report.added_tags += delta.added;
    Ok(())
}

fn upload_filename(relative_path: &str, post_id: i64) -> String {
    Path::new(relative_path)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("post_{post_id}"))
}

fn category_label(category_id: Option<i64>) -> String {
    match category_id {
        Some(id) => id.to_string(),
        None => "none".to_string(),
    }
}
