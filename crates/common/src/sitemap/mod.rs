//! Sitemap generation
//!
//! Pages of at most `sitemap.max_url_count` URLs are rendered into the cache
//! under `sitemap:<n>` (from 1), the index pointing at them under `sitemap:0`.

use crate::cache::{keys, Cache};
use crate::config::AppConfig;
use crate::db::models::{CommunityEntity, PidColumn, PidEntity, PidStatus, RecordEntity};
use crate::errors::Result;
use crate::serializers::XmlBuilder;
use crate::services::Services;
use chrono::SecondsFormat;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use std::collections::HashMap;
use tracing::{info, instrument};

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// Community pages listed for every community
const COMMUNITY_PAGES: &[&str] = &["", "search", "about"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapUrl {
    pub loc: String,
    pub lastmod: Option<String>,
}

fn base_url(config: &AppConfig) -> String {
    format!("{}://{}", config.sitemap.url_scheme, config.site.host)
}

/// Every URL listed in the sitemap: registered records, then communities
pub async fn collect_urls<C: ConnectionTrait>(db: &C, config: &AppConfig) -> Result<Vec<SitemapUrl>> {
    let base = base_url(config);
    let mut urls = Vec::new();

    let pids = PidEntity::find()
        .filter(PidColumn::PidType.eq("recid"))
        .filter(PidColumn::Status.eq(PidStatus::Registered.as_code()))
        .order_by_asc(PidColumn::Id)
        .all(db)
        .await?;
    let ids: Vec<_> = pids.iter().filter_map(|p| p.object_uuid).collect();
    let updated: HashMap<_, _> = RecordEntity::find()
        .filter(crate::db::models::RecordColumn::Id.is_in(ids))
        .all(db)
        .await?
        .into_iter()
        .map(|r| (r.id, r.updated))
        .collect();

    for pid in pids {
        let Some(lastmod) = pid.object_uuid.and_then(|id| updated.get(&id)) else {
            continue;
        };
        urls.push(SitemapUrl {
            loc: format!("{}/record/{}", base, pid.pid_value),
            lastmod: Some(lastmod.to_rfc3339_opts(SecondsFormat::Secs, true)),
        });
    }

    for community in CommunityEntity::find().all(db).await? {
        let lastmod = community.updated.to_rfc3339_opts(SecondsFormat::Secs, true);
        for page in COMMUNITY_PAGES {
            let loc = if page.is_empty() {
                format!("{}/communities/{}/", base, community.id)
            } else {
                format!("{}/communities/{}/{}/", base, community.id, page)
            };
            urls.push(SitemapUrl {
                loc,
                lastmod: Some(lastmod.clone()),
            });
        }
    }

    Ok(urls)
}

pub fn render_page(urls: &[SitemapUrl]) -> String {
    let mut xml = XmlBuilder::new().declaration();
    xml.open("urlset", &[("xmlns", SITEMAP_NS)]);
    for url in urls {
        xml.open("url", &[]).leaf("loc", &[], &url.loc);
        if let Some(lastmod) = &url.lastmod {
            xml.leaf("lastmod", &[], lastmod);
        }
        xml.close("url");
    }
    xml.close("urlset");
    xml.finish()
}

pub fn render_index(config: &AppConfig, pages: usize) -> String {
    let base = base_url(config);
    let mut xml = XmlBuilder::new().declaration();
    xml.open("sitemapindex", &[("xmlns", SITEMAP_NS)]);
    for page in 1..=pages {
        xml.open("sitemap", &[])
            .leaf("loc", &[], &format!("{}/sitemap{}.xml", base, page))
            .close("sitemap");
    }
    xml.close("sitemapindex");
    xml.finish()
}

/// Rebuild every page and the index; returns the page count
#[instrument(skip(services))]
pub async fn update_sitemap(services: &Services) -> Result<usize> {
    let config = &services.config;
    let urls = collect_urls(services.db.read(), config).await?;
    let ttl = config.tasks.sitemap_interval_secs.saturating_mul(2);
    let cache = &services.cache;

    let mut pages = 0;
    for chunk in urls.chunks(config.sitemap.max_url_count.max(1)) {
        pages += 1;
        cache.set_with_ttl(&keys::sitemap_page(pages), &render_page(chunk), ttl).await?;
    }
    cache.set_with_ttl(&keys::sitemap_page(0), &render_index(config, pages), ttl).await?;

    // Pages left over from a larger sitemap
    let mut stale = pages + 1;
    while cache.delete(&keys::sitemap_page(stale)).await? {
        stale += 1;
    }

    info!(urls = urls.len(), pages, "Sitemap updated");
    Ok(pages)
}

/// Cached page; 0 is the index
pub async fn page(cache: &Cache, page: usize) -> Result<Option<String>> {
    cache.get(&keys::sitemap_page(page)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communities::create_community;
    use crate::deposit::{ensure_user, Actor};
    use crate::pidstore::NewPid;
    use crate::records::{self, RECORD_OBJECT_TYPE};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_render_page() {
        let xml = render_page(&[SitemapUrl {
            loc: "https://zenodo.org/record/1?a=1&b=2".into(),
            lastmod: None,
        }]);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<loc>https://zenodo.org/record/1?a=1&amp;b=2</loc>"));
        assert!(!xml.contains("lastmod"));
    }

    #[tokio::test]
    async fn test_update_sitemap() {
        let mut config = AppConfig::default();
        config.sitemap.max_url_count = 2;
        let services = Services::in_memory().await.unwrap().with_config(config);
        let db = services.db.write();

        for recid in ["1", "2", "3"] {
            let record = records::create(db, Uuid::new_v4(), json!({"recid": recid})).await.unwrap();
            services
                .pids
                .create(
                    db,
                    NewPid::new("recid", recid)
                        .status(PidStatus::Registered)
                        .object(RECORD_OBJECT_TYPE, record.id),
                )
                .await
                .unwrap();
        }
        // Reserved identifiers are not listed
        services
            .pids
            .create(db, NewPid::new("recid", "4").status(PidStatus::Reserved))
            .await
            .unwrap();
        ensure_user(db, &Actor::user(1, "c@example.org")).await.unwrap();
        create_community(db, "c1", "C1", 1).await.unwrap();

        let urls = collect_urls(db, &services.config).await.unwrap();
        assert_eq!(urls.len(), 6);
        assert_eq!(urls[0].loc, "https://zenodo.org/record/1");
        assert_eq!(urls[3].loc, "https://zenodo.org/communities/c1/");

        assert_eq!(update_sitemap(&services).await.unwrap(), 3);
        let index = page(&services.cache, 0).await.unwrap().unwrap();
        assert!(index.contains("<loc>https://zenodo.org/sitemap3.xml</loc>"));
        let second = page(&services.cache, 2).await.unwrap().unwrap();
        assert!(second.contains("/record/3"));
        assert!(page(&services.cache, 4).await.unwrap().is_none());
    }
}
