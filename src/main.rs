// Command-line entry point: crawl one catalog site into a CSV feed

use anyhow::{Context, Result};
use catalog_spider::sink::CsvSink;
use catalog_spider::{CrawlSettings, CrawlerBuilder, SiteProfile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = CrawlSettings::from_env().context("Failed to load settings")?;

    let profile = match &settings.site_profile {
        Some(path) => SiteProfile::from_json_file(path)
            .with_context(|| format!("Failed to load site profile {}", path.display()))?,
        None => SiteProfile::casa_del_libro(),
    };
    tracing::info!("Crawling site '{}'", profile.name);

    let columns = profile.compile().context("Invalid site profile")?.columns();
    let sink = CsvSink::create(&settings.feed_uri, columns)
        .with_context(|| format!("Failed to open feed {}", settings.feed_uri.display()))?;

    let crawler = CrawlerBuilder::new(profile)
        .settings(settings)
        .sink(sink)
        .build()
        .await
        .context("Failed to set up crawler")?;
    let stats = crawler.get_stats();

    crawler.start_crawl().await.context("Crawl failed")?;

    println!("{}", stats.to_markdown_string());
    Ok(())
}
