//! Walk through the publishing workflow against a directory-backed repository
//!
//! Run with: `cargo run --example walkthrough`
//! Set `VELLUM_DATA_DIR` to keep the repository somewhere other than a
//! temporary directory.

use std::result::Result;
use std::sync::Arc;
use vellum::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let scratch = tempfile::tempdir()?;
    let data_dir = std::env::var("VELLUM_DATA_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| scratch.path().to_path_buf());

    println!("Opening repository at {}", data_dir.display());
    let repository = Repository::open(Arc::new(FileStorage::new(&data_dir).await?)).await?;
    let ctx = repository.context("alice", "Offline")?;

    // Step 1: a folder, a page and a sibling sharing its content
    repository.create_folder(&ctx, "/news").await?;
    repository
        .write(
            &ctx,
            "/news/index.html",
            WriteRequest::new()
                .content("<h1>News</h1>")
                .property("Title", "News"),
        )
        .await?;
    repository
        .copy(&ctx, "/news/index.html", "/home.html", CopyMode::AsSibling)
        .await?;
    println!("Offline resources: {}", repository.resource_count(View::Offline));

    // Step 2: publish everything the project owns
    let report = repository
        .publish(
            &ctx,
            PublishTarget::Project,
            PublishOptions::new().report(Arc::new(MemoryReport::new())),
        )
        .await?;
    for entry in &report.entries {
        println!("  tag {}: {} {}", report.tag, entry.outcome, entry.path);
    }

    // Step 3: a second project takes over the sibling and edits it
    repository
        .create_project("Campaign", "Administrators", "Editors")
        .await?;
    let campaign = repository.context("bob", "Campaign")?;
    repository
        .write(&campaign, "/home.html", WriteRequest::new().content("<h1>Sale!</h1>"))
        .await?;
    println!(
        "/news/index.html is owned by {}",
        repository.owner_of("/news/index.html")?.name
    );

    // Step 4: the original project cannot publish the foreign change
    let report = repository
        .publish(
            &ctx,
            PublishTarget::resource_with_siblings("/news/index.html"),
            PublishOptions::default(),
        )
        .await?;
    println!("Skipped {} resources owned elsewhere", report.skipped());

    let report = repository
        .publish(&campaign, PublishTarget::Project, PublishOptions::default())
        .await?;
    println!("Campaign published {} resources under tag {}", report.published(), report.tag);

    // Step 5: history keeps the previous online version
    let versions = repository.list_versions_by_path("/home.html").await?;
    for version in &versions {
        let content = repository
            .read_version_content(&version.resource_id, version.tag)
            .await?;
        println!(
            "  /home.html @ {}: {}",
            version.tag,
            String::from_utf8_lossy(&content)
        );
    }

    println!(
        "Online now serves: {}",
        String::from_utf8_lossy(&repository.read_content(View::Online, "/home.html").await?)
    );
    Ok(())
}
