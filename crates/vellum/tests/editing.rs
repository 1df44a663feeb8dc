//! Offline edits, locks, projects and property definitions

use std::sync::Arc;
use vellum::*;

async fn setup() -> (Repository, Context) {
    let repo = Repository::in_memory().await.unwrap();
    let ctx = repo.context("admin", "Offline").unwrap();
    (repo, ctx)
}

async fn write(repo: &Repository, ctx: &Context, path: &str, content: &str) -> Resource {
    repo.write(ctx, path, WriteRequest::new().content(content))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_write_requires_parent_folder() {
    let (repo, ctx) = setup().await;

    assert!(matches!(
        repo.write(&ctx, "/missing/a.txt", WriteRequest::new().content("a")).await,
        Err(VellumError::NotFound(_))
    ));
    assert!(matches!(
        repo.write(&ctx, "relative.txt", WriteRequest::new()).await,
        Err(VellumError::InvalidPath { .. })
    ));

    write(&repo, &ctx, "/file.txt", "f").await;
    assert!(matches!(
        repo.write(&ctx, "/file.txt/child", WriteRequest::new().content("c")).await,
        Err(VellumError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_new_resources_stay_new_until_published() {
    let (repo, ctx) = setup().await;
    let created = write(&repo, &ctx, "/a.txt", "one").await;
    assert_eq!(created.state, ResourceState::New);
    assert_eq!(created.project_last_modified, ProjectId::OFFLINE);

    let updated = write(&repo, &ctx, "/a.txt", "two").await;
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.state, ResourceState::New);
    assert_eq!(
        repo.read_content(View::Offline, "/a.txt").await.unwrap(),
        b"two".to_vec()
    );
    // the first payload was superseded and reclaimed
    assert!(!repo.blob_exists(&created.blob().unwrap()).await.unwrap());
}

#[tokio::test]
async fn test_folders_have_no_content() {
    let (repo, ctx) = setup().await;
    repo.create_folder(&ctx, "/docs").await.unwrap();

    assert!(matches!(
        repo.write(&ctx, "/docs", WriteRequest::new().content("x")).await,
        Err(VellumError::InvalidOperation(_))
    ));
    assert!(matches!(
        repo.create_folder(&ctx, "/docs").await,
        Err(VellumError::Conflict(_))
    ));

    let folder = repo
        .write(&ctx, "/docs", WriteRequest::new().property("Title", "Docs"))
        .await
        .unwrap();
    assert!(folder.is_folder());
    assert_eq!(folder.properties.get("Title").map(String::as_str), Some("Docs"));
}

#[tokio::test]
async fn test_deleting_new_resource_removes_it() {
    let (repo, ctx) = setup().await;
    let created = write(&repo, &ctx, "/tmp.txt", "t").await;

    repo.delete(&ctx, "/tmp.txt", false).await.unwrap();
    assert!(matches!(
        repo.read(View::Offline, "/tmp.txt"),
        Err(VellumError::NotFound(_))
    ));
    assert!(!repo.blob_exists(&created.blob().unwrap()).await.unwrap());
    assert!(repo.owned_resources("Offline").unwrap().is_empty());
}

#[tokio::test]
async fn test_deleted_resources_cannot_be_written() {
    let (repo, ctx) = setup().await;
    write(&repo, &ctx, "/a.txt", "a").await;
    repo.publish(&ctx, PublishTarget::Project, PublishOptions::default())
        .await
        .unwrap();

    repo.delete(&ctx, "/a.txt", false).await.unwrap();
    assert!(matches!(
        repo.write(&ctx, "/a.txt", WriteRequest::new().content("b")).await,
        Err(VellumError::InvalidTransition { .. })
    ));
    assert!(matches!(
        repo.touch(&ctx, "/a.txt", None).await,
        Err(VellumError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_delete_cascade_covers_claimable_siblings() {
    let (repo, ctx) = setup().await;
    repo.create_project("Test", "Administrators", "Users").await.unwrap();
    let test_ctx = repo.context("admin", "Test").unwrap();

    write(&repo, &ctx, "/x", "x").await;
    repo.copy(&ctx, "/x", "/y", CopyMode::AsSibling).await.unwrap();
    repo.copy(&ctx, "/x", "/z", CopyMode::AsSibling).await.unwrap();
    repo.publish(&ctx, PublishTarget::Project, PublishOptions::default())
        .await
        .unwrap();

    repo.write(&test_ctx, "/z", WriteRequest::new().property("Title", "z"))
        .await
        .unwrap();
    repo.delete(&ctx, "/x", true).await.unwrap();

    assert_eq!(repo.read(View::Offline, "/x").unwrap().state, ResourceState::Deleted);
    assert_eq!(repo.read(View::Offline, "/y").unwrap().state, ResourceState::Deleted);
    // pending work of another project is left alone
    assert_eq!(repo.read(View::Offline, "/z").unwrap().state, ResourceState::Changed);

    let report = repo
        .publish(
            &ctx,
            PublishTarget::resource_with_siblings("/x"),
            PublishOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.paths(PublishOutcome::Deleted), vec!["/y", "/x"]);
    assert_eq!(repo.read(View::Online, "/z").unwrap().state, ResourceState::Unchanged);
}

#[tokio::test]
async fn test_properties_are_per_path() {
    let (repo, ctx) = setup().await;
    repo.write(
        &ctx,
        "/a.html",
        WriteRequest::new().content("page").property("Title", "A"),
    )
    .await
    .unwrap();
    let b = repo.copy(&ctx, "/a.html", "/b.html", CopyMode::AsSibling).await.unwrap();
    assert_eq!(b.properties.get("Title").map(String::as_str), Some("A"));

    repo.write(&ctx, "/b.html", WriteRequest::new().property("Title", "B"))
        .await
        .unwrap();
    let a = repo.read(View::Offline, "/a.html").unwrap();
    assert_eq!(a.properties.get("Title").map(String::as_str), Some("A"));
    assert_eq!(a.blob(), repo.read(View::Offline, "/b.html").unwrap().blob());

    assert_eq!(repo.resources_with_property(View::Offline, "Title").len(), 2);
    assert_eq!(repo.property_definitions().await, vec!["Title".to_string()]);
    assert!(matches!(
        repo.delete_property_definition("Title").await,
        Err(VellumError::Conflict(_))
    ));

    repo.write(&ctx, "/a.html", WriteRequest::new().remove_property("Title"))
        .await
        .unwrap();
    repo.write(&ctx, "/b.html", WriteRequest::new().remove_property("Title"))
        .await
        .unwrap();
    repo.delete_property_definition("Title").await.unwrap();
    assert!(repo.property_definitions().await.is_empty());
}

#[tokio::test]
async fn test_copy_modes() {
    let (repo, ctx) = setup().await;
    write(&repo, &ctx, "/a.txt", "a").await;

    repo.copy(&ctx, "/a.txt", "/copy.txt", CopyMode::AsNew).await.unwrap();
    repo.copy(&ctx, "/a.txt", "/sibling.txt", CopyMode::AsSibling)
        .await
        .unwrap();
    write(&repo, &ctx, "/a.txt", "changed").await;

    assert_eq!(
        repo.read_content(View::Offline, "/copy.txt").await.unwrap(),
        b"a".to_vec()
    );
    assert_eq!(
        repo.read_content(View::Offline, "/sibling.txt").await.unwrap(),
        b"changed".to_vec()
    );
    let siblings: Vec<String> = repo
        .siblings(View::Offline, "/a.txt")
        .unwrap()
        .into_iter()
        .map(|r| r.path.to_string())
        .collect();
    assert_eq!(siblings, vec!["/sibling.txt"]);

    repo.create_folder(&ctx, "/dir").await.unwrap();
    assert!(matches!(
        repo.copy(&ctx, "/dir", "/dir2", CopyMode::AsNew).await,
        Err(VellumError::InvalidOperation(_))
    ));
    assert!(matches!(
        repo.copy(&ctx, "/a.txt", "/copy.txt", CopyMode::AsNew).await,
        Err(VellumError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_copy_as_sibling_claims_source() {
    let (repo, ctx) = setup().await;
    write(&repo, &ctx, "/a.txt", "a").await;
    repo.publish(&ctx, PublishTarget::Project, PublishOptions::default())
        .await
        .unwrap();

    repo.create_project("Test", "Administrators", "Users").await.unwrap();
    let test_ctx = repo.context("admin", "Test").unwrap();
    repo.copy(&test_ctx, "/a.txt", "/b.txt", CopyMode::AsSibling)
        .await
        .unwrap();

    assert_eq!(repo.owner_of("/a.txt").unwrap().name, "Test");
    assert_eq!(repo.owner_of("/b.txt").unwrap().name, "Test");
    assert_eq!(repo.read(View::Offline, "/a.txt").unwrap().state, ResourceState::Unchanged);
}

#[tokio::test]
async fn test_touch_marks_changed_and_claims() {
    let (repo, ctx) = setup().await;
    write(&repo, &ctx, "/a.txt", "a").await;
    repo.publish(&ctx, PublishTarget::Project, PublishOptions::default())
        .await
        .unwrap();

    repo.create_project("Test", "Administrators", "Users").await.unwrap();
    let test_ctx = repo.context("editor", "Test").unwrap();
    let at = time::macros::datetime!(2020-01-01 0:00 UTC);
    let touched = repo.touch(&test_ctx, "/a.txt", Some(at)).await.unwrap();

    assert_eq!(touched.state, ResourceState::Changed);
    assert_eq!(touched.last_modified_at, at);
    assert_eq!(touched.user_last_modified, Actor::from("editor"));
    assert_eq!(repo.owned_resources("Test").unwrap().len(), 1);
}

#[tokio::test]
async fn test_locks_extend_to_siblings() {
    let (repo, ctx) = setup().await;
    let alice = repo.context("alice", "Offline").unwrap();
    let bob = repo.context("bob", "Offline").unwrap();
    write(&repo, &ctx, "/x", "x").await;
    repo.copy(&ctx, "/x", "/y", CopyMode::AsSibling).await.unwrap();

    let lock = repo.lock(&alice, "/x").unwrap();
    assert_eq!(lock.kind, LockKind::Exclusive);
    assert_eq!(repo.lock_of("/y").unwrap().unwrap().kind, LockKind::Shared);
    // relocking is idempotent
    repo.lock(&alice, "/x").unwrap();

    assert!(matches!(
        repo.lock(&bob, "/y"),
        Err(VellumError::AlreadyLocked { .. })
    ));
    assert!(matches!(
        repo.write(&bob, "/y", WriteRequest::new().content("bob")).await,
        Err(VellumError::Locked { .. })
    ));
    assert!(matches!(
        repo.delete(&bob, "/x", false).await,
        Err(VellumError::Locked { .. })
    ));
    // the holder can still edit
    repo.write(&alice, "/y", WriteRequest::new().content("alice"))
        .await
        .unwrap();

    repo.unlock("/x").unwrap();
    repo.unlock("/x").unwrap();
    assert!(repo.lock_of("/y").unwrap().is_none());
    repo.write(&bob, "/y", WriteRequest::new().content("bob"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unlock_project() {
    let (repo, ctx) = setup().await;
    repo.create_project("Test", "Administrators", "Users").await.unwrap();
    let test_ctx = repo.context("alice", "Test").unwrap();
    write(&repo, &ctx, "/a.txt", "a").await;
    write(&repo, &ctx, "/b.txt", "b").await;

    repo.lock(&test_ctx, "/a.txt").unwrap();
    repo.lock(&ctx, "/b.txt").unwrap();
    assert_eq!(repo.unlock_project("Test").unwrap(), 1);
    assert!(repo.lock_of("/a.txt").unwrap().is_none());
    assert!(repo.lock_of("/b.txt").unwrap().is_some());
}

#[tokio::test]
async fn test_online_project_is_read_only() {
    let (repo, ctx) = setup().await;
    write(&repo, &ctx, "/a.txt", "a").await;
    let online = repo.context("admin", "Online").unwrap();

    assert!(matches!(
        repo.write(&online, "/b.txt", WriteRequest::new().content("b")).await,
        Err(VellumError::ReadOnlyProject(_))
    ));
    assert!(matches!(
        repo.delete(&online, "/a.txt", false).await,
        Err(VellumError::ReadOnlyProject(_))
    ));
    assert!(matches!(
        repo.lock(&online, "/a.txt"),
        Err(VellumError::ReadOnlyProject(_))
    ));
    assert!(matches!(
        repo.publish(&online, PublishTarget::Project, PublishOptions::default())
            .await,
        Err(VellumError::ReadOnlyProject(_))
    ));
}

#[tokio::test]
async fn test_project_resources_restrict_writes() {
    let (repo, ctx) = setup().await;
    repo.create_folder(&ctx, "/folder1").await.unwrap();
    repo.create_project("Test", "Administrators", "Users").await.unwrap();
    repo.add_project_resource("Test", "/folder1").await.unwrap();
    let test_ctx = repo.context("admin", "Test").unwrap();

    write(&repo, &test_ctx, "/folder1/inside.txt", "in").await;
    assert!(matches!(
        repo.write(&test_ctx, "/outside.txt", WriteRequest::new().content("out")).await,
        Err(VellumError::OutsideProject { .. })
    ));
    assert!(matches!(
        repo.add_project_resource("Test", "/missing").await,
        Err(VellumError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_project_lifecycle() {
    let (repo, ctx) = setup().await;
    let project = repo.create_project("Test", "Administrators", "Users").await.unwrap();
    assert_eq!(repo.resolve_project("Test").unwrap().id, project.id);
    assert_eq!(repo.list_projects().len(), 3);

    assert!(matches!(
        repo.create_project("Test", "a", "b").await,
        Err(VellumError::Conflict(_))
    ));
    assert!(matches!(
        repo.create_project("bad/name", "a", "b").await,
        Err(VellumError::InvalidProjectName { .. })
    ));
    assert!(matches!(
        repo.delete_project("Online").await,
        Err(VellumError::InvalidOperation(_))
    ));

    let test_ctx = repo.context("admin", "Test").unwrap();
    write(&repo, &test_ctx, "/a.txt", "a").await;
    assert!(matches!(
        repo.delete_project("Test").await,
        Err(VellumError::Conflict(_))
    ));

    repo.publish(&test_ctx, PublishTarget::Project, PublishOptions::default())
        .await
        .unwrap();
    repo.delete_project("Test").await.unwrap();
    assert!(matches!(
        repo.resolve_project("Test"),
        Err(VellumError::NotFound(_))
    ));
    assert_eq!(repo.owner_of("/a.txt").unwrap().id, ProjectId::OFFLINE);

    // the resource is editable from the default project afterwards
    write(&repo, &ctx, "/a.txt", "b").await;
}

struct DenyGuest;

impl PermissionCheck for DenyGuest {
    fn can_write(
        &self,
        actor: &Actor,
        _resource: Option<ResourceId>,
        _path: &ResourcePath,
    ) -> bool {
        actor.as_ref() != "guest"
    }

    fn can_publish(&self, actor: &Actor, _project: &Project) -> bool {
        actor.as_ref() != "guest"
    }
}

#[tokio::test]
async fn test_permission_check_is_consulted() {
    let repo = Repository::open_with(Arc::new(MemoryStorage::new()), Arc::new(DenyGuest))
        .await
        .unwrap();
    let admin = repo.context("admin", "Offline").unwrap();
    let guest = repo.context("guest", "Offline").unwrap();

    write(&repo, &admin, "/a.txt", "a").await;
    assert!(matches!(
        repo.write(&guest, "/a.txt", WriteRequest::new().content("g")).await,
        Err(VellumError::PermissionDenied(_))
    ));
    assert!(matches!(
        repo.write(&guest, "/b.txt", WriteRequest::new().content("g")).await,
        Err(VellumError::PermissionDenied(_))
    ));
    assert!(matches!(
        repo.publish(&guest, PublishTarget::Project, PublishOptions::default())
            .await,
        Err(VellumError::PermissionDenied(_))
    ));

    // a denied actor cannot lock and so cannot block the owner's publish
    assert!(matches!(
        repo.lock(&guest, "/a.txt"),
        Err(VellumError::PermissionDenied(_))
    ));
    assert!(repo.lock_of("/a.txt").unwrap().is_none());
    let report = repo
        .publish(&admin, PublishTarget::Project, PublishOptions::default())
        .await
        .unwrap();
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].outcome, PublishOutcome::Published);
}
