use linkstash::db::Repository;
use linkstash::error::AppError;
use linkstash::models::{LinkStatus, NewLink};

async fn test_repository() -> (Repository, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let repository = Repository::new(db_path.to_str().unwrap()).await.unwrap();
    (repository, dir)
}

fn new_link(url: &str) -> NewLink {
    NewLink {
        url: url.to_string(),
        title: Some("A title".to_string()),
        content: Some("Some body text about rust".to_string()),
        summary: Some("A summary".to_string()),
        status: LinkStatus::ReadLater,
    }
}

#[tokio::test]
async fn create_and_find_by_url() {
    let (repo, _dir) = test_repository().await;

    let created = repo.create_link(new_link("http://example.com/a")).await.unwrap();
    assert_eq!(created.status, LinkStatus::ReadLater);

    let found = repo.get_link_by_url("http://example.com/a").await.unwrap().unwrap();
    assert_eq!(found.id, created.id);
    assert_eq!(found.title.as_deref(), Some("A title"));

    assert!(repo.get_link_by_url("http://example.com/other").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_url_is_rejected_distinctly() {
    let (repo, _dir) = test_repository().await;

    repo.create_link(new_link("http://example.com/a")).await.unwrap();
    let err = repo.create_link(new_link("http://example.com/a")).await.unwrap_err();

    assert!(matches!(err, AppError::DuplicateUrl(url) if url == "http://example.com/a"));
    assert_eq!(repo.count_links().await.unwrap(), 1);
}

#[tokio::test]
async fn search_index_stays_in_lockstep_with_links() {
    let (repo, _dir) = test_repository().await;

    let a = repo.create_link(new_link("http://example.com/a")).await.unwrap();
    let b = repo.create_link(new_link("http://example.com/b")).await.unwrap();
    repo.create_link(new_link("http://example.com/c")).await.unwrap();
    assert_eq!(repo.count_links().await.unwrap(), 3);
    assert_eq!(repo.count_search_rows().await.unwrap(), 3);

    repo.update_link(
        a.id,
        Some("New title".to_string()),
        Some("completely different words".to_string()),
        None,
    )
    .await
    .unwrap();
    assert_eq!(repo.count_search_rows().await.unwrap(), 3);

    repo.delete_link(b.id).await.unwrap();
    assert_eq!(repo.count_links().await.unwrap(), 2);
    assert_eq!(repo.count_search_rows().await.unwrap(), 2);
}

#[tokio::test]
async fn update_reprojects_the_search_row() {
    let (repo, _dir) = test_repository().await;

    let link = repo.create_link(new_link("http://example.com/a")).await.unwrap();
    assert_eq!(repo.search_links("rust", 10).await.unwrap().len(), 1);

    repo.update_link(
        link.id,
        link.title.clone(),
        Some("all about gardening instead".to_string()),
        None,
    )
    .await
    .unwrap();

    assert!(repo.search_links("rust", 10).await.unwrap().is_empty());
    let hits = repo.search_links("gardening", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, link.id);
}

#[tokio::test]
async fn search_matches_url_title_content_and_summary() {
    let (repo, _dir) = test_repository().await;

    repo.create_link(NewLink {
        url: "http://example.com/zebra-page".to_string(),
        title: Some("Quantum widgets".to_string()),
        content: Some("body mentions falcons".to_string()),
        summary: Some("summary mentions glaciers".to_string()),
        status: LinkStatus::ReadLater,
    })
    .await
    .unwrap();

    for term in ["zebra", "quantum", "falcons", "glaciers"] {
        assert_eq!(repo.search_links(term, 10).await.unwrap().len(), 1, "term {term}");
    }
    assert!(repo.search_links("nothing-here", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn relinking_an_existing_pair_is_a_noop() {
    let (repo, _dir) = test_repository().await;

    let link = repo.create_link(new_link("http://example.com/a")).await.unwrap();
    let tag = repo.get_or_create_tag("rust").await.unwrap();
    let category = repo.get_or_create_category("Tech").await.unwrap();

    repo.link_tag(link.id, tag.id).await.unwrap();
    repo.link_tag(link.id, tag.id).await.unwrap();
    repo.link_category(link.id, category.id).await.unwrap();
    repo.link_category(link.id, category.id).await.unwrap();

    assert_eq!(repo.get_tags_for_link(link.id).await.unwrap().len(), 1);
    assert_eq!(repo.get_categories_for_link(link.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn get_or_create_returns_the_same_row() {
    let (repo, _dir) = test_repository().await;

    let first = repo.get_or_create_category("Tech").await.unwrap();
    let second = repo.get_or_create_category("Tech").await.unwrap();
    assert_eq!(first.id, second.id);

    // Category names are case-sensitive; tags arrive pre-lowercased.
    let other_case = repo.get_or_create_category("tech").await.unwrap();
    assert_ne!(first.id, other_case.id);

    let tag_a = repo.get_or_create_tag("tools").await.unwrap();
    let tag_b = repo.get_or_create_tag("tools").await.unwrap();
    assert_eq!(tag_a.id, tag_b.id);

    let task_a = repo.get_or_create_task("Read later list").await.unwrap();
    let task_b = repo.get_or_create_task("Read later list").await.unwrap();
    assert_eq!(task_a.id, task_b.id);
    assert!(!task_a.completed);

    let act_a = repo.get_or_create_activity("Research").await.unwrap();
    let act_b = repo.get_or_create_activity("Research").await.unwrap();
    assert_eq!(act_a.id, act_b.id);
}

#[tokio::test]
async fn delete_cascades_associations_and_search_row() {
    let (repo, _dir) = test_repository().await;

    let link = repo.create_link(new_link("http://example.com/a")).await.unwrap();
    let tag = repo.get_or_create_tag("rust").await.unwrap();
    let category = repo.get_or_create_category("Tech").await.unwrap();
    let task = repo.get_or_create_task("Review").await.unwrap();
    repo.link_tag(link.id, tag.id).await.unwrap();
    repo.link_category(link.id, category.id).await.unwrap();
    repo.link_task(link.id, task.id).await.unwrap();

    repo.delete_link(link.id).await.unwrap();

    assert!(repo.get_link(link.id).await.unwrap().is_none());
    assert_eq!(repo.count_search_rows().await.unwrap(), 0);
    assert!(repo.get_tags_for_link(link.id).await.unwrap().is_empty());
    assert!(repo.get_categories_for_link(link.id).await.unwrap().is_empty());
    // The tag and category rows themselves survive.
    assert_eq!(repo.get_or_create_tag("rust").await.unwrap().id, tag.id);
}

#[tokio::test]
async fn status_updates_and_timestamps() {
    let (repo, _dir) = test_repository().await;

    let link = repo.create_link(new_link("http://example.com/a")).await.unwrap();
    assert!(link.fetched_at.is_none());
    assert!(link.summarized_at.is_none());

    repo.update_link_status(link.id, LinkStatus::Archived).await.unwrap();
    repo.touch_fetched_at(link.id).await.unwrap();
    repo.touch_summarized_at(link.id).await.unwrap();

    let link = repo.get_link(link.id).await.unwrap().unwrap();
    assert_eq!(link.status, LinkStatus::Archived);
    assert!(link.fetched_at.is_some());
    assert!(link.summarized_at.is_some());
}
