use tempfile::TempDir;

use super::*;

async fn memory_catalog() -> Catalog {
    Catalog::open(None).await.unwrap()
}

#[tokio::test]
async fn schema_is_created() {
    let mut catalog = memory_catalog().await;
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx%' ORDER BY name",
    )
    .fetch_all(&mut catalog.connection)
    .await
    .unwrap();

    assert_eq!(tables, vec!["documents", "row_counters"]);
}

#[tokio::test]
async fn row_counter_round_trip() {
    let mut catalog = memory_catalog().await;
    assert_eq!(catalog.next_row_id("chunks").await.unwrap(), None);

    catalog.set_next_row_id("chunks", 5).await.unwrap();
    catalog.set_next_row_id("chunks", 9).await.unwrap();
    catalog.set_next_row_id("other", 2).await.unwrap();

    assert_eq!(catalog.next_row_id("chunks").await.unwrap(), Some(9));
    assert_eq!(catalog.next_row_id("other").await.unwrap(), Some(2));
}

#[tokio::test]
async fn repeated_batches_accumulate_into_one_document() {
    let mut catalog = memory_catalog().await;
    let id = Uuid::new_v4();

    catalog.record_document(id, "chunks", 1..4).await.unwrap();
    catalog.record_document(id, "chunks", 10..12).await.unwrap();
    catalog.record_document(id, "chunks", 20..20).await.unwrap();

    let documents = catalog.documents("chunks").await.unwrap();
    assert_eq!(documents.len(), 1);
    let document = &documents[0];
    assert_eq!(document.id, id);
    assert_eq!(document.chunk_count, 5);
    assert_eq!(document.first_row_id, 1);
    assert_eq!(document.last_row_id, 11);
}

#[tokio::test]
async fn documents_are_scoped_by_table() {
    let mut catalog = memory_catalog().await;
    let id = Uuid::new_v4();
    catalog.record_document(id, "a", 1..2).await.unwrap();
    catalog.record_document(id, "b", 1..3).await.unwrap();

    assert!(catalog.remove_document(id, "a").await.unwrap());
    assert!(!catalog.remove_document(id, "a").await.unwrap());
    assert!(catalog.documents("a").await.unwrap().is_empty());
    assert_eq!(catalog.documents("b").await.unwrap()[0].chunk_count, 2);
}

#[tokio::test]
async fn rollback_discards_changes() {
    let mut catalog = memory_catalog().await;

    catalog.begin().await.unwrap();
    catalog.set_next_row_id("chunks", 100).await.unwrap();
    catalog
        .record_document(Uuid::new_v4(), "chunks", 1..100)
        .await
        .unwrap();
    catalog.rollback().await;

    assert_eq!(catalog.next_row_id("chunks").await.unwrap(), None);
    assert!(catalog.documents("chunks").await.unwrap().is_empty());

    catalog.begin().await.unwrap();
    catalog.set_next_row_id("chunks", 7).await.unwrap();
    catalog.commit().await.unwrap();
    assert_eq!(catalog.next_row_id("chunks").await.unwrap(), Some(7));
}

#[tokio::test]
async fn remove_table_and_remove_all() {
    let mut catalog = memory_catalog().await;
    for table in ["a", "b"] {
        catalog.set_next_row_id(table, 3).await.unwrap();
        catalog
            .record_document(Uuid::new_v4(), table, 1..3)
            .await
            .unwrap();
    }

    catalog.remove_table("a").await.unwrap();
    assert_eq!(catalog.next_row_id("a").await.unwrap(), None);
    assert!(catalog.documents("a").await.unwrap().is_empty());
    assert_eq!(catalog.documents("b").await.unwrap().len(), 1);

    catalog.remove_all().await.unwrap();
    assert_eq!(catalog.next_row_id("b").await.unwrap(), None);
    assert!(catalog.documents("b").await.unwrap().is_empty());
}

#[tokio::test]
async fn file_catalog_persists() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("catalog.db");
    let id = Uuid::new_v4();

    {
        let mut catalog = Catalog::open(Some(&path)).await.unwrap();
        catalog.set_next_row_id("chunks", 42).await.unwrap();
        catalog.record_document(id, "chunks", 1..42).await.unwrap();
    }

    let mut reopened = Catalog::open(Some(&path)).await.unwrap();
    assert_eq!(reopened.next_row_id("chunks").await.unwrap(), Some(42));
    assert_eq!(reopened.documents("chunks").await.unwrap()[0].id, id);
}
