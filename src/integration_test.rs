#[cfg(test)]
mod tests {
    use anyhow::Result;
    use data_model::{Category, DatasetPatch, ErrorKind};
    use futures::StreamExt;

    use crate::testing::TestService;

    async fn collect(
        mut stream: futures::stream::BoxStream<'static, Result<bytes::Bytes>>,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_upload_then_download_round_trip() -> Result<()> {
        let test_srv = TestService::new()?;
        let payload = b"name,count\nparks,12\n";
        test_srv.upload("parks.csv", payload).await?;

        let (size, stream) = test_srv.service.inventory.get_file("parks.csv").await?;
        assert_eq!(size, payload.len() as u64);
        assert_eq!(collect(stream).await, payload);
        Ok(())
    }

    #[tokio::test]
    async fn test_download_unknown_name_is_not_found() -> Result<()> {
        let test_srv = TestService::new()?;
        let err = test_srv
            .service
            .inventory
            .get_file("nope.csv")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_metadata_requires_uploaded_file() -> Result<()> {
        let test_srv = TestService::new()?;
        let err = test_srv
            .service
            .inventory
            .update_metadata("ghost.csv", &DatasetPatch::category("Housing"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_category_leaves_record_unchanged() -> Result<()> {
        let test_srv = TestService::new()?;
        test_srv.upload("a.csv", b"x").await?;

        let patch = DatasetPatch {
            dataset_title: Some("should not land".to_string()),
            category: Some("Crime".to_string()),
            ..Default::default()
        };
        let err = test_srv
            .service
            .inventory
            .update_metadata("a.csv", &patch)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let record = test_srv.service.inventory.get_record("a.csv")?;
        assert_eq!(record.dataset_title, "");
        assert_eq!(record.category, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_reupload_overwrites_blob_and_preserves_record() -> Result<()> {
        let test_srv = TestService::new()?;
        let first = test_srv.upload("a.csv", b"first").await?;
        test_srv
            .service
            .inventory
            .update_metadata("a.csv", &DatasetPatch::category("Finance"))
            .await?;

        let second = test_srv.upload("a.csv", b"second version").await?;
        assert_eq!(second.uploaded_at, first.uploaded_at);
        assert_eq!(second.category, Some(Category::Finance));

        let records = test_srv.service.inventory.list(None)?;
        assert_eq!(records.len(), 1);

        let (_, stream) = test_srv.service.inventory.get_file("a.csv").await?;
        assert_eq!(collect(stream).await, b"second version");
        Ok(())
    }

    #[tokio::test]
    async fn test_list_filter_is_exact_and_order_preserving() -> Result<()> {
        let test_srv = TestService::new()?;
        for name in ["one.csv", "two.csv", "three.csv"] {
            test_srv.upload(name, b"x").await?;
        }
        let inventory = &test_srv.service.inventory;
        inventory
            .update_metadata("one.csv", &DatasetPatch::category("Public Safety"))
            .await?;
        inventory
            .update_metadata("two.csv", &DatasetPatch::category("Housing"))
            .await?;
        inventory
            .update_metadata("three.csv", &DatasetPatch::category("Public Safety"))
            .await?;

        let all: Vec<String> = inventory
            .list(None)?
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        assert_eq!(all, vec!["one.csv", "two.csv", "three.csv"]);

        let filtered: Vec<String> = inventory
            .list(Some("Public Safety"))?
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        assert_eq!(filtered, vec!["one.csv", "three.csv"]);

        // case-sensitive exact match, no partial match
        assert!(inventory.list(Some("public safety"))?.is_empty());
        assert!(inventory.list(Some("Public"))?.is_empty());
        // empty filter is no filter
        assert_eq!(inventory.list(Some(""))?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_bulk_delete_reports_per_item_results() -> Result<()> {
        let test_srv = TestService::new()?;
        test_srv.upload("a.csv", b"a").await?;
        test_srv.upload("c.csv", b"c").await?;

        let outcome = test_srv
            .service
            .inventory
            .bulk_delete(vec![
                "a.csv".to_string(),
                "b.csv".to_string(),
                "c.csv".to_string(),
            ])
            .await;

        let mut succeeded = outcome.succeeded.clone();
        succeeded.sort();
        assert_eq!(succeeded, vec!["a.csv", "c.csv"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed["b.csv"].kind(), ErrorKind::NotFound);

        // fully removed from both stores
        for name in ["a.csv", "c.csv"] {
            assert!(test_srv.service.inventory.get_record(name).is_err());
            assert!(!test_srv.service.blob_storage.exists(name).await?);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_bulk_category_update() -> Result<()> {
        let test_srv = TestService::new()?;
        test_srv.upload("a.csv", b"a").await?;
        test_srv.upload("b.csv", b"b").await?;

        let outcome = test_srv
            .service
            .inventory
            .bulk_update_category(
                vec![
                    "a.csv".to_string(),
                    "missing.csv".to_string(),
                    "b.csv".to_string(),
                ],
                "Education",
            )
            .await;
        assert_eq!(outcome.succeeded.len(), 2);
        assert_eq!(outcome.failed["missing.csv"].kind(), ErrorKind::NotFound);
        assert_eq!(
            test_srv.service.inventory.get_record("a.csv")?.category,
            Some(Category::Education)
        );

        // an invalid category fails every item without touching records
        let outcome = test_srv
            .service
            .inventory
            .bulk_update_category(vec!["a.csv".to_string()], "Crime")
            .await;
        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.failed["a.csv"].kind(), ErrorKind::ValidationError);
        assert_eq!(
            test_srv.service.inventory.get_record("a.csv")?.category,
            Some(Category::Education)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_export_is_deterministic() -> Result<()> {
        let test_srv = TestService::new()?;
        test_srv.upload("a.csv", b"a").await?;
        test_srv.upload("b.csv", b"b").await?;
        test_srv
            .service
            .inventory
            .update_metadata("a.csv", &DatasetPatch::category("Recreation"))
            .await?;

        let first = test_srv.service.inventory.export()?;
        let second = test_srv.service.inventory.export()?;
        assert!(!first.is_empty());
        assert_eq!(first, second);

        let (name, single) = test_srv.service.inventory.export_single("a.csv")?;
        assert_eq!(name, "a.csv");
        assert!(!single.is_empty());
        assert!(test_srv.service.inventory.export_single("nope.csv").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_delete_and_update_leave_no_orphans() -> Result<()> {
        let test_srv = TestService::new()?;
        test_srv.upload("a.csv", b"a").await?;

        let inventory = test_srv.service.inventory.clone();
        let delete_task = tokio::spawn({
            let inventory = inventory.clone();
            async move { inventory.delete("a.csv").await }
        });
        let update_task = tokio::spawn({
            let inventory = inventory.clone();
            async move {
                inventory
                    .update_metadata("a.csv", &DatasetPatch::category("Utilities"))
                    .await
            }
        });

        delete_task.await?.unwrap();
        // the update either landed before the delete or observed NotFound
        if let Err(err) = update_task.await? {
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }

        // never an orphaned blob or orphaned metadata record
        assert!(inventory.get_record("a.csv").is_err());
        assert!(!test_srv.service.blob_storage.exists("a.csv").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_stalled_blob_write_surfaces_as_timeout() -> Result<()> {
        let test_srv = TestService::new()?;
        // same stores, much shorter blob deadline
        let inventory = crate::inventory::Inventory::new(
            test_srv.service.inventory_state.clone(),
            test_srv.service.blob_storage.clone(),
            std::time::Duration::from_millis(50),
        );

        let err = inventory
            .upload(
                "stalled.csv",
                futures::stream::pending::<Result<bytes::Bytes>>(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        // no metadata record is created for a write that never finished
        assert!(inventory.get_record("stalled.csv").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_releases_file_lock_entry() -> Result<()> {
        let test_srv = TestService::new()?;
        test_srv.upload("a.csv", b"a").await?;
        test_srv.upload("keep.csv", b"k").await?;

        test_srv.service.inventory.delete("a.csv").await?;
        assert_eq!(test_srv.service.inventory.file_lock_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_normalizes_file_name() -> Result<()> {
        let test_srv = TestService::new()?;
        let record = test_srv.upload("dir/sub/report.csv", b"x").await?;
        assert_eq!(record.file_name, "report.csv");
        assert_eq!(record.file_type, "csv");
        assert!(test_srv.service.inventory.get_record("report.csv").is_ok());
        Ok(())
    }
}
