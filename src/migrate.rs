use std::collections::HashSet;

use bson::{oid::ObjectId, Document};
use mongodb::{options::IndexOptions, IndexModel};
use serde::{Deserialize, Serialize};

use crate::{app::AppState, collection, mongo_ext::Collection};

#[derive(Serialize, Deserialize, Debug)]
pub struct MigrateModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub version: i64,
}

collection!(MigrationCollection, MigrateModel);

impl MigrationCollection {
    pub async fn insert_version(&self, version: i64) -> Result<(), mongodb::error::Error> {
        self.insert_one(
            MigrateModel {
                id: ObjectId::new(),
                version,
            },
            None,
        )
        .await
        .map(|_| ())
    }

    async fn applied_versions(&self) -> Result<HashSet<i64>, mongodb::error::Error> {
        let mut cursor = self.find(None, None).await?;

        let mut versions = HashSet::new();
        while cursor.advance().await? {
            versions.insert(cursor.deserialize_current()?.version);
        }

        Ok(versions)
    }
}

fn index(keys: Document, unique: bool) -> IndexModel {
    let builder = IndexModel::builder().keys(keys);
    if unique {
        builder
            .options(IndexOptions::builder().unique(true).build())
            .build()
    } else {
        builder.build()
    }
}

async fn create_indexes<T: Send + Sync>(
    collection: &Collection<T>,
    indexes: impl IntoIterator<Item = IndexModel>,
) -> Result<(), mongodb::error::Error> {
    collection.create_indexes(indexes, None).await.map(|_| ())
}

impl AppState {
    /// Uniqueness the handlers rely on: one account per email, one offer per order.
    async fn v1_migrate(&self) -> Result<(), mongodb::error::Error> {
        create_indexes(
            &self.migrate_collection.0,
            [index(bson::doc! { "version": 1 }, true)],
        )
        .await?;
        create_indexes(
            &self.user_collection.0,
            [index(bson::doc! { "email": 1 }, true)],
        )
        .await?;
        create_indexes(
            &self.offer_collection.0,
            [
                index(bson::doc! { "offer_number": 1 }, true),
                index(bson::doc! { "order_id": 1 }, true),
            ],
        )
        .await?;

        Ok(())
    }

    async fn v2_migrate(&self) -> Result<(), mongodb::error::Error> {
        create_indexes(
            &self.order_collection.0,
            [
                index(bson::doc! { "user_id": 1, "created_at": -1 }, false),
                index(bson::doc! { "status": 1 }, false),
            ],
        )
        .await?;
        create_indexes(
            &self.offer_collection.0,
            [index(bson::doc! { "user_id": 1 }, false)],
        )
        .await?;
        create_indexes(
            &self.notification_collection.0,
            [index(bson::doc! { "user_id": 1, "read": 1, "created_at": -1 }, false)],
        )
        .await?;
        create_indexes(
            &self.audit_collection.0,
            [
                index(bson::doc! { "created_at": -1 }, false),
                index(bson::doc! { "entity": 1, "entity_id": 1 }, false),
            ],
        )
        .await?;
        create_indexes(
            &self.report_collection.0,
            [index(bson::doc! { "created_at": -1 }, false)],
        )
        .await?;

        Ok(())
    }

    /// Applies every migration not yet recorded. Index builds cannot run inside a
    /// transaction, so each version is recorded only after its indexes exist.
    pub async fn run_migration(&self) -> Result<(), mongodb::error::Error> {
        let applied = self.migrate_collection.applied_versions().await?;

        macro_rules! migrate {
            ($version:expr, $fun:ident) => {
                if !applied.contains(&$version) {
                    tracing::debug!("running migration version {}", $version);
                    self.$fun().await?;
                    self.migrate_collection.insert_version($version).await?;
                }
            };
        }

        migrate!(1, v1_migrate);
        migrate!(2, v2_migrate);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::api::v1::tests::bootstrap;

    use super::*;

    #[test]
    fn test_index_options() {
        let unique = index(bson::doc! { "email": 1 }, true);
        assert_eq!(unique.options.and_then(|it| it.unique), Some(true));

        let plain = index(bson::doc! { "status": 1 }, false);
        assert!(plain.options.is_none());
    }

    #[tokio::test]
    #[ignore = "requires a MongoDB replica set (MONGODB_URI)"]
    async fn test_migration_is_idempotent() {
        let bootstrap = bootstrap().await;
        let state = &bootstrap.app_state;

        state.run_migration().await.unwrap();

        let versions = state.migrate_collection.applied_versions().await.unwrap();
        assert_eq!(versions, HashSet::from([1, 2]));
        assert_eq!(state.migrate_collection.count_documents(None, None).await.unwrap(), 2);
    }
}
