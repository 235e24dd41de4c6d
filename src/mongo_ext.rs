use std::ops::Deref;

use bson::{oid::ObjectId, Document};
use mongodb::{options::FindOptions, ClientSession};
use serde::de::DeserializeOwned;

use crate::{
    error::Error,
    util::{Page, PageQuery},
};

pub struct Collection<T>(pub mongodb::Collection<T>);

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Collection<T> {
    type Target = mongodb::Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> From<mongodb::Collection<T>> for Collection<T> {
    fn from(value: mongodb::Collection<T>) -> Self {
        Self(value)
    }
}

/// Declares a cloneable newtype over [`Collection`] so each collection can be a distinct
/// piece of axum state.
#[macro_export]
macro_rules! collection {
    ($name:ident, $model:ty) => {
        #[derive(Clone)]
        pub struct $name(pub $crate::mongo_ext::Collection<$model>);

        impl std::ops::Deref for $name {
            type Target = $crate::mongo_ext::Collection<$model>;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<mongodb::Collection<$model>> for $name {
            fn from(value: mongodb::Collection<$model>) -> Self {
                Self(value.into())
            }
        }
    };
}

impl<T> Collection<T>
where
    T: DeserializeOwned + Send + Sync + Unpin,
{
    pub async fn get_one_by_id(&self, id: ObjectId) -> Result<Option<T>, Error> {
        self.find_one(bson::doc! { "_id": id }, None)
            .await
            .map_err(Into::into)
    }

    pub async fn get_one_by_id_with_session(
        &self,
        id: ObjectId,
        session: &mut ClientSession,
    ) -> Result<Option<T>, Error> {
        self.find_one_with_session(bson::doc! { "_id": id }, None, session)
            .await
            .map_err(Into::into)
    }

    pub async fn find_all(
        &self,
        filter: impl Into<Option<Document>>,
        sort: Document,
    ) -> Result<Vec<T>, Error> {
        let mut cursor = self
            .find(filter, FindOptions::builder().sort(sort).build())
            .await?;

        let mut items = vec![];
        while cursor.advance().await? {
            items.push(cursor.deserialize_current()?);
        }

        Ok(items)
    }

    /// Newest first unless `sort` says otherwise.
    pub async fn find_page(
        &self,
        filter: Document,
        sort: Option<Document>,
        query: PageQuery,
    ) -> Result<Page<T>, Error> {
        let total = self.count_documents(filter.clone(), None).await?;

        let options = FindOptions::builder()
            .sort(sort.unwrap_or_else(|| bson::doc! { "created_at": -1, "_id": -1 }))
            .skip(query.skip())
            .limit(i64::try_from(query.limit()).unwrap_or(i64::MAX))
            .build();

        let mut cursor = self.find(filter, options).await?;

        let mut items = vec![];
        while cursor.advance().await? {
            items.push(cursor.deserialize_current()?);
        }

        Ok(Page {
            items,
            page: query.page(),
            limit: query.limit(),
            total,
        })
    }

    pub async fn update_one_by_id(
        &self,
        id: ObjectId,
        update: impl Into<mongodb::options::UpdateModifications>,
    ) -> Result<mongodb::results::UpdateResult, Error> {
        self.update_one(bson::doc! { "_id": id }, update, None)
            .await
            .map_err(Into::into)
    }

    pub async fn update_one_by_id_with_session(
        &self,
        id: ObjectId,
        update: impl Into<mongodb::options::UpdateModifications>,
        session: &mut ClientSession,
    ) -> Result<mongodb::results::UpdateResult, Error> {
        self.update_one_with_session(bson::doc! { "_id": id }, update, None, session)
            .await
            .map_err(Into::into)
    }

    pub async fn delete_one_by_id(&self, id: ObjectId) -> Result<bool, Error> {
        self.delete_one(bson::doc! { "_id": id }, None)
            .await
            .map(|it| it.deleted_count > 0)
            .map_err(Into::into)
    }

    pub async fn delete_one_by_id_with_session(
        &self,
        id: ObjectId,
        session: &mut ClientSession,
    ) -> Result<bool, Error> {
        self.delete_one_with_session(bson::doc! { "_id": id }, None, session)
            .await
            .map(|it| it.deleted_count > 0)
            .map_err(Into::into)
    }
}

/// Options for multi-document writes that must see and leave a consistent snapshot.
pub fn transaction_options() -> mongodb::options::TransactionOptions {
    mongodb::options::TransactionOptions::builder()
        .read_concern(mongodb::options::ReadConcern::snapshot())
        .write_concern(
            mongodb::options::WriteConcern::builder()
                .w(mongodb::options::Acknowledgment::Majority)
                .build(),
        )
        .selection_criteria(mongodb::options::SelectionCriteria::ReadPreference(
            mongodb::options::ReadPreference::Primary,
        ))
        .build()
}

/// How often [`with_transaction!`](crate::with_transaction) runs a body that keeps hitting
/// write conflicts.
pub const TRANSACTION_ATTEMPTS: u32 = 3;

/// Whether the server asked for the whole transaction to be retried, as it does when two
/// transactions write the same document.
pub fn is_transient(err: &Error) -> bool {
    matches!(
        err,
        Error::DatabaseError(err)
            if err.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR)
    )
}

/// Runs `$body` in a transaction on a new session bound to `$session`.
///
/// The body is run again while the failure is transient. A conflict that outlasts
/// [`TRANSACTION_ATTEMPTS`] becomes [`Error::Conflict`]. Evaluates to the body's result.
#[macro_export]
macro_rules! with_transaction {
    ($client:expr, $session:ident => $body:expr) => {{
        let mut $session = $client.start_session(None).await?;
        let mut attempt = 1;
        loop {
            $session
                .start_transaction($crate::mongo_ext::transaction_options())
                .await?;
            let result = $body;
            match $crate::mongo_ext::finish_transaction(&mut $session, result).await {
                Err(err) if $crate::mongo_ext::is_transient(&err) => {
                    if attempt >= $crate::mongo_ext::TRANSACTION_ATTEMPTS {
                        break Err($crate::error::Error::Conflict(
                            "The resource was changed by another request, try again".to_string(),
                        ));
                    }
                    tracing::debug!(attempt, "retrying transaction: {}", err);
                    attempt += 1;
                }
                other => break other,
            }
        }
    }};
}

/// Commits on success and aborts on failure, returning the body's result either way.
pub async fn finish_transaction<T>(
    session: &mut ClientSession,
    result: Result<T, Error>,
) -> Result<T, Error> {
    match result {
        Ok(value) => {
            session.commit_transaction().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(abort) = session.abort_transaction().await {
                tracing::warn!("failed to abort transaction: {}", abort);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_database_errors_are_transient() {
        assert!(!is_transient(&Error::Conflict("taken".to_string())));
        assert!(!is_transient(&Error::NoResource));
    }
}
