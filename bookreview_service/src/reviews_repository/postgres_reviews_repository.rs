use anyhow::Context;
use serde_json::json;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row, Statement};

use crate::api::{BookId, Review, ReviewDetails, ReviewId, ReviewPatch, UserId};
use crate::reviews_repository::{ReviewsRepository, ReviewsRepositoryError};

pub struct PostgresReviewsRepository {
    client: Client,
}

pub struct PostgresReviewsRepositoryConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

impl PostgresReviewsRepository {
    pub async fn init(config: PostgresReviewsRepositoryConfig) -> anyhow::Result<Self> {
        let connection_str = format!(
            "postgresql://{}:{}@{}",
            config.username, config.password, config.hostname
        );
        tracing::info!("Postgres connection_str: {}", connection_str);
        let (client, connection) = tokio_postgres::connect(&connection_str, NoTls)
            .await
            .context("Failed to start postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("connection error: {}", e);
            }
        });

        // The UNIQUE constraint is the authoritative guard for the
        // one-review-per-user-per-book rule.
        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS reviews (
            id              SERIAL PRIMARY KEY,
            book_id         INT NOT NULL,
            user_id         INT NOT NULL,
            params          JSONB NOT NULL,
            created_at      BIGINT NOT NULL,
            updated_at      BIGINT NOT NULL,
            UNIQUE (book_id, user_id)
            )
        ",
            )
            .await
            .context("Failed to setup table")?;
        Ok(Self { client })
    }
}

const REVIEW_COLUMNS: &str = "id, book_id, user_id, params, created_at, updated_at";

fn row_to_review(row: &Row) -> Result<Review, ReviewsRepositoryError> {
    let params: serde_json::Value = row.try_get("params")?;
    Ok(Review {
        id: row.try_get("id")?,
        book_id: row.try_get("book_id")?,
        user_id: row.try_get("user_id")?,
        details: serde_json::from_value(params)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn is_unique_violation(err: &tokio_postgres::Error) -> bool {
    err.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

#[async_trait::async_trait]
impl ReviewsRepository for PostgresReviewsRepository {
    async fn add_review(
        &self,
        book_id: BookId,
        user_id: UserId,
        details: ReviewDetails,
    ) -> Result<Review, ReviewsRepositoryError> {
        details
            .validate()
            .map_err(ReviewsRepositoryError::Validation)?;

        let stmt: Statement = self
            .client
            .prepare(&format!(
                "INSERT INTO reviews (book_id, user_id, params, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $4) RETURNING {REVIEW_COLUMNS}"
            ))
            .await?;

        let now = chrono::Utc::now().timestamp();
        let rows = match self
            .client
            .query(&stmt, &[&book_id, &user_id, &json!(details), &now])
            .await
        {
            Ok(rows) => rows,
            Err(err) if is_unique_violation(&err) => {
                return Err(ReviewsRepositoryError::Duplicate { book_id, user_id })
            }
            Err(err) => return Err(err.into()),
        };

        let row = rows
            .first()
            .ok_or_else(|| ReviewsRepositoryError::Other("Review not returned".to_string()))?;
        row_to_review(row)
    }

    async fn get_review(&self, review_id: ReviewId) -> Result<Review, ReviewsRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = ($1)"
            ))
            .await?;

        let rows = self.client.query(&stmt, &[&review_id]).await?;
        let row = rows
            .first()
            .ok_or(ReviewsRepositoryError::NotFound(review_id))?;
        row_to_review(row)
    }

    async fn list_by_book(&self, book_id: BookId) -> Result<Vec<Review>, ReviewsRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews WHERE book_id = ($1) \
                 ORDER BY created_at DESC, id DESC"
            ))
            .await?;

        let rows = self.client.query(&stmt, &[&book_id]).await?;
        rows.iter().map(row_to_review).collect()
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Review>, ReviewsRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews WHERE user_id = ($1) \
                 ORDER BY created_at DESC, id DESC"
            ))
            .await?;

        let rows = self.client.query(&stmt, &[&user_id]).await?;
        rows.iter().map(row_to_review).collect()
    }

    async fn find_by_book_and_user(
        &self,
        book_id: BookId,
        user_id: UserId,
    ) -> Result<Option<Review>, ReviewsRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews \
                 WHERE book_id = ($1) AND user_id = ($2)"
            ))
            .await?;

        let rows = self.client.query(&stmt, &[&book_id, &user_id]).await?;
        rows.first().map(row_to_review).transpose()
    }

    async fn update_review(
        &self,
        review_id: ReviewId,
        patch: ReviewPatch,
    ) -> Result<Review, ReviewsRepositoryError> {
        // Merge client-side so the merged details are validated before the write.
        let review = self.get_review(review_id).await?;
        let mut merged = json!(review.details);
        json_patch::merge(&mut merged, &json!(patch));
        let merged: ReviewDetails = serde_json::from_value(merged)?;
        merged
            .validate()
            .map_err(ReviewsRepositoryError::Validation)?;

        let stmt: Statement = self
            .client
            .prepare(&format!(
                "UPDATE reviews SET params = ($1), updated_at = ($2) WHERE id = ($3) \
                 RETURNING {REVIEW_COLUMNS}"
            ))
            .await?;
        let now = chrono::Utc::now().timestamp();
        let rows = self
            .client
            .query(&stmt, &[&json!(merged), &now, &review_id])
            .await?;

        let row = rows
            .first()
            .ok_or(ReviewsRepositoryError::NotFound(review_id))?;
        row_to_review(row)
    }

    async fn delete_review(&self, review_id: ReviewId) -> Result<(), ReviewsRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("DELETE FROM reviews WHERE id = ($1) RETURNING id")
            .await?;

        let rows = self.client.query(&stmt, &[&review_id]).await?;
        if rows.is_empty() {
            Err(ReviewsRepositoryError::NotFound(review_id))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod postgres_reviews_repository_tests {
    use serial_test::file_serial;
    use testcontainers::core::IntoContainerPort;
    use testcontainers::runners::AsyncRunner;
    use testcontainers::{ContainerAsync, GenericImage, ImageExt};

    use crate::api::{ReviewDetails, ReviewPatch};
    use crate::reviews_repository::{ReviewsRepository, ReviewsRepositoryError};

    async fn start_postgres_container_and_init_repo() -> (
        ContainerAsync<GenericImage>,
        crate::reviews_repository::PostgresReviewsRepository,
    ) {
        let _pg_container = GenericImage::new("postgres", "latest")
            .with_mapped_port(5432, 5432.tcp())
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .start()
            .await
            .expect("Failed to start postgres");

        for _ in 0..10 {
            if let Ok(repo) = crate::reviews_repository::PostgresReviewsRepository::init(
                crate::reviews_repository::PostgresReviewsRepositoryConfig {
                    hostname: "127.0.0.1".to_string(),
                    username: "postgres".to_string(),
                    password: "postgres".to_string(),
                },
            )
            .await
            {
                return (_pg_container, repo);
            }
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
        panic!("Failed to setup postgres container")
    }

    fn review_details(rating: i32, text: &str) -> ReviewDetails {
        ReviewDetails {
            rating,
            review_text: text.to_string(),
        }
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Tests the review lifecycle against postgres, including the unique
    /// constraint mapping to the Duplicate error
    /// for the sake of not starting container multiple times it tests everything in one testcase
    async fn test_review_lifecycle() {
        let (_container, repo) = start_postgres_container_and_init_repo().await;

        assert!(matches!(
            repo.get_review(12345).await,
            Err(ReviewsRepositoryError::NotFound(..))
        ));

        let review = repo
            .add_review(1, 1, review_details(4, "Great book"))
            .await
            .expect("Failed to add review");

        // Unique violation surfaces as the Duplicate error
        let duplicate = repo.add_review(1, 1, review_details(5, "Again")).await;
        assert!(matches!(
            duplicate,
            Err(ReviewsRepositoryError::Duplicate { book_id: 1, user_id: 1 })
        ));

        repo.add_review(1, 2, review_details(5, "Other user"))
            .await
            .unwrap();
        repo.add_review(2, 1, review_details(3, "Other book"))
            .await
            .unwrap();

        let by_book = repo.list_by_book(1).await.unwrap();
        assert_eq!(by_book.len(), 2);
        let by_user = repo.list_by_user(1).await.unwrap();
        assert_eq!(by_user.len(), 2);

        let found = repo.find_by_book_and_user(1, 1).await.unwrap();
        assert_eq!(found, Some(review.clone()));
        assert_eq!(repo.find_by_book_and_user(9, 9).await.unwrap(), None);

        let updated = repo
            .update_review(
                review.id,
                ReviewPatch {
                    rating: Some(5),
                    ..ReviewPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.details.rating, 5);
        assert_eq!(updated.details.review_text, "Great book");

        repo.delete_review(review.id).await.unwrap();
        assert!(matches!(
            repo.get_review(review.id).await,
            Err(ReviewsRepositoryError::NotFound(..))
        ));

        // Slot is free again after the delete
        repo.add_review(1, 1, review_details(2, "Second thoughts"))
            .await
            .expect("Slot should be free after delete");
    }
}
