use anyhow::Context;
use serde_json::json;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row, Statement};

use crate::api::{Book, BookDetails, BookDetailsPatch, BookId, BookQuery, BookSort, UserId};
use crate::books_repository::{BooksRepository, BooksRepositoryError};

pub struct PostgresBooksRepository {
    client: Client,
}

pub struct PostgresBooksRepositoryConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

impl PostgresBooksRepository {
    pub async fn init(config: PostgresBooksRepositoryConfig) -> anyhow::Result<Self> {
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

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS books (
            id              SERIAL PRIMARY KEY,
            owner_id        INT NOT NULL,
            params          JSONB NOT NULL,
            average_rating  DOUBLE PRECISION NOT NULL DEFAULT 0,
            review_count    INT NOT NULL DEFAULT 0,
            created_at      BIGINT NOT NULL,
            updated_at      BIGINT NOT NULL
            )
        ",
            )
            .await
            .context("Failed to setup table")?;
        Ok(Self { client })
    }
}

const BOOK_COLUMNS: &str =
    "id, owner_id, params, average_rating, review_count, created_at, updated_at";

fn row_to_book(row: &Row) -> Result<Book, BooksRepositoryError> {
    let params: serde_json::Value = row.try_get("params")?;
    let review_count: i32 = row.try_get("review_count")?;
    Ok(Book {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        details: serde_json::from_value(params)?,
        average_rating: row.try_get("average_rating")?,
        review_count: u32::try_from(review_count).unwrap_or(0),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait::async_trait]
impl BooksRepository for PostgresBooksRepository {
    async fn add_book(
        &self,
        details: BookDetails,
        owner_id: UserId,
    ) -> Result<BookId, BooksRepositoryError> {
        details.validate().map_err(BooksRepositoryError::Validation)?;
        let stmt: Statement = self
            .client
            .prepare(
                "INSERT INTO books (owner_id, params, created_at, updated_at) \
                 VALUES ($1, $2, $3, $3) RETURNING id",
            )
            .await?;

        let now = chrono::Utc::now().timestamp();
        let rows = self
            .client
            .query(&stmt, &[&owner_id, &json!(details), &now])
            .await?;

        let book_id: BookId = rows
            .first()
            .ok_or_else(|| BooksRepositoryError::Other("Id not returned".to_string()))?
            .try_get(0)?;

        Ok(book_id)
    }

    async fn get_book(&self, book_id: BookId) -> Result<Book, BooksRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ($1)"))
            .await?;

        let rows = self.client.query(&stmt, &[&book_id]).await?;

        let row = rows
            .first()
            .ok_or(BooksRepositoryError::NotFound(book_id))?;
        row_to_book(row)
    }

    async fn list_books(
        &self,
        query: &BookQuery,
    ) -> Result<(Vec<Book>, u64), BooksRepositoryError> {
        let search_pattern = query.search.as_ref().map(|search| format!("%{search}%"));
        let genre_name = query.genre.map(|genre| genre.as_str().to_string());

        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(pattern) = &search_pattern {
            params.push(pattern);
            conditions.push(format!(
                "(params->>'title' ILIKE ${0} OR params->>'author' ILIKE ${0})",
                params.len()
            ));
        }
        if let Some(genre) = &genre_name {
            params.push(genre);
            conditions.push(format!("params->>'genre' = ${}", params.len()));
        }
        let where_sql = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_stmt = self
            .client
            .prepare(&format!("SELECT COUNT(*) FROM books {where_sql}"))
            .await?;
        let count_rows = self.client.query(&count_stmt, &params).await?;
        let total: i64 = count_rows
            .first()
            .ok_or_else(|| BooksRepositoryError::Other("Count not returned".to_string()))?
            .try_get(0)?;

        let order_sql = match query.sort {
            BookSort::Newest => "ORDER BY created_at DESC, id DESC",
            BookSort::Year => "ORDER BY (params->>'published_year')::INT DESC, created_at DESC",
            BookSort::Rating => "ORDER BY average_rating DESC, created_at DESC",
        };
        let limit = i64::from(query.page_size());
        // Computed in i64 so a huge page number yields an empty page
        // instead of overflowing
        let offset = i64::from(query.page() - 1) * i64::from(query.page_size());
        params.push(&limit);
        let limit_param = params.len();
        params.push(&offset);
        let offset_param = params.len();

        let list_stmt = self
            .client
            .prepare(&format!(
                "SELECT {BOOK_COLUMNS} FROM books {where_sql} {order_sql} \
                 LIMIT ${limit_param} OFFSET ${offset_param}"
            ))
            .await?;
        let rows = self.client.query(&list_stmt, &params).await?;

        let books = rows
            .iter()
            .map(row_to_book)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((books, total as u64))
    }

    async fn update_book(
        &self,
        book_id: BookId,
        patch: BookDetailsPatch,
    ) -> Result<Book, BooksRepositoryError> {
        // Merge is done client-side so the merged details can be validated
        // before anything is persisted.
        let book = self.get_book(book_id).await?;
        let mut merged = json!(book.details);
        json_patch::merge(&mut merged, &json!(patch));
        let merged: BookDetails = serde_json::from_value(merged)?;
        merged.validate().map_err(BooksRepositoryError::Validation)?;

        let stmt: Statement = self
            .client
            .prepare(&format!(
                "UPDATE books SET params = ($1), updated_at = ($2) WHERE id = ($3) \
                 RETURNING {BOOK_COLUMNS}"
            ))
            .await?;
        let now = chrono::Utc::now().timestamp();
        let rows = self
            .client
            .query(&stmt, &[&json!(merged), &now, &book_id])
            .await?;

        let row = rows
            .first()
            .ok_or(BooksRepositoryError::NotFound(book_id))?;
        row_to_book(row)
    }

    async fn delete_book(&self, book_id: BookId) -> Result<(), BooksRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("DELETE FROM books WHERE id = ($1) RETURNING id")
            .await?;

        let rows = self.client.query(&stmt, &[&book_id]).await?;
        if rows.is_empty() {
            Err(BooksRepositoryError::NotFound(book_id))
        } else {
            Ok(())
        }
    }

    async fn set_rating_aggregate(
        &self,
        book_id: BookId,
        average_rating: f64,
        review_count: u32,
    ) -> Result<(), BooksRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "UPDATE books SET average_rating = ($1), review_count = ($2) \
                 WHERE id = ($3) RETURNING id",
            )
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&average_rating, &(review_count as i32), &book_id])
            .await?;
        if rows.is_empty() {
            Err(BooksRepositoryError::NotFound(book_id))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod postgres_books_repository_tests {
    use serial_test::file_serial;
    use testcontainers::core::IntoContainerPort;
    use testcontainers::runners::AsyncRunner;
    use testcontainers::{ContainerAsync, GenericImage, ImageExt};

    use crate::api::{BookDetails, BookDetailsPatch, BookQuery, BookSort, Genre};
    use crate::books_repository::{BooksRepository, BooksRepositoryError};

    async fn start_postgres_container_and_init_repo() -> (
        ContainerAsync<GenericImage>,
        crate::books_repository::PostgresBooksRepository,
    ) {
        let _pg_container = GenericImage::new("postgres", "latest")
            .with_mapped_port(5432, 5432.tcp())
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .start()
            .await
            .expect("Failed to start postgres");

        for _ in 0..10 {
            if let Ok(repo) = crate::books_repository::PostgresBooksRepository::init(
                crate::books_repository::PostgresBooksRepositoryConfig {
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

    fn book_details(title: &str, author: &str, genre: Genre, year: i32) -> BookDetails {
        BookDetails {
            title: title.to_string(),
            author: author.to_string(),
            description: "description".to_string(),
            genre,
            published_year: year,
        }
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Tests add_book, get_book and the aggregate write path
    /// for the sake of not starting container multiple times it tests everything in one testcase
    async fn test_add_book_and_get_it() {
        let (_container, repo) = start_postgres_container_and_init_repo().await;

        let not_existing_book_id = 20000;
        let book_not_found = repo.get_book(not_existing_book_id).await;
        assert!(matches!(
            book_not_found,
            Err(BooksRepositoryError::NotFound(..))
        ));

        let details = book_details("Dune", "Frank Herbert", Genre::ScienceFiction, 1965);
        let id = repo
            .add_book(details.clone(), 7)
            .await
            .expect("Failed to add book");

        let book = repo.get_book(id).await.expect("Failed to get book");
        assert_eq!(book.details, details);
        assert_eq!(book.owner_id, 7);
        assert_eq!(book.average_rating, 0.0);
        assert_eq!(book.review_count, 0);

        repo.set_rating_aggregate(id, 4.5, 2)
            .await
            .expect("Failed to set aggregate");
        let book = repo.get_book(id).await.expect("Failed to get book");
        assert_eq!(book.average_rating, 4.5);
        assert_eq!(book.review_count, 2);

        repo.delete_book(id).await.expect("Failed to delete");
        assert!(matches!(
            repo.get_book(id).await,
            Err(BooksRepositoryError::NotFound(..))
        ));
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Tests filtering, sorting and pagination of list_books against postgres
    /// for the sake of not starting container multiple times it tests everything in one testcase
    async fn test_list_books_filters() {
        let (_container, repo) = start_postgres_container_and_init_repo().await;

        let dune_id = repo
            .add_book(
                book_details("Dune", "Frank Herbert", Genre::ScienceFiction, 1965),
                1,
            )
            .await
            .unwrap();
        let hobbit_id = repo
            .add_book(
                book_details("The Hobbit", "J.R.R. Tolkien", Genre::Fantasy, 1937),
                1,
            )
            .await
            .unwrap();

        let (books, total) = repo
            .list_books(&BookQuery {
                search: Some("tolkien".to_string()),
                ..BookQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(books[0].id, hobbit_id);

        let (books, total) = repo
            .list_books(&BookQuery {
                genre: Some(Genre::ScienceFiction),
                ..BookQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(books[0].id, dune_id);

        let (books, total) = repo
            .list_books(&BookQuery {
                sort: BookSort::Year,
                ..BookQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        let ids: Vec<_> = books.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![dune_id, hobbit_id]);

        let (page_two, total) = repo
            .list_books(&BookQuery {
                sort: BookSort::Year,
                page: Some(2),
                page_size: Some(1),
                ..BookQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page_two.len(), 1);
        assert_eq!(page_two[0].id, hobbit_id);

        // A page number beyond the data, up to u32::MAX, is an empty page
        // with the total still intact
        let (far_page, total) = repo
            .list_books(&BookQuery {
                page: Some(u32::MAX),
                page_size: Some(1),
                ..BookQuery::default()
            })
            .await
            .unwrap();
        assert!(far_page.is_empty());
        assert_eq!(total, 2);
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Tests patching a book stored in postgres
    /// for the sake of not starting container multiple times it tests everything in one testcase
    async fn test_update_book_patch() {
        let (_container, repo) = start_postgres_container_and_init_repo().await;

        let details = book_details("Dune", "Frank Herbert", Genre::ScienceFiction, 1965);
        let id = repo.add_book(details.clone(), 3).await.unwrap();

        let patch_title_only = BookDetailsPatch {
            title: Some("Dune Messiah".to_string()),
            ..BookDetailsPatch::default()
        };
        let updated = repo.update_book(id, patch_title_only).await.unwrap();
        assert_eq!(updated.details.title, "Dune Messiah");
        assert_eq!(updated.details.author, details.author);
        assert_eq!(updated.owner_id, 3);

        let invalid_patch = BookDetailsPatch {
            published_year: Some(1),
            ..BookDetailsPatch::default()
        };
        let result = repo.update_book(id, invalid_patch).await;
        assert!(matches!(result, Err(BooksRepositoryError::Validation(..))));
        assert_eq!(
            repo.get_book(id).await.unwrap().details.published_year,
            1965
        );
    }
}
