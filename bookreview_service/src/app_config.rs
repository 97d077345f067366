use paperclip::actix::web;

use crate::handlers;

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(
            web::scope("/api")
                .service(
                    web::resource("/books")
                        .route(web::get().to(handlers::list_books))
                        .route(web::post().to(handlers::add_book)),
                )
                .service(
                    web::resource("/books/{book_id}")
                        .route(web::get().to(handlers::get_book))
                        .route(web::put().to(handlers::update_book))
                        .route(web::delete().to(handlers::delete_book)),
                )
                .service(
                    web::scope("/reviews")
                        .service(web::resource("").route(web::post().to(handlers::add_review)))
                        .service(
                            web::resource("/book/{book_id}")
                                .route(web::get().to(handlers::list_reviews_for_book)),
                        )
                        .service(
                            web::resource("/user/{user_id}")
                                .route(web::get().to(handlers::list_reviews_by_user)),
                        )
                        .service(
                            web::resource("/{review_id}")
                                .route(web::put().to(handlers::update_review))
                                .route(web::delete().to(handlers::delete_review)),
                        ),
                ),
        );
}
