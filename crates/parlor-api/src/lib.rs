pub mod auth;
pub mod chats;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod reactions;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post, put},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// Full HTTP surface: `/signup` and `/login` are public, everything else
/// lives under `/api` behind the bearer-token check.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/user/chats", get(chats::list_my_chats))
        .route("/chats", post(chats::create_chat))
        .route(
            "/chats/{chat_id}",
            get(chats::get_chat)
                .put(chats::update_chat)
                .delete(chats::delete_chat),
        )
        .route("/chats/{chat_id}/add-users", post(chats::add_members))
        .route("/chats/{chat_id}/remove-users", delete(chats::remove_members))
        .route("/chats/{chat_id}/messages", get(messages::list_messages))
        .route("/chats/{chat_id}/messages/bulk", post(messages::send_bulk))
        .route("/chats/{chat_id}/messages/search", post(messages::search_messages))
        .route("/messages", post(messages::send_message))
        .route(
            "/messages/private/{user_id}",
            get(messages::private_messages),
        )
        .route(
            "/messages/{message_id}",
            get(messages::get_message)
                .put(messages::update_message)
                .delete(messages::delete_message),
        )
        .route("/messages/{message_id}/delivered", put(messages::mark_delivered))
        .route("/messages/{message_id}/read", put(messages::mark_read))
        .route(
            "/messages/{message_id}/reactions",
            post(reactions::add_or_update_reaction)
                .delete(reactions::remove_reaction)
                .get(reactions::list_reactions),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .nest("/api", protected_routes)
        .with_state(state)
}
