use axum::routing::{get, patch, post, put};
use axum::Router;

use crate::config::create_cors_layer;
use crate::handlers::{applications, clubs, health_check, tickets, AppState};

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // club lifecycle
        .route("/clubs/:code", get(clubs::get_club).patch(clubs::patch_club))
        .route("/clubs/:code/submit", post(clubs::submit_club))
        .route("/clubs/:code/invite", post(clubs::create_invites))
        .route(
            "/clubs/:code/invites/:invite_id",
            patch(clubs::claim_invite).delete(clubs::rescind_invite),
        )
        .route(
            "/clubs/:code/invites/:invite_id/resend",
            put(clubs::resend_invite),
        )
        .route(
            "/clubs/:code/request-ownership",
            post(clubs::request_ownership),
        )
        .route(
            "/clubs/:code/ownership-requests/:request_id",
            patch(clubs::resolve_ownership),
        )
        // applications
        .route(
            "/clubs/:code/applications",
            post(applications::create_application),
        )
        .route(
            "/clubs/:code/applications/:application_id/clone",
            post(applications::clone_application),
        )
        .route(
            "/clubs/:code/applications/:application_id/normalize-committees",
            post(applications::normalize_committees),
        )
        .route(
            "/clubs/:code/applications/:application_id/submit",
            post(applications::submit_application),
        )
        .route(
            "/clubs/:code/applications/:application_id/send-emails",
            post(applications::send_decision_emails),
        )
        // ticketing on a showing
        .route(
            "/clubs/:code/events/:event_id/showings/:showing_id/tickets",
            put(tickets::define_classes).get(tickets::get_availability),
        )
        .route(
            "/clubs/:code/events/:event_id/showings/:showing_id/add-to-cart",
            post(tickets::add_to_cart),
        )
        .route(
            "/clubs/:code/events/:event_id/showings/:showing_id/issue-tickets",
            post(tickets::issue_tickets),
        )
        // carts and tickets
        .route("/tickets/initiate-checkout", post(tickets::initiate_checkout))
        .route("/tickets/complete-checkout", post(tickets::complete_checkout))
        .route("/tickets/cart", get(tickets::get_cart))
        .route("/tickets/", get(tickets::list_tickets))
        .route(
            "/tickets/:ticket_id",
            get(tickets::get_ticket)
                .patch(tickets::patch_ticket)
                .delete(tickets::delete_ticket),
        )
        .route("/tickets/:ticket_id/transfer", post(tickets::transfer_ticket))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(create_cors_layer())
        .with_state(state)
}
